#![allow(dead_code)]

use async_trait::async_trait;
use course_engine::{
    models::*,
    objects::LocalObjectStore,
    payment::PaymentGateway,
    routes::{self, AppState},
    store::MemoryStore,
    Engine, EngineResult,
};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use uuid::Uuid;

pub const FACULTY: &str = "prof-ada";

/// Records checkout requests instead of calling out.
#[derive(Default)]
pub struct RecordingGateway {
    pub calls: Mutex<Vec<(String, Uuid, i64)>>,
}

#[async_trait]
impl PaymentGateway for RecordingGateway {
    async fn initiate(&self, learner_id: &str, course_id: Uuid, amount: i64) -> EngineResult<String> {
        self.calls
            .lock()
            .unwrap()
            .push((learner_id.to_string(), course_id, amount));
        Ok(format!("https://pay.example/checkout/{course_id}"))
    }
}

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub payments: Arc<RecordingGateway>,
    pub engine: Engine,
    pub data_dir: TempDir,
    pub free: Course,
    pub paid: Course,
    pub quiz: Quiz,
    pub exam: WrittenExam,
}

pub fn course(price: Price, videos: usize) -> Course {
    Course {
        id: Uuid::new_v4(),
        title: "Practical Rust".into(),
        price,
        videos: (1..=videos)
            .map(|i| Video { id: i.to_string(), title: format!("Lesson {i}") })
            .collect(),
        faculty_id: FACULTY.into(),
        resources: vec!["https://doc.rust-lang.org/book/".into()],
    }
}

pub fn question(correct: u32) -> Question {
    Question {
        text: format!("Which option is {correct}?"),
        options: ["zero".into(), "one".into(), "two".into(), "three".into()],
        correct_option_index: correct,
    }
}

pub async fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let payments = Arc::new(RecordingGateway::default());
    let data_dir = tempfile::tempdir().expect("tempdir");

    let free = course(Price::Free, 4);
    let paid = course(Price::Priced(49_900), 4);
    let quiz = Quiz {
        id: Uuid::new_v4(),
        course_id: paid.id,
        title: "Ownership".into(),
        questions: [0, 1, 2, 3, 0].into_iter().map(question).collect(),
    };
    let exam = WrittenExam {
        id: Uuid::new_v4(),
        course_id: paid.id,
        title: "Final".into(),
        description: "Explain borrowing.".into(),
        pdf_ref: None,
    };

    store.put_course(free.clone()).await;
    store.put_course(paid.clone()).await;
    store.put_quiz(quiz.clone()).await;
    store.put_exam(exam.clone()).await;
    store.put_profile("stu-1", "Grace Hopper").await;

    let engine = Engine::new(
        store.clone(),
        Arc::new(LocalObjectStore::new(data_dir.path())),
        payments.clone(),
    );

    Fixture { store, payments, engine, data_dir, free, paid, quiz, exam }
}

impl Fixture {
    pub fn app(&self) -> axum::Router {
        routes::router(AppState {
            engine: self.engine.clone(),
            data_dir: self.data_dir.path().to_path_buf(),
            max_upload_bytes: 1024 * 1024,
        })
    }

    /// Paid enrollment through the gateway callback.
    pub async fn enroll_paid(&self, learner_id: &str) {
        self.engine
            .payment_callback(&PaymentOutcome {
                learner_id: learner_id.into(),
                course_id: self.paid.id,
                status: PaymentStatus::Success,
            })
            .await
            .expect("paid enrollment");
    }
}

pub fn student(id: &str) -> Learner {
    Learner::student(id)
}

pub fn owner() -> Learner {
    Learner::new(FACULTY, Role::Faculty)
}
