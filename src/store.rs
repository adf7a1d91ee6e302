use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    error::{EngineError, EngineResult},
    models::*,
};

/// Document-store primitives the engine is written against.
///
/// Every method is one round trip. Methods that touch more than one record
/// commit all of it or none of it.
#[async_trait]
pub trait Store: Send + Sync {
    // catalog (read-only here)
    async fn course(&self, id: Uuid) -> EngineResult<Option<Course>>;
    async fn quiz(&self, id: Uuid) -> EngineResult<Option<Quiz>>;
    async fn exam(&self, id: Uuid) -> EngineResult<Option<WrittenExam>>;
    async fn display_name(&self, learner_id: &str) -> EngineResult<Option<String>>;

    // enrollment ledger
    async fn enrollment(&self, learner_id: &str, course_id: Uuid) -> EngineResult<Option<Enrollment>>;

    /// Creates the enrollment, its reverse-index entry and bumps the course counter.
    /// Returns `false` without touching anything when the key already exists.
    async fn create_enrollment(&self, enrollment: &Enrollment) -> EngineResult<bool>;

    async fn enrollments_for(&self, learner_id: &str) -> EngineResult<Vec<Enrollment>>;
    async fn enrolled_count(&self, course_id: Uuid) -> EngineResult<u64>;

    /// Writes the cached percentage and access time, creating the enrollment
    /// with `fallback_origin` if it is missing.
    async fn upsert_progress(
        &self,
        learner_id: &str,
        course_id: Uuid,
        percent: u8,
        accessed_at: DateTime<Utc>,
        fallback_origin: EnrollmentOrigin,
    ) -> EngineResult<Enrollment>;

    // completion ledger
    /// Returns `false` if a record for the key already exists.
    async fn insert_completion(&self, record: &CompletionRecord) -> EngineResult<bool>;
    async fn completed_video_ids(&self, learner_id: &str, course_id: Uuid) -> EngineResult<Vec<String>>;

    // quiz attempts
    async fn insert_attempt(&self, attempt: &QuizAttempt) -> EngineResult<()>;
    async fn attempts(&self, learner_id: &str, quiz_id: Uuid) -> EngineResult<Vec<QuizAttempt>>;

    // written exams
    async fn submissions_for(&self, learner_id: &str, exam_id: Uuid) -> EngineResult<Vec<Submission>>;

    /// Marks every active submission for (learner, exam) superseded and inserts
    /// `submission`, returning how many were superseded. Fails with `Validation`
    /// and writes nothing once any submission for the key is graded.
    async fn supersede_and_insert(&self, submission: &Submission) -> EngineResult<usize>;

    async fn submission(&self, id: Uuid) -> EngineResult<Option<Submission>>;
    async fn exam_submissions(&self, exam_id: Uuid) -> EngineResult<Vec<Submission>>;

    /// Grades `id` only while it is still active.
    async fn save_grade(&self, id: Uuid, marks: u8, graded_at: DateTime<Utc>) -> EngineResult<Submission>;
}

#[derive(Default)]
struct Inner {
    courses: HashMap<Uuid, Course>,
    quizzes: HashMap<Uuid, Quiz>,
    exams: HashMap<Uuid, WrittenExam>,
    profiles: HashMap<String, String>,

    enrollments: HashMap<(String, Uuid), Enrollment>,
    // learner -> courses, the "my courses" reverse index
    learner_courses: HashMap<String, BTreeSet<Uuid>>,
    enrolled_counts: HashMap<Uuid, u64>,

    completions: HashMap<(String, Uuid, String), CompletionRecord>,
    attempts: Vec<QuizAttempt>,
    submissions: Vec<Submission>,

    #[cfg(test)]
    fail_progress_writes: bool,
}

impl Inner {
    #[cfg(test)]
    fn progress_write_gate(&self) -> EngineResult<()> {
        if self.fail_progress_writes {
            return Err(EngineError::TransientStore("injected progress write failure".into()));
        }
        Ok(())
    }

    #[cfg(not(test))]
    fn progress_write_gate(&self) -> EngineResult<()> {
        Ok(())
    }
}

/// In-process document store. Used in dev mode and by the test suites.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_course(&self, course: Course) {
        self.inner.write().await.courses.insert(course.id, course);
    }

    pub async fn put_quiz(&self, quiz: Quiz) {
        self.inner.write().await.quizzes.insert(quiz.id, quiz);
    }

    pub async fn put_exam(&self, exam: WrittenExam) {
        self.inner.write().await.exams.insert(exam.id, exam);
    }

    pub async fn put_profile(&self, learner_id: &str, display_name: &str) {
        self.inner
            .write()
            .await
            .profiles
            .insert(learner_id.to_string(), display_name.to_string());
    }

    pub async fn completion_count(&self, learner_id: &str, course_id: Uuid) -> usize {
        self.inner
            .read()
            .await
            .completions
            .keys()
            .filter(|(l, c, _)| l == learner_id && *c == course_id)
            .count()
    }

    #[cfg(test)]
    pub(crate) async fn fail_progress_writes(&self, fail: bool) {
        self.inner.write().await.fail_progress_writes = fail;
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn course(&self, id: Uuid) -> EngineResult<Option<Course>> {
        Ok(self.inner.read().await.courses.get(&id).cloned())
    }

    async fn quiz(&self, id: Uuid) -> EngineResult<Option<Quiz>> {
        Ok(self.inner.read().await.quizzes.get(&id).cloned())
    }

    async fn exam(&self, id: Uuid) -> EngineResult<Option<WrittenExam>> {
        Ok(self.inner.read().await.exams.get(&id).cloned())
    }

    async fn display_name(&self, learner_id: &str) -> EngineResult<Option<String>> {
        Ok(self.inner.read().await.profiles.get(learner_id).cloned())
    }

    async fn enrollment(&self, learner_id: &str, course_id: Uuid) -> EngineResult<Option<Enrollment>> {
        let key = (learner_id.to_string(), course_id);
        Ok(self.inner.read().await.enrollments.get(&key).cloned())
    }

    async fn create_enrollment(&self, enrollment: &Enrollment) -> EngineResult<bool> {
        if !enrollment.origin.is_persistent() {
            return Err(EngineError::Validation("bypass access is never persisted".into()));
        }
        let mut inner = self.inner.write().await;
        let key = (enrollment.learner_id.clone(), enrollment.course_id);
        if inner.enrollments.contains_key(&key) {
            return Ok(false);
        }
        inner.enrollments.insert(key, enrollment.clone());
        inner
            .learner_courses
            .entry(enrollment.learner_id.clone())
            .or_default()
            .insert(enrollment.course_id);
        *inner.enrolled_counts.entry(enrollment.course_id).or_insert(0) += 1;
        Ok(true)
    }

    async fn enrollments_for(&self, learner_id: &str) -> EngineResult<Vec<Enrollment>> {
        let inner = self.inner.read().await;
        let Some(courses) = inner.learner_courses.get(learner_id) else {
            return Ok(Vec::new());
        };
        Ok(courses
            .iter()
            .filter_map(|c| inner.enrollments.get(&(learner_id.to_string(), *c)).cloned())
            .collect())
    }

    async fn enrolled_count(&self, course_id: Uuid) -> EngineResult<u64> {
        Ok(self
            .inner
            .read()
            .await
            .enrolled_counts
            .get(&course_id)
            .copied()
            .unwrap_or(0))
    }

    async fn upsert_progress(
        &self,
        learner_id: &str,
        course_id: Uuid,
        percent: u8,
        accessed_at: DateTime<Utc>,
        fallback_origin: EnrollmentOrigin,
    ) -> EngineResult<Enrollment> {
        let mut guard = self.inner.write().await;
        guard.progress_write_gate()?;
        let inner = &mut *guard;
        let key = (learner_id.to_string(), course_id);
        if !inner.enrollments.contains_key(&key) {
            inner
                .learner_courses
                .entry(learner_id.to_string())
                .or_default()
                .insert(course_id);
            *inner.enrolled_counts.entry(course_id).or_insert(0) += 1;
        }
        let enrollment = inner
            .enrollments
            .entry(key)
            .or_insert_with(|| Enrollment::new(learner_id, course_id, fallback_origin, accessed_at));
        enrollment.cached_progress_percent = percent;
        enrollment.last_accessed_at = accessed_at;
        let out = enrollment.clone();
        Ok(out)
    }

    async fn insert_completion(&self, record: &CompletionRecord) -> EngineResult<bool> {
        let mut inner = self.inner.write().await;
        let key = (record.learner_id.clone(), record.course_id, record.video_id.clone());
        if inner.completions.contains_key(&key) {
            return Ok(false);
        }
        inner.completions.insert(key, record.clone());
        Ok(true)
    }

    async fn completed_video_ids(&self, learner_id: &str, course_id: Uuid) -> EngineResult<Vec<String>> {
        Ok(self
            .inner
            .read()
            .await
            .completions
            .keys()
            .filter(|(l, c, _)| l == learner_id && *c == course_id)
            .map(|(_, _, v)| v.clone())
            .collect())
    }

    async fn insert_attempt(&self, attempt: &QuizAttempt) -> EngineResult<()> {
        self.inner.write().await.attempts.push(attempt.clone());
        Ok(())
    }

    async fn attempts(&self, learner_id: &str, quiz_id: Uuid) -> EngineResult<Vec<QuizAttempt>> {
        let mut out: Vec<_> = self
            .inner
            .read()
            .await
            .attempts
            .iter()
            .filter(|a| a.learner_id == learner_id && a.quiz_id == quiz_id)
            .cloned()
            .collect();
        out.sort_by_key(|a| a.submitted_at);
        Ok(out)
    }

    async fn submissions_for(&self, learner_id: &str, exam_id: Uuid) -> EngineResult<Vec<Submission>> {
        Ok(self
            .inner
            .read()
            .await
            .submissions
            .iter()
            .filter(|s| s.learner_id == learner_id && s.exam_id == exam_id)
            .cloned()
            .collect())
    }

    async fn supersede_and_insert(&self, submission: &Submission) -> EngineResult<usize> {
        let mut inner = self.inner.write().await;
        let same_key =
            |s: &Submission| s.learner_id == submission.learner_id && s.exam_id == submission.exam_id;
        if inner.submissions.iter().any(|s| same_key(s) && s.graded) {
            return Err(EngineError::Validation("exam has already been graded".into()));
        }
        let mut superseded = 0;
        for s in inner.submissions.iter_mut().filter(|s| same_key(&**s) && s.is_active()) {
            s.superseded_at = Some(submission.submitted_at);
            superseded += 1;
        }
        inner.submissions.push(submission.clone());
        Ok(superseded)
    }

    async fn submission(&self, id: Uuid) -> EngineResult<Option<Submission>> {
        Ok(self
            .inner
            .read()
            .await
            .submissions
            .iter()
            .find(|s| s.id == id)
            .cloned())
    }

    async fn exam_submissions(&self, exam_id: Uuid) -> EngineResult<Vec<Submission>> {
        let mut out: Vec<_> = self
            .inner
            .read()
            .await
            .submissions
            .iter()
            .filter(|s| s.exam_id == exam_id && s.superseded_at.is_none())
            .cloned()
            .collect();
        out.sort_by_key(|s| s.submitted_at);
        Ok(out)
    }

    async fn save_grade(&self, id: Uuid, marks: u8, graded_at: DateTime<Utc>) -> EngineResult<Submission> {
        let mut inner = self.inner.write().await;
        let s = inner
            .submissions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(EngineError::NotFound("submission"))?;
        if !s.is_active() {
            return Err(EngineError::Validation("submission is no longer gradable".into()));
        }
        s.graded = true;
        s.marks = Some(marks);
        s.graded_at = Some(graded_at);
        Ok(s.clone())
    }
}
