//! Runs against a live Postgres when `DATABASE_URL` is set; skipped otherwise.

use chrono::Utc;
use course_engine::{
    db::{self, Db, PgStore},
    models::*,
    store::Store,
    EngineError,
};
use uuid::Uuid;

async fn pool() -> Option<Db> {
    dotenvy::dotenv().ok();
    let url = std::env::var("DATABASE_URL").ok()?;
    let pool = db::connect(&url).await.expect("connect");
    sqlx::migrate!("./migrations").run(&pool).await.expect("migrate");
    Some(pool)
}

async fn seed_course(pool: &Db, price: &str) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO courses (id, title, price, faculty_id) VALUES ($1, 'Pg smoke', $2, 'prof-ada')")
        .bind(id)
        .bind(price)
        .execute(pool)
        .await
        .expect("seed course");
    id
}

#[tokio::test]
async fn pg_create_enrollment_is_idempotent_and_counts_once() {
    let Some(pool) = pool().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let store = PgStore::new(pool.clone());
    let course_id = seed_course(&pool, "499").await;
    let learner = format!("pg-{}", Uuid::new_v4());

    let e = Enrollment::new(&learner, course_id, EnrollmentOrigin::Paid, Utc::now());
    assert!(store.create_enrollment(&e).await.unwrap());
    assert!(!store.create_enrollment(&e).await.unwrap());

    assert_eq!(store.enrolled_count(course_id).await.unwrap(), 1);
    let mine = store.enrollments_for(&learner).await.unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].origin, EnrollmentOrigin::Paid);

    let course = store.course(course_id).await.unwrap().unwrap();
    assert_eq!(course.price, Price::Priced(49_900));
}

#[tokio::test]
async fn pg_upsert_progress_creates_missing_enrollment() {
    let Some(pool) = pool().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let store = PgStore::new(pool.clone());
    let course_id = seed_course(&pool, "Free").await;
    let learner = format!("pg-{}", Uuid::new_v4());

    let e = store
        .upsert_progress(&learner, course_id, 25, Utc::now(), EnrollmentOrigin::Free)
        .await
        .unwrap();
    assert_eq!(e.origin, EnrollmentOrigin::Free);
    assert_eq!(e.cached_progress_percent, 25);
    assert_eq!(store.enrolled_count(course_id).await.unwrap(), 1);
    assert_eq!(store.enrollments_for(&learner).await.unwrap().len(), 1);
}

#[tokio::test]
async fn pg_no_resubmission_once_graded() {
    let Some(pool) = pool().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let store = PgStore::new(pool.clone());
    let course_id = seed_course(&pool, "499").await;
    let exam_id = Uuid::new_v4();
    sqlx::query("INSERT INTO written_exams (id, course_id, title) VALUES ($1, $2, 'Final')")
        .bind(exam_id)
        .bind(course_id)
        .execute(&pool)
        .await
        .unwrap();
    let learner = format!("pg-{}", Uuid::new_v4());
    let submission = |name: &str| Submission {
        id: Uuid::new_v4(),
        learner_id: learner.clone(),
        exam_id,
        file_ref: ObjectRef(format!("submissions/x/{name}")),
        file_name: name.into(),
        submitted_at: Utc::now(),
        graded: false,
        marks: None,
        graded_at: None,
        superseded_at: None,
    };

    let first = submission("a.pdf");
    assert_eq!(store.supersede_and_insert(&first).await.unwrap(), 0);
    assert_eq!(store.supersede_and_insert(&submission("b.pdf")).await.unwrap(), 1);
    let active = store.exam_submissions(exam_id).await.unwrap();
    assert_eq!(active.len(), 1);
    store.save_grade(active[0].id, 80, Utc::now()).await.unwrap();

    assert!(matches!(
        store.supersede_and_insert(&submission("c.pdf")).await,
        Err(EngineError::Validation(_))
    ));
    let listed = store.exam_submissions(exam_id).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert!(listed[0].graded);
}
