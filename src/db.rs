use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, types::Json, FromRow, Pool, Postgres};
use uuid::Uuid;

use crate::{
    error::{EngineError, EngineResult},
    models::*,
    store::Store,
};

pub type Db = Pool<Postgres>;

pub async fn connect(url: &str) -> Result<Db> {
    Ok(PgPoolOptions::new().max_connections(10).connect(url).await?)
}

// ---------- rows ----------

#[derive(FromRow)]
struct CourseRow {
    id: Uuid,
    title: String,
    price: String, // raw catalog value: "0", "Free", "499.00", ...
    faculty_id: String,
    resources: Json<Vec<String>>,
}

#[derive(FromRow)]
struct VideoRow {
    id: String,
    title: String,
}

#[derive(FromRow)]
struct QuizRow {
    id: Uuid,
    course_id: Uuid,
    title: String,
    questions: Json<Vec<Question>>,
}

#[derive(FromRow)]
struct ExamRow {
    id: Uuid,
    course_id: Uuid,
    title: String,
    description: String,
    pdf_ref: Option<String>,
}

#[derive(FromRow)]
struct EnrollmentRow {
    learner_id: String,
    course_id: Uuid,
    origin: String,
    cached_progress_percent: i16,
    enrolled_at: DateTime<Utc>,
    last_accessed_at: DateTime<Utc>,
}

impl TryFrom<EnrollmentRow> for Enrollment {
    type Error = EngineError;

    fn try_from(r: EnrollmentRow) -> Result<Self, Self::Error> {
        Ok(Enrollment {
            learner_id: r.learner_id,
            course_id: r.course_id,
            origin: r.origin.parse()?,
            cached_progress_percent: r.cached_progress_percent.clamp(0, 100) as u8,
            enrolled_at: r.enrolled_at,
            last_accessed_at: r.last_accessed_at,
        })
    }
}

#[derive(FromRow)]
struct AttemptRow {
    id: Uuid,
    learner_id: String,
    quiz_id: Uuid,
    score: i32,
    total_questions: i32,
    answers: Json<Vec<u32>>,
    submitted_at: DateTime<Utc>,
}

impl From<AttemptRow> for QuizAttempt {
    fn from(r: AttemptRow) -> Self {
        QuizAttempt {
            id: r.id,
            learner_id: r.learner_id,
            quiz_id: r.quiz_id,
            score: r.score.max(0) as u32,
            total_questions: r.total_questions.max(0) as u32,
            answers: r.answers.0,
            submitted_at: r.submitted_at,
        }
    }
}

#[derive(FromRow)]
struct SubmissionRow {
    id: Uuid,
    learner_id: String,
    exam_id: Uuid,
    file_ref: String,
    file_name: String,
    submitted_at: DateTime<Utc>,
    graded: bool,
    marks: Option<i16>,
    graded_at: Option<DateTime<Utc>>,
    superseded_at: Option<DateTime<Utc>>,
}

impl From<SubmissionRow> for Submission {
    fn from(r: SubmissionRow) -> Self {
        Submission {
            id: r.id,
            learner_id: r.learner_id,
            exam_id: r.exam_id,
            file_ref: ObjectRef(r.file_ref),
            file_name: r.file_name,
            submitted_at: r.submitted_at,
            graded: r.graded,
            marks: r.marks.map(|m| m.clamp(0, 100) as u8),
            graded_at: r.graded_at,
            superseded_at: r.superseded_at,
        }
    }
}

const ENROLLMENT_COLS: &str =
    "learner_id, course_id, origin, cached_progress_percent, enrolled_at, last_accessed_at";
const SUBMISSION_COLS: &str = "id, learner_id, exam_id, file_ref, file_name, submitted_at, graded, marks, graded_at, superseded_at";

// ---------- store ----------

/// Postgres-backed document store. Schema lives in `migrations/`.
#[derive(Clone)]
pub struct PgStore {
    db: Db,
}

impl PgStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn course(&self, id: Uuid) -> EngineResult<Option<Course>> {
        let Some(row) = sqlx::query_as::<_, CourseRow>(
            "SELECT id, title, price, faculty_id, resources FROM courses WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        else {
            return Ok(None);
        };

        let videos = sqlx::query_as::<_, VideoRow>(
            "SELECT id, title FROM course_videos WHERE course_id = $1 ORDER BY position",
        )
        .bind(id)
        .fetch_all(&self.db)
        .await?
        .into_iter()
        .map(|v| Video { id: v.id, title: v.title })
        .collect();

        Ok(Some(Course {
            id: row.id,
            title: row.title,
            price: Price::try_from(RawPrice::Text(row.price))?,
            videos,
            faculty_id: row.faculty_id,
            resources: row.resources.0,
        }))
    }

    async fn quiz(&self, id: Uuid) -> EngineResult<Option<Quiz>> {
        let row = sqlx::query_as::<_, QuizRow>(
            "SELECT id, course_id, title, questions FROM quizzes WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(|r| Quiz {
            id: r.id,
            course_id: r.course_id,
            title: r.title,
            questions: r.questions.0,
        }))
    }

    async fn exam(&self, id: Uuid) -> EngineResult<Option<WrittenExam>> {
        let row = sqlx::query_as::<_, ExamRow>(
            "SELECT id, course_id, title, description, pdf_ref FROM written_exams WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(|r| WrittenExam {
            id: r.id,
            course_id: r.course_id,
            title: r.title,
            description: r.description,
            pdf_ref: r.pdf_ref.map(ObjectRef),
        }))
    }

    async fn display_name(&self, learner_id: &str) -> EngineResult<Option<String>> {
        Ok(
            sqlx::query_scalar::<_, String>("SELECT display_name FROM profiles WHERE learner_id = $1")
                .bind(learner_id)
                .fetch_optional(&self.db)
                .await?,
        )
    }

    async fn enrollment(&self, learner_id: &str, course_id: Uuid) -> EngineResult<Option<Enrollment>> {
        sqlx::query_as::<_, EnrollmentRow>(&format!(
            "SELECT {ENROLLMENT_COLS} FROM enrollments WHERE learner_id = $1 AND course_id = $2"
        ))
        .bind(learner_id)
        .bind(course_id)
        .fetch_optional(&self.db)
        .await?
        .map(Enrollment::try_from)
        .transpose()
    }

    async fn create_enrollment(&self, e: &Enrollment) -> EngineResult<bool> {
        if !e.origin.is_persistent() {
            return Err(EngineError::Validation("bypass access is never persisted".into()));
        }
        let mut tx = self.db.begin().await?;
        let inserted = sqlx::query(&format!(
            "INSERT INTO enrollments ({ENROLLMENT_COLS}) VALUES ($1,$2,$3,$4,$5,$6)
             ON CONFLICT (learner_id, course_id) DO NOTHING"
        ))
        .bind(&e.learner_id)
        .bind(e.course_id)
        .bind(e.origin.as_str())
        .bind(e.cached_progress_percent as i16)
        .bind(e.enrolled_at)
        .bind(e.last_accessed_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if inserted == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        add_to_index(&mut tx, &e.learner_id, e.course_id, e.enrolled_at).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn enrollments_for(&self, learner_id: &str) -> EngineResult<Vec<Enrollment>> {
        sqlx::query_as::<_, EnrollmentRow>(
            "SELECT e.learner_id, e.course_id, e.origin, e.cached_progress_percent, e.enrolled_at, e.last_accessed_at
             FROM learner_courses lc
             JOIN enrollments e ON e.learner_id = lc.learner_id AND e.course_id = lc.course_id
             WHERE lc.learner_id = $1
             ORDER BY lc.added_at",
        )
        .bind(learner_id)
        .fetch_all(&self.db)
        .await?
        .into_iter()
        .map(Enrollment::try_from)
        .collect()
    }

    async fn enrolled_count(&self, course_id: Uuid) -> EngineResult<u64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT enrolled_count FROM courses WHERE id = $1")
            .bind(course_id)
            .fetch_optional(&self.db)
            .await?
            .unwrap_or(0);
        Ok(count.max(0) as u64)
    }

    async fn upsert_progress(
        &self,
        learner_id: &str,
        course_id: Uuid,
        percent: u8,
        accessed_at: DateTime<Utc>,
        fallback_origin: EnrollmentOrigin,
    ) -> EngineResult<Enrollment> {
        let mut tx = self.db.begin().await?;
        let updated = sqlx::query_as::<_, EnrollmentRow>(&format!(
            "UPDATE enrollments SET cached_progress_percent = $3, last_accessed_at = $4
             WHERE learner_id = $1 AND course_id = $2
             RETURNING {ENROLLMENT_COLS}"
        ))
        .bind(learner_id)
        .bind(course_id)
        .bind(percent as i16)
        .bind(accessed_at)
        .fetch_optional(&mut *tx)
        .await?;

        let row = match updated {
            Some(row) => row,
            None => {
                let row = sqlx::query_as::<_, EnrollmentRow>(&format!(
                    "INSERT INTO enrollments ({ENROLLMENT_COLS}) VALUES ($1,$2,$3,$4,$5,$5)
                     RETURNING {ENROLLMENT_COLS}"
                ))
                .bind(learner_id)
                .bind(course_id)
                .bind(fallback_origin.as_str())
                .bind(percent as i16)
                .bind(accessed_at)
                .fetch_one(&mut *tx)
                .await?;
                add_to_index(&mut tx, learner_id, course_id, accessed_at).await?;
                row
            }
        };
        tx.commit().await?;
        Enrollment::try_from(row)
    }

    async fn insert_completion(&self, r: &CompletionRecord) -> EngineResult<bool> {
        let inserted = sqlx::query(
            "INSERT INTO completions (learner_id, course_id, video_id, title, completed_at)
             VALUES ($1,$2,$3,$4,$5)
             ON CONFLICT (learner_id, course_id, video_id) DO NOTHING",
        )
        .bind(&r.learner_id)
        .bind(r.course_id)
        .bind(&r.video_id)
        .bind(&r.title)
        .bind(r.completed_at)
        .execute(&self.db)
        .await?
        .rows_affected();
        Ok(inserted > 0)
    }

    async fn completed_video_ids(&self, learner_id: &str, course_id: Uuid) -> EngineResult<Vec<String>> {
        Ok(sqlx::query_scalar::<_, String>(
            "SELECT video_id FROM completions WHERE learner_id = $1 AND course_id = $2",
        )
        .bind(learner_id)
        .bind(course_id)
        .fetch_all(&self.db)
        .await?)
    }

    async fn insert_attempt(&self, a: &QuizAttempt) -> EngineResult<()> {
        sqlx::query(
            "INSERT INTO quiz_attempts (id, learner_id, quiz_id, score, total_questions, answers, submitted_at)
             VALUES ($1,$2,$3,$4,$5,$6,$7)",
        )
        .bind(a.id)
        .bind(&a.learner_id)
        .bind(a.quiz_id)
        .bind(a.score as i32)
        .bind(a.total_questions as i32)
        .bind(Json(&a.answers))
        .bind(a.submitted_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn attempts(&self, learner_id: &str, quiz_id: Uuid) -> EngineResult<Vec<QuizAttempt>> {
        let rows = sqlx::query_as::<_, AttemptRow>(
            "SELECT id, learner_id, quiz_id, score, total_questions, answers, submitted_at
             FROM quiz_attempts WHERE learner_id = $1 AND quiz_id = $2
             ORDER BY submitted_at",
        )
        .bind(learner_id)
        .bind(quiz_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(QuizAttempt::from).collect())
    }

    async fn submissions_for(&self, learner_id: &str, exam_id: Uuid) -> EngineResult<Vec<Submission>> {
        let rows = sqlx::query_as::<_, SubmissionRow>(&format!(
            "SELECT {SUBMISSION_COLS} FROM exam_submissions
             WHERE learner_id = $1 AND exam_id = $2 ORDER BY submitted_at"
        ))
        .bind(learner_id)
        .bind(exam_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(Submission::from).collect())
    }

    async fn supersede_and_insert(&self, s: &Submission) -> EngineResult<usize> {
        let mut tx = self.db.begin().await?;
        // Row locks taken here make a concurrent grade of the active row commit first or wait.
        let superseded = sqlx::query(
            "UPDATE exam_submissions SET superseded_at = $3
             WHERE learner_id = $1 AND exam_id = $2 AND NOT graded AND superseded_at IS NULL",
        )
        .bind(&s.learner_id)
        .bind(s.exam_id)
        .bind(s.submitted_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let graded: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM exam_submissions
                            WHERE learner_id = $1 AND exam_id = $2 AND graded)",
        )
        .bind(&s.learner_id)
        .bind(s.exam_id)
        .fetch_one(&mut *tx)
        .await?;
        if graded {
            // dropping `tx` rolls the supersede back
            return Err(EngineError::Validation("exam has already been graded".into()));
        }
        sqlx::query(&format!(
            "INSERT INTO exam_submissions ({SUBMISSION_COLS}) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)"
        ))
        .bind(s.id)
        .bind(&s.learner_id)
        .bind(s.exam_id)
        .bind(s.file_ref.as_str())
        .bind(&s.file_name)
        .bind(s.submitted_at)
        .bind(s.graded)
        .bind(s.marks.map(i16::from))
        .bind(s.graded_at)
        .bind(s.superseded_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(superseded as usize)
    }

    async fn submission(&self, id: Uuid) -> EngineResult<Option<Submission>> {
        let row = sqlx::query_as::<_, SubmissionRow>(&format!(
            "SELECT {SUBMISSION_COLS} FROM exam_submissions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(Submission::from))
    }

    async fn exam_submissions(&self, exam_id: Uuid) -> EngineResult<Vec<Submission>> {
        let rows = sqlx::query_as::<_, SubmissionRow>(&format!(
            "SELECT {SUBMISSION_COLS} FROM exam_submissions
             WHERE exam_id = $1 AND superseded_at IS NULL ORDER BY submitted_at"
        ))
        .bind(exam_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(Submission::from).collect())
    }

    async fn save_grade(&self, id: Uuid, marks: u8, graded_at: DateTime<Utc>) -> EngineResult<Submission> {
        let row = sqlx::query_as::<_, SubmissionRow>(&format!(
            "UPDATE exam_submissions SET graded = TRUE, marks = $2, graded_at = $3
             WHERE id = $1 AND NOT graded AND superseded_at IS NULL
             RETURNING {SUBMISSION_COLS}"
        ))
        .bind(id)
        .bind(i16::from(marks))
        .bind(graded_at)
        .fetch_optional(&self.db)
        .await?;
        match row {
            Some(row) => Ok(row.into()),
            None if self.submission(id).await?.is_some() => {
                Err(EngineError::Validation("submission is no longer gradable".into()))
            }
            None => Err(EngineError::NotFound("submission")),
        }
    }
}

// Reverse index entry plus the atomic counter bump, inside the caller's transaction.
async fn add_to_index(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    learner_id: &str,
    course_id: Uuid,
    at: DateTime<Utc>,
) -> EngineResult<()> {
    sqlx::query(
        "INSERT INTO learner_courses (learner_id, course_id, added_at) VALUES ($1,$2,$3)
         ON CONFLICT DO NOTHING",
    )
    .bind(learner_id)
    .bind(course_id)
    .bind(at)
    .execute(&mut **tx)
    .await?;
    sqlx::query("UPDATE courses SET enrolled_count = enrolled_count + 1 WHERE id = $1")
        .bind(course_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}
