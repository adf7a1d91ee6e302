use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use tower_http::services::ServeDir;
use uuid::Uuid;

use crate::{
    engine::{AttemptHistory, CallbackResult, CourseAccess, EnrollOutcome, Engine},
    error::EngineError,
    models::*,
};

#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub data_dir: PathBuf,
    pub max_upload_bytes: usize,
}

type ApiResult<T> = Result<T, EngineError>;

pub fn router(state: AppState) -> Router {
    let static_dir = state.data_dir.clone();
    let body_limit = state.max_upload_bytes;
    Router::new()
        .route("/health", get(|| async { "ok" }))
        // access gate + enrollment
        .route("/api/courses/:course_id/access", get(course_access))
        .route("/api/courses/:course_id/access/:index", get(can_access))
        .route("/api/courses/:course_id/enroll", post(enroll))
        .route("/api/courses/:course_id/checkout", post(checkout))
        .route("/api/courses/:course_id/enrollments/count", get(enrolled_count))
        .route("/api/payments/callback", post(payment_callback))
        .route("/api/me/courses", get(my_courses))
        // completion + progress
        .route("/api/courses/:course_id/videos/:video_id/complete", post(mark_complete))
        .route("/api/courses/:course_id/progress", get(get_progress))
        .route("/api/courses/:course_id/progress/rebuild", post(rebuild_progress))
        // assessments
        .route("/api/quizzes/:quiz_id/attempts", post(submit_attempt).get(list_attempts))
        .route("/api/exams/:exam_id/submissions", post(submit_exam).get(list_submissions))
        .route("/api/submissions/:submission_id/grade", post(grade))
        // object-store downloads
        .nest_service("/content", ServeDir::new(static_dir))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

// --- access gate ---

async fn course_access(
    State(st): State<AppState>,
    learner: Option<Learner>,
    Path(course_id): Path<Uuid>,
) -> ApiResult<Json<CourseAccess>> {
    Ok(Json(st.engine.course_access(learner.as_ref(), course_id).await?))
}

async fn can_access(
    State(st): State<AppState>,
    learner: Option<Learner>,
    Path((course_id, index)): Path<(Uuid, usize)>,
) -> ApiResult<Json<Value>> {
    let allowed = st.engine.can_access(learner.as_ref(), course_id, index).await?;
    Ok(Json(json!({ "course_id": course_id, "index": index, "allowed": allowed })))
}

// --- enrollment ---

async fn enroll(
    State(st): State<AppState>,
    learner: Learner,
    Path(course_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<EnrollOutcome>)> {
    let out = st.engine.enroll(&learner, course_id).await?;
    let status = if out.created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(out)))
}

async fn checkout(
    State(st): State<AppState>,
    learner: Learner,
    Path(course_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let redirect_url = st.engine.begin_checkout(&learner, course_id).await?;
    Ok(Json(json!({ "redirect_url": redirect_url })))
}

async fn payment_callback(
    State(st): State<AppState>,
    Json(outcome): Json<PaymentOutcome>,
) -> ApiResult<Json<CallbackResult>> {
    Ok(Json(st.engine.payment_callback(&outcome).await?))
}

async fn my_courses(State(st): State<AppState>, learner: Learner) -> ApiResult<Json<Vec<Enrollment>>> {
    Ok(Json(st.engine.my_courses(&learner).await?))
}

async fn enrolled_count(
    State(st): State<AppState>,
    Path(course_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let count = st.engine.enrolled_count(course_id).await?;
    Ok(Json(json!({ "course_id": course_id, "enrolled_count": count })))
}

// --- progress ---

async fn mark_complete(
    State(st): State<AppState>,
    learner: Learner,
    Path((course_id, video_id)): Path<(Uuid, String)>,
) -> ApiResult<Json<ProgressUpdate>> {
    Ok(Json(st.engine.mark_complete(&learner, course_id, &video_id).await?))
}

async fn get_progress(
    State(st): State<AppState>,
    learner: Learner,
    Path(course_id): Path<Uuid>,
) -> ApiResult<Json<CourseProgress>> {
    Ok(Json(st.engine.get_progress(&learner, course_id).await?))
}

async fn rebuild_progress(
    State(st): State<AppState>,
    learner: Learner,
    Path(course_id): Path<Uuid>,
) -> ApiResult<Json<Enrollment>> {
    Ok(Json(st.engine.rebuild_progress(&learner, course_id).await?))
}

// --- quizzes ---

async fn submit_attempt(
    State(st): State<AppState>,
    learner: Learner,
    Path(quiz_id): Path<Uuid>,
    Json(req): Json<QuizAnswersReq>,
) -> ApiResult<(StatusCode, Json<QuizAttempt>)> {
    let attempt = st.engine.submit_quiz_attempt(&learner, quiz_id, req.answers).await?;
    Ok((StatusCode::CREATED, Json(attempt)))
}

async fn list_attempts(
    State(st): State<AppState>,
    learner: Learner,
    Path(quiz_id): Path<Uuid>,
) -> ApiResult<Json<AttemptHistory>> {
    Ok(Json(st.engine.attempt_history(&learner, quiz_id).await?))
}

// --- written exams ---

async fn submit_exam(
    State(st): State<AppState>,
    learner: Learner,
    Path(exam_id): Path<Uuid>,
    mut mp: Multipart,
) -> ApiResult<(StatusCode, Json<Submission>)> {
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(field) = mp.next_field().await.map_err(e400)? {
        if field.name() == Some("file") {
            let file_name = field.file_name().unwrap_or("submission.pdf").to_string();
            let bytes = field.bytes().await.map_err(e400)?;
            upload = Some((file_name, bytes.to_vec()));
        }
    }

    let (file_name, bytes) =
        upload.ok_or_else(|| EngineError::Validation("file is required".into()))?;
    let submission = st
        .engine
        .submit_written_exam(&learner, exam_id, &file_name, &bytes)
        .await?;
    Ok((StatusCode::CREATED, Json(submission)))
}

async fn list_submissions(
    State(st): State<AppState>,
    learner: Learner,
    Path(exam_id): Path<Uuid>,
) -> ApiResult<Json<Vec<SubmissionView>>> {
    Ok(Json(st.engine.list_submissions(&learner, exam_id).await?))
}

async fn grade(
    State(st): State<AppState>,
    learner: Learner,
    Path(submission_id): Path<Uuid>,
    Json(req): Json<GradeReq>,
) -> ApiResult<Json<Submission>> {
    Ok(Json(st.engine.grade_submission(&learner, submission_id, req.marks).await?))
}

// --- helpers ---
fn e400<E: std::fmt::Display>(e: E) -> EngineError {
    tracing::warn!(error = %e, "malformed multipart body");
    EngineError::Validation(e.to_string())
}
