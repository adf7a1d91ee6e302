//! The enrollment / access / progress / assessment engine.
//!
//! Every operation takes the caller explicitly. Nothing here reads ambient
//! session state.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    access::{self, AccessLevel},
    assessment,
    error::{EngineError, EngineResult},
    models::*,
    objects::ObjectStore,
    payment::PaymentGateway,
    progress,
    store::Store,
};

#[derive(Serialize, Debug, Clone)]
pub struct VideoAccess {
    pub index: usize,
    pub id: String,
    pub title: String,
    pub accessible: bool,
}

#[derive(Serialize, Debug, Clone)]
pub struct CourseAccess {
    pub course_id: Uuid,
    pub level: AccessLevel,
    pub videos: Vec<VideoAccess>,
}

#[derive(Serialize, Debug, Clone)]
pub struct EnrollOutcome {
    pub enrollment: Enrollment,
    /// False when the learner was already enrolled.
    pub created: bool,
}

#[derive(Serialize, Debug, Clone)]
pub struct CallbackResult {
    pub status: PaymentStatus,
    pub enrollment: Option<Enrollment>,
}

#[derive(Serialize, Debug, Clone)]
pub struct AttemptHistory {
    pub attempts: Vec<QuizAttempt>,
    pub best: Option<Uuid>,
    pub latest: Option<Uuid>,
}

#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn Store>,
    objects: Arc<dyn ObjectStore>,
    payments: Arc<dyn PaymentGateway>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn Store>,
        objects: Arc<dyn ObjectStore>,
        payments: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self { store, objects, payments }
    }

    async fn course(&self, course_id: Uuid) -> EngineResult<Course> {
        self.store
            .course(course_id)
            .await?
            .ok_or(EngineError::NotFound("course"))
    }

    async fn stored_enrollment(
        &self,
        learner: Option<&Learner>,
        course_id: Uuid,
    ) -> EngineResult<Option<Enrollment>> {
        match learner {
            Some(l) => self.store.enrollment(&l.id, course_id).await,
            None => Ok(None),
        }
    }

    /// A persisted free or paid enrollment, or `NotAuthorized`.
    async fn require_enrollment(&self, learner: &Learner, course_id: Uuid) -> EngineResult<Enrollment> {
        match self.store.enrollment(&learner.id, course_id).await? {
            Some(e) if e.origin.is_persistent() => Ok(e),
            _ => Err(EngineError::NotAuthorized),
        }
    }

    // ---------- access gate ----------

    pub async fn course_access(&self, learner: Option<&Learner>, course_id: Uuid) -> EngineResult<CourseAccess> {
        let course = self.course(course_id).await?;
        let enrollment = self.stored_enrollment(learner, course_id).await?;
        let level = access::access_level(learner, &course, enrollment.as_ref());
        let videos = course
            .videos
            .iter()
            .enumerate()
            .map(|(index, v)| VideoAccess {
                index,
                id: v.id.clone(),
                title: v.title.clone(),
                accessible: level.allows(index),
            })
            .collect();
        Ok(CourseAccess { course_id, level, videos })
    }

    pub async fn can_access(
        &self,
        learner: Option<&Learner>,
        course_id: Uuid,
        content_index: usize,
    ) -> EngineResult<bool> {
        let course = self.course(course_id).await?;
        let enrollment = self.stored_enrollment(learner, course_id).await?;
        Ok(access::can_access(learner, &course, enrollment.as_ref(), content_index))
    }

    // ---------- enrollment ----------

    /// Free enrollment. Re-enrolling returns the existing record with `created = false`.
    pub async fn enroll(&self, learner: &Learner, course_id: Uuid) -> EngineResult<EnrollOutcome> {
        let course = self.course(course_id).await?;
        if learner.manages(&course) {
            return Err(EngineError::Validation("course staff already have full access".into()));
        }
        if !course.price.is_free() {
            return Err(EngineError::Validation("course requires payment".into()));
        }
        self.materialize(&learner.id, course_id, EnrollmentOrigin::Free).await
    }

    async fn materialize(
        &self,
        learner_id: &str,
        course_id: Uuid,
        origin: EnrollmentOrigin,
    ) -> EngineResult<EnrollOutcome> {
        if let Some(existing) = self.store.enrollment(learner_id, course_id).await? {
            tracing::debug!(learner = %learner_id, course = %course_id, "already enrolled");
            return Ok(EnrollOutcome { enrollment: existing, created: false });
        }
        let enrollment = Enrollment::new(learner_id, course_id, origin, Utc::now());
        if self.store.create_enrollment(&enrollment).await? {
            tracing::info!(learner = %learner_id, course = %course_id, origin = origin.as_str(), "enrolled");
            return Ok(EnrollOutcome { enrollment, created: true });
        }
        // Lost a race with another writer for the same key.
        let existing = self
            .store
            .enrollment(learner_id, course_id)
            .await?
            .ok_or_else(|| EngineError::TransientStore("enrollment vanished after conflict".into()))?;
        Ok(EnrollOutcome { enrollment: existing, created: false })
    }

    /// Starts a paid checkout and returns the gateway redirect target.
    pub async fn begin_checkout(&self, learner: &Learner, course_id: Uuid) -> EngineResult<String> {
        let course = self.course(course_id).await?;
        if learner.manages(&course) {
            return Err(EngineError::Validation("course staff already have full access".into()));
        }
        let Price::Priced(amount) = course.price else {
            return Err(EngineError::Validation("course is free; enroll directly".into()));
        };
        if self.store.enrollment(&learner.id, course_id).await?.is_some() {
            return Err(EngineError::AlreadyEnrolled);
        }
        let url = self.payments.initiate(&learner.id, course_id, amount).await?;
        tracing::info!(learner = %learner.id, course = %course_id, amount, "checkout started");
        Ok(url)
    }

    /// Consumes the gateway callback. Only `success` changes state.
    pub async fn payment_callback(&self, outcome: &PaymentOutcome) -> EngineResult<CallbackResult> {
        let course = self.course(outcome.course_id).await?;
        match outcome.status {
            PaymentStatus::Success if outcome.learner_id == course.faculty_id => {
                tracing::warn!(learner = %outcome.learner_id, course = %outcome.course_id,
                    "payment from course owner ignored");
                Ok(CallbackResult { status: outcome.status, enrollment: None })
            }
            PaymentStatus::Success => {
                let out = self
                    .materialize(&outcome.learner_id, outcome.course_id, EnrollmentOrigin::Paid)
                    .await?;
                Ok(CallbackResult { status: outcome.status, enrollment: Some(out.enrollment) })
            }
            PaymentStatus::Fail | PaymentStatus::Cancel => {
                tracing::info!(
                    learner = %outcome.learner_id,
                    course = %outcome.course_id,
                    status = ?outcome.status,
                    "payment not completed"
                );
                Ok(CallbackResult { status: outcome.status, enrollment: None })
            }
        }
    }

    /// Courses the learner is enrolled in. Bypass access never shows up here.
    pub async fn my_courses(&self, learner: &Learner) -> EngineResult<Vec<Enrollment>> {
        self.store.enrollments_for(&learner.id).await
    }

    pub async fn enrolled_count(&self, course_id: Uuid) -> EngineResult<u64> {
        self.course(course_id).await?;
        self.store.enrolled_count(course_id).await
    }

    // ---------- completion & progress ----------

    pub async fn mark_complete(
        &self,
        learner: &Learner,
        course_id: Uuid,
        video_id: &str,
    ) -> EngineResult<ProgressUpdate> {
        let course = self.course(course_id).await?;
        let index = course.video_index(video_id).ok_or(EngineError::NotFound("video"))?;
        let enrollment = self.require_enrollment(learner, course_id).await?;
        if !access::can_access(Some(learner), &course, Some(&enrollment), index) {
            return Err(EngineError::NotAuthorized);
        }

        let now = Utc::now();
        let record = CompletionRecord {
            learner_id: learner.id.clone(),
            course_id,
            video_id: video_id.to_string(),
            title: course.videos[index].title.clone(),
            completed_at: now,
        };
        let fallback = if course.price.is_free() {
            EnrollmentOrigin::Free
        } else {
            EnrollmentOrigin::Paid
        };
        if !self.store.insert_completion(&record).await? {
            // Already recorded. Repair the cache if an earlier write left it behind the ledger.
            let ids = self.store.completed_video_ids(&learner.id, course_id).await?;
            let current = progress::course_progress(&course, ids.iter().map(String::as_str));
            if current.progress_percent == enrollment.cached_progress_percent {
                return Ok(ProgressUpdate {
                    progress_percent: enrollment.cached_progress_percent,
                    newly_completed: false,
                });
            }
            let repaired = self.refresh_cache(learner, &course, fallback, now).await?;
            tracing::info!(learner = %learner.id, course = %course_id, progress = repaired.cached_progress_percent,
                "stale progress cache repaired");
            return Ok(ProgressUpdate {
                progress_percent: repaired.cached_progress_percent,
                newly_completed: false,
            });
        }

        // The completion record stays even if the cache update below fails.
        let updated = self
            .refresh_cache(learner, &course, fallback, now)
            .await
            .map_err(|e| {
                tracing::warn!(learner = %learner.id, course = %course_id, video = video_id, error = %e,
                    "completion recorded but progress not updated");
                e
            })?;
        tracing::info!(
            learner = %learner.id,
            course = %course_id,
            video = video_id,
            progress = updated.cached_progress_percent,
            "video completed"
        );
        Ok(ProgressUpdate {
            progress_percent: updated.cached_progress_percent,
            newly_completed: true,
        })
    }

    async fn refresh_cache(
        &self,
        learner: &Learner,
        course: &Course,
        fallback: EnrollmentOrigin,
        now: chrono::DateTime<Utc>,
    ) -> EngineResult<Enrollment> {
        let ids = self.store.completed_video_ids(&learner.id, course.id).await?;
        let p = progress::course_progress(course, ids.iter().map(String::as_str));
        self.store
            .upsert_progress(&learner.id, course.id, p.progress_percent, now, fallback)
            .await
    }

    /// Computed from the Completion Ledger, never from the cached percentage.
    pub async fn get_progress(&self, learner: &Learner, course_id: Uuid) -> EngineResult<CourseProgress> {
        let course = self.course(course_id).await?;
        let ids = self.store.completed_video_ids(&learner.id, course_id).await?;
        Ok(progress::course_progress(&course, ids.iter().map(String::as_str)))
    }

    /// Replays the ledger into the enrollment's cached percentage.
    pub async fn rebuild_progress(&self, learner: &Learner, course_id: Uuid) -> EngineResult<Enrollment> {
        let course = self.course(course_id).await?;
        let enrollment = self
            .store
            .enrollment(&learner.id, course_id)
            .await?
            .ok_or(EngineError::NotFound("enrollment"))?;
        let rebuilt = self
            .refresh_cache(learner, &course, enrollment.origin, enrollment.last_accessed_at)
            .await?;
        tracing::info!(learner = %learner.id, course = %course_id, progress = rebuilt.cached_progress_percent,
            "progress cache rebuilt");
        Ok(rebuilt)
    }

    // ---------- quizzes ----------

    pub async fn submit_quiz_attempt(
        &self,
        learner: &Learner,
        quiz_id: Uuid,
        answers: Vec<u32>,
    ) -> EngineResult<QuizAttempt> {
        let quiz = self.store.quiz(quiz_id).await?.ok_or(EngineError::NotFound("quiz"))?;
        self.require_enrollment(learner, quiz.course_id).await?;
        let score = assessment::score(&quiz.questions, &answers)?;
        let attempt = QuizAttempt {
            id: Uuid::new_v4(),
            learner_id: learner.id.clone(),
            quiz_id,
            score,
            total_questions: quiz.questions.len() as u32,
            answers,
            submitted_at: Utc::now(),
        };
        self.store.insert_attempt(&attempt).await?;
        tracing::info!(learner = %learner.id, quiz = %quiz_id, score, total = attempt.total_questions,
            "quiz attempt recorded");
        Ok(attempt)
    }

    pub async fn list_attempts(&self, learner: &Learner, quiz_id: Uuid) -> EngineResult<Vec<QuizAttempt>> {
        self.store.quiz(quiz_id).await?.ok_or(EngineError::NotFound("quiz"))?;
        self.store.attempts(&learner.id, quiz_id).await
    }

    pub async fn attempt_history(&self, learner: &Learner, quiz_id: Uuid) -> EngineResult<AttemptHistory> {
        let attempts = self.list_attempts(learner, quiz_id).await?;
        let best = assessment::best_attempt(&attempts).map(|a| a.id);
        let latest = assessment::latest_attempt(&attempts).map(|a| a.id);
        Ok(AttemptHistory { attempts, best, latest })
    }

    // ---------- written exams ----------

    /// Stores the file and makes this the learner's only active submission.
    pub async fn submit_written_exam(
        &self,
        learner: &Learner,
        exam_id: Uuid,
        file_name: &str,
        bytes: &[u8],
    ) -> EngineResult<Submission> {
        let exam = self.store.exam(exam_id).await?.ok_or(EngineError::NotFound("exam"))?;
        self.require_enrollment(learner, exam.course_id).await?;
        let previous = self.store.submissions_for(&learner.id, exam_id).await?;
        if previous.iter().any(|s| s.graded) {
            return Err(EngineError::Validation("exam has already been graded".into()));
        }

        let file_ref = self.objects.upload(file_name, bytes).await?;
        let submission = Submission {
            id: Uuid::new_v4(),
            learner_id: learner.id.clone(),
            exam_id,
            file_ref,
            file_name: file_name.to_string(),
            submitted_at: Utc::now(),
            graded: false,
            marks: None,
            graded_at: None,
            superseded_at: None,
        };
        let superseded = match self.store.supersede_and_insert(&submission).await {
            Ok(n) => n,
            Err(e) => {
                self.objects.discard(&submission.file_ref).await;
                return Err(e);
            }
        };
        tracing::info!(learner = %learner.id, exam = %exam_id, submission = %submission.id, superseded,
            "written exam submitted");
        Ok(submission)
    }

    async fn exam_course(&self, exam_id: Uuid) -> EngineResult<Course> {
        let exam = self.store.exam(exam_id).await?.ok_or(EngineError::NotFound("exam"))?;
        self.course(exam.course_id).await
    }

    pub async fn grade_submission(
        &self,
        grader: &Learner,
        submission_id: Uuid,
        marks: i64,
    ) -> EngineResult<Submission> {
        let submission = self
            .store
            .submission(submission_id)
            .await?
            .ok_or(EngineError::NotFound("submission"))?;
        let course = self.exam_course(submission.exam_id).await?;
        if !grader.manages(&course) {
            tracing::warn!(grader = %grader.id, submission = %submission_id, "grading refused");
            return Err(EngineError::NotAuthorized);
        }
        let marks = assessment::validate_marks(marks)?;
        if !submission.is_active() {
            return Err(EngineError::Validation("submission is no longer gradable".into()));
        }
        let graded = self.store.save_grade(submission_id, marks, Utc::now()).await?;
        tracing::info!(grader = %grader.id, submission = %submission_id, marks, "submission graded");
        Ok(graded)
    }

    /// Active and graded submissions for an exam, joined with learner names.
    pub async fn list_submissions(&self, viewer: &Learner, exam_id: Uuid) -> EngineResult<Vec<SubmissionView>> {
        let course = self.exam_course(exam_id).await?;
        if !viewer.manages(&course) {
            return Err(EngineError::NotAuthorized);
        }
        let submissions = self.store.exam_submissions(exam_id).await?;
        let mut out = Vec::with_capacity(submissions.len());
        for submission in submissions {
            let learner_name = self.store.display_name(&submission.learner_id).await?;
            let download_url = self.objects.download_url(&submission.file_ref);
            out.push(SubmissionView { submission, learner_name, download_url });
        }
        Ok(out)
    }
}
