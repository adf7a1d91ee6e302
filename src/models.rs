use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::{fmt, str::FromStr};
use uuid::Uuid;

use crate::error::EngineError;

// ---------- identity ----------

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Faculty,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Faculty => "faculty",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "student" => Ok(Role::Student),
            "faculty" => Ok(Role::Faculty),
            "admin" => Ok(Role::Admin),
            other => Err(EngineError::Validation(format!("unknown role `{other}`"))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The caller of an engine operation. Passed explicitly on every call.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Learner {
    pub id: String,
    pub role: Role,
}

impl Learner {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self { id: id.into(), role }
    }

    pub fn student(id: impl Into<String>) -> Self {
        Self::new(id, Role::Student)
    }

    /// Faculty owning the course, or any admin.
    pub fn manages(&self, course: &Course) -> bool {
        match self.role {
            Role::Admin => true,
            Role::Faculty => self.id == course.faculty_id,
            Role::Student => false,
        }
    }
}

// ---------- catalog ----------

/// Course price after normalization at the catalog boundary.
/// `Priced` carries minor currency units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Price {
    Free,
    Priced(i64),
}

impl Price {
    pub fn is_free(&self) -> bool {
        matches!(self, Price::Free)
    }
}

/// Price exactly as catalog documents store it: a number, a numeric string,
/// or the literal "Free".
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum RawPrice {
    Number(f64),
    Text(String),
}

impl TryFrom<RawPrice> for Price {
    type Error = EngineError;

    fn try_from(raw: RawPrice) -> Result<Self, Self::Error> {
        let amount = match raw {
            RawPrice::Number(n) => n,
            RawPrice::Text(s) => {
                let s = s.trim();
                if s.eq_ignore_ascii_case("free") {
                    return Ok(Price::Free);
                }
                s.parse::<f64>()
                    .map_err(|_| EngineError::Validation(format!("unparseable price `{s}`")))?
            }
        };
        if !amount.is_finite() || amount < 0.0 {
            return Err(EngineError::Validation(format!("invalid price {amount}")));
        }
        let minor = (amount * 100.0).round() as i64;
        if minor == 0 {
            Ok(Price::Free)
        } else {
            Ok(Price::Priced(minor))
        }
    }
}

impl Serialize for Price {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Price::Free => serializer.serialize_str("Free"),
            Price::Priced(minor) => serializer.serialize_f64(*minor as f64 / 100.0),
        }
    }
}

impl<'de> Deserialize<'de> for Price {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawPrice::deserialize(deserializer)?;
        Price::try_from(raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Video {
    pub id: String,
    pub title: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Course {
    pub id: Uuid,
    pub title: String,
    pub price: Price,
    pub videos: Vec<Video>,
    pub faculty_id: String,
    #[serde(default)]
    pub resources: Vec<String>,
}

impl Course {
    pub fn video_index(&self, video_id: &str) -> Option<usize> {
        self.videos.iter().position(|v| v.id == video_id)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub text: String,
    pub options: [String; 4],
    pub correct_option_index: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Quiz {
    pub id: Uuid,
    pub course_id: Uuid,
    pub title: String,
    pub questions: Vec<Question>,
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WrittenExam {
    pub id: Uuid,
    pub course_id: Uuid,
    pub title: String,
    pub description: String,
    pub pdf_ref: Option<ObjectRef>,
}

/// Opaque pointer into the object store.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ObjectRef(pub String);

impl ObjectRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------- enrollment & progress ----------

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum EnrollmentOrigin {
    Free,
    Paid,
    /// Runtime-only access for the owning faculty or an admin. Never persisted.
    FacultyBypass,
}

impl EnrollmentOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentOrigin::Free => "free",
            EnrollmentOrigin::Paid => "paid",
            EnrollmentOrigin::FacultyBypass => "facultyBypass",
        }
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self, EnrollmentOrigin::Free | EnrollmentOrigin::Paid)
    }
}

impl FromStr for EnrollmentOrigin {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(EnrollmentOrigin::Free),
            "paid" => Ok(EnrollmentOrigin::Paid),
            "facultyBypass" => Ok(EnrollmentOrigin::FacultyBypass),
            other => Err(EngineError::Validation(format!("unknown enrollment origin `{other}`"))),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Enrollment {
    pub learner_id: String,
    pub course_id: Uuid,
    pub origin: EnrollmentOrigin,
    /// Read cache of the Completion Ledger; may lag.
    pub cached_progress_percent: u8,
    pub enrolled_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

impl Enrollment {
    pub fn new(learner_id: &str, course_id: Uuid, origin: EnrollmentOrigin, now: DateTime<Utc>) -> Self {
        Self {
            learner_id: learner_id.to_string(),
            course_id,
            origin,
            cached_progress_percent: 0,
            enrolled_at: now,
            last_accessed_at: now,
        }
    }

    /// Virtual enrollment standing in for faculty/admin access.
    pub fn bypass(learner_id: &str, course_id: Uuid) -> Self {
        Self::new(learner_id, course_id, EnrollmentOrigin::FacultyBypass, Utc::now())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CompletionRecord {
    pub learner_id: String,
    pub course_id: Uuid,
    pub video_id: String,
    pub title: String,
    pub completed_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct CourseProgress {
    pub completed_count: usize,
    pub total_video_count: usize,
    pub progress_percent: u8,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub progress_percent: u8,
    /// False when the video had already been completed.
    pub newly_completed: bool,
}

// ---------- assessments ----------

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct QuizAttempt {
    pub id: Uuid,
    pub learner_id: String,
    pub quiz_id: Uuid,
    pub score: u32,
    pub total_questions: u32,
    pub answers: Vec<u32>,
    pub submitted_at: DateTime<Utc>,
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Submission {
    pub id: Uuid,
    pub learner_id: String,
    pub exam_id: Uuid,
    pub file_ref: ObjectRef,
    pub file_name: String,
    pub submitted_at: DateTime<Utc>,
    pub graded: bool,
    pub marks: Option<u8>,
    pub graded_at: Option<DateTime<Utc>>,
    /// Set when a later submission for the same exam replaced this one.
    pub superseded_at: Option<DateTime<Utc>>,
}

impl Submission {
    pub fn is_active(&self) -> bool {
        !self.graded && self.superseded_at.is_none()
    }
}

/// Faculty-facing row: a submission joined with the learner's profile.
#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SubmissionView {
    #[serde(flatten)]
    pub submission: Submission,
    pub learner_name: Option<String>,
    pub download_url: String,
}

// ---------- payments ----------

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Success,
    Fail,
    Cancel,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PaymentOutcome {
    pub learner_id: String,
    pub course_id: Uuid,
    pub status: PaymentStatus,
}

// ---------- request bodies ----------

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct QuizAnswersReq {
    pub answers: Vec<u32>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GradeReq {
    pub marks: i64,
}
