//! Access Gate: decides, per content item, whether a learner may view it.
//!
//! Pure and synchronous. Rendering surfaces call it on every render, and the
//! engine calls it again as a guard before selecting or completing content.

use serde::Serialize;

use crate::models::{Course, Enrollment, Learner};

/// How a learner reaches a course, in rule precedence order.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    /// Owning faculty or admin. Unlimited, never tracked.
    Bypass,
    /// Free course; every item open to everyone.
    Open,
    /// Persisted free or paid enrollment.
    Enrolled,
    /// First item only.
    Preview,
}

impl AccessLevel {
    pub fn allows(&self, content_index: usize) -> bool {
        match self {
            AccessLevel::Bypass | AccessLevel::Open | AccessLevel::Enrolled => true,
            AccessLevel::Preview => content_index == 0,
        }
    }
}

/// First matching rule wins. `learner` is `None` for anonymous visitors.
pub fn access_level(
    learner: Option<&Learner>,
    course: &Course,
    enrollment: Option<&Enrollment>,
) -> AccessLevel {
    if learner.is_some_and(|l| l.manages(course)) {
        return AccessLevel::Bypass;
    }
    if course.price.is_free() {
        return AccessLevel::Open;
    }
    let enrolled = match (learner, enrollment) {
        (Some(l), Some(e)) => {
            e.learner_id == l.id && e.course_id == course.id && e.origin.is_persistent()
        }
        _ => false,
    };
    if enrolled {
        AccessLevel::Enrolled
    } else {
        AccessLevel::Preview
    }
}

pub fn can_access(
    learner: Option<&Learner>,
    course: &Course,
    enrollment: Option<&Enrollment>,
    content_index: usize,
) -> bool {
    access_level(learner, course, enrollment).allows(content_index)
}

/// Indices of `course.videos` the learner may select.
pub fn accessible_indices(
    learner: Option<&Learner>,
    course: &Course,
    enrollment: Option<&Enrollment>,
) -> Vec<usize> {
    let level = access_level(learner, course, enrollment);
    (0..course.videos.len()).filter(|i| level.allows(*i)).collect()
}
