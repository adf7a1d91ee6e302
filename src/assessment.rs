// Scoring, attempt selection and grade validation for quizzes and written exams.

use std::cmp::Ordering;

use crate::{
    error::{EngineError, EngineResult},
    models::{Question, QuizAttempt},
};

pub const MAX_MARKS: i64 = 100;

/// One point per exact match, no partial credit, no negative marking.
pub fn score(questions: &[Question], answers: &[u32]) -> EngineResult<u32> {
    if questions.is_empty() {
        return Err(EngineError::Validation("quiz has no questions".into()));
    }
    if answers.is_empty() {
        return Err(EngineError::Validation("no answers submitted".into()));
    }
    if answers.len() != questions.len() {
        return Err(EngineError::Validation(format!(
            "expected {} answers, got {}",
            questions.len(),
            answers.len()
        )));
    }
    Ok(questions
        .iter()
        .zip(answers)
        .filter(|(q, a)| q.correct_option_index == **a)
        .count() as u32)
}

// Exact comparison of a/b against c/d without floats.
fn ratio_cmp(a: &QuizAttempt, b: &QuizAttempt) -> Ordering {
    let lhs = a.score as u64 * b.total_questions as u64;
    let rhs = b.score as u64 * a.total_questions as u64;
    lhs.cmp(&rhs)
}

/// Highest score ratio; ties go to the earliest submission.
pub fn best_attempt(attempts: &[QuizAttempt]) -> Option<&QuizAttempt> {
    attempts.iter().reduce(|best, a| match ratio_cmp(a, best) {
        Ordering::Greater => a,
        Ordering::Equal if a.submitted_at < best.submitted_at => a,
        _ => best,
    })
}

pub fn latest_attempt(attempts: &[QuizAttempt]) -> Option<&QuizAttempt> {
    attempts.iter().max_by_key(|a| a.submitted_at)
}

pub fn validate_marks(marks: i64) -> EngineResult<u8> {
    if !(0..=MAX_MARKS).contains(&marks) {
        return Err(EngineError::Validation(format!(
            "marks must be between 0 and {MAX_MARKS}, got {marks}"
        )));
    }
    Ok(marks as u8)
}
