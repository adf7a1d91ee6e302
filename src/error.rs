use axum::{
    response::{IntoResponse, Response},
    Json,
};
use http::StatusCode;
use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("not authorized")]
    NotAuthorized,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("already enrolled")]
    AlreadyEnrolled,
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("store unavailable: {0}")]
    TransientStore(String),
}

impl EngineError {
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::NotAuthorized => "not_authorized",
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyEnrolled => "already_enrolled",
            EngineError::Validation(_) => "validation_error",
            EngineError::TransientStore(_) => "transient_store_error",
        }
    }

    /// Only store failures are worth retrying; the caller keeps its last confirmed state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::TransientStore(_))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            EngineError::NotAuthorized => StatusCode::FORBIDDEN,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::AlreadyEnrolled => StatusCode::CONFLICT,
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::TransientStore(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => EngineError::NotFound("record"),
            other => EngineError::TransientStore(other.to_string()),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::TransientStore(e.to_string())
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        EngineError::TransientStore(format!("payment gateway: {e}"))
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        if self.is_retryable() {
            tracing::error!(error = %self, "store failure");
        }
        let body = serde_json::json!({
            "error": self.kind(),
            "message": self.to_string(),
            "retryable": self.is_retryable(),
        });
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_store_errors_are_retryable() {
        assert!(EngineError::TransientStore("down".into()).is_retryable());
        assert!(!EngineError::NotAuthorized.is_retryable());
        assert!(!EngineError::Validation("bad".into()).is_retryable());
    }

    #[test]
    fn row_not_found_maps_to_not_found() {
        assert_eq!(
            EngineError::from(sqlx::Error::RowNotFound),
            EngineError::NotFound("record")
        );
        assert!(EngineError::from(sqlx::Error::PoolTimedOut).is_retryable());
    }

    #[test]
    fn status_codes_follow_kind() {
        assert_eq!(EngineError::AlreadyEnrolled.status(), StatusCode::CONFLICT);
        assert_eq!(EngineError::NotFound("course").status(), StatusCode::NOT_FOUND);
        assert_eq!(EngineError::NotAuthorized.status(), StatusCode::FORBIDDEN);
    }
}
