// Caller identity carried on each request as `x-learner-id` / `x-learner-role`.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderName, HeaderValue},
};
use axum_extra::{
    headers::{self, Header},
    TypedHeader,
};

use crate::{error::EngineError, models::{Learner, Role}};

static LEARNER_ID: HeaderName = HeaderName::from_static("x-learner-id");
static LEARNER_ROLE: HeaderName = HeaderName::from_static("x-learner-role");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LearnerId(pub String);

impl Header for LearnerId {
    fn name() -> &'static HeaderName {
        &LEARNER_ID
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = values.next().ok_or_else(headers::Error::invalid)?;
        let id = value.to_str().map_err(|_| headers::Error::invalid())?.trim();
        if id.is_empty() {
            return Err(headers::Error::invalid());
        }
        Ok(LearnerId(id.to_string()))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        if let Ok(v) = HeaderValue::from_str(&self.0) {
            values.extend(std::iter::once(v));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LearnerRole(pub Role);

impl Header for LearnerRole {
    fn name() -> &'static HeaderName {
        &LEARNER_ROLE
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = values.next().ok_or_else(headers::Error::invalid)?;
        let role = value
            .to_str()
            .map_err(|_| headers::Error::invalid())?
            .parse::<Role>()
            .map_err(|_| headers::Error::invalid())?;
        Ok(LearnerRole(role))
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        values.extend(std::iter::once(HeaderValue::from_static(self.0.as_str())));
    }
}

/// Extracts the caller. Use `Option<Learner>` on routes that allow anonymous visitors.
#[async_trait]
impl<S> FromRequestParts<S> for Learner
where
    S: Send + Sync,
{
    type Rejection = EngineError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(LearnerId(id)) = TypedHeader::<LearnerId>::from_request_parts(parts, state)
            .await
            .map_err(|_| EngineError::NotAuthorized)?;
        let TypedHeader(LearnerRole(role)) = TypedHeader::<LearnerRole>::from_request_parts(parts, state)
            .await
            .map_err(|_| EngineError::NotAuthorized)?;
        Ok(Learner { id, role })
    }
}
