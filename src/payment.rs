use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

/// External checkout provider. The engine only asks it for a redirect target
/// and later consumes the callback outcome.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initiate(&self, learner_id: &str, course_id: Uuid, amount: i64) -> EngineResult<String>;
}

#[derive(Serialize, Debug)]
struct CheckoutReq<'a> {
    learner_id: &'a str,
    course_id: Uuid,
    amount: i64,
    success_url: String,
    cancel_url: String,
}

#[derive(Deserialize, Debug)]
struct CheckoutResp {
    redirect_url: String,
}

pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    public_base_url: String,
}

impl HttpPaymentGateway {
    pub fn new(base_url: impl Into<String>, public_base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn initiate(&self, learner_id: &str, course_id: Uuid, amount: i64) -> EngineResult<String> {
        let req = CheckoutReq {
            learner_id,
            course_id,
            amount,
            success_url: format!("{}/courses/{course_id}?payment=success", self.public_base_url),
            cancel_url: format!("{}/courses/{course_id}?payment=cancel", self.public_base_url),
        };
        let resp: CheckoutResp = self
            .client
            .post(format!("{}/checkout", self.base_url))
            .json(&req)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(resp.redirect_url)
    }
}

/// Used when no gateway is configured; paid checkout is then unavailable.
pub struct DisabledPaymentGateway;

#[async_trait]
impl PaymentGateway for DisabledPaymentGateway {
    async fn initiate(&self, _learner_id: &str, _course_id: Uuid, _amount: i64) -> EngineResult<String> {
        Err(EngineError::Validation("paid checkout is not configured".into()))
    }
}
