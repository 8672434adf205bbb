use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, RETRY_AFTER};
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use crate::accrual::engine::{AccrualStatus, RewardEngine};
use crate::accrual::limiter::OrderRateLimiter;
use crate::order_number::OrderNumber;
use crate::points::Points;

/// Pause applied when the service throttles without saying for how long.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// What the accrual service said about one order, already mapped onto the states the
/// poller understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccrualReply {
    Registered,
    Processing,
    Processed(Points),
    Invalid,
    /// Never registered, or reported with a status we do not recognise.
    Unknown,
    RateLimited(Duration),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("accrual service request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("accrual service answered {0}")]
    UnexpectedStatus(u16),
    #[error("malformed accrual response: {0}")]
    Decode(#[from] serde_json::Error),
}

#[async_trait]
pub trait AccrualClient: Send + Sync + 'static {
    async fn query(&self, order: OrderNumber) -> Result<AccrualReply, ClientError>;
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    status: String,
    accrual: Option<Points>,
}

impl AccrualReply {
    fn from_wire(status: &str, accrual: Option<Points>) -> Self {
        match status.to_ascii_uppercase().as_str() {
            "REGISTERED" => Self::Registered,
            "PROCESSING" => Self::Processing,
            "PROCESSED" => Self::Processed(accrual.unwrap_or(Points::ZERO)),
            "INVALID" => Self::Invalid,
            _ => Self::Unknown,
        }
    }

    fn from_record(status: AccrualStatus, accrual: Option<Points>) -> Self {
        match status {
            AccrualStatus::Registered => Self::Registered,
            AccrualStatus::Processing => Self::Processing,
            AccrualStatus::Processed => Self::Processed(accrual.unwrap_or(Points::ZERO)),
            AccrualStatus::Invalid => Self::Invalid,
        }
    }
}

pub(crate) fn decode_reply(
    status: StatusCode,
    retry_after: Option<&HeaderValue>,
    body: &[u8],
) -> Result<AccrualReply, ClientError> {
    match status {
        StatusCode::OK => {
            let response: OrderResponse = serde_json::from_slice(body)?;
            Ok(AccrualReply::from_wire(&response.status, response.accrual))
        }
        StatusCode::NO_CONTENT => Ok(AccrualReply::Unknown),
        StatusCode::TOO_MANY_REQUESTS => {
            let delay = retry_after
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_RETRY_AFTER);
            Ok(AccrualReply::RateLimited(delay))
        }
        other => Err(ClientError::UnexpectedStatus(other.as_u16())),
    }
}

/// Talks to the accrual service over HTTP.
#[derive(Clone)]
pub struct HttpAccrualClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpAccrualClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }
}

#[async_trait]
impl AccrualClient for HttpAccrualClient {
    async fn query(&self, order: OrderNumber) -> Result<AccrualReply, ClientError> {
        let response = self
            .http
            .get(format!("{}/api/orders/{}", self.base_url, order))
            .send()
            .await?;
        let status = response.status();
        let retry_after = response.headers().get(RETRY_AFTER).cloned();
        let body = response.bytes().await?;
        decode_reply(status, retry_after.as_ref(), &body)
    }
}

/// Queries an engine living in the same process, honouring its rate limiter.
#[derive(Clone)]
pub struct EngineClient {
    engine: RewardEngine,
    limiter: Option<OrderRateLimiter>,
}

impl EngineClient {
    pub fn new(engine: RewardEngine, limiter: Option<OrderRateLimiter>) -> Self {
        Self { engine, limiter }
    }
}

#[async_trait]
impl AccrualClient for EngineClient {
    async fn query(&self, order: OrderNumber) -> Result<AccrualReply, ClientError> {
        if let Some(limiter) = &self.limiter {
            if let Err(retry_after) = limiter.check(order) {
                return Ok(AccrualReply::RateLimited(retry_after));
            }
        }
        Ok(match self.engine.query(order) {
            Some(record) => AccrualReply::from_record(record.status, record.accrual),
            None => AccrualReply::Unknown,
        })
    }
}
