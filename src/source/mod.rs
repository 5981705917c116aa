//! Source client for the external user-data provider
//!
//! The provider is randomuser.me-compatible: a GET with `?results=N` returns
//! a JSON object whose `results` field is an array of user objects. Records
//! stay opaque (`serde_json::Value`) here — validation happens downstream in
//! the stream processor so the queue keeps the authoritative raw feed.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug)]
pub enum SourceError {
    /// Transport failure or non-success HTTP status. Recoverable: the
    /// ingestor retries on its next scheduled tick.
    Unavailable(String),
    /// Response body did not have the expected `results` array shape.
    MalformedResponse(String),
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Unavailable(msg) => write!(f, "Source unavailable: {}", msg),
            SourceError::MalformedResponse(msg) => {
                write!(f, "Malformed source response: {}", msg)
            }
        }
    }
}

impl std::error::Error for SourceError {}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        SourceError::Unavailable(err.to_string())
    }
}

/// Pull-only source of raw user records
#[async_trait]
pub trait UserSource: Send + Sync {
    /// Fetch one batch of raw user objects. May return fewer records than
    /// the configured limit, including zero.
    async fn fetch_batch(&self) -> Result<Vec<Value>, SourceError>;
}

/// HTTP client for a randomuser.me-compatible endpoint
pub struct RandomUserClient {
    http: reqwest::Client,
    base_url: String,
    batch_size: usize,
}

impl RandomUserClient {
    pub fn new(base_url: impl Into<String>, batch_size: usize) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            batch_size,
        })
    }
}

#[async_trait]
impl UserSource for RandomUserClient {
    async fn fetch_batch(&self) -> Result<Vec<Value>, SourceError> {
        let response = self
            .http
            .get(&self.base_url)
            .query(&[("results", self.batch_size.to_string())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SourceError::Unavailable(format!(
                "HTTP {} from {}",
                response.status(),
                self.base_url
            )));
        }

        let body: Value = response.json().await?;

        match body.get("results").and_then(Value::as_array) {
            Some(results) => Ok(results.clone()),
            None => Err(SourceError::MalformedResponse(
                "missing `results` array".to_string(),
            )),
        }
    }
}
