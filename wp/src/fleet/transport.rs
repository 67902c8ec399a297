//! HTTP transport to worker processes
//!
//! The fleet talks to workers only through [`WorkerTransport`], so probes and
//! calls can be exercised against a scripted transport in tests.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Status and body of a worker response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Errors below the HTTP status level
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),
}

impl TransportError {
    fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(timeout)
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

/// Minimal HTTP surface the fleet needs from a worker
#[async_trait]
pub trait WorkerTransport: Send + Sync {
    /// GET `url` with a timeout covering the whole exchange
    async fn get(&self, url: &str, timeout: Duration) -> Result<TransportResponse, TransportError>;

    /// POST `body` as JSON to `url` with a timeout covering the whole exchange
    async fn post_json(&self, url: &str, body: &Value, timeout: Duration) -> Result<TransportResponse, TransportError>;
}

/// reqwest-backed transport sharing one connection pool across workers
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        debug!("HttpTransport::new: called");
        let http = Client::builder()
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl WorkerTransport for HttpTransport {
    async fn get(&self, url: &str, timeout: Duration) -> Result<TransportResponse, TransportError> {
        debug!(%url, ?timeout, "HttpTransport::get: called");
        let response = self
            .http
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(e, timeout))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::from_reqwest(e, timeout))?;
        Ok(TransportResponse { status, body })
    }

    async fn post_json(&self, url: &str, body: &Value, timeout: Duration) -> Result<TransportResponse, TransportError> {
        debug!(%url, ?timeout, "HttpTransport::post_json: called");
        let response = self
            .http
            .post(url)
            .timeout(timeout)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(e, timeout))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::from_reqwest(e, timeout))?;
        Ok(TransportResponse { status, body })
    }
}
