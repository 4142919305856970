//! HTTP gateway to the provider's GraphQL endpoint
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building the HTTP client with the configured user agent and timeouts
//! - POSTing query payloads
//! - Classifying failures as transient or permanent
//!
//! The gateway never retries on its own; retries belong to the scheduler.

use crate::config::ApiConfig;
use crate::crawler::payload::QueryPayload;
use crate::FailureKind;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Classified failure of a single gateway call
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Network error, timeout, 5xx or 429: worth retrying
    #[error("transient: {0}")]
    Transient(String),

    /// 401 or 403
    #[error("unauthorized (HTTP {0})")]
    Unauthorized(u16),

    /// Any other non-success status
    #[error("rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// 2xx response whose body is not JSON
    #[error("invalid response body: {0}")]
    InvalidBody(String),
}

impl GatewayError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<GatewayError> for FailureKind {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Transient(message) => FailureKind::Transient(message),
            GatewayError::Unauthorized(status) => {
                FailureKind::Authentication(format!("HTTP {}", status))
            }
            GatewayError::Rejected { status, message } => {
                FailureKind::Rejected(format!("HTTP {}: {}", status, message))
            }
            GatewayError::InvalidBody(message) => FailureKind::Parse(message),
        }
    }
}

/// Sends query payloads to the remote service
#[async_trait]
pub trait ApiGateway: Send + Sync {
    /// Sends one payload and returns the raw JSON response
    async fn send(&self, payload: &QueryPayload) -> Result<Value, GatewayError>;
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The API configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &ApiConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.as_str())
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .gzip(true)
        .brotli(true)
        .build()
}

/// `ApiGateway` backed by reqwest
pub struct HttpGateway {
    client: Client,
    endpoint: String,
}

impl HttpGateway {
    /// Creates a gateway for the configured endpoint
    pub fn new(config: &ApiConfig) -> Result<Self, reqwest::Error> {
        Ok(Self::with_client(
            build_http_client(config)?,
            config.endpoint.as_str(),
        ))
    }

    /// Creates a gateway with a caller-supplied client
    pub fn with_client(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ApiGateway for HttpGateway {
    /// # Error Classification
    ///
    /// | Condition | Result |
    /// |-----------|--------|
    /// | Timeout / connect error | Transient |
    /// | HTTP 429, 5xx | Transient |
    /// | HTTP 401, 403 | Unauthorized |
    /// | Other non-2xx | Rejected |
    /// | Body is not JSON | InvalidBody |
    async fn send(&self, payload: &QueryPayload) -> Result<Value, GatewayError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(payload)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(GatewayError::Transient(format!("HTTP {}", status.as_u16())));
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(GatewayError::Unauthorized(status.as_u16()));
        }

        if !status.is_success() {
            let message = status
                .canonical_reason()
                .unwrap_or("unexpected status")
                .to_string();
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.bytes().await.map_err(classify_transport_error)?;

        serde_json::from_slice(&body).map_err(|e| GatewayError::InvalidBody(e.to_string()))
    }
}

fn classify_transport_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Transient("request timeout".to_string())
    } else if e.is_connect() {
        GatewayError::Transient("connection failed".to_string())
    } else if e.is_request() || e.is_body() {
        GatewayError::Transient(e.to_string())
    } else {
        GatewayError::Rejected {
            status: 0,
            message: e.to_string(),
        }
    }
}
