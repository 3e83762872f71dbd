//! Client for the external WhatsApp gateway.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const SEND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The gateway refused the message; retrying will not help.
    #[error("gateway rejected message: {0}")]
    Rejected(String),
    #[error("gateway transport failure: {0}")]
    Transport(String),
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Transport(_))
    }
}

#[async_trait]
pub trait WaGateway: Send + Sync {
    /// Returns the gateway's message id.
    async fn send_text(&self, to: &str, text: &str) -> Result<Option<String>, GatewayError>;
}

#[derive(Serialize)]
struct SendRequest<'a> {
    to: &'a str,
    text: &'a str,
}

#[derive(Deserialize)]
struct SendResponse {
    #[serde(default, alias = "id")]
    message_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

pub struct HttpWaGateway {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpWaGateway {
    pub fn new(base_url: &str, token: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }
}

#[async_trait]
impl WaGateway for HttpWaGateway {
    async fn send_text(&self, to: &str, text: &str) -> Result<Option<String>, GatewayError> {
        let resp = self
            .client
            .post(format!("{}/send", self.base_url))
            .bearer_auth(&self.token)
            .json(&SendRequest { to, text })
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = resp.status();
        let body: Option<SendResponse> = resp.json().await.ok();
        debug!("WA gateway answered {} for {}", status, to);

        if status.is_success() {
            return Ok(body.and_then(|b| b.message_id));
        }
        let reason = body
            .and_then(|b| b.error)
            .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
        if status.is_client_error() && status != reqwest::StatusCode::TOO_MANY_REQUESTS {
            Err(GatewayError::Rejected(reason))
        } else {
            Err(GatewayError::Transport(reason))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_errors_retry() {
        assert!(GatewayError::Transport("timeout".into()).is_retryable());
        assert!(!GatewayError::Rejected("invalid_number".into()).is_retryable());
    }

    #[test]
    fn base_url_is_normalised() {
        let _ = rustls::crypto::ring::default_provider().install_default();
        let gw = HttpWaGateway::new("http://gateway.local/", "tok").unwrap();
        assert_eq!(gw.base_url, "http://gateway.local");
    }
}
