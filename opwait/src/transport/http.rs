//! HTTP transport backed by reqwest.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::Transport;
use crate::error::TransportError;

/// Settings for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    pub user_agent: String,
    pub request_timeout: Duration,
    /// Pre-issued bearer token sent with every request, if any.
    pub access_token: Option<String>,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("opwait/{}", env!("CARGO_PKG_VERSION")),
            request_timeout: Duration::from_secs(30),
            access_token: None,
        }
    }
}

/// Transport that issues GET requests with reqwest.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    access_token: Option<String>,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        Ok(Self {
            client,
            access_token: config.access_token,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<Value, TransportError> {
        debug!("GET {}", url);
        let mut request = self.client.get(url);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(classify)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!("GET {} returned {}", url, status);
            return Err(TransportError::Status {
                code: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await.map_err(classify)?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Object(Default::default()));
        }
        serde_json::from_slice(&bytes).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

fn classify(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_builder() {
        TransportError::InvalidRequest(e.to_string())
    } else if e.is_decode() {
        TransportError::Decode(e.to_string())
    } else {
        TransportError::Connect(e.to_string())
    }
}
