//! Transport to the inference server
//!
//! Speaks the `OpenAI`-compatible HTTP surface exposed by local servers such
//! as LM Studio: `POST /v1/chat/completions` and `GET /v1/models`.

mod error;

pub use error::{TransportError, TransportErrorKind};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Default connection-establishment timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Address of an inference server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn chat_completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url())
    }

    pub fn models_url(&self) -> String {
        format!("{}/v1/models", self.base_url())
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new("127.0.0.1", 1234)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid endpoint `{input}`: {reason}")]
pub struct EndpointParseError {
    input: String,
    reason: &'static str,
}

impl FromStr for Endpoint {
    type Err = EndpointParseError;

    /// Accepts `host:port`, optionally prefixed with `http://`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason| EndpointParseError {
            input: s.to_string(),
            reason,
        };

        let trimmed = s.trim();
        let address = trimmed
            .strip_prefix("http://")
            .unwrap_or(trimmed)
            .trim_end_matches('/');
        if address.contains("://") {
            return Err(err("only http:// endpoints are supported"));
        }
        let (host, port) = address.rsplit_once(':').ok_or_else(|| err("missing port"))?;
        if host.is_empty() {
            return Err(err("missing host"));
        }
        let port = port.parse::<u16>().map_err(|_| err("port is not a number"))?;
        Ok(Self::new(host, port))
    }
}

/// Outbound chat completion body: only `model` and `messages` travel
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Value,
}

impl ChatCompletionRequest {
    /// Pull the wire fields out of a validated payload
    pub fn from_payload(payload: &str) -> Result<Self, TransportError> {
        let root: Value = serde_json::from_str(payload)
            .map_err(|e| TransportError::invalid_payload(format!("Payload is not JSON: {e}")))?;

        let model = root
            .get("model")
            .and_then(Value::as_str)
            .ok_or_else(|| TransportError::invalid_payload("Payload has no string `model`"))?;
        let messages = root
            .get("messages")
            .filter(|m| m.is_array())
            .ok_or_else(|| TransportError::invalid_payload("Payload has no `messages` array"))?;

        Ok(Self {
            model: model.to_string(),
            messages: messages.clone(),
        })
    }
}

/// One entry of `GET /v1/models`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    #[serde(default)]
    pub owned_by: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    data: Vec<ModelInfo>,
}

/// Network boundary to the inference server
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a validated payload; returns the raw response body
    async fn send(&self, endpoint: &Endpoint, payload: &str) -> Result<String, TransportError>;

    /// List models the server has loaded
    async fn list_models(&self, endpoint: &Endpoint) -> Result<Vec<ModelInfo>, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, endpoint: &Endpoint, payload: &str) -> Result<String, TransportError> {
        (**self).send(endpoint, payload).await
    }

    async fn list_models(&self, endpoint: &Endpoint) -> Result<Vec<ModelInfo>, TransportError> {
        (**self).list_models(endpoint).await
    }
}

/// HTTP/1.1 transport with a bounded connect timeout and no retries
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(connect_timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .http1_only()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| TransportError::request(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    async fn read_body(response: reqwest::Response) -> Result<String, TransportError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::body(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(TransportError::status(
                status.as_u16(),
                format!("HTTP {status} error: {body}"),
            ));
        }
        Ok(body)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, endpoint: &Endpoint, payload: &str) -> Result<String, TransportError> {
        let request = ChatCompletionRequest::from_payload(payload)?;

        let response = self
            .client
            .post(endpoint.chat_completions_url())
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&e))?;

        Self::read_body(response).await
    }

    async fn list_models(&self, endpoint: &Endpoint) -> Result<Vec<ModelInfo>, TransportError> {
        let response = self
            .client
            .get(endpoint.models_url())
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&e))?;

        let body = Self::read_body(response).await?;
        let list: ModelList = serde_json::from_str(&body).map_err(|e| {
            TransportError::body(format!("Failed to parse model list: {e} - body: {body}"))
        })?;
        Ok(list.data)
    }
}

/// Logging wrapper for transports
pub struct LoggingTransport<T> {
    inner: T,
}

impl<T: Transport> LoggingTransport<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<T: Transport> Transport for LoggingTransport<T> {
    async fn send(&self, endpoint: &Endpoint, payload: &str) -> Result<String, TransportError> {
        let start = Instant::now();
        let result = self.inner.send(endpoint, payload).await;
        let duration = start.elapsed();

        match &result {
            Ok(body) => {
                tracing::info!(
                    endpoint = %endpoint,
                    duration_ms = %duration.as_millis(),
                    response_bytes = body.len(),
                    "Chat completion succeeded"
                );
            }
            Err(e) => {
                tracing::error!(
                    endpoint = %endpoint,
                    duration_ms = %duration.as_millis(),
                    kind = ?e.kind,
                    status = ?e.status,
                    error = %e.message,
                    "Chat completion failed"
                );
            }
        }

        result
    }

    async fn list_models(&self, endpoint: &Endpoint) -> Result<Vec<ModelInfo>, TransportError> {
        let result = self.inner.list_models(endpoint).await;
        if let Err(e) = &result {
            tracing::warn!(endpoint = %endpoint, error = %e.message, "Model listing failed");
        }
        result
    }
}
