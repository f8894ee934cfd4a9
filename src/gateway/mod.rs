//! Outbound calls to the configured LLM backend.

mod anthropic;
mod custom;
mod ollama;
mod openai;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::llm_config::ProviderKind;

const MAX_ERROR_BODY_CHARS: usize = 2000;

/// Everything needed for one call. Built fresh per run; the credential is read
/// from the environment by the caller and never stored.
#[derive(Clone)]
pub struct GatewayRequest {
    pub kind: ProviderKind,
    pub base_url: Option<String>,
    pub model: String,
    pub credential: Option<String>,
    pub parameters: Map<String, Value>,
    pub prompt: String,
}

impl fmt::Debug for GatewayRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayRequest")
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .field("parameters", &self.parameters)
            .field("prompt_len", &self.prompt.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayResponse {
    pub text: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayFailure {
    #[error("LLM API returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Network error calling LLM API: {0}")]
    Network(String),

    #[error("Malformed response from LLM API: {0}")]
    Malformed(String),

    #[error("LLM API call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Environment variable {env_var} is not set")]
    MissingCredential { env_var: String },

    #[error("Invalid LLM configuration: {0}")]
    Configuration(String),
}

impl GatewayFailure {
    fn from_transport(e: reqwest::Error, timeout: Duration) -> Self {
        if e.is_timeout() {
            GatewayFailure::Timeout(timeout)
        } else {
            GatewayFailure::Network(e.to_string())
        }
    }
}

#[async_trait]
pub trait LlmGateway: Send + Sync {
    async fn invoke(&self, request: &GatewayRequest) -> Result<GatewayResponse, GatewayFailure>;
}

/// reqwest-backed gateway speaking each provider kind's wire format.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    timeout: Duration,
}

impl HttpGateway {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl LlmGateway for HttpGateway {
    async fn invoke(&self, request: &GatewayRequest) -> Result<GatewayResponse, GatewayFailure> {
        match request.kind {
            ProviderKind::OpenAi => openai::invoke(request, self.timeout).await,
            ProviderKind::Anthropic => anthropic::invoke(request, self.timeout).await,
            ProviderKind::Ollama => ollama::invoke(request, self.timeout).await,
            ProviderKind::CustomRest => custom::invoke(request, self.timeout).await,
        }
    }
}

fn endpoint(base_url: Option<&str>, default_base: &str, path: &str) -> String {
    let base = base_url
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(default_base);
    format!("{}{}", base.trim_end_matches('/'), path)
}

fn client(url: &str, timeout: Duration) -> Result<reqwest::Client, GatewayFailure> {
    crate::http_client::client_for_url_with_timeout(url, timeout)
        .map_err(|e| GatewayFailure::Network(e.to_string()))
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

/// Sends the request and returns the raw body of a 2xx response.
async fn send(builder: RequestBuilder, timeout: Duration) -> Result<String, GatewayFailure> {
    let response = builder
        .send()
        .await
        .map_err(|e| GatewayFailure::from_transport(e, timeout))?;
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| GatewayFailure::from_transport(e, timeout))?;
    if !status.is_success() {
        tracing::warn!(status = status.as_u16(), "LLM API returned non-success status");
        return Err(GatewayFailure::Status {
            status: status.as_u16(),
            message: truncate_chars(&body, MAX_ERROR_BODY_CHARS),
        });
    }
    Ok(body)
}

/// Decodes a success body into the provider's response type.
fn parse_body<T: DeserializeOwned>(body: &str) -> Result<T, GatewayFailure> {
    serde_json::from_str(body).map_err(|e| GatewayFailure::Malformed(e.to_string()))
}
