//! Ollama model backend.
//!
//! Talks to an Ollama server over its HTTP API:
//! - `load` sends an empty generate request so the server pulls the model
//!   into memory and keeps it there for `keep_alive`
//! - `generate` is a non-streaming `/api/generate` call
//! - `unload` sends `keep_alive: 0`, which evicts the model server-side

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::errors::BackendError;
use crate::domain::models::{BackendConfig, ModelHandle, ModelSpec};
use crate::domain::ports::{Generation, GenerationRequest, ModelBackend};

/// Request body of `/api/generate`.
#[derive(Debug, Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
    keep_alive: KeepAlive<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerateOptions>,
}

/// Ollama accepts either a duration string ("30m") or a number of seconds.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum KeepAlive<'a> {
    Duration(&'a str),
    Seconds(u64),
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    num_predict: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Backend for a (local or remote) Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaBackend {
    client: Client,
    base_url: String,
    keep_alive: String,
    request_timeout: Duration,
}

impl OllamaBackend {
    /// Build a backend. `request_timeout` bounds every HTTP request; the
    /// retry policy applies its own per-call timeout on top.
    pub fn new(config: &BackendConfig, request_timeout: Duration) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| BackendError::InvalidRequest(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            keep_alive: config.keep_alive.clone(),
            request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_generate(&self, body: &GenerateBody<'_>) -> Result<GenerateResponse, BackendError> {
        let url = format!("{}/api/generate", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| map_transport_error(e, self.request_timeout))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|b| b.error)
                .unwrap_or(text);
            return Err(map_status(status, message));
        }

        response
            .json::<GenerateResponse>()
            .await
            .map_err(|e| BackendError::Generation(format!("malformed response: {e}")))
    }
}

fn map_transport_error(err: reqwest::Error, timeout: Duration) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout(timeout)
    } else if err.is_connect() || err.is_request() {
        BackendError::Unreachable(err.to_string())
    } else {
        BackendError::Generation(err.to_string())
    }
}

fn map_status(status: StatusCode, message: String) -> BackendError {
    match status {
        StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST => BackendError::InvalidRequest(message),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::INSUFFICIENT_STORAGE => {
            BackendError::ResourceExhausted(message)
        }
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT => {
            BackendError::Unreachable(message)
        }
        s if s.is_server_error() && message.contains("memory") => BackendError::ResourceExhausted(message),
        _ => BackendError::Generation(format!("{status}: {message}")),
    }
}

#[async_trait]
impl ModelBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn load(&self, spec: &ModelSpec) -> Result<ModelHandle, BackendError> {
        let model = spec.backend_name();
        debug!(model, base_url = %self.base_url, "warming up ollama model");
        self.post_generate(&GenerateBody {
            model,
            prompt: "",
            system: None,
            stream: false,
            keep_alive: KeepAlive::Duration(&self.keep_alive),
            options: None,
        })
        .await?;
        info!(model, "ollama model loaded");
        Ok(ModelHandle::new(spec))
    }

    async fn generate(
        &self,
        handle: &ModelHandle,
        request: &GenerationRequest,
    ) -> Result<Generation, BackendError> {
        let response = self
            .post_generate(&GenerateBody {
                model: &handle.backend_name,
                prompt: &request.prompt,
                system: request.system.as_deref(),
                stream: false,
                keep_alive: KeepAlive::Duration(&self.keep_alive),
                options: Some(GenerateOptions {
                    num_predict: request.max_tokens,
                    temperature: request.temperature,
                }),
            })
            .await?;

        let tokens_used = response
            .eval_count
            .unwrap_or_else(|| response.response.split_whitespace().count() as u64);
        Ok(Generation {
            text: response.response,
            tokens_used,
        })
    }

    async fn unload(&self, handle: &ModelHandle) -> Result<(), BackendError> {
        self.post_generate(&GenerateBody {
            model: &handle.backend_name,
            prompt: "",
            system: None,
            stream: false,
            keep_alive: KeepAlive::Seconds(0),
            options: None,
        })
        .await?;
        info!(model = %handle.backend_name, "ollama model unloaded");
        Ok(())
    }
}
