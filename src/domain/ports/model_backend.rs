//! Model Backend Port
//!
//! Abstraction over whatever actually runs the models: an in-process
//! library, a local inference server or a remote HTTP service. The model
//! registry and the task executor are agnostic to which.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::errors::BackendError;
use crate::domain::models::{ModelHandle, ModelSpec};

/// Parameters for a single generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Full prompt, including merged dependency results and retrieved context
    pub prompt: String,

    /// Domain instructions sent alongside the prompt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Sampling temperature
    pub temperature: f32,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, max_tokens: u32, temperature: f32) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            max_tokens,
            temperature,
        }
    }

    pub fn with_system(mut self, system: Option<String>) -> Self {
        self.system = system;
        self
    }
}

/// Output of a generation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    pub tokens_used: u64,
}

/// Inference backend trait
///
/// Implementations must be safe to call concurrently. `load` may be slow;
/// the registry guarantees it is called at most once per resident model.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Backend identifier used in logs (e.g., "ollama", "mock")
    fn name(&self) -> &str;

    /// Make a model resident and return a handle to it
    async fn load(&self, spec: &ModelSpec) -> Result<ModelHandle, BackendError>;

    /// Generate a completion with a previously loaded model
    async fn generate(
        &self,
        handle: &ModelHandle,
        request: &GenerationRequest,
    ) -> Result<Generation, BackendError>;

    /// Release backend-held memory for a model
    async fn unload(&self, handle: &ModelHandle) -> Result<(), BackendError>;
}
