//! Mock model backend for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::domain::errors::BackendError;
use crate::domain::models::{ModelHandle, ModelSpec};
use crate::domain::ports::{Generation, GenerationRequest, ModelBackend};

/// One recorded generate call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateCall {
    pub model_id: String,
    pub prompt: String,
}

/// Deterministic in-process backend.
///
/// Counts every call, and lets tests script per-model responses, failures
/// and latency. Responses echo the last line of the prompt so dependent
/// tasks can be checked for the results they received.
pub struct MockModelBackend {
    load_delay: Duration,
    generate_delay: Duration,
    load_calls: AtomicUsize,
    generate_calls: AtomicUsize,
    unload_calls: AtomicUsize,
    loads_per_model: Mutex<HashMap<String, usize>>,
    load_failures: Mutex<HashMap<String, BackendError>>,
    generate_failures: Mutex<HashMap<String, BackendError>>,
    prompt_failures: Mutex<Vec<(String, BackendError)>>,
    responses: Mutex<HashMap<String, String>>,
    generate_log: Mutex<Vec<GenerateCall>>,
    unloaded: Mutex<Vec<String>>,
}

impl MockModelBackend {
    pub fn new() -> Self {
        Self {
            load_delay: Duration::ZERO,
            generate_delay: Duration::ZERO,
            load_calls: AtomicUsize::new(0),
            generate_calls: AtomicUsize::new(0),
            unload_calls: AtomicUsize::new(0),
            loads_per_model: Mutex::new(HashMap::new()),
            load_failures: Mutex::new(HashMap::new()),
            generate_failures: Mutex::new(HashMap::new()),
            prompt_failures: Mutex::new(Vec::new()),
            responses: Mutex::new(HashMap::new()),
            generate_log: Mutex::new(Vec::new()),
            unloaded: Mutex::new(Vec::new()),
        }
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub fn with_generate_delay(mut self, delay: Duration) -> Self {
        self.generate_delay = delay;
        self
    }

    /// Make every load of `model_id` fail with `error`.
    pub fn fail_load_for(&self, model_id: impl Into<String>, error: BackendError) {
        self.load_failures.lock().insert(model_id.into(), error);
    }

    /// Make every generate call on `model_id` fail with `error`.
    pub fn fail_generate_for(&self, model_id: impl Into<String>, error: BackendError) {
        self.generate_failures.lock().insert(model_id.into(), error);
    }

    /// Make generate calls whose prompt contains `needle` fail with `error`.
    pub fn fail_generate_containing(&self, needle: impl Into<String>, error: BackendError) {
        self.prompt_failures.lock().push((needle.into(), error));
    }

    /// Fixed response text for `model_id`.
    pub fn set_response_for(&self, model_id: impl Into<String>, text: impl Into<String>) {
        self.responses.lock().insert(model_id.into(), text.into());
    }

    pub fn load_count(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }

    pub fn loads_of(&self, model_id: &str) -> usize {
        self.loads_per_model.lock().get(model_id).copied().unwrap_or(0)
    }

    pub fn generate_count(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    pub fn unload_count(&self) -> usize {
        self.unload_calls.load(Ordering::SeqCst)
    }

    /// Model ids unloaded so far, in order.
    pub fn unloaded_models(&self) -> Vec<String> {
        self.unloaded.lock().clone()
    }

    pub fn generate_calls(&self) -> Vec<GenerateCall> {
        self.generate_log.lock().clone()
    }
}

impl Default for MockModelBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelBackend for MockModelBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn load(&self, spec: &ModelSpec) -> Result<ModelHandle, BackendError> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        *self
            .loads_per_model
            .lock()
            .entry(spec.model_id.clone())
            .or_insert(0) += 1;

        if !self.load_delay.is_zero() {
            tokio::time::sleep(self.load_delay).await;
        }

        if let Some(err) = self.load_failures.lock().get(&spec.model_id) {
            return Err(err.clone());
        }
        Ok(ModelHandle::new(spec))
    }

    async fn generate(
        &self,
        handle: &ModelHandle,
        request: &GenerationRequest,
    ) -> Result<Generation, BackendError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        self.generate_log.lock().push(GenerateCall {
            model_id: handle.model_id.clone(),
            prompt: request.prompt.clone(),
        });

        if !self.generate_delay.is_zero() {
            tokio::time::sleep(self.generate_delay).await;
        }

        if let Some(err) = self.generate_failures.lock().get(&handle.model_id) {
            return Err(err.clone());
        }
        if let Some((_, err)) = self
            .prompt_failures
            .lock()
            .iter()
            .find(|(needle, _)| request.prompt.contains(needle.as_str()))
        {
            return Err(err.clone());
        }

        let text = self.responses.lock().get(&handle.model_id).cloned().unwrap_or_else(|| {
            let last_line = request.prompt.lines().last().unwrap_or_default();
            format!("[{}] {}", handle.backend_name, last_line)
        });
        let tokens_used = text.split_whitespace().count() as u64;
        Ok(Generation { text, tokens_used })
    }

    async fn unload(&self, handle: &ModelHandle) -> Result<(), BackendError> {
        self.unload_calls.fetch_add(1, Ordering::SeqCst);
        self.unloaded.lock().push(handle.model_id.clone());
        Ok(())
    }
}
