//! Common test utilities for integration tests
//!
//! Shared fixtures: domains, mock-backed orchestrators and registries.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use mdsa::domain::ports::{Classification, IntentClassifier, Planner};
use mdsa::services::{ModelRegistry, RetryPolicy};
use mdsa::{
    Config, Domain, DomainResult, MockModelBackend, ModelSpec, ModelTier, Orchestrator, Query,
    Task, TaskId, TaskPlan,
};
use mdsa::domain::models::RegistryConfig;

/// Domain backed by a Tier3 model named `<id>-slm`.
pub fn domain(id: &str, keywords: &[&str]) -> Domain {
    Domain::new(
        id,
        format!("{id} specialist"),
        keywords,
        ModelSpec::for_tier(format!("{id}-slm"), ModelTier::Tier3),
    )
}

/// The three domains most scenarios route between.
pub fn standard_domains() -> Vec<Domain> {
    vec![
        domain("weather", &["weather", "forecast", "rain"]),
        domain("coding", &["code", "icd", "diagnosis"]),
        domain("billing", &["billing", "invoice", "charge"]),
    ]
}

pub fn config() -> Config {
    let mut config = Config::default();
    config.retry.max_retries = 0;
    config.retry.initial_backoff_ms = 1;
    config.retry.max_backoff_ms = 1;
    config
}

/// Orchestrator over `standard_domains()` with a fresh mock backend.
pub fn orchestrator() -> (Orchestrator, Arc<MockModelBackend>) {
    orchestrator_with(config(), |builder| builder)
}

pub fn orchestrator_with(
    config: Config,
    customize: impl FnOnce(mdsa::OrchestratorBuilder) -> mdsa::OrchestratorBuilder,
) -> (Orchestrator, Arc<MockModelBackend>) {
    let backend = Arc::new(MockModelBackend::new());
    orchestrator_on(backend, config, customize)
}

pub fn orchestrator_on(
    backend: Arc<MockModelBackend>,
    config: Config,
    customize: impl FnOnce(mdsa::OrchestratorBuilder) -> mdsa::OrchestratorBuilder,
) -> (Orchestrator, Arc<MockModelBackend>) {
    let mut builder = Orchestrator::builder(backend.clone()).with_config(config);
    for domain in standard_domains() {
        builder = builder.with_domain(domain);
    }
    let orchestrator = customize(builder).build().expect("fixture orchestrator builds");
    (orchestrator, backend)
}

/// Small model, 440 MB unquantized.
pub fn tiny(id: &str) -> ModelSpec {
    ModelSpec::for_tier(id, ModelTier::Tier1)
}

pub fn registry(backend: Arc<MockModelBackend>, max_models: usize) -> ModelRegistry {
    ModelRegistry::new(
        backend,
        RegistryConfig {
            max_models,
            memory_budget_mb: 16_384,
            soft_threshold: 1.0,
            pressure_check_interval_ms: 10,
        },
        RetryPolicy::new(0, 1, 1, Duration::from_secs(5)),
    )
}

/// Classifier that always answers with the same domain and confidence.
pub struct FixedClassifier {
    pub domain_id: &'static str,
    pub confidence: f64,
}

impl IntentClassifier for FixedClassifier {
    fn classify(&self, _text: &str, _domains: &[Domain]) -> Option<Classification> {
        Some(Classification {
            domain_id: self.domain_id.to_string(),
            confidence: self.confidence,
        })
    }
}

/// Planner producing a linear chain over the given domains.
pub struct ChainPlanner(pub Vec<&'static str>);

impl Planner for ChainPlanner {
    fn name(&self) -> &str {
        "chain"
    }

    fn plan(&self, query: &Query, _domains: &[Domain]) -> DomainResult<TaskPlan> {
        let tasks = self
            .0
            .iter()
            .enumerate()
            .map(|(i, domain_id)| {
                let id = TaskId(i as u32 + 1);
                let task = Task::new(id, *domain_id, format!("step {} of {}", i + 1, query.text));
                if i == 0 {
                    task
                } else {
                    task.with_dependencies(vec![TaskId(i as u32)])
                }
            })
            .collect();
        TaskPlan::new(query.id, tasks)
    }
}
