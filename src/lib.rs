//! MDSA - Multi-Domain Specialist Orchestrator
//!
//! MDSA routes natural-language requests to domain-specialist models. Simple
//! requests take a fast path: one classification, one specialist. Complex
//! requests are decomposed by a planner into a task graph whose nodes run
//! in dependency order with bounded parallelism. Every request walks an
//! auditable workflow state machine and specialist models are kept in a
//! capacity-bounded LRU cache.
//!
//! # Architecture
//!
//! This crate follows Clean Architecture / Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): models, errors and the ports (traits) for
//!   model backends, knowledge retrieval, intent classification and planning
//! - **Service Layer** (`services`): analyzer, router, planner, workflow,
//!   model registry, task executor and the orchestrator tying them together
//! - **Adapters** (`adapters`): model backend implementations (Ollama, mock)
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use mdsa::{Domain, ModelSpec, ModelTier, Orchestrator, OllamaBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = mdsa::ConfigLoader::load()?;
//!     let _logger = mdsa::infrastructure::logging::LoggerImpl::init(&config.logging)?;
//!     let backend = OllamaBackend::new(&config.backend, std::time::Duration::from_secs(60))?;
//!
//!     let orchestrator = Orchestrator::builder(Arc::new(backend))
//!         .with_config(config)
//!         .with_domain(Domain::new(
//!             "coding",
//!             "Medical coding",
//!             &["icd", "cpt", "code"],
//!             ModelSpec::for_tier("ollama://llama3.2:3b", ModelTier::Tier3),
//!         ))
//!         .build()?;
//!
//!     let result = orchestrator.process("What is the CPT code for an office visit?").await;
//!     println!("{}", result.response);
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use adapters::{MockModelBackend, OllamaBackend};
pub use domain::errors::{BackendError, DomainError, DomainResult, ErrorKind, ExecutionError};
pub use domain::models::{
    ComplexityAssessment, Config, Domain, ExecutionResult, ExecutionStatus, ModelSpec, ModelTier,
    Query, RoutingDecision, RoutingMethod, Task, TaskId, TaskPlan, TaskStatus, ValidationRules,
    WorkflowState,
};
pub use domain::ports::{IntentClassifier, KnowledgeRetriever, ModelBackend, Planner};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{EventBus, ModelRegistry, Orchestrator, OrchestratorBuilder, OrchestratorStats};
