//! Core services of the orchestration engine.

pub mod complexity_analyzer;
pub mod domain_registry;
pub mod event_bus;
pub mod fast_router;
pub mod model_registry;
pub mod orchestrator;
pub mod retry;
pub mod rule_planner;
pub mod task_executor;
pub mod workflow;

pub use complexity_analyzer::ComplexityAnalyzer;
pub use domain_registry::DomainRegistry;
pub use event_bus::{
    EventBus, EventBusConfig, EventCategory, EventId, EventPayload, EventSeverity, EvictionReason,
    OrchestratorEvent, SequenceNumber,
};
pub use fast_router::{FastRouter, ProfileClassifier};
pub use model_registry::{ModelCacheEntry, ModelRegistry, MonitorHandle, RegistryStats};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, OrchestratorStats};
pub use retry::{RetryError, RetryPolicy};
pub use rule_planner::RuleBasedPlanner;
pub use task_executor::{PlanOutcome, RunContext, TaskExecutor};
pub use workflow::{TransitionRecord, WorkflowStateMachine};
