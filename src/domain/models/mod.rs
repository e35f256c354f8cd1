pub mod complexity;
pub mod config;
pub mod domain;
pub mod execution;
pub mod model;
pub mod plan;
pub mod query;
pub mod task;
pub mod workflow_state;

pub use complexity::{ComplexityAssessment, ComplexityIndicator};
pub use config::{
    BackendConfig, ComplexityWeights, Config, ExecutorConfig, LogConfig, LogFormat,
    OrchestratorConfig, RegistryConfig, RetryConfig, RotationPolicy,
};
pub use domain::{Domain, ValidationRules};
pub use execution::{ExecutionResult, ExecutionStatus, RoutingDecision, RoutingMethod};
pub use model::{estimate_memory_mb, Device, ModelHandle, ModelSpec, ModelTier, Quantization};
pub use plan::{detect_cycle, TaskPlan};
pub use query::Query;
pub use task::{Task, TaskId, TaskOutput, TaskStatus};
pub use workflow_state::WorkflowState;
