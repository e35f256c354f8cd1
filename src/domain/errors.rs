//! Domain errors for the MDSA orchestration core.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Format a cycle path as a human-readable string: `task-1 -> task-2 -> task-1`.
fn format_cycle_path(path: &[String]) -> String {
    path.join(" -> ")
}

/// Errors raised by a model backend (load, generate).
///
/// Timeouts are kept apart from logical failures so the retry policy and
/// the task executor can report them differently.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The call did not finish within its per-call timeout.
    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),

    /// The backend could not be reached (connection refused, DNS, ...).
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    /// The backend refused the request for lack of resources.
    #[error("backend resources exhausted: {0}")]
    ResourceExhausted(String),

    /// The request itself was rejected (unknown model, bad parameters).
    #[error("invalid backend request: {0}")]
    InvalidRequest(String),

    /// Generation started but produced an error.
    #[error("generation failed: {0}")]
    Generation(String),
}

impl BackendError {
    /// Returns true if this error is transient and the call may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Unreachable(_) | Self::ResourceExhausted(_)
        )
    }

    /// Returns true if this is a permanent error that must not be retried.
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Domain-level errors of the orchestration core.
#[derive(Debug, Clone, Error)]
pub enum DomainError {
    #[error("Planning failed: {message}")]
    Planning {
        message: String,
        offending_id: Option<String>,
    },

    #[error("Task dependency cycle detected: {}", format_cycle_path(.0))]
    DependencyCycle(Vec<String>),

    /// No domain could be chosen with confidence. Carries the classifier's
    /// proposal, if it made one, so the escalation can report it.
    #[error("Routing ambiguous: {reason}")]
    RoutingAmbiguous {
        reason: String,
        proposed_domain: Option<String>,
        confidence: f64,
        threshold: f64,
    },

    #[error("Model {model_id} unavailable: {source}")]
    ModelUnavailable {
        model_id: String,
        #[source]
        source: BackendError,
    },

    #[error("Task {task_id} failed: {source}")]
    TaskExecution {
        task_id: String,
        #[source]
        source: BackendError,
    },

    #[error("Capacity exceeded loading {model_id}: {reason}")]
    CapacityExceeded { model_id: String, reason: String },

    #[error("Invalid state transition from {from} to {to}")]
    StateTransition { from: String, to: String },

    #[error("Model {model_id} is in use by {use_count} task(s)")]
    ModelInUse { model_id: String, use_count: usize },

    #[error("Domain validation failed for {domain_id}: {reason}")]
    DomainValidation { domain_id: String, reason: String },

    #[error("Domain not found: {0}")]
    DomainNotFound(String),

    #[error("Request cancelled: {0}")]
    Cancelled(String),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

pub type DomainResult<T> = Result<T, DomainError>;

/// Serialisable error classification attached to results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PlanningError,
    RoutingAmbiguous,
    ModelUnavailable,
    TaskExecutionError,
    CapacityExceeded,
    StateTransitionError,
    ValidationError,
    Cancelled,
    DependencyFailed,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PlanningError => "planning_error",
            Self::RoutingAmbiguous => "routing_ambiguous",
            Self::ModelUnavailable => "model_unavailable",
            Self::TaskExecutionError => "task_execution_error",
            Self::CapacityExceeded => "capacity_exceeded",
            Self::StateTransitionError => "state_transition_error",
            Self::ValidationError => "validation_error",
            Self::Cancelled => "cancelled",
            Self::DependencyFailed => "dependency_failed",
        };
        write!(f, "{s}")
    }
}

/// Structured error carried by failed tasks and non-successful results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub kind: ErrorKind,
    pub message: String,
    /// Task id, domain id or model id the failure is attributed to.
    pub offending_id: Option<String>,
    /// Whether resubmitting the request may succeed.
    pub retryable: bool,
}

impl ExecutionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            offending_id: None,
            retryable: false,
        }
    }

    pub fn with_offending_id(mut self, id: impl Into<String>) -> Self {
        self.offending_id = Some(id.into());
        self
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}

impl std::fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.offending_id {
            Some(id) => write!(f, "{} ({}): {}", self.kind, id, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl DomainError {
    /// Classify this error for reporting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Planning { .. } | Self::DependencyCycle(_) => ErrorKind::PlanningError,
            Self::RoutingAmbiguous { .. } => ErrorKind::RoutingAmbiguous,
            Self::ModelUnavailable { .. } => ErrorKind::ModelUnavailable,
            Self::TaskExecution { .. } => ErrorKind::TaskExecutionError,
            Self::CapacityExceeded { .. } | Self::ModelInUse { .. } => ErrorKind::CapacityExceeded,
            Self::StateTransition { .. } => ErrorKind::StateTransitionError,
            Self::DomainValidation { .. } | Self::DomainNotFound(_) => ErrorKind::ValidationError,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Backend(_) => ErrorKind::TaskExecutionError,
        }
    }

    /// Id of the task, domain or model this error is attributed to, if any.
    pub fn offending_id(&self) -> Option<String> {
        match self {
            Self::Planning { offending_id, .. } => offending_id.clone(),
            Self::DependencyCycle(path) => path.first().cloned(),
            Self::ModelUnavailable { model_id, .. }
            | Self::CapacityExceeded { model_id, .. }
            | Self::ModelInUse { model_id, .. } => Some(model_id.clone()),
            Self::TaskExecution { task_id, .. } => Some(task_id.clone()),
            Self::DomainValidation { domain_id, .. } => Some(domain_id.clone()),
            Self::DomainNotFound(id) => Some(id.clone()),
            Self::RoutingAmbiguous {
                proposed_domain, ..
            } => proposed_domain.clone(),
            Self::StateTransition { .. }
            | Self::Cancelled(_)
            | Self::Backend(_) => None,
        }
    }

    /// Whether a resubmission of the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::CapacityExceeded { .. } | Self::ModelInUse { .. } => true,
            Self::ModelUnavailable { source, .. } | Self::TaskExecution { source, .. } => {
                source.is_transient()
            }
            Self::Backend(source) => source.is_transient(),
            _ => false,
        }
    }
}

impl From<&DomainError> for ExecutionError {
    fn from(err: &DomainError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            offending_id: err.offending_id(),
            retryable: err.is_retryable(),
        }
    }
}

impl From<DomainError> for ExecutionError {
    fn from(err: DomainError) -> Self {
        Self::from(&err)
    }
}
