//! Request outcome returned by the orchestrator.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::ExecutionError;
use crate::domain::models::complexity::ComplexityAssessment;
use crate::domain::models::task::{Task, TaskStatus};
use crate::domain::models::workflow_state::WorkflowState;

/// Overall status of a processed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    PartialFailure,
    Failed,
    Escalated,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::PartialFailure => "partial_failure",
            Self::Failed => "failed",
            Self::Escalated => "escalated",
        }
    }

    /// Aggregate status of a finished task set.
    ///
    /// Success only if every task completed; partial failure if at least
    /// one did; failed otherwise.
    pub fn from_tasks(tasks: &[Task]) -> Self {
        let completed = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .count();
        if !tasks.is_empty() && completed == tasks.len() {
            Self::Success
        } else if completed > 0 {
            Self::PartialFailure
        } else {
            Self::Failed
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the domain(s) for a request were chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMethod {
    /// Primary classifier met the confidence cutoff.
    Classifier,
    /// Classifier was below cutoff; keyword overlap picked a unique domain.
    KeywordFallback,
    /// Slow path: the planner assigned domains per task.
    Planner,
    /// Nothing cleared the cutoff; the classifier's proposal is recorded
    /// and the request escalated.
    Escalated,
}

/// Routing decision recorded on the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub domain_id: String,
    pub confidence: f64,
    pub method: RoutingMethod,
}

/// Terminal outcome of one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub request_id: Uuid,
    pub correlation_id: Uuid,
    pub status: ExecutionStatus,
    pub domain_used: Option<String>,
    pub routing: Option<RoutingDecision>,
    pub reasoning_used: bool,
    pub complexity: Option<ComplexityAssessment>,
    pub task_results: Vec<Task>,
    /// Outputs of the plan's sink tasks, joined.
    pub response: Option<String>,
    pub state_history: Vec<WorkflowState>,
    #[serde(default)]
    pub validation_warnings: Vec<String>,
    pub latency_ms: u64,
    pub error: Option<ExecutionError>,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    pub fn task(&self, task_id: crate::domain::models::task::TaskId) -> Option<&Task> {
        self.task_results.iter().find(|t| t.task_id == task_id)
    }
}
