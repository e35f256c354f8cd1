use crate::domain::errors::DomainResult;
use crate::domain::models::{Domain, Query, TaskPlan};

/// Decomposes a complex query into a task plan.
///
/// Implementations may be rule-based or model-backed. Whatever they do, the
/// returned plan is a validated DAG: cyclic or unresolvable structures are
/// reported as errors here, before anything executes.
pub trait Planner: Send + Sync {
    /// Planner identifier used in logs
    fn name(&self) -> &str;

    /// Build a plan for `query` over the registered `domains`.
    fn plan(&self, query: &Query, domains: &[Domain]) -> DomainResult<TaskPlan>;
}
