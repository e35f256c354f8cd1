//! End-to-end request scenarios against a mock backend.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::{ChainPlanner, FixedClassifier};
use mdsa::domain::models::ComplexityIndicator;
use mdsa::services::EventPayload;
use mdsa::{
    BackendError, Domain, DomainResult, ErrorKind, ExecutionStatus, MockModelBackend, ModelSpec,
    ModelTier, Planner, Query, RoutingMethod, Task, TaskId, TaskPlan, TaskStatus, WorkflowState,
};
use tokio_util::sync::CancellationToken;

/// Two independent tasks, one per domain.
struct ForkPlanner(&'static str, &'static str);

impl Planner for ForkPlanner {
    fn name(&self) -> &str {
        "fork"
    }

    fn plan(&self, query: &Query, _domains: &[Domain]) -> DomainResult<TaskPlan> {
        TaskPlan::new(
            query.id,
            vec![
                Task::new(TaskId(1), self.0, "left branch"),
                Task::new(TaskId(2), self.1, "right branch"),
            ],
        )
    }
}

#[tokio::test]
async fn test_simple_query_takes_fast_path() {
    let (orchestrator, backend) = common::orchestrator();

    let result = orchestrator.process("What is the weather today?").await;

    let complexity = result.complexity.as_ref().unwrap();
    assert!(complexity.score < 0.3);
    assert!(!complexity.has(ComplexityIndicator::MultiDomainTask));
    assert!(!complexity.has(ComplexityIndicator::Sequential));
    assert!(!complexity.has(ComplexityIndicator::Conditional));

    assert_eq!(result.status, ExecutionStatus::Success);
    assert!(!result.reasoning_used);
    assert_eq!(result.task_results.len(), 1);
    assert_eq!(result.domain_used.as_deref(), Some("weather"));
    assert_eq!(result.state_history.first(), Some(&WorkflowState::Init));
    assert_eq!(result.state_history.last(), Some(&WorkflowState::Return));
    assert_eq!(backend.generate_count(), 1);
}

#[tokio::test]
async fn test_sequential_query_takes_slow_path() {
    let (orchestrator, backend) = common::orchestrator();

    let result = orchestrator
        .process("Look up code X, then calculate billing for it")
        .await;

    let complexity = result.complexity.as_ref().unwrap();
    assert!(complexity.has(ComplexityIndicator::MultiDomainTask));
    assert!(complexity.has(ComplexityIndicator::Sequential));
    assert!((complexity.score - 0.5).abs() < 1e-9);

    assert!(result.reasoning_used);
    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.task_results.len(), 2);
    let first = result.task(TaskId(1)).unwrap();
    let second = result.task(TaskId(2)).unwrap();
    assert_eq!(first.domain_id, "coding");
    assert_eq!(second.domain_id, "billing");
    assert_eq!(second.dependencies, vec![first.task_id]);

    // The second step saw the first step's output.
    let calls = backend.generate_calls();
    let billing_call = calls.iter().find(|c| c.model_id == "billing-slm").unwrap();
    assert!(billing_call.prompt.contains("[task-1]"));
}

#[tokio::test]
async fn test_failed_head_of_chain_skips_the_rest() {
    let backend = Arc::new(MockModelBackend::new());
    backend.fail_generate_for("coding-slm", BackendError::Generation("boom".to_string()));
    let (orchestrator, backend) = common::orchestrator_on(backend, common::config(), |b| {
        b.with_planner(Arc::new(ChainPlanner(vec!["coding", "billing", "weather"])))
    });

    let result = orchestrator
        .process("First check the code, then bill it, then explain the charge")
        .await;

    assert!(result.reasoning_used);
    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.task(TaskId(1)).unwrap().status, TaskStatus::Failed);
    assert_eq!(result.task(TaskId(2)).unwrap().status, TaskStatus::Skipped);
    assert_eq!(result.task(TaskId(3)).unwrap().status, TaskStatus::Skipped);
    assert_eq!(
        result.task(TaskId(3)).unwrap().error.as_ref().unwrap().kind,
        ErrorKind::DependencyFailed
    );
    assert_eq!(result.error.as_ref().unwrap().offending_id.as_deref(), Some("task-1"));
    assert_eq!(backend.generate_count(), 1);
}

#[tokio::test]
async fn test_low_confidence_falls_back_to_keywords() {
    let (orchestrator, _backend) = common::orchestrator_with(common::config(), |b| {
        b.with_classifier(Arc::new(FixedClassifier {
            domain_id: "weather",
            confidence: 0.60,
        }))
    });

    let result = orchestrator.process("Please review my invoice").await;

    assert_eq!(result.status, ExecutionStatus::Success);
    let routing = result.routing.as_ref().unwrap();
    assert_eq!(routing.method, RoutingMethod::KeywordFallback);
    assert_eq!(routing.domain_id, "billing");
    assert!((routing.confidence - 0.60).abs() < 1e-9);
    assert_eq!(result.domain_used.as_deref(), Some("billing"));
}

#[tokio::test]
async fn test_confident_classifier_wins_over_keywords() {
    let (orchestrator, _backend) = common::orchestrator_with(common::config(), |b| {
        b.with_classifier(Arc::new(FixedClassifier {
            domain_id: "coding",
            confidence: 0.95,
        }))
    });

    let result = orchestrator.process("Please review my invoice").await;

    let routing = result.routing.unwrap();
    assert_eq!(routing.method, RoutingMethod::Classifier);
    assert_eq!(routing.domain_id, "coding");
}

#[tokio::test]
async fn test_ambiguous_query_is_escalated() {
    let (orchestrator, backend) = common::orchestrator();

    // "code" and "invoice" tie between coding and billing.
    let result = orchestrator.process("code invoice").await;

    assert_eq!(result.status, ExecutionStatus::Escalated);
    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::RoutingAmbiguous);
    assert_eq!(result.state_history.last(), Some(&WorkflowState::Error));
    assert_eq!(backend.load_count(), 0);
}

#[tokio::test]
async fn test_escalation_records_classifier_proposal() {
    let (orchestrator, backend) = common::orchestrator_with(common::config(), |b| {
        b.with_classifier(Arc::new(FixedClassifier {
            domain_id: "billing",
            confidence: 0.60,
        }))
    });

    let result = orchestrator.process("code for the invoice").await;

    assert_eq!(result.status, ExecutionStatus::Escalated);
    let routing = result.routing.as_ref().unwrap();
    assert_eq!(routing.method, RoutingMethod::Escalated);
    assert_eq!(routing.domain_id, "billing");
    assert!((routing.confidence - 0.60).abs() < 1e-9);
    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::RoutingAmbiguous);
    assert_eq!(error.offending_id.as_deref(), Some("billing"));
    assert_eq!(backend.load_count(), 0);
}

#[tokio::test]
async fn test_state_changes_carry_request_details() {
    let (orchestrator, _backend) = common::orchestrator();
    let mut rx = orchestrator.events().subscribe();

    let result = orchestrator.process("What is the weather today?").await;

    let mut changes = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let EventPayload::StateChanged {
            to,
            domain,
            latency_ms,
            success,
            reasoning_used,
            status,
            ..
        } = event.payload
        {
            changes.push((to, domain, latency_ms, success, reasoning_used, status));
        }
    }

    assert_eq!(changes.len(), result.state_history.len() - 1);
    assert!(changes.windows(2).all(|w| w[0].2 <= w[1].2));
    assert!(changes.iter().all(|c| c.3 && !c.4));
    let (to, domain, _, _, _, status) = changes.last().unwrap().clone();
    assert_eq!(to, WorkflowState::Return);
    assert_eq!(domain.as_deref(), Some("weather"));
    assert_eq!(status, Some(ExecutionStatus::Success));
}

#[tokio::test]
async fn test_model_that_can_never_fit_fails_at_load_stage() {
    let mut config = common::config();
    config.registry.memory_budget_mb = 1_000;
    let (orchestrator, backend) = common::orchestrator_with(config, |b| {
        b.with_domain(Domain::new(
            "notes",
            "Clinical notes",
            &["notes"],
            ModelSpec::for_tier("notes-slm", ModelTier::Tier3),
        ))
    });

    let result = orchestrator.process("Summarise my notes").await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::CapacityExceeded);
    assert_eq!(error.offending_id.as_deref(), Some("notes-slm"));
    assert!(!error.retryable);
    assert_eq!(
        &result.state_history[result.state_history.len() - 2..],
        &[WorkflowState::LoadModel, WorkflowState::Error]
    );
    assert_eq!(backend.load_count(), 0);
}

#[tokio::test]
async fn test_independent_branch_survives_failure() {
    let backend = Arc::new(MockModelBackend::new());
    backend.fail_generate_for("billing-slm", BackendError::Generation("boom".to_string()));
    let (orchestrator, _backend) = common::orchestrator_on(backend, common::config(), |b| {
        b.with_planner(Arc::new(ForkPlanner("coding", "billing")))
    });

    let result = orchestrator
        .process("Find the code and also explain the billing")
        .await;

    assert_eq!(result.status, ExecutionStatus::PartialFailure);
    assert_eq!(result.task(TaskId(1)).unwrap().status, TaskStatus::Completed);
    assert_eq!(result.task(TaskId(2)).unwrap().status, TaskStatus::Failed);
    assert!(result.response.is_some());
    assert_eq!(result.state_history.last(), Some(&WorkflowState::Return));
    assert_eq!(orchestrator.stats().requests_partial, 1);
}

#[tokio::test]
async fn test_cancelled_request_stops_before_execution() {
    let (orchestrator, backend) = common::orchestrator();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = orchestrator
        .process_with_cancel("What is the weather today?", HashMap::new(), cancel)
        .await;

    assert_ne!(result.status, ExecutionStatus::Success);
    assert_eq!(result.error.unwrap().kind, ErrorKind::Cancelled);
    assert_eq!(result.state_history.last(), Some(&WorkflowState::Error));
    assert_eq!(backend.generate_count(), 0);
}

#[tokio::test]
async fn test_request_timeout_cancels_model_wait() {
    let backend = Arc::new(MockModelBackend::new().with_load_delay(Duration::from_millis(500)));
    let mut config = common::config();
    config.orchestrator.request_timeout_ms = 50;
    let (orchestrator, backend) = common::orchestrator_on(backend, config, |b| b);

    let result = orchestrator.process("What is the weather today?").await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::Cancelled);
    assert!(error.retryable);
    assert!(result.latency_ms < 500);
    assert_eq!(backend.generate_count(), 0);
}

#[tokio::test]
async fn test_models_are_reused_across_requests() {
    let (orchestrator, backend) = common::orchestrator();

    for _ in 0..3 {
        let result = orchestrator.process("What is the weather today?").await;
        assert!(result.is_success());
    }

    assert_eq!(backend.loads_of("weather-slm"), 1);
    let entry = orchestrator.registry().entry("weather-slm").unwrap();
    assert_eq!(entry.use_count, 0);
    assert_eq!(entry.total_uses, 3);
}

#[tokio::test]
async fn test_instances_are_isolated() {
    let (first, _) = common::orchestrator();
    let (second, _) = common::orchestrator();

    first.process("What is the weather today?").await;
    first.remove_domain("billing").unwrap();

    assert_eq!(first.stats().requests_total, 1);
    assert_eq!(second.stats().requests_total, 0);
    assert_eq!(first.domain_ids().len(), 2);
    assert_eq!(second.domain_ids().len(), 3);
    assert!(second.registry().is_empty());
}

#[tokio::test]
async fn test_context_reaches_the_model_prompt() {
    let (orchestrator, backend) = common::orchestrator();
    let mut context = HashMap::new();
    context.insert("patient_id".to_string(), serde_json::json!("p-42"));

    let result = orchestrator
        .process_with_cancel("Will it rain tomorrow?", context, CancellationToken::new())
        .await;

    assert!(result.is_success());
    assert_eq!(result.domain_used.as_deref(), Some("weather"));
    let prompt = &backend.generate_calls()[0].prompt;
    assert!(prompt.starts_with("Request context:\n- patient_id: p-42"));
    assert!(prompt.ends_with("Will it rain tomorrow?"));
}
