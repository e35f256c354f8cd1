//! Request orchestration.
//!
//! The orchestrator owns one instance of every component (analyzer, router,
//! planner, registry, executor) and drives each request through the
//! workflow state machine:
//!
//! ```text
//! INIT → CLASSIFY → VALIDATE_PRE → LOAD_MODEL → EXECUTE → VALIDATE_POST → LOG → RETURN
//! ```
//!
//! Simple queries take the fast path (one task, one domain chosen by the
//! router). Queries scoring at or above the complexity threshold take the
//! slow path through the planner when reasoning is enabled. Requests that
//! cannot be routed or planned are escalated, never guessed; an escalated
//! fast-path request still records the classifier's proposal.
//!
//! `LOAD_MODEL` admits the plan: every planned model must fit the
//! registry's limits, otherwise the request fails before anything is
//! loaded. Models are acquired and pinned per task inside `EXECUTE`, so a
//! model is held only while a task is using it.
//!
//! The request's `context` map is rendered into every task prompt.
//!
//! Nothing here is global: several orchestrators can live in one process,
//! each with its own registry and domains.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult, ErrorKind, ExecutionError};
use crate::domain::models::{
    Config, Domain, ExecutionResult, ExecutionStatus, OrchestratorConfig, Query, RoutingDecision,
    RoutingMethod, TaskPlan, TaskStatus,
};
use crate::domain::ports::{IntentClassifier, KnowledgeRetriever, ModelBackend, Planner};
use crate::services::complexity_analyzer::ComplexityAnalyzer;
use crate::services::domain_registry::DomainRegistry;
use crate::services::event_bus::{
    EventBus, EventCategory, EventPayload, EventSeverity, OrchestratorEvent,
};
use crate::services::fast_router::{FastRouter, ProfileClassifier};
use crate::services::model_registry::{ModelRegistry, RegistryStats};
use crate::services::retry::RetryPolicy;
use crate::services::rule_planner::RuleBasedPlanner;
use crate::services::task_executor::{RunContext, TaskExecutor};
use crate::services::workflow::WorkflowStateMachine;

/// Aggregate request statistics.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStats {
    pub requests_total: u64,
    pub requests_success: u64,
    pub requests_partial: u64,
    pub requests_failed: u64,
    pub requests_escalated: u64,
    pub requests_reasoning: u64,
    pub total_latency_ms: u64,
    pub success_rate: f64,
    pub reasoning_rate: f64,
    pub average_latency_ms: f64,
    pub domains_registered: usize,
    pub registry: RegistryStats,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    total: u64,
    success: u64,
    partial: u64,
    failed: u64,
    escalated: u64,
    reasoning: u64,
    latency_ms: u64,
}

/// Why a request left the normal lifecycle early.
struct Abort {
    status: ExecutionStatus,
    error: ExecutionError,
}

impl Abort {
    fn escalate(err: DomainError) -> Self {
        Self {
            status: ExecutionStatus::Escalated,
            error: ExecutionError::from(&err),
        }
    }
}

impl From<DomainError> for Abort {
    fn from(err: DomainError) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            error: ExecutionError::from(&err),
        }
    }
}

/// Builder wiring the components of an [`Orchestrator`].
pub struct OrchestratorBuilder {
    config: Config,
    backend: Arc<dyn ModelBackend>,
    classifier: Option<Arc<dyn IntentClassifier>>,
    planner: Option<Arc<dyn Planner>>,
    retriever: Option<Arc<dyn KnowledgeRetriever>>,
    events: Option<Arc<EventBus>>,
    domains: Vec<Domain>,
}

impl OrchestratorBuilder {
    pub fn new(backend: Arc<dyn ModelBackend>) -> Self {
        Self {
            config: Config::default(),
            backend,
            classifier: None,
            planner: None,
            retriever: None,
            events: None,
            domains: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn IntentClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn KnowledgeRetriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_domain(mut self, domain: Domain) -> Self {
        self.domains.push(domain);
        self
    }

    /// Build the orchestrator, registering (and validating) every domain.
    pub fn build(self) -> DomainResult<Orchestrator> {
        let config = self.config;
        let events = self.events.unwrap_or_default();
        let retry = RetryPolicy::from_config(&config.retry);

        let registry = ModelRegistry::new(self.backend, config.registry.clone(), retry.clone())
            .with_event_bus(events.clone());
        let mut executor = TaskExecutor::new(registry.clone(), retry, config.executor.clone())
            .with_event_bus(events.clone());
        if let Some(retriever) = self.retriever {
            executor = executor.with_retriever(retriever);
        }

        let classifier = self
            .classifier
            .unwrap_or_else(|| Arc::new(ProfileClassifier));
        let planner = self
            .planner
            .unwrap_or_else(|| Arc::new(RuleBasedPlanner::default()));

        let domains = DomainRegistry::new();
        for domain in self.domains {
            domains.register(domain)?;
        }

        info!(
            domains = domains.len(),
            planner = planner.name(),
            enable_reasoning = config.orchestrator.enable_reasoning,
            complexity_threshold = config.orchestrator.complexity_threshold,
            confidence_threshold = config.orchestrator.confidence_threshold,
            "orchestrator initialised"
        );

        Ok(Orchestrator {
            analyzer: ComplexityAnalyzer::new(
                config.complexity.clone(),
                config.orchestrator.complexity_threshold,
            ),
            router: FastRouter::new(classifier, config.orchestrator.confidence_threshold),
            planner,
            domains,
            registry,
            executor,
            events,
            counters: Mutex::new(Counters::default()),
            config: config.orchestrator,
        })
    }
}

/// Hybrid fast-path / slow-path request orchestrator.
pub struct Orchestrator {
    config: OrchestratorConfig,
    analyzer: ComplexityAnalyzer,
    router: FastRouter,
    planner: Arc<dyn Planner>,
    domains: DomainRegistry,
    registry: ModelRegistry,
    executor: TaskExecutor,
    events: Arc<EventBus>,
    counters: Mutex<Counters>,
}

impl Orchestrator {
    pub fn builder(backend: Arc<dyn ModelBackend>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(backend)
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn analyzer(&self) -> &ComplexityAnalyzer {
        &self.analyzer
    }

    pub fn register_domain(&self, domain: Domain) -> DomainResult<()> {
        self.domains.register(domain)
    }

    pub fn remove_domain(&self, domain_id: &str) -> DomainResult<Domain> {
        self.domains.remove(domain_id)
    }

    pub fn domain_ids(&self) -> Vec<String> {
        self.domains.ids()
    }

    pub async fn process(&self, text: &str) -> ExecutionResult {
        self.process_with_cancel(text, HashMap::new(), CancellationToken::new())
            .await
    }

    /// Process a request that can be cancelled through `cancel`.
    ///
    /// The configured request timeout cancels the same token. In-flight
    /// tasks stop at their next safe point; resident models stay loaded.
    pub async fn process_with_cancel(
        &self,
        text: &str,
        context: HashMap<String, serde_json::Value>,
        cancel: CancellationToken,
    ) -> ExecutionResult {
        let query = Query::new(text).with_context(context);
        let correlation_id = Uuid::new_v4();
        let span = info_span!("request", request_id = %query.id, %correlation_id);

        async {
            info!(query = %query.preview(), "request received");
            let started = Instant::now();
            let timeout = Duration::from_millis(self.config.request_timeout_ms);

            let pipeline = self.run_request(&query, correlation_id, &cancel);
            let deadline = tokio::time::sleep(timeout);
            tokio::pin!(pipeline);
            tokio::pin!(deadline);

            let mut timed_out = false;
            let (mut result, wf) = loop {
                tokio::select! {
                    finished = &mut pipeline => break finished,
                    () = &mut deadline, if !timed_out => {
                        warn!(timeout_ms = self.config.request_timeout_ms, "request timed out, cancelling");
                        timed_out = true;
                        cancel.cancel();
                    }
                }
            };

            if timed_out && result.status != ExecutionStatus::Success {
                result.error = Some(
                    ExecutionError::new(
                        ErrorKind::Cancelled,
                        format!("request exceeded timeout of {} ms", self.config.request_timeout_ms),
                    )
                    .retryable(true),
                );
            }

            self.conclude(result, &wf, started)
        }
        .instrument(span)
        .await
    }

    async fn run_request(
        &self,
        query: &Query,
        correlation_id: Uuid,
        cancel: &CancellationToken,
    ) -> (ExecutionResult, WorkflowStateMachine) {
        let mut wf = WorkflowStateMachine::new(query.id, correlation_id).with_event_bus(self.events.clone());
        let mut result = ExecutionResult {
            request_id: query.id,
            correlation_id,
            status: ExecutionStatus::Failed,
            domain_used: None,
            routing: None,
            reasoning_used: false,
            complexity: None,
            task_results: Vec::new(),
            response: None,
            state_history: Vec::new(),
            validation_warnings: Vec::new(),
            latency_ms: 0,
            error: None,
        };

        if let Err(abort) = self.drive(query, correlation_id, cancel, &mut wf, &mut result).await {
            wf.set_status(abort.status);
            wf.fail();
            result.status = abort.status;
            result.error = Some(abort.error);
        }
        (result, wf)
    }

    async fn drive(
        &self,
        query: &Query,
        correlation_id: Uuid,
        cancel: &CancellationToken,
        wf: &mut WorkflowStateMachine,
        result: &mut ExecutionResult,
    ) -> Result<(), Abort> {
        wf.advance()?;
        let assessment = self.analyzer.analyze(&query.text);
        let reasoning_used = self.config.enable_reasoning && assessment.requires_reasoning;
        result.reasoning_used = reasoning_used;
        result.complexity = Some(assessment.clone());
        wf.set_reasoning_used(reasoning_used);
        let domains = self.domains.snapshot();

        let plan = if reasoning_used {
            let plan = self
                .planner
                .plan(query, &domains)
                .map_err(Abort::escalate)?;
            let planned: Vec<String> = plan.domains().into_iter().collect();
            result.routing = Some(RoutingDecision {
                domain_id: planned.join(","),
                confidence: 1.0,
                method: RoutingMethod::Planner,
            });
            info!(
                score = assessment.score,
                tasks = plan.len(),
                domains = ?planned,
                "slow path: query decomposed"
            );
            plan
        } else {
            let decision = match self.router.route(&query.text, &domains) {
                Ok(decision) => decision,
                Err(err) => {
                    if let DomainError::RoutingAmbiguous {
                        proposed_domain: Some(domain_id),
                        confidence,
                        threshold,
                        ..
                    } = &err
                    {
                        warn!(
                            proposed = %domain_id,
                            confidence,
                            threshold,
                            "fast path: escalating low-confidence proposal"
                        );
                        result.routing = Some(RoutingDecision {
                            domain_id: domain_id.clone(),
                            confidence: *confidence,
                            method: RoutingMethod::Escalated,
                        });
                        wf.set_domain(Some(domain_id.clone()));
                    }
                    return Err(Abort::escalate(err));
                }
            };
            info!(
                score = assessment.score,
                domain = %decision.domain_id,
                confidence = decision.confidence,
                method = ?decision.method,
                "fast path: query routed"
            );
            let plan = TaskPlan::single(query.id, decision.domain_id.clone(), query.text.clone());
            result.routing = Some(decision);
            plan
        };

        let plan_domains = plan.domains();
        if plan_domains.len() == 1 {
            result.domain_used = plan_domains.iter().next().cloned();
        }
        wf.set_domain(result.routing.as_ref().map(|r| r.domain_id.clone()));
        result.task_results = plan.tasks().to_vec();

        if cancel.is_cancelled() {
            return Err(DomainError::Cancelled("request cancelled before execution".to_string()).into());
        }

        wf.advance()?;
        for task in plan.tasks() {
            let domain = domains
                .iter()
                .find(|d| d.domain_id == task.domain_id)
                .ok_or_else(|| DomainError::DomainNotFound(task.domain_id.clone()))?;
            domain
                .validation_rules
                .check_query(&task.subquery)
                .map_err(|reason| DomainError::DomainValidation {
                    domain_id: domain.domain_id.clone(),
                    reason: format!("{}: {reason}", task.task_id),
                })?;
        }

        wf.advance()?;
        self.admit_models(&plan, &domains)?;

        wf.advance()?;
        let run = RunContext::new(query.id, correlation_id)
            .with_reasoning(reasoning_used)
            .with_cancel(cancel.clone())
            .with_context(Arc::new(query.context.clone()));
        let outcome = self.executor.execute(&plan, &domains, &run).await;

        result.status = outcome.status;
        wf.set_status(outcome.status);
        result.response = sink_response(&plan, &outcome.tasks);
        let error = outcome
            .first_error()
            .or_else(|| outcome.tasks.iter().find_map(|t| t.error.as_ref()))
            .cloned();
        result.task_results = outcome.tasks;

        if outcome.status == ExecutionStatus::Failed {
            return Err(Abort {
                status: ExecutionStatus::Failed,
                error: error.unwrap_or_else(|| {
                    ExecutionError::new(ErrorKind::TaskExecutionError, "no task completed")
                }),
            });
        }
        result.error = error;

        wf.advance()?;
        for task in result.task_results.iter().filter(|t| t.status == TaskStatus::Completed) {
            let (Some(output), Some(domain)) = (
                task.result.as_ref(),
                domains.iter().find(|d| d.domain_id == task.domain_id),
            ) else {
                continue;
            };
            if let Err(reason) = domain.validation_rules.check_response(&output.text) {
                warn!(task_id = %task.task_id, domain = %domain.domain_id, %reason, "response failed validation");
                result
                    .validation_warnings
                    .push(format!("{} ({}): {reason}", task.task_id, domain.domain_id));
            }
        }

        wf.advance()?;
        wf.advance()?;
        Ok(())
    }

    /// Reject the plan if any of its models can never be loaded.
    fn admit_models(&self, plan: &TaskPlan, domains: &[Domain]) -> Result<(), Abort> {
        let mut resident = Vec::new();
        let mut to_load = Vec::new();
        for domain_id in plan.domains() {
            let Some(domain) = domains.iter().find(|d| d.domain_id == domain_id) else {
                continue;
            };
            let spec = &domain.model_reference;
            if let Err(err) = self.registry.check_admissible(spec) {
                warn!(domain = %domain_id, model_id = %spec.model_id, error = %err, "model can never be loaded");
                return Err(Abort {
                    status: ExecutionStatus::Failed,
                    error: ExecutionError::from(&err).retryable(false),
                });
            }
            if self.registry.is_loaded(&spec.model_id) {
                resident.push(spec.model_id.clone());
            } else {
                to_load.push(spec.model_id.clone());
            }
        }
        debug!(resident = ?resident, to_load = ?to_load, "models required by plan");
        Ok(())
    }

    fn conclude(
        &self,
        mut result: ExecutionResult,
        wf: &WorkflowStateMachine,
        started: Instant,
    ) -> ExecutionResult {
        result.state_history = wf.history();
        result.latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        {
            let mut counters = self.counters.lock();
            counters.total += 1;
            counters.latency_ms += result.latency_ms;
            if result.reasoning_used {
                counters.reasoning += 1;
            }
            match result.status {
                ExecutionStatus::Success => counters.success += 1,
                ExecutionStatus::PartialFailure => counters.partial += 1,
                ExecutionStatus::Failed => counters.failed += 1,
                ExecutionStatus::Escalated => counters.escalated += 1,
            }
        }

        let success = result.status == ExecutionStatus::Success;
        self.events.publish(OrchestratorEvent::new(
            if success {
                EventSeverity::Info
            } else {
                EventSeverity::Warning
            },
            EventCategory::Request,
            Some(result.correlation_id),
            EventPayload::RequestCompleted {
                request_id: result.request_id,
                domain: result.domain_used.clone(),
                status: result.status,
                success,
                latency_ms: result.latency_ms,
                reasoning_used: result.reasoning_used,
            },
        ));

        match &result.error {
            Some(error) if !success => info!(
                status = %result.status,
                domain = ?result.domain_used,
                reasoning_used = result.reasoning_used,
                latency_ms = result.latency_ms,
                error = %error,
                "request finished"
            ),
            _ => info!(
                status = %result.status,
                domain = ?result.domain_used,
                reasoning_used = result.reasoning_used,
                latency_ms = result.latency_ms,
                "request finished"
            ),
        }
        result
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> OrchestratorStats {
        let counters = *self.counters.lock();
        let rate = |n: u64| {
            if counters.total == 0 {
                0.0
            } else {
                n as f64 / counters.total as f64
            }
        };
        OrchestratorStats {
            requests_total: counters.total,
            requests_success: counters.success,
            requests_partial: counters.partial,
            requests_failed: counters.failed,
            requests_escalated: counters.escalated,
            requests_reasoning: counters.reasoning,
            total_latency_ms: counters.latency_ms,
            success_rate: rate(counters.success),
            reasoning_rate: rate(counters.reasoning),
            average_latency_ms: if counters.total == 0 {
                0.0
            } else {
                counters.latency_ms as f64 / counters.total as f64
            },
            domains_registered: self.domains.len(),
            registry: self.registry.stats(),
        }
    }

    pub fn reset_stats(&self) {
        *self.counters.lock() = Counters::default();
    }
}

/// Outputs of the completed sink tasks, in plan order.
fn sink_response(plan: &TaskPlan, tasks: &[crate::domain::models::Task]) -> Option<String> {
    let sinks = plan.sinks();
    let outputs: Vec<&str> = tasks
        .iter()
        .filter(|t| sinks.contains(&t.task_id) && t.status == TaskStatus::Completed)
        .filter_map(|t| t.result.as_ref().map(|r| r.text.as_str()))
        .collect();
    if outputs.is_empty() {
        None
    } else {
        Some(outputs.join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::backends::MockModelBackend;
    use crate::domain::errors::BackendError;
    use crate::domain::models::{ModelSpec, ModelTier, TaskId, ValidationRules, WorkflowState};

    fn domain(id: &str, keywords: &[&str]) -> Domain {
        Domain::new(id, id, keywords, ModelSpec::for_tier(format!("{id}-slm"), ModelTier::Tier3))
    }

    fn orchestrator(backend: Arc<MockModelBackend>) -> Orchestrator {
        Orchestrator::builder(backend)
            .with_domain(domain("weather", &["weather", "forecast", "rain"]))
            .with_domain(domain("coding", &["code", "icd", "diagnosis"]))
            .with_domain(domain("billing", &["billing", "invoice", "charge"]))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_fast_path_runs_full_lifecycle() {
        let backend = Arc::new(MockModelBackend::new());
        let orch = orchestrator(backend.clone());

        let result = orch.process("What is the weather today?").await;

        assert_eq!(result.status, ExecutionStatus::Success);
        assert!(!result.reasoning_used);
        assert_eq!(result.domain_used.as_deref(), Some("weather"));
        assert_eq!(result.task_results.len(), 1);
        assert_eq!(
            result.state_history,
            vec![
                WorkflowState::Init,
                WorkflowState::Classify,
                WorkflowState::ValidatePre,
                WorkflowState::LoadModel,
                WorkflowState::Execute,
                WorkflowState::ValidatePost,
                WorkflowState::Log,
                WorkflowState::Return,
            ]
        );
        assert!(result.response.is_some());
        assert!(result.error.is_none());
        assert_eq!(backend.loads_of("weather-slm"), 1);
    }

    #[tokio::test]
    async fn test_slow_path_plans_dependent_tasks() {
        let backend = Arc::new(MockModelBackend::new());
        let orch = orchestrator(backend);

        let result = orch.process("Look up code X, then calculate billing for it").await;

        assert!(result.reasoning_used);
        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.task_results.len(), 2);
        assert_eq!(result.task(TaskId(2)).unwrap().dependencies, vec![TaskId(1)]);
        assert_eq!(result.routing.as_ref().unwrap().method, RoutingMethod::Planner);
        assert!(result.domain_used.is_none());
    }

    #[tokio::test]
    async fn test_reasoning_disabled_forces_fast_path() {
        let backend = Arc::new(MockModelBackend::new());
        let mut config = Config::default();
        config.orchestrator.enable_reasoning = false;
        let orch = Orchestrator::builder(backend)
            .with_config(config)
            .with_domain(domain("billing", &["billing", "invoice"]))
            .build()
            .unwrap();

        let result = orch.process("Check the invoice, then explain the billing").await;

        assert!(!result.reasoning_used);
        assert_eq!(result.task_results.len(), 1);
    }

    #[tokio::test]
    async fn test_unroutable_query_is_escalated() {
        let backend = Arc::new(MockModelBackend::new());
        let orch = orchestrator(backend.clone());

        let result = orch.process("Tell me a joke").await;

        assert_eq!(result.status, ExecutionStatus::Escalated);
        assert_eq!(result.error.as_ref().unwrap().kind, ErrorKind::RoutingAmbiguous);
        assert_eq!(result.state_history.last(), Some(&WorkflowState::Error));
        assert_eq!(backend.load_count(), 0);
    }

    #[tokio::test]
    async fn test_unplannable_query_is_escalated() {
        let backend = Arc::new(MockModelBackend::new());
        let orch = orchestrator(backend);

        let result = orch.process("Sing a song, then dance a little").await;

        assert_eq!(result.status, ExecutionStatus::Escalated);
        assert_eq!(result.error.as_ref().unwrap().kind, ErrorKind::PlanningError);
    }

    #[tokio::test]
    async fn test_pre_validation_failure() {
        let backend = Arc::new(MockModelBackend::new());
        let rules = ValidationRules {
            forbidden_terms: vec!["password".to_string()],
            ..Default::default()
        };
        let orch = Orchestrator::builder(backend.clone())
            .with_domain(domain("billing", &["billing"]).with_validation_rules(rules))
            .build()
            .unwrap();

        let result = orch.process("Show the billing password").await;

        assert_eq!(result.status, ExecutionStatus::Failed);
        let error = result.error.unwrap();
        assert_eq!(error.kind, ErrorKind::ValidationError);
        assert_eq!(error.offending_id.as_deref(), Some("billing"));
        assert_eq!(backend.generate_count(), 0);
    }

    #[tokio::test]
    async fn test_post_validation_records_warning() {
        let backend = Arc::new(MockModelBackend::new());
        backend.set_response_for("billing-slm", "ok");
        let rules = ValidationRules {
            min_response_chars: 10,
            ..Default::default()
        };
        let orch = Orchestrator::builder(backend)
            .with_domain(domain("billing", &["billing"]).with_validation_rules(rules))
            .build()
            .unwrap();

        let result = orch.process("billing question").await;

        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.validation_warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_task_failure_fails_request() {
        let backend = Arc::new(MockModelBackend::new());
        backend.fail_generate_for("weather-slm", BackendError::Generation("boom".to_string()));
        let orch = orchestrator(backend);

        let result = orch.process("What is the weather today?").await;

        assert_eq!(result.status, ExecutionStatus::Failed);
        let error = result.error.unwrap();
        assert_eq!(error.kind, ErrorKind::TaskExecutionError);
        assert_eq!(error.offending_id.as_deref(), Some("task-1"));
        assert_eq!(result.state_history.last(), Some(&WorkflowState::Error));
    }

    #[tokio::test]
    async fn test_stats_and_reset() {
        let backend = Arc::new(MockModelBackend::new());
        let orch = orchestrator(backend);

        orch.process("What is the weather today?").await;
        orch.process("Tell me a joke").await;

        let stats = orch.stats();
        assert_eq!(stats.requests_total, 2);
        assert_eq!(stats.requests_success, 1);
        assert_eq!(stats.requests_escalated, 1);
        assert!((stats.success_rate - 0.5).abs() < 1e-9);
        assert_eq!(stats.domains_registered, 3);
        assert_eq!(stats.registry.models_loaded, 1);

        orch.reset_stats();
        assert_eq!(orch.stats().requests_total, 0);
    }

    #[tokio::test]
    async fn test_request_completed_event() {
        let backend = Arc::new(MockModelBackend::new());
        let orch = orchestrator(backend);
        let mut rx = orch.events().subscribe();

        let result = orch.process("What is the weather today?").await;

        let mut completed = None;
        while let Ok(event) = rx.try_recv() {
            if let EventPayload::RequestCompleted { request_id, success, .. } = event.payload {
                completed = Some((request_id, success));
            }
        }
        assert_eq!(completed, Some((result.request_id, true)));
    }

    #[test]
    fn test_duplicate_domains_rejected_at_build() {
        let backend = Arc::new(MockModelBackend::new());
        let built = Orchestrator::builder(backend)
            .with_domain(domain("billing", &["billing"]))
            .with_domain(domain("billing", &["invoice"]))
            .build();
        assert!(built.is_err());
    }
}
