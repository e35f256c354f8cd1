//! Task graph executor.
//!
//! Runs a validated `TaskPlan` with bounded concurrency. A task is started
//! only once every dependency has completed, and it receives the results of
//! those dependencies in its prompt. A failed task takes all of its
//! transitive dependents down with it (they are marked skipped); unrelated
//! branches keep running.
//!
//! Each running task:
//! 1. acquires its domain's model from the registry (one forced eviction
//!    and retry on `CapacityExceeded`)
//! 2. retrieves knowledge snippets for the sub-query
//! 3. prompts the model through the retry policy, with the request context,
//!    retrieved snippets and dependency results ahead of the sub-query
//! 4. releases the model, on every path

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult, ErrorKind, ExecutionError};
use crate::domain::models::{
    Domain, ExecutionStatus, ExecutorConfig, ModelHandle, ModelSpec, Task, TaskId, TaskOutput,
    TaskPlan, TaskStatus,
};
use crate::domain::ports::{GenerationRequest, KnowledgeRetriever, KnowledgeSnippet, NullRetriever};
use crate::services::event_bus::{
    EventBus, EventCategory, EventPayload, EventSeverity, OrchestratorEvent,
};
use crate::services::model_registry::ModelRegistry;
use crate::services::retry::{RetryError, RetryPolicy};

/// Per-request information threaded through execution.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub request_id: Uuid,
    pub correlation_id: Uuid,
    pub reasoning_used: bool,
    pub cancel: CancellationToken,
    /// Caller-supplied request context, shared by every task.
    pub context: Arc<HashMap<String, serde_json::Value>>,
}

impl RunContext {
    pub fn new(request_id: Uuid, correlation_id: Uuid) -> Self {
        Self {
            request_id,
            correlation_id,
            reasoning_used: false,
            cancel: CancellationToken::new(),
            context: Arc::default(),
        }
    }

    pub fn with_reasoning(mut self, reasoning_used: bool) -> Self {
        self.reasoning_used = reasoning_used;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_context(mut self, context: Arc<HashMap<String, serde_json::Value>>) -> Self {
        self.context = context;
        self
    }
}

/// Final state of every task in a plan.
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    /// Tasks in plan order, all in a terminal status.
    pub tasks: Vec<Task>,
    pub status: ExecutionStatus,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total_tokens_used: u64,
    pub latency_ms: u64,
}

impl PlanOutcome {
    fn from_tasks(tasks: Vec<Task>, started: Instant) -> Self {
        let count = |status: TaskStatus| tasks.iter().filter(|t| t.status == status).count();
        Self {
            status: ExecutionStatus::from_tasks(&tasks),
            completed: count(TaskStatus::Completed),
            failed: count(TaskStatus::Failed),
            skipped: count(TaskStatus::Skipped),
            total_tokens_used: tasks
                .iter()
                .filter_map(|t| t.result.as_ref())
                .map(|r| r.tokens_used)
                .sum(),
            latency_ms: elapsed_ms(started),
            tasks,
        }
    }

    /// Error of the first failed task in plan order.
    pub fn first_error(&self) -> Option<&ExecutionError> {
        self.tasks
            .iter()
            .find(|t| t.status == TaskStatus::Failed)
            .and_then(|t| t.error.as_ref())
    }

    pub fn task(&self, task_id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }
}

/// Everything a spawned task needs, owned.
struct TaskJob {
    task_id: TaskId,
    subquery: String,
    domain: Arc<Domain>,
    dependency_results: Vec<(TaskId, String)>,
    context: Arc<HashMap<String, serde_json::Value>>,
    registry: ModelRegistry,
    retriever: Arc<dyn KnowledgeRetriever>,
    retry: RetryPolicy,
    config: ExecutorConfig,
    cancel: CancellationToken,
}

/// Pins a model for the lifetime of a task and releases it on drop.
struct HeldModel {
    registry: ModelRegistry,
    handle: ModelHandle,
}

impl Drop for HeldModel {
    fn drop(&mut self) {
        self.registry.release(&self.handle.model_id);
    }
}

/// Executes task plans against a shared model registry.
pub struct TaskExecutor {
    registry: ModelRegistry,
    retriever: Arc<dyn KnowledgeRetriever>,
    retry: RetryPolicy,
    config: ExecutorConfig,
    events: Option<Arc<EventBus>>,
}

impl TaskExecutor {
    pub fn new(registry: ModelRegistry, retry: RetryPolicy, config: ExecutorConfig) -> Self {
        Self {
            registry,
            retriever: Arc::new(NullRetriever),
            retry,
            config,
            events: None,
        }
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn KnowledgeRetriever>) -> Self {
        self.retriever = retriever;
        self
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Run every task of `plan` to a terminal status.
    ///
    /// Never fails as a whole: task failures are recorded on the tasks and
    /// summarised in the returned status.
    pub async fn execute(&self, plan: &TaskPlan, domains: &[Domain], run: &RunContext) -> PlanOutcome {
        let started = Instant::now();
        let max_concurrency = self.config.max_concurrency.max(1);
        let domains: HashMap<&str, Arc<Domain>> = domains
            .iter()
            .map(|d| (d.domain_id.as_str(), Arc::new(d.clone())))
            .collect();

        let mut tasks: Vec<Task> = plan.tasks().to_vec();
        let index: HashMap<TaskId, usize> = tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.task_id, i))
            .collect();

        info!(
            request_id = %run.request_id,
            tasks = tasks.len(),
            max_concurrency,
            "executing task plan"
        );

        let mut ready: BTreeSet<TaskId> = BTreeSet::new();
        let mut in_flight: JoinSet<(TaskId, Result<TaskOutput, ExecutionError>)> = JoinSet::new();
        let mut cancelled_seen = false;

        loop {
            if run.cancel.is_cancelled() && !cancelled_seen {
                cancelled_seen = true;
                warn!(request_id = %run.request_id, "request cancelled, skipping unstarted tasks");
                for task in tasks.iter_mut().filter(|t| !t.is_terminal() && t.status != TaskStatus::Running) {
                    let reason = ExecutionError::new(ErrorKind::Cancelled, "request cancelled before task started")
                        .with_offending_id(task.task_id.to_string());
                    skip(task, reason);
                }
                ready.clear();
            }

            if !cancelled_seen {
                promote_ready(&mut tasks, &index, &mut ready);
            }

            while in_flight.len() < max_concurrency {
                let Some(task_id) = ready.pop_first() else {
                    break;
                };
                let Some(&i) = index.get(&task_id) else {
                    continue;
                };

                let Some(domain) = domains.get(tasks[i].domain_id.as_str()).cloned() else {
                    let err = DomainError::DomainNotFound(tasks[i].domain_id.clone());
                    set_status(&mut tasks[i], TaskStatus::Running);
                    let error = ExecutionError::from(&err).with_offending_id(task_id.to_string());
                    self.finish_task(&mut tasks, &index, plan, run, task_id, Err(error));
                    continue;
                };

                if !set_status(&mut tasks[i], TaskStatus::Running) {
                    continue;
                }

                let dependency_results = tasks[i]
                    .dependencies
                    .iter()
                    .filter_map(|dep| {
                        let dep_task = &tasks[*index.get(dep)?];
                        dep_task.result.as_ref().map(|r| (*dep, r.text.clone()))
                    })
                    .collect();

                let job = TaskJob {
                    task_id,
                    subquery: tasks[i].subquery.clone(),
                    domain,
                    dependency_results,
                    context: run.context.clone(),
                    registry: self.registry.clone(),
                    retriever: self.retriever.clone(),
                    retry: self.retry.clone(),
                    config: self.config.clone(),
                    cancel: run.cancel.clone(),
                };
                debug!(request_id = %run.request_id, task_id = %task_id, "task started");
                in_flight.spawn(async move { (job.task_id, run_task(job).await) });
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            match joined {
                Ok((task_id, outcome)) => {
                    self.finish_task(&mut tasks, &index, plan, run, task_id, outcome);
                }
                Err(join_err) => {
                    error!(request_id = %run.request_id, error = %join_err, "task worker aborted");
                }
            }
        }

        // Anything left was blocked or lost its worker.
        for task in &mut tasks {
            match task.status {
                TaskStatus::Running => {
                    task.error = Some(
                        ExecutionError::new(ErrorKind::TaskExecutionError, "task worker aborted")
                            .with_offending_id(task.task_id.to_string()),
                    );
                    set_status(task, TaskStatus::Failed);
                }
                TaskStatus::Pending | TaskStatus::Ready => {
                    let reason = ExecutionError::new(ErrorKind::DependencyFailed, "dependencies never completed")
                        .with_offending_id(task.task_id.to_string());
                    skip(task, reason);
                }
                _ => {}
            }
        }

        let outcome = PlanOutcome::from_tasks(tasks, started);
        info!(
            request_id = %run.request_id,
            status = %outcome.status,
            completed = outcome.completed,
            failed = outcome.failed,
            skipped = outcome.skipped,
            latency_ms = outcome.latency_ms,
            "task plan finished"
        );
        outcome
    }

    fn finish_task(
        &self,
        tasks: &mut [Task],
        index: &HashMap<TaskId, usize>,
        plan: &TaskPlan,
        run: &RunContext,
        task_id: TaskId,
        outcome: Result<TaskOutput, ExecutionError>,
    ) {
        let Some(&i) = index.get(&task_id) else {
            return;
        };

        let latency_ms = match outcome {
            Ok(output) => {
                let latency_ms = output.latency_ms;
                debug!(
                    request_id = %run.request_id,
                    task_id = %task_id,
                    model_id = %output.model_id,
                    tokens_used = output.tokens_used,
                    latency_ms,
                    "task completed"
                );
                tasks[i].result = Some(output);
                set_status(&mut tasks[i], TaskStatus::Completed);
                latency_ms
            }
            Err(error) => {
                warn!(
                    request_id = %run.request_id,
                    task_id = %task_id,
                    kind = %error.kind,
                    error = %error.message,
                    "task failed"
                );
                tasks[i].error = Some(error);
                set_status(&mut tasks[i], TaskStatus::Failed);

                for dependent in plan.transitive_dependents(task_id) {
                    if let Some(&d) = index.get(&dependent) {
                        if !tasks[d].is_terminal() {
                            skip(
                                &mut tasks[d],
                                ExecutionError::new(
                                    ErrorKind::DependencyFailed,
                                    format!("dependency {task_id} failed"),
                                )
                                .with_offending_id(task_id.to_string()),
                            );
                        }
                    }
                }
                tasks[i]
                    .started_at
                    .zip(tasks[i].completed_at)
                    .map_or(0, |(s, e)| u64::try_from((e - s).num_milliseconds()).unwrap_or(0))
            }
        };

        self.publish_task(run, &tasks[i], latency_ms);
    }

    fn publish_task(&self, run: &RunContext, task: &Task, latency_ms: u64) {
        let Some(events) = &self.events else {
            return;
        };
        let success = task.status == TaskStatus::Completed;
        events.publish(OrchestratorEvent::new(
            if success {
                EventSeverity::Info
            } else {
                EventSeverity::Warning
            },
            EventCategory::Task,
            Some(run.correlation_id),
            EventPayload::TaskFinished {
                request_id: run.request_id,
                task_id: task.task_id,
                domain: task.domain_id.clone(),
                status: task.status,
                success,
                latency_ms,
                reasoning_used: run.reasoning_used,
            },
        ));
    }
}

/// Move every pending task whose dependencies all completed to `Ready`.
fn promote_ready(tasks: &mut [Task], index: &HashMap<TaskId, usize>, ready: &mut BTreeSet<TaskId>) {
    let promotable: Vec<usize> = tasks
        .iter()
        .enumerate()
        .filter(|(_, t)| t.status == TaskStatus::Pending)
        .filter(|(_, t)| {
            t.dependencies.iter().all(|dep| {
                index
                    .get(dep)
                    .is_some_and(|&d| tasks[d].status == TaskStatus::Completed)
            })
        })
        .map(|(i, _)| i)
        .collect();

    for i in promotable {
        if set_status(&mut tasks[i], TaskStatus::Ready) {
            ready.insert(tasks[i].task_id);
        }
    }
}

fn set_status(task: &mut Task, status: TaskStatus) -> bool {
    match task.transition_to(status) {
        Ok(()) => true,
        Err(err) => {
            error!(task_id = %task.task_id, error = %err, "illegal task transition");
            false
        }
    }
}

fn skip(task: &mut Task, reason: ExecutionError) {
    if set_status(task, TaskStatus::Skipped) {
        task.error = Some(reason);
    }
}

async fn run_task(job: TaskJob) -> Result<TaskOutput, ExecutionError> {
    let started = Instant::now();
    let task_id = job.task_id;
    let fail = |err: DomainError| ExecutionError::from(&err).with_offending_id(task_id.to_string());

    if job.cancel.is_cancelled() {
        return Err(fail(DomainError::Cancelled(format!("{task_id} cancelled before loading"))));
    }

    let spec = &job.domain.model_reference;
    let handle = tokio::select! {
        biased;
        () = job.cancel.cancelled() => {
            return Err(fail(DomainError::Cancelled(format!("{task_id} cancelled while loading"))));
        }
        acquired = acquire_model(&job.registry, spec, job.config.capacity_retry_delay_ms) => {
            acquired.map_err(fail)?
        }
    };
    let held = HeldModel {
        registry: job.registry.clone(),
        handle,
    };

    let snippets = match job
        .retriever
        .retrieve(&job.subquery, &job.domain.domain_id, job.config.retrieval_top_k)
        .await
    {
        Ok(snippets) => snippets,
        Err(err) => {
            warn!(task_id = %task_id, error = %err, "knowledge retrieval failed, continuing without context");
            Vec::new()
        }
    };

    let prompt = build_prompt(&job.subquery, &job.context, &job.dependency_results, &snippets);
    let request = GenerationRequest::new(
        prompt,
        job.domain.max_tokens.unwrap_or(job.config.max_tokens),
        job.domain.temperature.unwrap_or(job.config.temperature),
    )
    .with_system(job.domain.system_prompt.clone());

    let backend = job.registry.backend();
    let handle = &held.handle;
    let generated = job
        .retry
        .execute(&job.cancel, || backend.generate(handle, &request))
        .await
        .map_err(|err| match err {
            RetryError::Backend(source) => fail(DomainError::TaskExecution {
                task_id: task_id.to_string(),
                source,
            }),
            RetryError::Cancelled { attempts } => fail(DomainError::Cancelled(format!(
                "{task_id} cancelled after {attempts} generation attempt(s)"
            ))),
        })?;

    Ok(TaskOutput {
        text: generated.text,
        tokens_used: generated.tokens_used,
        model_id: held.handle.model_id.clone(),
        latency_ms: elapsed_ms(started),
    })
}

/// `get_or_load`, with one forced eviction and retry when the cache is full.
async fn acquire_model(
    registry: &ModelRegistry,
    spec: &ModelSpec,
    retry_delay_ms: u64,
) -> DomainResult<ModelHandle> {
    match registry.get_or_load(spec).await {
        Err(DomainError::CapacityExceeded { reason, .. }) => {
            let evicted = registry.evict_idle().await;
            warn!(
                model_id = %spec.model_id,
                reason = %reason,
                evicted = ?evicted,
                "registry full, retrying after forced eviction"
            );
            tokio::time::sleep(Duration::from_millis(retry_delay_ms)).await;
            registry.get_or_load(spec).await
        }
        other => other,
    }
}

/// Prompt layout: request context, retrieved snippets, dependency results,
/// then the sub-query on the last line.
pub(crate) fn build_prompt(
    subquery: &str,
    context: &HashMap<String, serde_json::Value>,
    dependency_results: &[(TaskId, String)],
    snippets: &[KnowledgeSnippet],
) -> String {
    let mut prompt = String::new();
    if !context.is_empty() {
        let mut keys: Vec<&String> = context.keys().collect();
        keys.sort();
        prompt.push_str("Request context:\n");
        for key in keys {
            let value = match &context[key] {
                serde_json::Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            prompt.push_str(&format!("- {key}: {value}\n"));
        }
        prompt.push('\n');
    }
    if !snippets.is_empty() {
        prompt.push_str("Relevant context:\n");
        for snippet in snippets {
            prompt.push_str("- ");
            prompt.push_str(snippet.content.trim());
            prompt.push('\n');
        }
        prompt.push('\n');
    }
    if !dependency_results.is_empty() {
        prompt.push_str("Results from previous steps:\n");
        for (task_id, text) in dependency_results {
            prompt.push_str(&format!("[{task_id}] {}\n", text.trim()));
        }
        prompt.push('\n');
    }
    prompt.push_str(subquery.trim());
    prompt
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
