//! Property tests for task plans and their execution.

mod common;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use mdsa::domain::models::ExecutorConfig;
use mdsa::services::{RetryPolicy, RunContext, TaskExecutor};
use mdsa::{DomainError, MockModelBackend, Task, TaskId, TaskPlan, TaskStatus};
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use uuid::Uuid;

const DOMAINS: [&str; 3] = ["weather", "coding", "billing"];

/// Dependency lists where task `i` only depends on lower-numbered tasks.
fn acyclic_edges() -> impl Strategy<Value = Vec<Vec<u32>>> {
    (1usize..10).prop_flat_map(|size| {
        (0..size)
            .map(|i| prop::collection::vec(0..=(i as u32), 0..3))
            .collect::<Vec<_>>()
    })
}

fn build_tasks(edges: &[Vec<u32>]) -> Vec<Task> {
    edges
        .iter()
        .enumerate()
        .map(|(i, deps)| {
            let id = i as u32 + 1;
            let mut deps: Vec<TaskId> = deps
                .iter()
                .filter(|&&d| d >= 1 && d < id)
                .map(|&d| TaskId(d))
                .collect();
            deps.sort();
            deps.dedup();
            Task::new(TaskId(id), DOMAINS[i % DOMAINS.len()], format!("step {id}"))
                .with_dependencies(deps)
        })
        .collect()
}

proptest! {
    /// Property: every DAG is accepted and sorts with dependencies first
    #[test]
    fn prop_topological_order_respects_dependencies(edges in acyclic_edges()) {
        let tasks = build_tasks(&edges);
        let plan = TaskPlan::new(Uuid::new_v4(), tasks.clone()).unwrap();

        let order = plan.topological_order();
        prop_assert_eq!(order.len(), tasks.len());

        let position: HashMap<TaskId, usize> =
            order.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        for task in plan.tasks() {
            for dep in &task.dependencies {
                prop_assert!(position[dep] < position[&task.task_id]);
            }
        }
    }

    /// Property: closing any dependency path into a loop is rejected
    #[test]
    fn prop_back_edge_is_rejected(edges in acyclic_edges(), pick in any::<prop::sample::Index>()) {
        let mut tasks = build_tasks(&edges);
        let with_deps: Vec<usize> = (0..tasks.len())
            .filter(|&i| !tasks[i].dependencies.is_empty())
            .collect();
        prop_assume!(!with_deps.is_empty());

        // The dependency now depends on its dependent.
        let dependent = with_deps[pick.index(with_deps.len())];
        let dependency = tasks[dependent].dependencies[0];
        let dependent_id = tasks[dependent].task_id;
        let target = tasks.iter_mut().find(|t| t.task_id == dependency).unwrap();
        target.dependencies.push(dependent_id);

        let result = TaskPlan::new(Uuid::new_v4(), tasks);
        prop_assert!(matches!(result, Err(DomainError::DependencyCycle(_))));
    }

    /// Property: sinks are exactly the tasks without dependents
    #[test]
    fn prop_sinks_have_no_dependents(edges in acyclic_edges()) {
        let plan = TaskPlan::new(Uuid::new_v4(), build_tasks(&edges)).unwrap();
        let depended_on: HashSet<TaskId> = plan
            .tasks()
            .iter()
            .flat_map(|t| t.dependencies.iter().copied())
            .collect();

        for task in plan.tasks() {
            let is_sink = plan.sinks().contains(&task.task_id);
            prop_assert_eq!(is_sink, !depended_on.contains(&task.task_id));
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Property: no task starts before its dependencies complete, and a
    /// failure reaches exactly its transitive dependents
    #[test]
    fn prop_execution_respects_dependencies(
        edges in acyclic_edges(),
        failing in prop::option::of(0usize..3),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let backend = Arc::new(MockModelBackend::new());
            if let Some(i) = failing {
                backend.fail_generate_for(
                    format!("{}-slm", DOMAINS[i]),
                    mdsa::BackendError::Generation("boom".to_string()),
                );
            }
            let executor = TaskExecutor::new(
                common::registry(backend, 3),
                RetryPolicy::new(0, 1, 1, std::time::Duration::from_secs(5)),
                ExecutorConfig::default(),
            );
            let domains: Vec<_> = DOMAINS.iter().map(|d| common::domain(d, &[*d])).collect();
            let plan = TaskPlan::new(Uuid::new_v4(), build_tasks(&edges)).unwrap();

            let outcome = executor
                .execute(&plan, &domains, &RunContext::new(Uuid::new_v4(), Uuid::new_v4()))
                .await;

            let by_id: HashMap<TaskId, &Task> =
                outcome.tasks.iter().map(|t| (t.task_id, t)).collect();
            for task in &outcome.tasks {
                prop_assert!(task.is_terminal());
                if task.status == TaskStatus::Completed {
                    let start = task.started_at.unwrap();
                    for dep in &task.dependencies {
                        let dep = by_id[dep];
                        prop_assert_eq!(dep.status, TaskStatus::Completed);
                        prop_assert!(dep.completed_at.unwrap() <= start);
                    }
                }
                if task.status == TaskStatus::Failed {
                    for dependent in plan.transitive_dependents(task.task_id) {
                        prop_assert_eq!(by_id[&dependent].status, TaskStatus::Skipped);
                    }
                }
            }

            let expected_failed = failing.map_or(0, |i| {
                plan.tasks().iter().filter(|t| t.domain_id == DOMAINS[i]
                    && t.dependencies.iter().all(|d| by_id[d].status == TaskStatus::Completed)).count()
            });
            prop_assert_eq!(outcome.failed, expected_failed);
            Ok::<(), TestCaseError>(())
        })?;
    }
}
