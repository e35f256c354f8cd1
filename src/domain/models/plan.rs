//! Task plans: validated dependency graphs of sub-tasks.
//!
//! A `TaskPlan` can only be obtained through its constructors, which reject
//! duplicate ids, dangling or self dependencies, and cycles. Holding a plan
//! therefore guarantees it is a DAG.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use serde::Serialize;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::task::{Task, TaskId};

/// An acyclic plan of tasks answering one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskPlan {
    root_query_id: Uuid,
    tasks: Vec<Task>,
}

// Standalone helper for cycle detection (no self needed)
fn detect_cycle_util(
    node: TaskId,
    graph: &HashMap<TaskId, Vec<TaskId>>,
    visited: &mut HashSet<TaskId>,
    rec_stack: &mut HashSet<TaskId>,
    path: &mut Vec<TaskId>,
) -> bool {
    visited.insert(node);
    rec_stack.insert(node);
    path.push(node);

    if let Some(neighbors) = graph.get(&node) {
        for &neighbor in neighbors {
            if !visited.contains(&neighbor) {
                if detect_cycle_util(neighbor, graph, visited, rec_stack, path) {
                    return true;
                }
            } else if rec_stack.contains(&neighbor) {
                if let Some(cycle_start) = path.iter().position(|&id| id == neighbor) {
                    path.drain(0..cycle_start);
                    path.push(neighbor);
                    return true;
                }
            }
        }
    }

    rec_stack.remove(&node);
    path.pop();
    false
}

/// Find a dependency cycle among `tasks`, returned as the closed path.
pub fn detect_cycle(tasks: &[Task]) -> Option<Vec<TaskId>> {
    let graph: HashMap<TaskId, Vec<TaskId>> = tasks
        .iter()
        .map(|t| (t.task_id, t.dependencies.clone()))
        .collect();

    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut path = Vec::new();

    // Sorted start order keeps the reported cycle stable.
    let mut starts: Vec<TaskId> = graph.keys().copied().collect();
    starts.sort();

    for task_id in starts {
        if !visited.contains(&task_id)
            && detect_cycle_util(task_id, &graph, &mut visited, &mut rec_stack, &mut path)
        {
            return Some(path);
        }
    }

    None
}

impl TaskPlan {
    /// Build a plan, rejecting anything that is not a well-formed DAG.
    pub fn new(root_query_id: Uuid, tasks: Vec<Task>) -> DomainResult<Self> {
        if tasks.is_empty() {
            return Err(DomainError::Planning {
                message: "plan contains no tasks".to_string(),
                offending_id: None,
            });
        }

        let mut seen = HashSet::new();
        for task in &tasks {
            if !seen.insert(task.task_id) {
                return Err(DomainError::Planning {
                    message: format!("duplicate task id {}", task.task_id),
                    offending_id: Some(task.task_id.to_string()),
                });
            }
        }

        for task in &tasks {
            for dep in &task.dependencies {
                if *dep == task.task_id {
                    return Err(DomainError::DependencyCycle(vec![
                        task.task_id.to_string(),
                        task.task_id.to_string(),
                    ]));
                }
                if !seen.contains(dep) {
                    return Err(DomainError::Planning {
                        message: format!("{} depends on unknown task {dep}", task.task_id),
                        offending_id: Some(task.task_id.to_string()),
                    });
                }
            }
        }

        if let Some(cycle) = detect_cycle(&tasks) {
            return Err(DomainError::DependencyCycle(
                cycle.iter().map(ToString::to_string).collect(),
            ));
        }

        Ok(Self {
            root_query_id,
            tasks,
        })
    }

    /// Single-node plan used by the fast path.
    pub fn single(root_query_id: Uuid, domain_id: impl Into<String>, subquery: impl Into<String>) -> Self {
        Self {
            root_query_id,
            tasks: vec![Task::new(TaskId(1), domain_id, subquery)],
        }
    }

    pub fn root_query_id(&self) -> Uuid {
        self.root_query_id
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, task_id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }

    pub fn into_tasks(self) -> Vec<Task> {
        self.tasks
    }

    /// Distinct domains referenced by the plan, sorted.
    pub fn domains(&self) -> BTreeSet<String> {
        self.tasks.iter().map(|t| t.domain_id.clone()).collect()
    }

    /// Tasks that directly depend on `task_id`.
    pub fn dependents_of(&self, task_id: TaskId) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|t| t.dependencies.contains(&task_id))
            .map(|t| t.task_id)
            .collect()
    }

    /// Every task reachable from `task_id` along dependency edges.
    pub fn transitive_dependents(&self, task_id: TaskId) -> BTreeSet<TaskId> {
        let mut found = BTreeSet::new();
        let mut queue = VecDeque::from([task_id]);
        while let Some(current) = queue.pop_front() {
            for dependent in self.dependents_of(current) {
                if found.insert(dependent) {
                    queue.push_back(dependent);
                }
            }
        }
        found
    }

    /// Tasks nothing else depends on; their outputs form the final answer.
    pub fn sinks(&self) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|t| self.dependents_of(t.task_id).is_empty())
            .map(|t| t.task_id)
            .collect()
    }

    /// Kahn ordering, ties broken by task id.
    pub fn topological_order(&self) -> Vec<TaskId> {
        let mut in_degree: HashMap<TaskId, usize> = self
            .tasks
            .iter()
            .map(|t| (t.task_id, t.dependencies.iter().collect::<HashSet<_>>().len()))
            .collect();

        let mut ready: BTreeSet<TaskId> = in_degree
            .iter()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(&id, _)| id)
            .collect();

        let mut sorted = Vec::with_capacity(self.tasks.len());
        while let Some(next) = ready.pop_first() {
            sorted.push(next);
            for dependent in self.dependents_of(next) {
                if let Some(degree) = in_degree.get_mut(&dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }
        sorted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: u32, deps: &[u32]) -> Task {
        Task::new(TaskId(id), "support", format!("step {id}"))
            .with_dependencies(deps.iter().map(|d| TaskId(*d)).collect())
    }

    #[test]
    fn test_chain_accepted() {
        let plan = TaskPlan::new(Uuid::new_v4(), vec![task(1, &[]), task(2, &[1]), task(3, &[2])])
            .unwrap();
        assert_eq!(plan.topological_order(), vec![TaskId(1), TaskId(2), TaskId(3)]);
        assert_eq!(plan.sinks(), vec![TaskId(3)]);
    }

    #[test]
    fn test_cycle_rejected() {
        let err = TaskPlan::new(Uuid::new_v4(), vec![task(1, &[3]), task(2, &[1]), task(3, &[2])])
            .unwrap_err();
        match err {
            DomainError::DependencyCycle(path) => {
                assert_eq!(path.first(), path.last());
                assert!(path.len() >= 3);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_dependency_rejected() {
        let err = TaskPlan::new(Uuid::new_v4(), vec![task(1, &[1])]).unwrap_err();
        assert!(matches!(err, DomainError::DependencyCycle(_)));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let err = TaskPlan::new(Uuid::new_v4(), vec![task(1, &[]), task(2, &[9])]).unwrap_err();
        assert!(matches!(err, DomainError::Planning { .. }));
        assert_eq!(err.offending_id().as_deref(), Some("task-2"));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let err = TaskPlan::new(Uuid::new_v4(), vec![task(1, &[]), task(1, &[])]).unwrap_err();
        assert!(matches!(err, DomainError::Planning { .. }));
    }

    #[test]
    fn test_empty_plan_rejected() {
        assert!(TaskPlan::new(Uuid::new_v4(), vec![]).is_err());
    }

    #[test]
    fn test_transitive_dependents() {
        let plan = TaskPlan::new(
            Uuid::new_v4(),
            vec![task(1, &[]), task(2, &[1]), task(3, &[2]), task(4, &[])],
        )
        .unwrap();
        let dependents: Vec<TaskId> = plan.transitive_dependents(TaskId(1)).into_iter().collect();
        assert_eq!(dependents, vec![TaskId(2), TaskId(3)]);
        assert!(plan.transitive_dependents(TaskId(4)).is_empty());
    }

    #[test]
    fn test_diamond_order() {
        let plan = TaskPlan::new(
            Uuid::new_v4(),
            vec![task(1, &[]), task(2, &[1]), task(3, &[1]), task(4, &[2, 3])],
        )
        .unwrap();
        let order = plan.topological_order();
        assert_eq!(order.first(), Some(&TaskId(1)));
        assert_eq!(order.last(), Some(&TaskId(4)));
    }

    #[test]
    fn test_single_plan() {
        let plan = TaskPlan::single(Uuid::new_v4(), "weather", "What is the weather today?");
        assert_eq!(plan.len(), 1);
        assert!(plan.tasks()[0].dependencies.is_empty());
    }
}
