//! Rule-based reasoning planner.
//!
//! Splits a complex query into clauses and infers dependencies from the
//! connective language between them:
//!
//! - sequencing ("X, then Y", "X; Y", sentence breaks): Y depends on X
//! - parallel conjunctions ("X as well as Y"): X and Y are independent
//!   and share the dependencies of their stage
//! - a condition, leading ("if X, Y") or trailing ("Y if X", "Y unless X"):
//!   Y depends on a task evaluating X
//!
//! Each clause is assigned the domain whose keywords it matches best. A
//! clause with no match inherits the previous clause's domain, then the
//! best domain for the whole query. A keyword tie is broken the same way.
//! If neither resolves it, planning fails rather than guessing.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Domain, Query, Task, TaskId, TaskPlan};
use crate::domain::ports::Planner;
use crate::services::fast_router::{best_keyword_match, KeywordMatch};

const DEFAULT_MAX_TASKS: usize = 8;

static CONDITIONAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^\s*(?:if|when|unless|in case)\s+(.+?)\s*,\s*(?:then\s+)?(.+)$")
        .expect("static conditional pattern")
});

static TRAILING_CONDITIONAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^(.+?)\s*,?\s+(?:if|unless|provided that|in case)\s+(.+?)[.!?]?\s*$")
        .expect("static trailing conditional pattern")
});

static SEQUENTIAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)[.!?]\s+|\s*;\s*|\s*,?\s*\b(?:and then|then|after that|afterwards|finally|followed by)\b[,:]?\s*",
    )
    .expect("static sequential pattern")
});

static PARALLEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*,?\s*\b(?:and also|as well as|plus)\b\s*").expect("static parallel pattern")
});

static LEADING_FILLER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:and|also|next|first(?:ly)?|second(?:ly)?|lastly)\b[,:]?\s*")
        .expect("static filler pattern")
});

/// A planned clause before ids are assigned.
#[derive(Debug, Clone)]
struct Clause {
    text: String,
    stage: usize,
}

/// Heuristic planner driven by connective language.
#[derive(Debug, Clone)]
pub struct RuleBasedPlanner {
    max_tasks: usize,
}

impl RuleBasedPlanner {
    pub fn new(max_tasks: usize) -> Self {
        Self {
            max_tasks: max_tasks.max(1),
        }
    }

    pub fn max_tasks(&self) -> usize {
        self.max_tasks
    }

    fn clauses(text: &str) -> Vec<Clause> {
        let mut clauses = Vec::new();
        let mut stage = 0;

        // (condition, body) for a leading or trailing condition.
        let split = CONDITIONAL
            .captures(text)
            .map(|caps| (caps[1].to_string(), caps[2].to_string()))
            .or_else(|| {
                TRAILING_CONDITIONAL
                    .captures(text)
                    .map(|caps| (caps[2].to_string(), caps[1].to_string()))
                    .filter(|(_, body)| !clean(body).is_empty())
            });

        let body = match split {
            Some((condition, body)) => {
                let condition = clean(&condition);
                if !condition.is_empty() {
                    clauses.push(Clause {
                        text: format!("Determine whether {condition}"),
                        stage,
                    });
                    stage += 1;
                }
                body
            }
            None => text.to_string(),
        };

        for sequential in SEQUENTIAL.split(&body) {
            let parts: Vec<String> = PARALLEL
                .split(sequential)
                .map(clean)
                .filter(|p| !p.is_empty())
                .collect();
            if parts.is_empty() {
                continue;
            }
            for part in parts {
                clauses.push(Clause { text: part, stage });
            }
            stage += 1;
        }
        clauses
    }

    /// Domain for one clause, or why none could be chosen.
    fn assign_domain(
        clause: &str,
        previous: Option<&str>,
        query_best: Option<&str>,
        domains: &[Domain],
    ) -> Result<String, String> {
        match best_keyword_match(clause, domains) {
            KeywordMatch::Unique { domain_id, .. } => Ok(domain_id),
            KeywordMatch::Tied(tied) => previous
                .filter(|p| tied.iter().any(|t| t == p))
                .or_else(|| query_best.filter(|q| tied.iter().any(|t| t == q)))
                .map(str::to_string)
                .ok_or_else(|| format!("keywords tie between {}", tied.join(", "))),
            KeywordMatch::None => previous
                .or(query_best)
                .map(str::to_string)
                .ok_or_else(|| "no domain matches".to_string()),
        }
    }
}

impl Default for RuleBasedPlanner {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TASKS)
    }
}

impl Planner for RuleBasedPlanner {
    fn name(&self) -> &str {
        "rule_based"
    }

    fn plan(&self, query: &Query, domains: &[Domain]) -> DomainResult<TaskPlan> {
        if domains.is_empty() {
            return Err(DomainError::Planning {
                message: "no domains registered".to_string(),
                offending_id: None,
            });
        }

        let clauses = Self::clauses(&query.text);
        if clauses.is_empty() {
            return Err(DomainError::Planning {
                message: "query contains no actionable clause".to_string(),
                offending_id: None,
            });
        }
        if clauses.len() > self.max_tasks {
            return Err(DomainError::Planning {
                message: format!(
                    "query decomposes into {} tasks, limit is {}",
                    clauses.len(),
                    self.max_tasks
                ),
                offending_id: None,
            });
        }

        let query_best = match best_keyword_match(&query.text, domains) {
            KeywordMatch::Unique { domain_id, .. } => Some(domain_id),
            _ if domains.len() == 1 => Some(domains[0].domain_id.clone()),
            _ => None,
        };

        let mut tasks: Vec<Task> = Vec::with_capacity(clauses.len());
        let mut previous_domain: Option<String> = None;
        for (index, clause) in clauses.iter().enumerate() {
            let task_id = TaskId(u32::try_from(index + 1).unwrap_or(u32::MAX));
            let domain_id = Self::assign_domain(
                &clause.text,
                previous_domain.as_deref(),
                query_best.as_deref(),
                domains,
            )
            .map_err(|reason| DomainError::Planning {
                message: format!("{reason} for clause '{}'", clause.text),
                offending_id: Some(task_id.to_string()),
            })?;

            let dependencies: Vec<TaskId> = if clause.stage == 0 {
                Vec::new()
            } else {
                clauses
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| c.stage + 1 == clause.stage)
                    .map(|(i, _)| TaskId(u32::try_from(i + 1).unwrap_or(u32::MAX)))
                    .collect()
            };

            debug!(
                task_id = %task_id,
                domain = %domain_id,
                dependencies = ?dependencies,
                subquery = %clause.text,
                "planned task"
            );
            previous_domain = Some(domain_id.clone());
            tasks.push(Task::new(task_id, domain_id, clause.text.clone()).with_dependencies(dependencies));
        }

        let plan = TaskPlan::new(query.id, tasks)?;
        info!(
            query_id = %query.id,
            tasks = plan.len(),
            domains = ?plan.domains(),
            "query decomposed"
        );
        Ok(plan)
    }
}

fn clean(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches(|c: char| matches!(c, ',' | ';' | ':' | '.'));
    LEADING_FILLER.replace(trimmed.trim(), "").trim().to_string()
}
