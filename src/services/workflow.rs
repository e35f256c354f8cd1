//! Per-request workflow state machine.
//!
//! One machine drives one request through its lifecycle exactly once; a
//! multi-task plan does not re-drive it per task. Every accepted transition
//! is recorded and published as a `StateChanged` event carrying the
//! request's domain, elapsed time, reasoning flag and status as known at
//! that point.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ExecutionStatus, WorkflowState};
use crate::services::event_bus::{
    EventBus, EventCategory, EventPayload, EventSeverity, OrchestratorEvent,
};

/// One accepted transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionRecord {
    pub from: WorkflowState,
    pub to: WorkflowState,
    pub at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct WorkflowStateMachine {
    request_id: Uuid,
    correlation_id: Uuid,
    state: WorkflowState,
    transitions: Vec<TransitionRecord>,
    events: Option<Arc<EventBus>>,
    started: Instant,
    domain: Option<String>,
    reasoning_used: bool,
    status: Option<ExecutionStatus>,
}

impl WorkflowStateMachine {
    pub fn new(request_id: Uuid, correlation_id: Uuid) -> Self {
        Self {
            request_id,
            correlation_id,
            state: WorkflowState::Init,
            transitions: Vec::new(),
            events: None,
            started: Instant::now(),
            domain: None,
            reasoning_used: false,
            status: None,
        }
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Domain reported on subsequent transitions.
    pub fn set_domain(&mut self, domain: Option<String>) {
        self.domain = domain;
    }

    pub fn set_reasoning_used(&mut self, reasoning_used: bool) {
        self.reasoning_used = reasoning_used;
    }

    /// Aggregate status reported on subsequent transitions.
    pub fn set_status(&mut self, status: ExecutionStatus) {
        self.status = Some(status);
    }

    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// Every state visited so far, starting with `Init`.
    pub fn history(&self) -> Vec<WorkflowState> {
        std::iter::once(WorkflowState::Init)
            .chain(self.transitions.iter().map(|t| t.to))
            .collect()
    }

    /// Move to `to`, rejecting anything outside the transition table.
    pub fn transition(&mut self, to: WorkflowState) -> DomainResult<()> {
        let from = self.state;
        if !from.can_transition_to(to) {
            warn!(
                request_id = %self.request_id,
                from = %from,
                to = %to,
                "rejected workflow transition"
            );
            return Err(DomainError::StateTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        self.state = to;
        self.transitions.push(TransitionRecord {
            from,
            to,
            at: Utc::now(),
        });
        debug!(request_id = %self.request_id, from = %from, to = %to, "workflow transition");

        if let Some(events) = &self.events {
            let severity = if to == WorkflowState::Error {
                EventSeverity::Warning
            } else {
                EventSeverity::Debug
            };
            events.publish(OrchestratorEvent::new(
                severity,
                EventCategory::Workflow,
                Some(self.correlation_id),
                EventPayload::StateChanged {
                    request_id: self.request_id,
                    from,
                    to,
                    domain: self.domain.clone(),
                    latency_ms: self.elapsed_ms(),
                    success: to != WorkflowState::Error
                        && self.status != Some(ExecutionStatus::Failed),
                    reasoning_used: self.reasoning_used,
                    status: self.status,
                },
            ));
        }
        Ok(())
    }

    /// Move to the single forward successor of the current state.
    pub fn advance(&mut self) -> DomainResult<WorkflowState> {
        let next = self.state.next().ok_or_else(|| DomainError::StateTransition {
            from: self.state.to_string(),
            to: "<none>".to_string(),
        })?;
        self.transition(next)?;
        Ok(next)
    }

    /// Enter `Error` unless already terminal. Returns whether it moved.
    pub fn fail(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.transition(WorkflowState::Error).is_ok()
    }
}
