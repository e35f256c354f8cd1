//! EventBus service for structured observability events.
//!
//! Provides a broadcast-based event system with sequence numbering and
//! correlation tracking. Every workflow transition, task completion,
//! request completion and model lifecycle change is published here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::models::{ExecutionStatus, TaskId, TaskStatus, WorkflowState};

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonically increasing sequence number assigned by EventBus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    pub fn zero() -> Self {
        Self(0)
    }
}

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Event severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Event category for filtering and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Workflow,
    Task,
    Request,
    Model,
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Workflow => write!(f, "workflow"),
            Self::Task => write!(f, "task"),
            Self::Request => write!(f, "request"),
            Self::Model => write!(f, "model"),
        }
    }
}

/// Why a model left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    /// Evicted to make room for an incoming model.
    Capacity,
    /// Evicted because usage crossed the soft memory threshold.
    Pressure,
    /// Evicted by an explicit `evict_idle` or `clear`.
    Forced,
}

/// Event envelope containing all event metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorEvent {
    pub id: EventId,
    pub sequence: SequenceNumber,
    pub timestamp: DateTime<Utc>,
    pub severity: EventSeverity,
    pub category: EventCategory,
    pub correlation_id: Option<Uuid>,
    pub payload: EventPayload,
}

impl OrchestratorEvent {
    pub fn new(
        severity: EventSeverity,
        category: EventCategory,
        correlation_id: Option<Uuid>,
        payload: EventPayload,
    ) -> Self {
        Self {
            id: EventId::new(),
            sequence: SequenceNumber::zero(),
            timestamp: Utc::now(),
            severity,
            category,
            correlation_id,
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventPayload {
    /// One workflow transition, with what is known about the request so far.
    StateChanged {
        request_id: Uuid,
        from: WorkflowState,
        to: WorkflowState,
        /// Routed domain, or the comma-joined planned domains.
        domain: Option<String>,
        /// Time since the request entered the workflow.
        latency_ms: u64,
        success: bool,
        reasoning_used: bool,
        /// Aggregate execution status, once execution has finished.
        status: Option<ExecutionStatus>,
    },
    TaskFinished {
        request_id: Uuid,
        task_id: TaskId,
        domain: String,
        status: TaskStatus,
        success: bool,
        latency_ms: u64,
        reasoning_used: bool,
    },
    RequestCompleted {
        request_id: Uuid,
        domain: Option<String>,
        status: ExecutionStatus,
        success: bool,
        latency_ms: u64,
        reasoning_used: bool,
    },
    ModelLoaded {
        model_id: String,
        memory_estimate_mb: u64,
        load_ms: u64,
    },
    ModelEvicted {
        model_id: String,
        reason: EvictionReason,
    },
    ModelUnloaded {
        model_id: String,
    },
}

/// Configuration for the EventBus.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Channel capacity for the broadcast channel.
    pub channel_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

/// Central event bus for broadcasting events to multiple consumers.
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<OrchestratorEvent>,
    sequence: AtomicU64,
}

impl EventBus {
    /// Create a new EventBus with the given configuration.
    pub fn new(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            sender,
            sequence: AtomicU64::new(0),
        }
    }

    /// Publish an event, assigning it the next sequence number.
    pub fn publish(&self, mut event: OrchestratorEvent) {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        event.sequence = SequenceNumber(seq);

        tracing::trace!(
            sequence = seq,
            category = %event.category,
            severity = %event.severity,
            "event published"
        );

        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.sender.subscribe()
    }

    /// Get the current sequence number.
    pub fn current_sequence(&self) -> SequenceNumber {
        SequenceNumber(self.sequence.load(Ordering::SeqCst))
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unloaded(model_id: &str) -> OrchestratorEvent {
        OrchestratorEvent::new(
            EventSeverity::Info,
            EventCategory::Model,
            None,
            EventPayload::ModelUnloaded {
                model_id: model_id.to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_event_bus_sequence_assignment() {
        let bus = EventBus::default();

        assert_eq!(bus.current_sequence().0, 0);

        let mut rx = bus.subscribe();

        bus.publish(unloaded("a"));
        let event1 = rx.recv().await.unwrap();
        assert_eq!(event1.sequence.0, 0);

        bus.publish(unloaded("b"));
        let event2 = rx.recv().await.unwrap();
        assert_eq!(event2.sequence.0, 1);

        assert_eq!(bus.current_sequence().0, 2);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(unloaded("a"));
        assert_eq!(bus.current_sequence().0, 1);
    }

    #[test]
    fn test_payload_serialization() {
        let event = OrchestratorEvent::new(
            EventSeverity::Info,
            EventCategory::Workflow,
            Some(Uuid::new_v4()),
            EventPayload::StateChanged {
                request_id: Uuid::new_v4(),
                from: WorkflowState::Execute,
                to: WorkflowState::ValidatePost,
                domain: Some("weather".to_string()),
                latency_ms: 12,
                success: true,
                reasoning_used: false,
                status: Some(ExecutionStatus::Success),
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["payload"]["type"], "StateChanged");
        let data = &json["payload"]["data"];
        assert_eq!(data["to"], "VALIDATE_POST");
        assert_eq!(data["domain"], "weather");
        assert_eq!(data["latency_ms"], 12);
        assert_eq!(data["success"], true);
        assert_eq!(data["reasoning_used"], false);
        assert_eq!(data["status"], serde_json::to_value(ExecutionStatus::Success).unwrap());
        assert_eq!(json["category"], "workflow");
    }
}
