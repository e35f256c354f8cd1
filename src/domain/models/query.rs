//! Incoming request model.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A natural-language request accepted by the orchestrator.
///
/// Immutable once constructed; the orchestrator only ever reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub id: Uuid,
    pub text: String,
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    pub received_at: DateTime<Utc>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            context: HashMap::new(),
            received_at: Utc::now(),
        }
    }

    pub fn with_context(mut self, context: HashMap<String, serde_json::Value>) -> Self {
        self.context = context;
        self
    }

    /// Truncated text for log lines.
    pub fn preview(&self) -> String {
        preview(&self.text, 50)
    }
}

/// Truncate `text` to at most `max_chars` characters, appending an ellipsis.
pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{truncated}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_creation() {
        let query = Query::new("What is the weather today?");
        assert_eq!(query.text, "What is the weather today?");
        assert!(query.context.is_empty());
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        let text = "é".repeat(60);
        let p = preview(&text, 50);
        assert!(p.ends_with("..."));
        assert_eq!(p.chars().count(), 53);
        assert_eq!(preview("short", 50), "short");
    }
}
