use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::errors::DomainResult;

/// One retrieved piece of supporting context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeSnippet {
    pub content: String,
    pub score: f64,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl KnowledgeSnippet {
    pub fn new(content: impl Into<String>, score: f64) -> Self {
        Self {
            content: content.into(),
            score,
            metadata: HashMap::new(),
        }
    }
}

/// Retrieval of domain knowledge used to augment task prompts.
///
/// Results are ordered best first and contain at most `top_k` entries.
#[async_trait]
pub trait KnowledgeRetriever: Send + Sync {
    async fn retrieve(
        &self,
        query: &str,
        domain_id: &str,
        top_k: usize,
    ) -> DomainResult<Vec<KnowledgeSnippet>>;
}
