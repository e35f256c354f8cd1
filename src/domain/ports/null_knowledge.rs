//! Null knowledge retriever implementation.
//!
//! Used when retrieval-augmented prompting is not configured but the
//! executor requires a KnowledgeRetriever implementation.

use async_trait::async_trait;

use super::{KnowledgeRetriever, KnowledgeSnippet};
use crate::domain::errors::DomainResult;

/// A retriever that never finds anything.
#[derive(Debug, Clone, Default)]
pub struct NullRetriever;

impl NullRetriever {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl KnowledgeRetriever for NullRetriever {
    async fn retrieve(
        &self,
        _query: &str,
        _domain_id: &str,
        _top_k: usize,
    ) -> DomainResult<Vec<KnowledgeSnippet>> {
        Ok(Vec::new())
    }
}
