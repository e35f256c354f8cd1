//! Registered domains.
//!
//! Definitions are validated on registration. Readers take a cheap
//! snapshot, so a request routes and plans against one consistent set even
//! if domains are registered concurrently.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::Domain;

#[derive(Debug, Default)]
pub struct DomainRegistry {
    domains: RwLock<Arc<Vec<Domain>>>,
}

impl DomainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and add a domain. Ids must be unique.
    pub fn register(&self, domain: Domain) -> DomainResult<()> {
        domain.validate()?;

        let mut guard = self.domains.write();
        if guard.iter().any(|d| d.domain_id == domain.domain_id) {
            return Err(DomainError::DomainValidation {
                domain_id: domain.domain_id,
                reason: "domain already registered".to_string(),
            });
        }

        info!(
            domain = %domain.domain_id,
            model = %domain.model_reference.model_id,
            keywords = domain.keyword_set.len(),
            "domain registered"
        );
        let mut next = guard.as_ref().clone();
        next.push(domain);
        *guard = Arc::new(next);
        Ok(())
    }

    pub fn remove(&self, domain_id: &str) -> DomainResult<Domain> {
        let mut guard = self.domains.write();
        let position = guard
            .iter()
            .position(|d| d.domain_id == domain_id)
            .ok_or_else(|| DomainError::DomainNotFound(domain_id.to_string()))?;
        let mut next = guard.as_ref().clone();
        let removed = next.remove(position);
        *guard = Arc::new(next);
        info!(domain = domain_id, "domain removed");
        Ok(removed)
    }

    pub fn get(&self, domain_id: &str) -> Option<Domain> {
        self.domains
            .read()
            .iter()
            .find(|d| d.domain_id == domain_id)
            .cloned()
    }

    /// Current domains in registration order.
    pub fn snapshot(&self) -> Arc<Vec<Domain>> {
        self.domains.read().clone()
    }

    pub fn ids(&self) -> Vec<String> {
        self.domains.read().iter().map(|d| d.domain_id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.domains.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
