use serde::{Deserialize, Serialize};

use crate::domain::models::Domain;

/// Best domain for a query with the classifier's confidence in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub domain_id: String,
    /// In `[0, 1]`.
    pub confidence: f64,
}

/// Primary fast-path classifier.
///
/// Runs inline on the request's own task, so implementations must be cheap
/// and must not block. Returns `None` when no domain scores at all.
pub trait IntentClassifier: Send + Sync {
    fn classify(&self, text: &str, domains: &[Domain]) -> Option<Classification>;
}
