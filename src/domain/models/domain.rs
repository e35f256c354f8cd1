//! Domain definitions.
//!
//! A domain is a specialised area of work (billing, coding, support, ...)
//! backed by one model. Domains are validated when they are registered so
//! that routing and execution never have to check for missing fields.

use serde::{Deserialize, Serialize};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::model::ModelSpec;

/// Request and response constraints enforced around execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ValidationRules {
    /// Upper bound on a sub-query's length in characters.
    #[serde(default)]
    pub max_query_chars: Option<usize>,
    /// Terms that may not appear in a sub-query (case-insensitive).
    #[serde(default)]
    pub forbidden_terms: Vec<String>,
    /// Minimum length of a response before it is flagged.
    #[serde(default)]
    pub min_response_chars: usize,
}

impl ValidationRules {
    /// Check a sub-query against the pre-execution rules.
    pub fn check_query(&self, text: &str) -> Result<(), String> {
        if let Some(max) = self.max_query_chars {
            let len = text.chars().count();
            if len > max {
                return Err(format!("query length {len} exceeds limit {max}"));
            }
        }
        let lowered = text.to_lowercase();
        if let Some(term) = self
            .forbidden_terms
            .iter()
            .find(|term| lowered.contains(&term.to_lowercase()))
        {
            return Err(format!("query contains forbidden term '{term}'"));
        }
        Ok(())
    }

    /// Check a response against the post-execution rules.
    pub fn check_response(&self, text: &str) -> Result<(), String> {
        let len = text.trim().chars().count();
        if len < self.min_response_chars {
            return Err(format!(
                "response length {len} below minimum {}",
                self.min_response_chars
            ));
        }
        Ok(())
    }
}

/// A routable domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub domain_id: String,
    pub keyword_set: Vec<String>,
    pub description: String,
    pub model_reference: ModelSpec,
    #[serde(default)]
    pub validation_rules: ValidationRules,
    /// Instructions prepended to every prompt sent to this domain's model.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Overrides the executor's default generation budget.
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Overrides the executor's default temperature.
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl Domain {
    pub fn new(
        domain_id: impl Into<String>,
        description: impl Into<String>,
        keywords: &[&str],
        model_reference: ModelSpec,
    ) -> Self {
        Self {
            domain_id: domain_id.into(),
            keyword_set: keywords.iter().map(|k| (*k).to_string()).collect(),
            description: description.into(),
            model_reference,
            validation_rules: ValidationRules::default(),
            system_prompt: None,
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_validation_rules(mut self, rules: ValidationRules) -> Self {
        self.validation_rules = rules;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Fail fast on malformed definitions.
    pub fn validate(&self) -> DomainResult<()> {
        let fail = |reason: &str| DomainError::DomainValidation {
            domain_id: self.domain_id.clone(),
            reason: reason.to_string(),
        };

        if self.domain_id.trim().is_empty() {
            return Err(fail("domain_id cannot be empty"));
        }
        if self.domain_id.chars().any(char::is_whitespace) {
            return Err(fail("domain_id cannot contain whitespace"));
        }
        if self.keyword_set.is_empty() {
            return Err(fail("at least one keyword is required"));
        }
        if self.keyword_set.iter().any(|k| k.trim().is_empty()) {
            return Err(fail("keywords cannot be blank"));
        }
        if self.model_reference.backend_name().trim().is_empty() {
            return Err(fail("model reference cannot be empty"));
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(fail("temperature must be within [0, 2]"));
            }
        }
        if self.max_tokens == Some(0) {
            return Err(fail("max_tokens must be positive"));
        }
        Ok(())
    }

    /// Lowercased keywords, as used by the router.
    pub fn normalized_keywords(&self) -> Vec<String> {
        self.keyword_set
            .iter()
            .map(|k| k.trim().to_lowercase())
            .collect()
    }
}
