//! Fast-path routing of a query straight to one domain.
//!
//! A pluggable `IntentClassifier` proposes a domain with a confidence. Below
//! the configured cutoff the router falls back to deterministic keyword
//! overlap, and if that has no unique winner the request is escalated
//! instead of guessing.

use std::sync::Arc;

use tracing::{debug, info};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Domain, RoutingDecision, RoutingMethod};
use crate::domain::ports::{Classification, IntentClassifier};

/// Lowercased alphanumeric words of `text`.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Whether the (possibly multi-word) keyword occurs as whole words.
fn contains_phrase(words: &[String], keyword: &str) -> bool {
    let phrase = tokenize(keyword);
    if phrase.is_empty() || phrase.len() > words.len() {
        return false;
    }
    words.windows(phrase.len()).any(|w| w == phrase.as_slice())
}

/// Number of the domain's distinct keywords present in `words`.
pub(crate) fn keyword_overlap(words: &[String], domain: &Domain) -> usize {
    let mut keywords = domain.normalized_keywords();
    keywords.sort();
    keywords.dedup();
    keywords
        .iter()
        .filter(|k| contains_phrase(words, k))
        .count()
}

/// Outcome of comparing keyword overlap across domains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum KeywordMatch {
    None,
    Unique { domain_id: String, hits: usize },
    Tied(Vec<String>),
}

pub(crate) fn best_keyword_match(text: &str, domains: &[Domain]) -> KeywordMatch {
    let words = tokenize(text);
    let mut best = 0;
    let mut leaders: Vec<&str> = Vec::new();
    for domain in domains {
        let hits = keyword_overlap(&words, domain);
        if hits == 0 {
            continue;
        }
        if hits > best {
            best = hits;
            leaders.clear();
            leaders.push(&domain.domain_id);
        } else if hits == best {
            leaders.push(&domain.domain_id);
        }
    }
    match leaders.as_slice() {
        [] => KeywordMatch::None,
        [only] => KeywordMatch::Unique {
            domain_id: (*only).to_string(),
            hits: best,
        },
        tied => KeywordMatch::Tied(tied.iter().map(|s| (*s).to_string()).collect()),
    }
}

/// Default classifier over the domains' keyword profiles.
///
/// Confidence grows with the winner's share of all keyword hits and with
/// the absolute number of hits, so a single stray keyword never clears a
/// high cutoff on its own.
#[derive(Debug, Clone, Default)]
pub struct ProfileClassifier;

impl IntentClassifier for ProfileClassifier {
    #[allow(clippy::cast_precision_loss)]
    fn classify(&self, text: &str, domains: &[Domain]) -> Option<Classification> {
        let words = tokenize(text);
        let scored: Vec<(&Domain, usize)> = domains
            .iter()
            .map(|d| (d, keyword_overlap(&words, d)))
            .collect();
        let total: usize = scored.iter().map(|(_, hits)| hits).sum();
        let (domain, best) = scored
            .iter()
            .max_by_key(|(_, hits)| *hits)
            .copied()
            .filter(|(_, hits)| *hits > 0)?;

        let share = best as f64 / total as f64;
        let strength = 1.0 - (-(best as f64)).exp();
        Some(Classification {
            domain_id: domain.domain_id.clone(),
            confidence: (share * strength).clamp(0.0, 1.0),
        })
    }
}

/// Routes simple queries to a single domain.
pub struct FastRouter {
    classifier: Arc<dyn IntentClassifier>,
    confidence_threshold: f64,
}

impl FastRouter {
    pub fn new(classifier: Arc<dyn IntentClassifier>, confidence_threshold: f64) -> Self {
        Self {
            classifier,
            confidence_threshold,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(Arc::new(ProfileClassifier), 0.85)
    }

    pub fn confidence_threshold(&self) -> f64 {
        self.confidence_threshold
    }

    pub fn route(&self, text: &str, domains: &[Domain]) -> DomainResult<RoutingDecision> {
        if domains.is_empty() {
            return Err(DomainError::RoutingAmbiguous {
                reason: "no domains registered".to_string(),
                proposed_domain: None,
                confidence: 0.0,
                threshold: self.confidence_threshold,
            });
        }

        let classification = self
            .classifier
            .classify(text, domains)
            .filter(|c| domains.iter().any(|d| d.domain_id == c.domain_id));
        let confidence = classification.as_ref().map_or(0.0, |c| c.confidence);

        if let Some(c) = classification.as_ref() {
            if c.confidence >= self.confidence_threshold {
                info!(
                    domain = %c.domain_id,
                    confidence = c.confidence,
                    "routed by classifier"
                );
                return Ok(RoutingDecision {
                    domain_id: c.domain_id.clone(),
                    confidence: c.confidence,
                    method: RoutingMethod::Classifier,
                });
            }
        }

        debug!(
            confidence,
            cutoff = self.confidence_threshold,
            "classifier below cutoff, trying keyword fallback"
        );

        let reason = match best_keyword_match(text, domains) {
            KeywordMatch::Unique { domain_id, hits } => {
                info!(domain = %domain_id, hits, confidence, "routed by keyword fallback");
                return Ok(RoutingDecision {
                    domain_id,
                    confidence,
                    method: RoutingMethod::KeywordFallback,
                });
            }
            KeywordMatch::Tied(tied) => format!(
                "confidence {confidence:.2} below {:.2} and keyword fallback tied between {}",
                self.confidence_threshold,
                tied.join(", ")
            ),
            KeywordMatch::None => format!(
                "confidence {confidence:.2} below {:.2} and no domain keywords matched",
                self.confidence_threshold
            ),
        };
        Err(DomainError::RoutingAmbiguous {
            reason,
            proposed_domain: classification.map(|c| c.domain_id),
            confidence,
            threshold: self.confidence_threshold,
        })
    }
}
