//! Query complexity scoring.
//!
//! Each indicator contributes its configured weight when its pattern occurs
//! in the text; the sum is clamped to `[0, 1]`. The score is a pure
//! function of the text, so assessments are memoized by a hash of it.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::LazyLock;

use parking_lot::Mutex;
use regex::Regex;
use tracing::debug;

use crate::domain::models::{ComplexityAssessment, ComplexityIndicator, ComplexityWeights};

const MAX_CACHED_ASSESSMENTS: usize = 1024;

struct IndicatorPatterns {
    multi_domain: Regex,
    sequential: Regex,
    conditional: Regex,
    reasoning: Regex,
}

static PATTERNS: LazyLock<IndicatorPatterns> = LazyLock::new(|| IndicatorPatterns {
    multi_domain: Regex::new(r"(?i)\b(and then|then|and also|as well as|also|plus|both)\b")
        .expect("static multi-domain pattern"),
    sequential: Regex::new(
        r"(?i)\b(then|after(wards)?|next|first|second|finally|before|followed by|once)\b",
    )
    .expect("static sequential pattern"),
    conditional: Regex::new(
        r"(?i)\b(if|unless|otherwise|in case|depending on|provided that|whether)\b",
    )
    .expect("static conditional pattern"),
    reasoning: Regex::new(r"(?i)\b(why|explain|analy[sz]e|compare|evaluate|reason|justify|assess)\b")
        .expect("static reasoning pattern"),
});

/// Scores structural complexity of query text.
pub struct ComplexityAnalyzer {
    weights: ComplexityWeights,
    threshold: f64,
    cache: Mutex<HashMap<u64, (String, ComplexityAssessment)>>,
}

impl ComplexityAnalyzer {
    pub fn new(weights: ComplexityWeights, threshold: f64) -> Self {
        Self {
            weights,
            threshold,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ComplexityWeights::default(), 0.3)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn weights(&self) -> &ComplexityWeights {
        &self.weights
    }

    /// Assess `text`, serving repeated texts from the memo cache.
    pub fn analyze(&self, text: &str) -> ComplexityAssessment {
        let key = text_hash(text);
        if let Some((cached_text, assessment)) = self.cache.lock().get(&key) {
            if cached_text == text {
                return assessment.clone();
            }
        }

        let assessment = self.score(text);
        debug!(
            score = assessment.score,
            indicators = ?assessment.indicators,
            requires_reasoning = assessment.requires_reasoning,
            "complexity assessed"
        );

        let mut cache = self.cache.lock();
        if cache.len() >= MAX_CACHED_ASSESSMENTS {
            cache.clear();
        }
        cache.insert(key, (text.to_string(), assessment.clone()));
        assessment
    }

    /// Uncached scoring.
    pub fn score(&self, text: &str) -> ComplexityAssessment {
        let patterns = &*PATTERNS;
        let mut indicators = BTreeSet::new();

        if patterns.multi_domain.is_match(text) {
            indicators.insert(ComplexityIndicator::MultiDomainTask);
        }
        if patterns.sequential.is_match(text) {
            indicators.insert(ComplexityIndicator::Sequential);
        }
        if patterns.conditional.is_match(text) {
            indicators.insert(ComplexityIndicator::Conditional);
        }
        if patterns.reasoning.is_match(text) {
            indicators.insert(ComplexityIndicator::Reasoning);
        }
        if text.split_whitespace().count() > self.weights.long_query_words {
            indicators.insert(ComplexityIndicator::LongQuery);
        }

        let raw: f64 = indicators.iter().map(|i| self.weight_of(*i)).sum();
        let score = raw.clamp(0.0, 1.0);

        ComplexityAssessment {
            score,
            requires_reasoning: score >= self.threshold,
            requires_multi_domain: indicators.contains(&ComplexityIndicator::MultiDomainTask),
            indicators,
        }
    }

    fn weight_of(&self, indicator: ComplexityIndicator) -> f64 {
        match indicator {
            ComplexityIndicator::MultiDomainTask => self.weights.multi_domain,
            ComplexityIndicator::Sequential => self.weights.sequential,
            ComplexityIndicator::Conditional => self.weights.conditional,
            ComplexityIndicator::Reasoning => self.weights.reasoning,
            ComplexityIndicator::LongQuery => self.weights.long_query,
        }
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.lock().len()
    }
}

impl Default for ComplexityAnalyzer {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn text_hash(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}
