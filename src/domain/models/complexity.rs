//! Complexity assessment produced once per query.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Structural feature detected in a query's text.
///
/// Ordered so that indicator sets serialise deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityIndicator {
    /// Connective language joining work for more than one domain.
    MultiDomainTask,
    /// Ordinal or sequencing language ("then", "after that", "finally").
    Sequential,
    /// Conditional language ("if", "unless", "otherwise").
    Conditional,
    /// Explanatory or analytical language ("why", "explain", "compare").
    Reasoning,
    /// Query longer than the configured word limit.
    LongQuery,
}

impl ComplexityIndicator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MultiDomainTask => "multi_domain_task",
            Self::Sequential => "sequential",
            Self::Conditional => "conditional",
            Self::Reasoning => "reasoning",
            Self::LongQuery => "long_query",
        }
    }
}

impl std::fmt::Display for ComplexityIndicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of scoring a query's structural complexity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexityAssessment {
    /// Clamped to `[0, 1]`.
    pub score: f64,
    pub indicators: BTreeSet<ComplexityIndicator>,
    pub requires_reasoning: bool,
    pub requires_multi_domain: bool,
}

impl ComplexityAssessment {
    /// Assessment of a query with no indicators present.
    pub fn simple() -> Self {
        Self {
            score: 0.0,
            indicators: BTreeSet::new(),
            requires_reasoning: false,
            requires_multi_domain: false,
        }
    }

    pub fn has(&self, indicator: ComplexityIndicator) -> bool {
        self.indicators.contains(&indicator)
    }
}
