//! Request lifecycle states.
//!
//! ```text
//! Init → Classify → ValidatePre → LoadModel → Execute → ValidatePost → Log → Return
//!   ↘ Error (from any non-terminal state)
//! ```
//!
//! One machine instance governs one request; per-task progress is tracked on
//! the tasks themselves.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowState {
    Init,
    Classify,
    ValidatePre,
    LoadModel,
    Execute,
    ValidatePost,
    Log,
    Return,
    Error,
}

impl WorkflowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Classify => "CLASSIFY",
            Self::ValidatePre => "VALIDATE_PRE",
            Self::LoadModel => "LOAD_MODEL",
            Self::Execute => "EXECUTE",
            Self::ValidatePost => "VALIDATE_POST",
            Self::Log => "LOG",
            Self::Return => "RETURN",
            Self::Error => "ERROR",
        }
    }

    /// Whether this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Return | Self::Error)
    }

    /// The single forward successor, if any.
    pub fn next(&self) -> Option<Self> {
        match self {
            Self::Init => Some(Self::Classify),
            Self::Classify => Some(Self::ValidatePre),
            Self::ValidatePre => Some(Self::LoadModel),
            Self::LoadModel => Some(Self::Execute),
            Self::Execute => Some(Self::ValidatePost),
            Self::ValidatePost => Some(Self::Log),
            Self::Log => Some(Self::Return),
            Self::Return | Self::Error => None,
        }
    }

    pub fn can_transition_to(&self, to: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == Self::Error || self.next() == Some(to)
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
