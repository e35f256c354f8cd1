//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines the interfaces that adapters and pluggable
//! strategies must implement:
//! - ModelBackend: load, generate and unload models on an inference backend
//! - KnowledgeRetriever: retrieval of supporting context for a sub-query
//! - IntentClassifier: primary fast-path classification
//! - Planner: decomposition of complex queries into task plans
//!
//! These traits let the orchestration core stay independent of concrete
//! inference servers and heuristics.

pub mod intent_classifier;
pub mod knowledge;
pub mod model_backend;
pub mod null_knowledge;
pub mod planner;

pub use intent_classifier::{Classification, IntentClassifier};
pub use knowledge::{KnowledgeRetriever, KnowledgeSnippet};
pub use model_backend::{Generation, GenerationRequest, ModelBackend};
pub use null_knowledge::NullRetriever;
pub use planner::Planner;
