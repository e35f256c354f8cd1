//! Domain layer for the MDSA orchestration core
//!
//! This module contains the core models, errors and the port traits that
//! adapters implement.

pub mod errors;
pub mod models;
pub mod ports;

// Re-export error types for convenient access
pub use errors::{BackendError, DomainError, DomainResult, ErrorKind, ExecutionError};
