//! Configuration management infrastructure
//!
//! Hierarchical configuration using figment:
//! - YAML file loading from `.mdsa/`
//! - Environment variable overrides (`MDSA_*`)
//! - Configuration validation

pub mod loader;

pub use loader::{ConfigError, ConfigLoader};
