//! Adapters connecting the domain ports to concrete backends.

pub mod backends;

pub use backends::{MockModelBackend, OllamaBackend};
