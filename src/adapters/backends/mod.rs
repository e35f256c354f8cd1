//! Model backend implementations.

pub mod mock;
pub mod ollama;

pub use mock::{GenerateCall, MockModelBackend};
pub use ollama::OllamaBackend;
