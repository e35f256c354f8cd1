//! Logging infrastructure
//!
//! Structured logging using tracing and tracing-subscriber:
//! - JSON or pretty stdout output
//! - Optional rolling log files written through tracing-appender

pub mod logger;

pub use logger::LoggerImpl;
