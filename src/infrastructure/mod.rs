//! Infrastructure layer module
//!
//! Configuration loading and logging setup. Nothing here is needed to run
//! the engine as a library; binaries embedding it call these at startup.

pub mod config;
pub mod logging;
