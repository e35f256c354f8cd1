use std::path::Path;

use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use thiserror::Error;

use crate::domain::models::config::Config;

/// Directory holding project-local configuration files.
pub const CONFIG_DIR: &str = ".mdsa";

/// Prefix of environment overrides, e.g. `MDSA_REGISTRY__MAX_MODELS=2`.
pub const ENV_PREFIX: &str = "MDSA_";

/// Configuration error types
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid {name}: {value}. Must be between 0.0 and 1.0")]
    InvalidThreshold { name: &'static str, value: f64 },

    #[error("Invalid complexity weight {name}: {value}. Cannot be negative")]
    NegativeWeight { name: &'static str, value: f64 },

    #[error("Invalid {name}: must be at least 1")]
    ZeroValue { name: &'static str },

    #[error("Invalid soft_threshold: {0}. Must be in (0.0, 1.0]")]
    InvalidSoftThreshold(f64),

    #[error("Invalid temperature: {0}. Must be between 0.0 and 2.0")]
    InvalidTemperature(f32),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must not exceed max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Invalid backend base_url: {0:?}. Must be an http(s) URL")]
    InvalidBaseUrl(String),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from the current directory.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .mdsa/config.yaml
    /// 3. .mdsa/local.yaml (optional local overrides)
    /// 4. Environment variables (MDSA_* prefix, `__` separates sections)
    pub fn load() -> Result<Config> {
        Self::load_from_dir(".")
    }

    /// Same as [`ConfigLoader::load`], resolving `.mdsa/` under `root`.
    pub fn load_from_dir(root: impl AsRef<Path>) -> Result<Config> {
        let dir = root.as_ref().join(CONFIG_DIR);
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, without environment overrides.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let orchestrator = &config.orchestrator;
        check_unit("complexity_threshold", orchestrator.complexity_threshold)?;
        check_unit("confidence_threshold", orchestrator.confidence_threshold)?;
        check_nonzero("request_timeout_ms", orchestrator.request_timeout_ms)?;

        let weights = &config.complexity;
        for (name, value) in [
            ("multi_domain", weights.multi_domain),
            ("sequential", weights.sequential),
            ("conditional", weights.conditional),
            ("reasoning", weights.reasoning),
            ("long_query", weights.long_query),
        ] {
            if value < 0.0 || value.is_nan() {
                return Err(ConfigError::NegativeWeight { name, value });
            }
        }

        let registry = &config.registry;
        check_nonzero("max_models", registry.max_models as u64)?;
        check_nonzero("memory_budget_mb", registry.memory_budget_mb)?;
        if !(registry.soft_threshold > 0.0 && registry.soft_threshold <= 1.0) {
            return Err(ConfigError::InvalidSoftThreshold(registry.soft_threshold));
        }

        let executor = &config.executor;
        check_nonzero("max_concurrency", executor.max_concurrency as u64)?;
        check_nonzero("max_tokens", u64::from(executor.max_tokens))?;
        if !(0.0..=2.0).contains(&executor.temperature) {
            return Err(ConfigError::InvalidTemperature(executor.temperature));
        }

        let retry = &config.retry;
        if retry.initial_backoff_ms > retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                retry.initial_backoff_ms,
                retry.max_backoff_ms,
            ));
        }
        check_nonzero("call_timeout_ms", retry.call_timeout_ms)?;

        let base_url = config.backend.base_url.trim();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidBaseUrl(config.backend.base_url.clone()));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        Ok(())
    }
}

fn check_unit(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidThreshold { name, value })
    }
}

fn check_nonzero(name: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        Err(ConfigError::ZeroValue { name })
    } else {
        Ok(())
    }
}
