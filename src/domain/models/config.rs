use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure for MDSA
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Routing and request lifecycle settings
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Complexity indicator weights
    #[serde(default)]
    pub complexity: ComplexityWeights,

    /// Model registry capacity and eviction settings
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Task graph executor settings
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Backend call retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Remote model backend settings
    #[serde(default)]
    pub backend: BackendConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LogConfig,
}

/// Routing and request lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OrchestratorConfig {
    /// Route complex queries through the planner
    #[serde(default = "default_true")]
    pub enable_reasoning: bool,

    /// Score at or above which a query takes the slow path
    #[serde(default = "default_complexity_threshold")]
    pub complexity_threshold: f64,

    /// Classifier confidence below which keyword fallback is attempted
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    /// Whole-request deadline in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

const fn default_true() -> bool {
    true
}

const fn default_complexity_threshold() -> f64 {
    0.3
}

const fn default_confidence_threshold() -> f64 {
    0.85
}

const fn default_request_timeout_ms() -> u64 {
    120_000
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            enable_reasoning: default_true(),
            complexity_threshold: default_complexity_threshold(),
            confidence_threshold: default_confidence_threshold(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Weight contributed by each complexity indicator when present
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ComplexityWeights {
    #[serde(default = "default_multi_domain_weight")]
    pub multi_domain: f64,

    #[serde(default = "default_sequential_weight")]
    pub sequential: f64,

    #[serde(default = "default_conditional_weight")]
    pub conditional: f64,

    #[serde(default = "default_reasoning_weight")]
    pub reasoning: f64,

    #[serde(default = "default_long_query_weight")]
    pub long_query: f64,

    /// Word count above which the long-query indicator fires
    #[serde(default = "default_long_query_words")]
    pub long_query_words: usize,
}

const fn default_multi_domain_weight() -> f64 {
    0.25
}

const fn default_sequential_weight() -> f64 {
    0.25
}

const fn default_conditional_weight() -> f64 {
    0.30
}

const fn default_reasoning_weight() -> f64 {
    0.20
}

const fn default_long_query_weight() -> f64 {
    0.15
}

const fn default_long_query_words() -> usize {
    30
}

impl Default for ComplexityWeights {
    fn default() -> Self {
        Self {
            multi_domain: default_multi_domain_weight(),
            sequential: default_sequential_weight(),
            conditional: default_conditional_weight(),
            reasoning: default_reasoning_weight(),
            long_query: default_long_query_weight(),
            long_query_words: default_long_query_words(),
        }
    }
}

/// Model registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RegistryConfig {
    /// Maximum number of resident models
    #[serde(default = "default_max_models")]
    pub max_models: usize,

    /// Aggregate memory budget for resident models, in MB
    #[serde(default = "default_memory_budget_mb")]
    pub memory_budget_mb: u64,

    /// Fraction of the memory budget above which idle models are evicted early
    #[serde(default = "default_soft_threshold")]
    pub soft_threshold: f64,

    /// Interval of the background pressure monitor in milliseconds
    #[serde(default = "default_pressure_check_interval_ms")]
    pub pressure_check_interval_ms: u64,
}

const fn default_max_models() -> usize {
    3
}

const fn default_memory_budget_mb() -> u64 {
    16_384
}

const fn default_soft_threshold() -> f64 {
    0.7
}

const fn default_pressure_check_interval_ms() -> u64 {
    5_000
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_models: default_max_models(),
            memory_budget_mb: default_memory_budget_mb(),
            soft_threshold: default_soft_threshold(),
            pressure_check_interval_ms: default_pressure_check_interval_ms(),
        }
    }
}

/// Task graph executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExecutorConfig {
    /// Maximum tasks running at once
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Generation budget when the domain sets none
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature when the domain sets none
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Knowledge snippets retrieved per task
    #[serde(default = "default_retrieval_top_k")]
    pub retrieval_top_k: usize,

    /// Pause before the single retry after a capacity failure
    #[serde(default = "default_capacity_retry_delay_ms")]
    pub capacity_retry_delay_ms: u64,
}

const fn default_max_concurrency() -> usize {
    4
}

const fn default_max_tokens() -> u32 {
    256
}

const fn default_temperature() -> f32 {
    0.3
}

const fn default_retrieval_top_k() -> usize {
    3
}

const fn default_capacity_retry_delay_ms() -> u64 {
    50
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            retrieval_top_k: default_retrieval_top_k(),
            capacity_retry_delay_ms: default_capacity_retry_delay_ms(),
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Per-call timeout in milliseconds
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

const fn default_max_retries() -> u32 {
    2
}

const fn default_initial_backoff_ms() -> u64 {
    200
}

const fn default_max_backoff_ms() -> u64 {
    5_000
}

const fn default_call_timeout_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

/// Remote model backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BackendConfig {
    /// Base URL of the inference server
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// How long the server keeps a loaded model resident
    #[serde(default = "default_keep_alive")]
    pub keep_alive: String,
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_keep_alive() -> String {
    "30m".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            keep_alive: default_keep_alive(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LogConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,

    /// Directory for log files (if None, logs only to stdout)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Enable stdout logging
    #[serde(default = "default_true")]
    pub enable_stdout: bool,

    /// Log file rotation policy
    #[serde(default)]
    pub rotation: RotationPolicy,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            log_dir: None,
            enable_stdout: default_true(),
            rotation: RotationPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    #[default]
    Daily,
    Hourly,
    Never,
}
