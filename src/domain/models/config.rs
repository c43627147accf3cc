use serde::{Deserialize, Serialize};

use super::thresholds::ThresholdConfig;

/// Main configuration structure for Helmsman
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Signal fusion weights
    #[serde(default)]
    pub fusion: FusionConfig,

    /// Calibration freshness and cache configuration
    #[serde(default)]
    pub calibration: CalibrationConfig,

    /// Decision policy thresholds
    #[serde(default)]
    pub thresholds: ThresholdConfig,

    /// Experiment arm assignment configuration
    #[serde(default)]
    pub experiment: ExperimentConfig,

    /// Event logger buffering configuration
    #[serde(default)]
    pub event_logger: EventLoggerConfig,

    /// Offline trainer gates and limits
    #[serde(default)]
    pub trainer: TrainerConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".helmsman/helmsman.db".to_string()
}

const fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Signal fusion weights. Must sum to 1; validated at load time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FusionConfig {
    /// Weight of the embedding-similarity score
    #[serde(default = "default_w_embedding")]
    pub w_embedding: f64,

    /// Weight of the classifier probability
    #[serde(default = "default_w_classifier")]
    pub w_classifier: f64,

    /// Weight of the rule-engine vote
    #[serde(default = "default_w_rule")]
    pub w_rule: f64,
}

const fn default_w_embedding() -> f64 {
    0.5
}

const fn default_w_classifier() -> f64 {
    0.3
}

const fn default_w_rule() -> f64 {
    0.2
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            w_embedding: default_w_embedding(),
            w_classifier: default_w_classifier(),
            w_rule: default_w_rule(),
        }
    }
}

/// Calibration staleness window and snapshot cache TTL.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CalibrationConfig {
    /// A promoted record older than this is treated as absent
    #[serde(default = "default_staleness_hours")]
    pub staleness_hours: i64,

    /// How long the in-memory snapshot is served before a refresh
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

const fn default_staleness_hours() -> i64 {
    168
}

const fn default_cache_ttl_secs() -> u64 {
    30
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            staleness_hours: default_staleness_hours(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

/// Experiment arm configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExperimentConfig {
    /// When false, every conversation gets the default arm
    #[serde(default)]
    pub enabled: bool,

    /// Configured arms; assignment is hash(id) modulo arms.len()
    #[serde(default = "default_arms")]
    pub arms: Vec<String>,

    /// Arm used when the experiment is disabled
    #[serde(default = "default_arm")]
    pub default_arm: String,
}

fn default_arms() -> Vec<String> {
    vec!["control".to_string(), "treatment".to_string()]
}

fn default_arm() -> String {
    "control".to_string()
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            arms: default_arms(),
            default_arm: default_arm(),
        }
    }
}

/// Event logger buffering configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EventLoggerConfig {
    /// Bounded buffer capacity; a full buffer drops instead of blocking
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Write attempts per event before it is dropped
    #[serde(default = "default_max_write_retries")]
    pub max_write_retries: u32,
}

const fn default_buffer_size() -> usize {
    4096
}

const fn default_max_write_retries() -> u32 {
    3
}

impl Default for EventLoggerConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            max_write_retries: default_max_write_retries(),
        }
    }
}

/// Offline trainer gates and limits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TrainerConfig {
    /// Minimum validation accuracy for promotion
    #[serde(default = "default_accuracy_floor")]
    pub accuracy_floor: f64,

    /// Maximum expected calibration error for promotion
    #[serde(default = "default_ece_ceiling")]
    pub ece_ceiling: f64,

    /// Simulated decision latency budget (p95)
    #[serde(default = "default_latency_budget_ms")]
    pub latency_budget_ms: f64,

    /// Policy evaluations used to measure simulated latency
    #[serde(default = "default_latency_samples")]
    pub latency_samples: usize,

    /// Minimum labeled training samples per domain to attempt a fit
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    /// Trainer lock lease duration; an expired lease can be taken over
    #[serde(default = "default_lock_lease_secs")]
    pub lock_lease_secs: i64,
}

const fn default_accuracy_floor() -> f64 {
    0.7
}

const fn default_ece_ceiling() -> f64 {
    0.1
}

const fn default_latency_budget_ms() -> f64 {
    120.0
}

const fn default_latency_samples() -> usize {
    1000
}

const fn default_min_samples() -> usize {
    50
}

const fn default_lock_lease_secs() -> i64 {
    900
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            accuracy_floor: default_accuracy_floor(),
            ece_ceiling: default_ece_ceiling(),
            latency_budget_ms: default_latency_budget_ms(),
            latency_samples: default_latency_samples(),
            min_samples: default_min_samples(),
            lock_lease_secs: default_lock_lease_secs(),
        }
    }
}
