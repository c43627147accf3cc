use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid fusion weights: w_embedding={0}, w_classifier={1}, w_rule={2}. Each must be in [0,1] and they must sum to 1")]
    InvalidFusionWeights(f64, f64, f64),

    #[error("Invalid threshold {name}: {value}. Must be in [0,1]")]
    InvalidThreshold { name: String, value: f64 },

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Experiment arms cannot be empty when the experiment is enabled")]
    EmptyExperimentArms,

    #[error("Default arm '{0}' is not one of the configured arms")]
    UnknownDefaultArm(String),

    #[error("Event logger buffer_size must be at least 1")]
    InvalidBufferSize,

    #[error("Invalid trainer gate {name}: {value}")]
    InvalidTrainerGate { name: String, value: f64 },

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .helmsman/config.yaml (project config, created by init)
    /// 3. .helmsman/local.yaml (project local overrides, optional)
    /// 4. Environment variables (HELMSMAN_* prefix, highest priority)
    ///
    /// Configuration is always project-local (pwd/.helmsman/) so several
    /// routers with different domain sets can share a machine.
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".helmsman/config.yaml"))
            .merge(Yaml::file(".helmsman/local.yaml"))
            .merge(Env::prefixed("HELMSMAN_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
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
        // Validate fusion weights
        let weights = [
            config.fusion.w_embedding,
            config.fusion.w_classifier,
            config.fusion.w_rule,
        ];
        let sum: f64 = weights.iter().sum();
        if weights.iter().any(|w| !(0.0..=1.0).contains(w)) || (sum - 1.0).abs() > 1e-6 {
            return Err(ConfigError::InvalidFusionWeights(
                config.fusion.w_embedding,
                config.fusion.w_classifier,
                config.fusion.w_rule,
            ));
        }

        // Validate thresholds, defaults and every override
        Self::validate_thresholds("default.tau", config.thresholds.default.tau)?;
        Self::validate_thresholds("default.delta_top2", config.thresholds.default.delta_top2)?;
        for (domain, thresholds) in &config.thresholds.overrides {
            Self::validate_thresholds(&format!("{domain}.tau"), thresholds.tau)?;
            Self::validate_thresholds(&format!("{domain}.delta_top2"), thresholds.delta_top2)?;
        }

        // Validate database config
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        // Validate logging config
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        // Validate experiment config
        if config.experiment.enabled && config.experiment.arms.is_empty() {
            return Err(ConfigError::EmptyExperimentArms);
        }
        if !config.experiment.arms.is_empty()
            && !config.experiment.arms.contains(&config.experiment.default_arm)
        {
            return Err(ConfigError::UnknownDefaultArm(
                config.experiment.default_arm.clone(),
            ));
        }

        // Validate event logger config
        if config.event_logger.buffer_size == 0 {
            return Err(ConfigError::InvalidBufferSize);
        }

        // Validate trainer gates
        if !(0.0..=1.0).contains(&config.trainer.accuracy_floor) {
            return Err(ConfigError::InvalidTrainerGate {
                name: "accuracy_floor".to_string(),
                value: config.trainer.accuracy_floor,
            });
        }
        if !(0.0..=1.0).contains(&config.trainer.ece_ceiling) {
            return Err(ConfigError::InvalidTrainerGate {
                name: "ece_ceiling".to_string(),
                value: config.trainer.ece_ceiling,
            });
        }
        if config.trainer.latency_budget_ms <= 0.0 {
            return Err(ConfigError::InvalidTrainerGate {
                name: "latency_budget_ms".to_string(),
                value: config.trainer.latency_budget_ms,
            });
        }
        if config.trainer.min_samples == 0 {
            return Err(ConfigError::ValidationFailed(
                "trainer min_samples must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    fn validate_thresholds(name: &str, value: f64) -> Result<(), ConfigError> {
        if (0.0..=1.0).contains(&value) {
            Ok(())
        } else {
            Err(ConfigError::InvalidThreshold {
                name: name.to_string(),
                value,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::DomainThresholds;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.database.path, ".helmsman/helmsman.db");
        assert_eq!(config.logging.level, "info");
        assert!((config.fusion.w_embedding - 0.5).abs() < f64::EPSILON);
        assert!((config.thresholds.default.tau - 0.75).abs() < f64::EPSILON);
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
fusion:
  w_embedding: 0.4
  w_classifier: 0.4
  w_rule: 0.2
thresholds:
  default:
    tau: 0.8
    delta_top2: 0.05
  overrides:
    weather:
      tau: 0.6
      delta_top2: 0.02
  priority: [weather, music]
database:
  path: /custom/path.db
  max_connections: 5
logging:
  level: debug
  format: pretty
";

        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert!((config.fusion.w_embedding - 0.4).abs() < f64::EPSILON);
        assert!((config.thresholds.default.tau - 0.8).abs() < f64::EPSILON);
        assert!((config.thresholds.for_domain("weather").tau - 0.6).abs() < f64::EPSILON);
        assert_eq!(config.thresholds.priority, vec!["weather", "music"]);
        assert_eq!(config.database.path, "/custom/path.db");
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "pretty");

        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_validate_weights_must_sum_to_one() {
        let mut config = Config::default();
        config.fusion.w_rule = 0.4;

        let result = ConfigLoader::validate(&config);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::InvalidFusionWeights(..)
        ));
    }

    #[test]
    fn test_validate_negative_weight() {
        let mut config = Config::default();
        config.fusion.w_embedding = -0.1;
        config.fusion.w_classifier = 0.9;
        config.fusion.w_rule = 0.2;

        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn test_validate_threshold_out_of_range() {
        let mut config = Config::default();
        config.thresholds.default.tau = 1.5;

        let result = ConfigLoader::validate(&config);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::InvalidThreshold { .. }
        ));
    }

    #[test]
    fn test_validate_override_threshold_out_of_range() {
        let mut config = Config::default();
        config.thresholds.overrides.insert(
            "weather".to_string(),
            DomainThresholds {
                tau: 0.5,
                delta_top2: -0.2,
            },
        );

        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "invalid".to_string();

        match ConfigLoader::validate(&config).unwrap_err() {
            ConfigError::InvalidLogLevel(level) => assert_eq!(level, "invalid"),
            other => panic!("Expected InvalidLogLevel error, got {other}"),
        }
    }

    #[test]
    fn test_validate_invalid_log_format() {
        let mut config = Config::default();
        config.logging.format = "xml".to_string();

        match ConfigLoader::validate(&config).unwrap_err() {
            ConfigError::InvalidLogFormat(format) => assert_eq!(format, "xml"),
            other => panic!("Expected InvalidLogFormat error, got {other}"),
        }
    }

    #[test]
    fn test_validate_empty_database_path() {
        let mut config = Config::default();
        config.database.path = String::new();

        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::EmptyDatabasePath
        ));
    }

    #[test]
    fn test_validate_zero_max_connections() {
        let mut config = Config::default();
        config.database.max_connections = 0;

        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidMaxConnections(0)
        ));
    }

    #[test]
    fn test_validate_enabled_experiment_needs_arms() {
        let mut config = Config::default();
        config.experiment.enabled = true;
        config.experiment.arms.clear();

        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::EmptyExperimentArms
        ));
    }

    #[test]
    fn test_validate_default_arm_must_be_configured() {
        let mut config = Config::default();
        config.experiment.default_arm = "shadow".to_string();

        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::UnknownDefaultArm(_)
        ));
    }

    #[test]
    fn test_validate_zero_buffer_size() {
        let mut config = Config::default();
        config.event_logger.buffer_size = 0;

        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidBufferSize
        ));
    }

    #[test]
    fn test_validate_trainer_gates() {
        let mut config = Config::default();
        config.trainer.accuracy_floor = 1.2;
        assert!(ConfigLoader::validate(&config).is_err());

        let mut config = Config::default();
        config.trainer.latency_budget_ms = 0.0;
        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn test_hierarchical_merging() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        // Create base config
        let mut base_file = NamedTempFile::new().unwrap();
        writeln!(
            base_file,
            "thresholds:\n  default:\n    tau: 0.8\nlogging:\n  level: info\n  format: json"
        )
        .unwrap();
        base_file.flush().unwrap();

        // Create override config
        let mut override_file = NamedTempFile::new().unwrap();
        writeln!(
            override_file,
            "thresholds:\n  default:\n    tau: 0.9\nlogging:\n  level: debug"
        )
        .unwrap();
        override_file.flush().unwrap();

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(base_file.path()))
            .merge(Yaml::file(override_file.path()))
            .extract()
            .unwrap();

        assert!(
            (config.thresholds.default.tau - 0.9).abs() < f64::EPSILON,
            "Override should win"
        );
        assert_eq!(
            config.logging.level, "debug",
            "Override should win for nested fields"
        );
        assert_eq!(
            config.logging.format, "json",
            "Base value should persist when not overridden"
        );
    }
}
