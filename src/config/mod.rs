//! Configuration management for the logweave pipeline
//!
//! Loading, validation and defaults for the single TOML configuration
//! document: pattern catalog location, anonymization policy, miner
//! parameters, timestamp normalization policy and batch sizing.

use crate::error::{LogweaveError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Sentinel meaning "effectively unbounded" for miner limits
pub const UNBOUNDED: usize = 999_999;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub regex: RegexConfig,
    #[serde(default)]
    pub anonymization: AnonymizationConfig,
    #[serde(default)]
    pub drain3: DrainConfig,
    #[serde(default)]
    pub timestamp_normalization: TimestampNormalizationConfig,
    #[serde(default)]
    pub batch_processing: BatchProcessingConfig,
}

/// Pattern catalog location
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegexConfig {
    /// Catalog file; the embedded catalog is used when absent
    pub patterns_file: Option<PathBuf>,
}

/// Anonymization policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnonymizationConfig {
    /// Field names whose values are always replaced (case-insensitive)
    pub always_anonymize: Vec<String>,
    #[serde(default)]
    pub methods: MethodsConfig,
}

impl Default for AnonymizationConfig {
    fn default() -> Self {
        Self {
            always_anonymize: vec![
                "devname".to_string(),
                "devid".to_string(),
                "vd".to_string(),
                "tz".to_string(),
                "hostname".to_string(),
                "user_id".to_string(),
                "session_id".to_string(),
                "device_id".to_string(),
            ],
            methods: MethodsConfig::default(),
        }
    }
}

/// Per-method anonymization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodsConfig {
    #[serde(default)]
    pub hash: HashMethodConfig,
    #[serde(default)]
    pub mask: MaskMethodConfig,
    /// field name -> literal placeholder
    #[serde(default)]
    pub replace: BTreeMap<String, String>,
}

impl Default for MethodsConfig {
    fn default() -> Self {
        let mut replace = BTreeMap::new();
        replace.insert("ip_address".to_string(), "<IP>".to_string());
        replace.insert("mac_address".to_string(), "<MAC>".to_string());
        replace.insert("email".to_string(), "<EMAIL>".to_string());
        Self {
            hash: HashMethodConfig::default(),
            mask: MaskMethodConfig::default(),
            replace,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashMethodConfig {
    #[serde(default)]
    pub fields: Vec<String>,
    pub salt: String,
}

impl Default for HashMethodConfig {
    fn default() -> Self {
        Self {
            fields: vec![
                "user_id".to_string(),
                "session_id".to_string(),
                "device_id".to_string(),
            ],
            salt: "logweave_salt".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaskMethodConfig {
    #[serde(default)]
    pub fields: Vec<String>,
    pub pattern: String,
}

impl Default for MaskMethodConfig {
    fn default() -> Self {
        Self {
            fields: vec![
                "credit_card".to_string(),
                "ssn".to_string(),
                "phone".to_string(),
            ],
            pattern: "***".to_string(),
        }
    }
}

/// Parameters for both miner instances
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DrainConfig {
    #[serde(default)]
    pub original: MinerConfig,
    #[serde(default)]
    pub anonymized: MinerConfig,
}

/// Parameters of one Drain-style miner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinerConfig {
    pub depth: usize,
    pub max_children: usize,
    /// 999999 disables cluster eviction
    pub max_clusters: usize,
    pub similarity_threshold: f64,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            depth: 4,
            max_children: 100,
            max_clusters: UNBOUNDED,
            similarity_threshold: 0.4,
        }
    }
}

impl MinerConfig {
    /// Whether cluster eviction is disabled
    pub fn unbounded_clusters(&self) -> bool {
        self.max_clusters >= UNBOUNDED
    }
}

/// Timestamp normalization policy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimestampNormalizationConfig {
    /// Content scanning runs only when parsed_data is empty, unless enabled here
    #[serde(default)]
    pub allow_content_scan: bool,
}

/// Batch mining configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchProcessingConfig {
    /// Overrides the dynamic batch size; clamped to [1000, 20000]
    pub optimal_batch_size: Option<usize>,
}

impl BatchProcessingConfig {
    pub fn clamped_override(&self) -> Option<usize> {
        self.optimal_batch_size.map(|s| s.clamp(1000, 20_000))
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(LogweaveError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| LogweaveError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| LogweaveError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: LOGWEAVE_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("LOGWEAVE_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "TIMESTAMP_NORMALIZATION__ALLOW_CONTENT_SCAN" => {
                self.timestamp_normalization.allow_content_scan =
                    value.parse().map_err(|_| LogweaveError::InvalidConfigValue {
                        path: path.to_string(),
                        message: format!("Cannot parse '{}' as boolean", value),
                    })?;
            }
            "BATCH_PROCESSING__OPTIMAL_BATCH_SIZE" => {
                self.batch_processing.optimal_batch_size =
                    Some(value.parse().map_err(|_| LogweaveError::InvalidConfigValue {
                        path: path.to_string(),
                        message: format!("Cannot parse '{}' as integer", value),
                    })?);
            }
            "ANONYMIZATION__SALT" => {
                self.anonymization.methods.hash.salt = value.to_string();
            }
            "REGEX__PATTERNS_FILE" => {
                self.regex.patterns_file = Some(PathBuf::from(value));
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            regex: RegexConfig::default(),
            anonymization: AnonymizationConfig::default(),
            drain3: DrainConfig::default(),
            timestamp_normalization: TimestampNormalizationConfig::default(),
            batch_processing: BatchProcessingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
        assert!(config.anonymization.always_anonymize.contains(&"tz".to_string()));
        assert!(config.drain3.original.unbounded_clusters());
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Path::new("/nonexistent/logweave.toml")).unwrap_err();
        assert!(matches!(err, LogweaveError::ConfigNotFound { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[anonymization]
always_anonymize = ["tz", "vd"]

[drain3.original]
depth = 5
max_children = 50
max_clusters = 1000
similarity_threshold = 0.5

[timestamp_normalization]
allow_content_scan = true

[batch_processing]
optimal_batch_size = 500
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.anonymization.always_anonymize, vec!["tz", "vd"]);
        assert_eq!(config.drain3.original.depth, 5);
        assert!(!config.drain3.original.unbounded_clusters());
        assert!(config.timestamp_normalization.allow_content_scan);
        // Below the clamp floor
        assert_eq!(config.batch_processing.clamped_override(), Some(1000));
    }

    #[test]
    fn test_batch_override_clamping() {
        let mut config = Config::default();
        assert_eq!(config.batch_processing.clamped_override(), None);

        config.batch_processing.optimal_batch_size = Some(50_000);
        assert_eq!(config.batch_processing.clamped_override(), Some(20_000));

        config.batch_processing.optimal_batch_size = Some(5_000);
        assert_eq!(config.batch_processing.clamped_override(), Some(5_000));
    }
}
