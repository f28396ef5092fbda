//! Configuration validation

use super::Config;
use crate::error::{LogweaveError, Result, ValidationError};

/// Validates configuration values before the pipeline is built
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the whole configuration, accumulating every failure
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_miner("drain3.original", &config.drain3.original, &mut errors);
        Self::validate_miner("drain3.anonymized", &config.drain3.anonymized, &mut errors);

        if config.anonymization.methods.hash.salt.is_empty() {
            errors.push(ValidationError::new(
                "anonymization.methods.hash.salt",
                "salt must not be empty",
            ));
        }
        if config.anonymization.methods.mask.pattern.is_empty() {
            errors.push(ValidationError::new(
                "anonymization.methods.mask.pattern",
                "mask pattern must not be empty",
            ));
        }
        for (idx, field) in config.anonymization.always_anonymize.iter().enumerate() {
            if field.trim().is_empty() {
                errors.push(ValidationError::new(
                    format!("anonymization.always_anonymize[{}]", idx),
                    "field name must not be empty",
                ));
            }
        }

        if let Some(size) = config.batch_processing.optimal_batch_size {
            if size == 0 {
                errors.push(ValidationError::new(
                    "batch_processing.optimal_batch_size",
                    "batch size must be positive",
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(LogweaveError::ConfigValidation { errors })
        }
    }

    fn validate_miner(path: &str, miner: &super::MinerConfig, errors: &mut Vec<ValidationError>) {
        if miner.depth < 3 {
            errors.push(ValidationError::new(
                format!("{}.depth", path),
                "depth must be at least 3",
            ));
        }
        if miner.max_children < 2 {
            errors.push(ValidationError::new(
                format!("{}.max_children", path),
                "max_children must be at least 2",
            ));
        }
        if miner.max_clusters == 0 {
            errors.push(ValidationError::new(
                format!("{}.max_clusters", path),
                "max_clusters must be positive",
            ));
        }
        if !(miner.similarity_threshold > 0.0 && miner.similarity_threshold <= 1.0) {
            errors.push(ValidationError::new(
                format!("{}.similarity_threshold", path),
                "similarity threshold must be in (0, 1]",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MinerConfig;

    #[test]
    fn test_default_passes() {
        assert!(ConfigValidator::validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_bad_miner_depth() {
        let mut config = Config::default();
        config.drain3.original.depth = 2;
        let err = ConfigValidator::validate(&config).unwrap_err();
        match err {
            LogweaveError::ConfigValidation { errors } => {
                assert!(errors.iter().any(|e| e.path == "drain3.original.depth"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_accumulates_multiple_errors() {
        let mut config = Config::default();
        config.drain3.anonymized = MinerConfig {
            depth: 1,
            max_children: 1,
            max_clusters: 0,
            similarity_threshold: 0.0,
        };
        config.anonymization.methods.hash.salt = String::new();
        let err = ConfigValidator::validate(&config).unwrap_err();
        match err {
            LogweaveError::ConfigValidation { errors } => {
                assert!(errors.len() >= 5);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
