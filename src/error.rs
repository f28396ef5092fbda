use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the logweave pipeline
#[derive(Error, Debug)]
pub enum LogweaveError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// Individual regex failed to compile
    #[error("Pattern '{name}' failed to compile: {message}")]
    PatternCompile { name: String, message: String },

    /// Category does not support substitution
    #[error("Category '{0}' does not support substitution")]
    UnsupportedCategory(String),

    /// Log entry or record failed invariant validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Miner state could not be restored
    #[error("Miner state error: {0}")]
    MinerState(String),

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for logweave operations
pub type Result<T> = std::result::Result<T, LogweaveError>;
