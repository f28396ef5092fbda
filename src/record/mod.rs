//! Record model: input entries and the unified per-line artifact
//!
//! `LogEntry` is the immutable input produced by a reader collaborator;
//! `ParsedRecord` is the artifact the pipeline emits for every line, carrying
//! the parse result, both mining outputs and all diagnostics.

use crate::error::{LogweaveError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;

/// Insertion-ordered JSON object used for parsed fields
pub type JsonMap = serde_json::Map<String, Value>;

/// Key under which timestamp metadata is stored in `parsed_data`
pub const TIMESTAMP_INFO_KEY: &str = "timestamp_info";

/// One input line with its provenance
///
/// Created by the reader collaborator. Reader contract: files above 100 MB
/// are rejected and files above 100k lines are truncated to 50k entries
/// before they reach the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub content: String,
    pub source_file: PathBuf,
    pub line_number: u64,
    pub timestamp: Option<DateTime<Utc>>,
    pub raw_data: Option<JsonMap>,
}

impl LogEntry {
    pub fn new(content: impl Into<String>, source_file: impl Into<PathBuf>, line_number: u64) -> Result<Self> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(LogweaveError::Validation(
                "Log entry content cannot be empty".to_string(),
            ));
        }
        if line_number < 1 {
            return Err(LogweaveError::Validation(
                "Line number must be positive".to_string(),
            ));
        }
        Ok(Self {
            content,
            source_file: source_file.into(),
            line_number,
            timestamp: None,
            raw_data: None,
        })
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Provenance of a normalized timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampSource {
    Explicit,
    DetectedPatterns,
    PatternInference,
    ContentScan,
    None,
}

/// Normalized timestamp with confidence and provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampInfo {
    pub value: Option<String>,
    pub parsed_timestamp: Option<DateTime<Utc>>,
    pub confidence: f64,
    pub source: TimestampSource,
}

impl TimestampInfo {
    pub fn none() -> Self {
        Self {
            value: None,
            parsed_timestamp: None,
            confidence: 0.0,
            source: TimestampSource::None,
        }
    }
}

/// Per-miner result attached to a record after the batch pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MiningSummary {
    Mined {
        cluster_id: i64,
        template: String,
        cluster_size: u64,
    },
    Failed {
        error: String,
    },
}

impl MiningSummary {
    pub fn template(&self) -> Option<&str> {
        match self {
            Self::Mined { template, .. } => Some(template),
            Self::Failed { .. } => None,
        }
    }

    pub fn cluster_id(&self) -> Option<i64> {
        match self {
            Self::Mined { cluster_id, .. } => Some(*cluster_id),
            Self::Failed { .. } => None,
        }
    }
}

/// The unified artifact produced for each input line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedRecord {
    // Core data
    pub original_content: String,
    pub source_file: PathBuf,
    pub line_number: u64,
    pub parser_name: String,
    pub confidence_score: f64,
    pub parsed_data: JsonMap,

    // Derived content
    pub anonymized_message: Option<String>,
    pub parsed_data_anonymized: Option<JsonMap>,
    pub timestamp: Option<DateTime<Utc>>,

    // Parsing metadata
    pub detected_headers: Option<Vec<String>>,
    pub detected_patterns: Option<JsonMap>,

    // Template metadata
    pub drain3_original: Option<MiningSummary>,
    pub drain3_anonymized: Option<MiningSummary>,

    // Diagnostics
    pub processing_errors: Vec<String>,
    pub processing_warnings: Vec<String>,
}

impl ParsedRecord {
    /// Construct a record, validating the model invariants
    pub fn new(
        original_content: impl Into<String>,
        source_file: impl Into<PathBuf>,
        line_number: u64,
        parser_name: impl Into<String>,
        confidence_score: f64,
    ) -> Result<Self> {
        let original_content = original_content.into();
        let parser_name = parser_name.into();

        if original_content.trim().is_empty() {
            return Err(LogweaveError::Validation(
                "Original content cannot be empty".to_string(),
            ));
        }
        if parser_name.is_empty() {
            return Err(LogweaveError::Validation(
                "Parser name cannot be empty".to_string(),
            ));
        }
        if line_number < 1 {
            return Err(LogweaveError::Validation(
                "Line number must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&confidence_score) {
            return Err(LogweaveError::Validation(
                "Confidence score must be between 0.0 and 1.0".to_string(),
            ));
        }

        Ok(Self {
            original_content,
            source_file: source_file.into(),
            line_number,
            parser_name,
            confidence_score,
            parsed_data: JsonMap::new(),
            anonymized_message: None,
            parsed_data_anonymized: None,
            timestamp: None,
            detected_headers: None,
            detected_patterns: None,
            drain3_original: None,
            drain3_anonymized: None,
            processing_errors: Vec::new(),
            processing_warnings: Vec::new(),
        })
    }

    /// Identity within a run: `source_file:line_number`
    pub fn id(&self) -> String {
        format!("{}:{}", self.source_file.display(), self.line_number)
    }

    /// A record is successful when no processing error was attached
    pub fn is_valid(&self) -> bool {
        self.processing_errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.processing_warnings.is_empty()
    }

    pub fn add_error(&mut self, error: impl Into<String>) {
        self.processing_errors.push(error.into());
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.processing_warnings.push(warning.into());
    }

    /// Timestamp metadata written by the normalizer, if present
    pub fn timestamp_info(&self) -> Option<TimestampInfo> {
        self.parsed_data
            .get(TIMESTAMP_INFO_KEY)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn set_timestamp_info(&mut self, info: &TimestampInfo) {
        if let Ok(value) = serde_json::to_value(info) {
            self.parsed_data.insert(TIMESTAMP_INFO_KEY.to_string(), value);
        }
    }

    /// Render the record to the canonical export map (the writer contract)
    pub fn to_export_map(&self) -> Value {
        let timestamp = self
            .timestamp
            .map(|t| t.to_rfc3339_opts(SecondsFormat::AutoSi, true));

        let mut parsed_data = self.parsed_data.clone();
        if let Some(original) = &self.drain3_original {
            parsed_data.insert(
                "drain3_original".to_string(),
                serde_json::to_value(original).unwrap_or(Value::Null),
            );
        }
        if let Some(anonymized) = &self.drain3_anonymized {
            parsed_data.insert(
                "drain3_anonymized".to_string(),
                serde_json::to_value(anonymized).unwrap_or(Value::Null),
            );
        }

        // Legacy mirror of the original-miner result
        let drain3 = self
            .drain3_original
            .as_ref()
            .map(|m| serde_json::to_value(m).unwrap_or(Value::Null))
            .unwrap_or(Value::Null);

        let mut parsing_data = self.parsed_data.clone();
        parsing_data.remove(TIMESTAMP_INFO_KEY);
        let timestamp_info = self
            .parsed_data
            .get(TIMESTAMP_INFO_KEY)
            .cloned()
            .unwrap_or(Value::Null);
        let detected_patterns = self
            .detected_patterns
            .clone()
            .map(Value::Object)
            .unwrap_or(Value::Null);

        json!({
            "id": self.id(),
            "source_file": self.source_file.display().to_string(),
            "line_number": self.line_number,
            "parser_name": self.parser_name,
            "timestamp": timestamp,
            "original_content": self.original_content,
            "anonymized_message": self.anonymized_message,
            "parsed_data": parsed_data,
            "drain3": drain3,
            "parsing": {
                "data": parsing_data,
                "timestamp_info": timestamp_info,
                "detected_patterns": detected_patterns,
            },
            "success": self.is_valid(),
            "confidence_score": self.confidence_score,
            "processing_errors": self.processing_errors,
            "processing_warnings": self.processing_warnings,
        })
    }
}
