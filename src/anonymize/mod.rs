//! Anonymization engine
//!
//! Produces the anonymized projection of a record: the always-anonymize
//! field-name projection runs first, then the anonymization pattern category
//! in priority order. Field values inside parsed data are anonymized into a
//! separate map so the clear parse result is preserved.

use crate::config::AnonymizationConfig;
use crate::error::Result;
use crate::patterns::{CategoryOutcome, PatternCategory, PatternRegistry};
use crate::record::{JsonMap, ParsedRecord};
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Regex-based anonymizer, stateless aside from its configuration
pub struct Anonymizer {
    registry: Arc<PatternRegistry>,
    config: AnonymizationConfig,
    /// Pre-compiled `field="…"` projections, one per always-anonymize field
    field_projections: Vec<FieldProjection>,
}

struct FieldProjection {
    regex: Regex,
    placeholder: String,
}

impl Anonymizer {
    pub fn new(registry: Arc<PatternRegistry>, config: AnonymizationConfig) -> Self {
        let field_projections = config
            .always_anonymize
            .iter()
            .filter_map(|field| {
                let source = format!(r#"(?i)\b({})\s*=\s*"[^"]*""#, regex::escape(field));
                match Regex::new(&source) {
                    Ok(regex) => Some(FieldProjection {
                        regex,
                        placeholder: placeholder_for(&config, field),
                    }),
                    Err(e) => {
                        tracing::warn!("always_anonymize field '{}' skipped: {}", field, e);
                        None
                    }
                }
            })
            .collect();

        Self {
            registry,
            config,
            field_projections,
        }
    }

    /// Anonymize free text: field projection first, then category patterns
    pub fn anonymize_text(&self, text: &str) -> CategoryOutcome {
        let mut result = text.to_string();

        for projection in &self.field_projections {
            result = projection
                .regex
                .replace_all(&result, |caps: &regex::Captures| {
                    format!("{}=\"{}\"", &caps[1], projection.placeholder)
                })
                .into_owned();
        }

        match self.registry.apply_category(&result, PatternCategory::Anonymization) {
            Ok(outcome) => CategoryOutcome {
                text: outcome.text,
                warnings: outcome.warnings,
            },
            // Contained: the projection result is still a valid anonymization
            Err(e) => CategoryOutcome {
                text: result,
                warnings: vec![format!("anonymization category failed: {e}")],
            },
        }
    }

    /// Anonymize a record: sets `anonymized_message` and fills the
    /// anonymized copy of the parsed fields
    pub fn anonymize_record(&self, record: &mut ParsedRecord) -> Result<()> {
        let outcome = self.anonymize_text(&record.original_content);
        for warning in outcome.warnings {
            record.add_warning(warning);
        }
        record.anonymized_message = Some(outcome.text);

        let anonymized = self.anonymize_map(&record.parsed_data.clone());
        record.parsed_data_anonymized = Some(anonymized);

        Ok(())
    }

    fn anonymize_map(&self, data: &JsonMap) -> JsonMap {
        let mut anonymized = JsonMap::new();
        for (key, value) in data {
            let lowered = key.to_lowercase();
            let is_always = self
                .config
                .always_anonymize
                .iter()
                .any(|f| f.to_lowercase() == lowered);

            let replaced = if is_always {
                match value {
                    Value::String(s) => Value::String(self.anonymize_field(key, s)),
                    other => other.clone(),
                }
            } else {
                self.anonymize_value(value)
            };
            anonymized.insert(key.clone(), replaced);
        }
        anonymized
    }

    fn anonymize_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.anonymize_text(s).text),
            Value::Object(map) => Value::Object(self.anonymize_map(map)),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.anonymize_value(v)).collect())
            }
            other => other.clone(),
        }
    }

    /// Replace an always-anonymize field value per the method table
    pub fn anonymize_field(&self, field: &str, value: &str) -> String {
        let methods = &self.config.methods;
        let lowered = field.to_lowercase();

        if methods.hash.fields.iter().any(|f| f.to_lowercase() == lowered) {
            return self.hash_value(value);
        }
        if methods.mask.fields.iter().any(|f| f.to_lowercase() == lowered) {
            return methods.mask.pattern.clone();
        }
        placeholder_for(&self.config, field)
    }

    /// The always-anonymize field names
    pub fn always_fields(&self) -> &[String] {
        &self.config.always_anonymize
    }

    /// Placeholder used for a field in the projection
    pub fn placeholder(&self, field: &str) -> String {
        placeholder_for(&self.config, field)
    }

    /// Salted SHA-256, truncated to 16 hex characters
    fn hash_value(&self, value: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.config.methods.hash.salt.as_bytes());
        hasher.update(value.as_bytes());
        let digest = hasher.finalize();
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        hex[..16].to_string()
    }
}

/// Placeholder for a field: the configured literal or `<FIELD>` uppercased
fn placeholder_for(config: &AnonymizationConfig, field: &str) -> String {
    config
        .methods
        .replace
        .get(&field.to_lowercase())
        .cloned()
        .unwrap_or_else(|| format!("<{}>", field.to_uppercase()))
}
