//! Pattern registry for configuration-driven parsing, detection and anonymization
//!
//! This module provides:
//! - Pre-compiled regex patterns loaded from a TOML catalog
//! - Category-ordered iteration (priority ascending, then catalog order)
//! - Guarded substitution for the anonymization and cleaning categories

use crate::error::{LogweaveError, Result};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::{Duration, Instant};

/// Default per-call budget for pattern application
pub const DEFAULT_APPLY_BUDGET: Duration = Duration::from_millis(1000);

/// Embedded default catalog, used when no catalog file is configured
const BUILTIN_CATALOG: &str = include_str!("../../config/patterns.toml");

/// Pattern category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternCategory {
    Parsing,
    Anonymization,
    Detection,
    Cleaning,
    Security,
    Timestamp,
}

impl PatternCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parsing => "parsing",
            Self::Anonymization => "anonymization",
            Self::Detection => "detection",
            Self::Cleaning => "cleaning",
            Self::Security => "security",
            Self::Timestamp => "timestamp",
        }
    }

    /// Categories that carry replacements and support substitution
    pub fn supports_substitution(&self) -> bool {
        matches!(self, Self::Anonymization | Self::Cleaning)
    }
}

impl std::fmt::Display for PatternCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Enrichment configuration: a secondary regex applied to an extracted field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    pub source_field: String,
    pub pattern: String,
}

/// Single pattern definition as it appears in the catalog
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternConfig {
    pub pattern: String,
    #[serde(default)]
    pub replacement: Option<String>,
    #[serde(default)]
    pub priority: Option<u32>,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub parser_type: Option<String>,
    #[serde(default)]
    pub enrichment: Vec<EnrichmentConfig>,
}

/// Catalog file structure: one section per category
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub anonymization_patterns: BTreeMap<String, PatternConfig>,
    #[serde(default)]
    pub parsing_patterns: BTreeMap<String, PatternConfig>,
    #[serde(default)]
    pub detection_patterns: BTreeMap<String, PatternConfig>,
    #[serde(default)]
    pub cleaning_patterns: BTreeMap<String, PatternConfig>,
    #[serde(default)]
    pub security_patterns: BTreeMap<String, PatternConfig>,
}

impl CatalogConfig {
    /// Parse a catalog from a TOML document
    pub fn from_toml(document: &str) -> Result<Self> {
        Ok(toml::from_str(document)?)
    }

    /// The embedded default catalog
    pub fn builtin() -> Self {
        Self::from_toml(BUILTIN_CATALOG).expect("builtin catalog must parse")
    }
}

/// How a parsing pattern extracts fields once it matches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserType {
    /// Named (or numbered) capture groups become fields
    GenericRegex,
    /// The key-value extractor runs over the whole content
    GenericKv,
}

/// Compiled enrichment rule
#[derive(Debug, Clone)]
pub struct CompiledEnrichment {
    pub source_field: String,
    pub regex: Regex,
}

/// Compiled pattern with its catalog metadata
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub name: String,
    pub category: PatternCategory,
    pub regex: Regex,
    pub replacement: Option<String>,
    pub priority: u32,
    pub confidence: f64,
    pub parser_type: ParserType,
    pub enrichment: Vec<CompiledEnrichment>,
    pub description: String,
}

/// Result of applying a category to a text
#[derive(Debug, Clone)]
pub struct CategoryOutcome {
    pub text: String,
    pub warnings: Vec<String>,
}

/// Registry of all compiled patterns, immutable after construction
pub struct PatternRegistry {
    by_category: HashMap<PatternCategory, Vec<CompiledPattern>>,
    /// name -> (category, index into that category's vec)
    index: HashMap<String, (PatternCategory, usize)>,
    /// Patterns dropped at build time: (name, compile error)
    skipped: Vec<(String, String)>,
    apply_budget: Duration,
}

impl PatternRegistry {
    /// Load and compile the registry from a catalog file
    pub fn from_catalog_file(path: &Path) -> Result<Self> {
        let document = std::fs::read_to_string(path).map_err(|e| LogweaveError::Io {
            source: e,
            context: format!("Failed to read pattern catalog: {:?}", path),
        })?;
        Self::from_catalog(CatalogConfig::from_toml(&document)?)
    }

    /// Compile the registry from a parsed catalog
    ///
    /// A malformed pattern never aborts construction: it is skipped with a
    /// warning and excluded from iteration.
    pub fn from_catalog(catalog: CatalogConfig) -> Result<Self> {
        let mut registry = Self {
            by_category: HashMap::new(),
            index: HashMap::new(),
            skipped: Vec::new(),
            apply_budget: DEFAULT_APPLY_BUDGET,
        };

        registry.load_section(PatternCategory::Anonymization, &catalog.anonymization_patterns);
        registry.load_section(PatternCategory::Parsing, &catalog.parsing_patterns);
        registry.load_section(PatternCategory::Detection, &catalog.detection_patterns);
        registry.load_section(PatternCategory::Cleaning, &catalog.cleaning_patterns);
        registry.load_section(PatternCategory::Security, &catalog.security_patterns);

        for patterns in registry.by_category.values_mut() {
            patterns.sort_by_key(|p| p.priority);
        }
        // Rebuild the name index after the priority sort
        registry.index.clear();
        for (category, patterns) in &registry.by_category {
            for (idx, pattern) in patterns.iter().enumerate() {
                registry.index.insert(pattern.name.clone(), (*category, idx));
            }
        }

        Ok(registry)
    }

    /// Registry over the embedded default catalog
    pub fn builtin() -> Self {
        Self::from_catalog(CatalogConfig::builtin()).expect("builtin catalog must compile")
    }

    /// Override the per-call application budget
    pub fn with_apply_budget(mut self, budget: Duration) -> Self {
        self.apply_budget = budget;
        self
    }

    fn load_section(&mut self, category: PatternCategory, section: &BTreeMap<String, PatternConfig>) {
        for (name, config) in section {
            match compile_pattern(name, category, config) {
                Ok(compiled) => {
                    let patterns = self.by_category.entry(category).or_default();
                    self.index.insert(name.clone(), (category, patterns.len()));
                    patterns.push(compiled);
                }
                Err(e) => {
                    tracing::warn!("Skipping pattern '{}': {}", name, e);
                    self.skipped.push((name.clone(), e.to_string()));
                }
            }
        }
    }

    /// Look up a compiled pattern by name
    pub fn get(&self, name: &str) -> Option<&CompiledPattern> {
        let (category, idx) = self.index.get(name)?;
        self.by_category.get(category)?.get(*idx)
    }

    /// All patterns of a category, priority ascending then catalog order
    pub fn by_category(&self, category: PatternCategory) -> &[CompiledPattern] {
        self.by_category
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Patterns dropped at construction with their compile errors
    pub fn skipped(&self) -> &[(String, String)] {
        &self.skipped
    }

    /// Apply every pattern of a substitutable category in order
    ///
    /// When the per-call budget is exceeded the input text is returned
    /// unchanged and a warning is recorded in the outcome.
    pub fn apply_category(&self, text: &str, category: PatternCategory) -> Result<CategoryOutcome> {
        if !category.supports_substitution() {
            return Err(LogweaveError::UnsupportedCategory(category.to_string()));
        }

        let start = Instant::now();
        let mut result = text.to_string();
        let mut warnings = Vec::new();

        for pattern in self.by_category(category) {
            let replacement = pattern.replacement.as_deref().unwrap_or("");
            result = pattern
                .regex
                .replace_all(&result, regex::NoExpand(replacement))
                .into_owned();

            if start.elapsed() > self.apply_budget {
                warnings.push(format!(
                    "{} pattern application exceeded {}ms budget at '{}'; input returned unchanged",
                    category,
                    self.apply_budget.as_millis(),
                    pattern.name
                ));
                return Ok(CategoryOutcome {
                    text: text.to_string(),
                    warnings,
                });
            }
        }

        Ok(CategoryOutcome {
            text: result,
            warnings,
        })
    }
}

/// Strip a leftover raw-string wrapper (`r'…'` / `r"…"`) from a catalog entry
fn normalize_pattern_source(pattern: &str) -> &str {
    if let Some(inner) = pattern.strip_prefix("r'").and_then(|p| p.strip_suffix('\'')) {
        return inner;
    }
    if let Some(inner) = pattern.strip_prefix("r\"").and_then(|p| p.strip_suffix('"')) {
        return inner;
    }
    pattern
}

fn compile_pattern(
    name: &str,
    category: PatternCategory,
    config: &PatternConfig,
) -> Result<CompiledPattern> {
    let source = normalize_pattern_source(&config.pattern);

    let mut builder = RegexBuilder::new(source);
    for flag in &config.flags {
        match flag.as_str() {
            "IGNORECASE" => {
                builder.case_insensitive(true);
            }
            "MULTILINE" => {
                builder.multi_line(true);
            }
            "DOTALL" => {
                builder.dot_matches_new_line(true);
            }
            other => {
                tracing::warn!("Pattern '{}': unknown flag '{}' ignored", name, other);
            }
        }
    }

    let regex = builder.build().map_err(|e| LogweaveError::PatternCompile {
        name: name.to_string(),
        message: e.to_string(),
    })?;

    let enrichment = config
        .enrichment
        .iter()
        .map(|e| {
            Regex::new(normalize_pattern_source(&e.pattern))
                .map(|regex| CompiledEnrichment {
                    source_field: e.source_field.clone(),
                    regex,
                })
                .map_err(|err| LogweaveError::PatternCompile {
                    name: format!("{}.enrichment[{}]", name, e.source_field),
                    message: err.to_string(),
                })
        })
        .collect::<Result<Vec<_>>>()?;

    let parser_type = match config.parser_type.as_deref() {
        Some("generic_kv") => ParserType::GenericKv,
        _ => ParserType::GenericRegex,
    };

    Ok(CompiledPattern {
        name: name.to_string(),
        category,
        regex,
        replacement: config.replacement.clone(),
        priority: config.priority.unwrap_or(999),
        confidence: config.confidence.unwrap_or(0.5),
        parser_type,
        enrichment,
        description: config.description.clone().unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog_with(section: &str, name: &str, config: &str) -> CatalogConfig {
        let document = format!("[{}.{}]\n{}", section, name, config);
        CatalogConfig::from_toml(&document).unwrap()
    }

    #[test]
    fn test_builtin_catalog_compiles() {
        let registry = PatternRegistry::builtin();
        assert!(registry.skipped().is_empty(), "{:?}", registry.skipped());
        assert!(!registry.by_category(PatternCategory::Anonymization).is_empty());
        assert!(!registry.by_category(PatternCategory::Parsing).is_empty());
        assert!(!registry.by_category(PatternCategory::Detection).is_empty());
        assert!(registry.get("fortinet_log_kv").is_some());
    }

    #[test]
    fn test_priority_ordering() {
        let registry = PatternRegistry::builtin();
        let patterns = registry.by_category(PatternCategory::Anonymization);
        for window in patterns.windows(2) {
            assert!(window[0].priority <= window[1].priority);
        }
        assert_eq!(patterns[0].name, "ip_address");
    }

    #[test]
    fn test_apply_anonymization_category() {
        let registry = PatternRegistry::builtin();
        let outcome = registry
            .apply_category("src 192.168.1.1 sent mail to a@b.com", PatternCategory::Anonymization)
            .unwrap();
        assert!(outcome.text.contains("<IP>"));
        assert!(outcome.text.contains("<EMAIL>"));
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn test_apply_unsupported_category() {
        let registry = PatternRegistry::builtin();
        let err = registry
            .apply_category("text", PatternCategory::Detection)
            .unwrap_err();
        assert!(matches!(err, LogweaveError::UnsupportedCategory(_)));
    }

    #[test]
    fn test_malformed_pattern_is_skipped() {
        let catalog = catalog_with("detection_patterns", "broken", "pattern = '[unclosed'");
        let registry = PatternRegistry::from_catalog(catalog).unwrap();
        assert_eq!(registry.skipped().len(), 1);
        assert!(registry.get("broken").is_none());
    }

    #[test]
    fn test_raw_string_wrapper_stripped() {
        let catalog = catalog_with(
            "detection_patterns",
            "digits",
            r#"pattern = "r'\\d+'""#,
        );
        let registry = PatternRegistry::from_catalog(catalog).unwrap();
        let pattern = registry.get("digits").unwrap();
        assert!(pattern.regex.is_match("123"));
    }

    #[test]
    fn test_ignorecase_flag() {
        let registry = PatternRegistry::builtin();
        let severity = registry.get("severity_level").unwrap();
        assert!(severity.regex.is_match("error"));
        assert!(severity.regex.is_match("ERROR"));
    }

    #[test]
    fn test_cleaning_category() {
        let registry = PatternRegistry::builtin();
        let outcome = registry
            .apply_category("value   spaced\x1b[31m   ", PatternCategory::Cleaning)
            .unwrap();
        assert_eq!(outcome.text, "value spaced");
    }

    #[test]
    fn test_apply_budget_returns_input_unchanged() {
        let registry = PatternRegistry::builtin().with_apply_budget(Duration::ZERO);
        let input = "src 192.168.1.1";
        let outcome = registry
            .apply_category(input, PatternCategory::Anonymization)
            .unwrap();
        assert_eq!(outcome.text, input);
        assert_eq!(outcome.warnings.len(), 1);
    }
}
