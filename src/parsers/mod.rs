//! Multi-strategy parsing
//!
//! Dispatches each entry to the most specific successful strategy:
//! CSV-with-detected-header, JSON object, priority-ordered regex/key-value
//! patterns, then the adaptive fallback that still emits a minimal field
//! map. A record is always produced.

mod csv;
mod kv;

pub use self::csv::{CsvLineParser, CsvParse};
pub use self::kv::{extract as extract_key_values, BASE_MESSAGE_KEY};

use crate::patterns::{CompiledPattern, ParserType, PatternCategory, PatternRegistry};
use crate::record::{JsonMap, LogEntry};
use serde_json::Value;
use std::sync::Arc;

/// Phase A: most specific parsing patterns, tried first
const PRIORITY_PATTERNS: [&str; 5] = [
    "fortinet_log_kv",
    "syslog_format",
    "syslog_bracket_format",
    "timestamp_bracket_format",
    "timestamp_level_format",
];

/// Known-bad patterns excluded from phase B
const BLACKLISTED_PATTERNS: [&str; 3] = [
    "timestamp_pipe_format",
    "git_config_format",
    "git_config_key_value",
];

/// The adaptive fallback only extracts pairs from this prefix
const ADAPTIVE_PREFIX: usize = 1024;

/// Result of the winning parse strategy
#[derive(Debug, Clone)]
pub struct ParseOutcome {
    pub parsed_data: JsonMap,
    pub parser_name: String,
    pub confidence: f64,
    pub detected_headers: Option<Vec<String>>,
    pub error: Option<String>,
}

impl ParseOutcome {
    fn new(parsed_data: JsonMap, parser_name: impl Into<String>, confidence: f64) -> Self {
        Self {
            parsed_data,
            parser_name: parser_name.into(),
            confidence,
            detected_headers: None,
            error: None,
        }
    }

    /// The last-resort record shape when even the adaptive fallback failed
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            parsed_data: JsonMap::new(),
            parser_name: "fallback_failure".to_string(),
            confidence: 0.1,
            detected_headers: None,
            error: Some(message.into()),
        }
    }
}

/// Dispatcher over all parse strategies
pub struct MultiStrategyParser {
    registry: Arc<PatternRegistry>,
    csv: CsvLineParser,
}

impl MultiStrategyParser {
    pub fn new(registry: Arc<PatternRegistry>) -> Self {
        Self {
            registry,
            csv: CsvLineParser::new(),
        }
    }

    /// Parse one entry; some strategy always succeeds
    pub fn parse(&mut self, entry: &LogEntry) -> ParseOutcome {
        let content = &entry.content;

        // Strategy 1: CSV by extension
        let is_csv = entry
            .source_file
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
        if is_csv {
            if let Some(parsed) = self
                .csv
                .parse_line(content, &entry.source_file, entry.line_number)
            {
                let mut outcome = ParseOutcome::new(parsed.data, parsed.parser_name, 0.9);
                outcome.detected_headers = Some(parsed.headers);
                return outcome;
            }
        }

        // Strategy 2: one JSON object
        let trimmed = content.trim();
        if trimmed.starts_with('{') && trimmed.ends_with('}') {
            if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
                return ParseOutcome::new(map, "json", 0.9);
            }
        }

        // Strategy 3: pattern dispatch, best confidence across both phases
        if let Some(outcome) = self.try_patterns(content) {
            return outcome;
        }

        // Strategy 4: adaptive fallback
        let prefix = truncate_on_char_boundary(content, ADAPTIVE_PREFIX);
        ParseOutcome::new(extract_key_values(prefix), "adaptive_drain", 0.6)
    }

    fn try_patterns(&self, content: &str) -> Option<ParseOutcome> {
        let mut best: Option<&CompiledPattern> = None;
        let mut best_confidence = 0.0;

        for name in PRIORITY_PATTERNS {
            let Some(pattern) = self.registry.get(name) else {
                continue;
            };
            if pattern.category == PatternCategory::Parsing
                && pattern.confidence > best_confidence
                && pattern.regex.is_match(content)
            {
                best = Some(pattern);
                best_confidence = pattern.confidence;
            }
        }

        for pattern in self.registry.by_category(PatternCategory::Parsing) {
            if PRIORITY_PATTERNS.contains(&pattern.name.as_str())
                || BLACKLISTED_PATTERNS.contains(&pattern.name.as_str())
            {
                continue;
            }
            if pattern.confidence > best_confidence && pattern.regex.is_match(content) {
                best = Some(pattern);
                best_confidence = pattern.confidence;
            }
        }

        let pattern = best?;
        let mut data = match pattern.parser_type {
            ParserType::GenericKv => extract_key_values(content),
            ParserType::GenericRegex => capture_fields(pattern, content)?,
        };
        apply_enrichment(pattern, &mut data);

        Some(ParseOutcome::new(
            data,
            pattern.name.clone(),
            pattern.confidence,
        ))
    }
}

/// Named groups become fields; without names, `field_1..N` are synthesized
fn capture_fields(pattern: &CompiledPattern, content: &str) -> Option<JsonMap> {
    let caps = pattern.regex.captures(content)?;
    let mut data = JsonMap::new();

    let names: Vec<&str> = pattern.regex.capture_names().flatten().collect();
    if names.is_empty() {
        for (idx, group) in caps.iter().enumerate().skip(1) {
            if let Some(m) = group {
                data.insert(format!("field_{idx}"), scalar(m.as_str()));
            }
        }
    } else {
        for name in names {
            if let Some(m) = caps.name(name) {
                data.insert(name.to_string(), scalar(m.as_str()));
            }
        }
    }
    Some(data)
}

/// Re-match a source field and merge the enrichment's named groups; the
/// source field is overwritten only by a same-named group
fn apply_enrichment(pattern: &CompiledPattern, data: &mut JsonMap) {
    for enrichment in &pattern.enrichment {
        let Some(Value::String(source)) = data.get(&enrichment.source_field).cloned() else {
            continue;
        };
        let Some(caps) = enrichment.regex.captures(&source) else {
            continue;
        };
        for name in enrichment.regex.capture_names().flatten() {
            if let Some(m) = caps.name(name) {
                data.insert(name.to_string(), scalar(m.as_str()));
            }
        }
    }
}

/// Digit-only captures export as JSON numbers
fn scalar(value: &str) -> Value {
    if !value.is_empty() && value.len() <= 18 && value.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(n) = value.parse::<i64>() {
            return Value::Number(n.into());
        }
    }
    Value::String(value.to_string())
}

fn truncate_on_char_boundary(text: &str, limit: usize) -> &str {
    let mut end = limit.min(text.len());
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create_parser() -> MultiStrategyParser {
        MultiStrategyParser::new(Arc::new(PatternRegistry::builtin()))
    }

    fn entry(content: &str, file: &str, line: u64) -> LogEntry {
        LogEntry::new(content, file, line).unwrap()
    }

    #[test]
    fn test_fortinet_kv_dispatch() {
        let mut parser = create_parser();
        let line = r#"devname="host-01" devid="FGT80FTK22013405" vd="root" date=2025-07-06 time=00:30:24 srcip=10.63.44.101 msg="DHCP server sends a DHCPACK""#;
        let outcome = parser.parse(&entry(line, "fw.log", 1));
        assert_eq!(outcome.parser_name, "fortinet_log_kv");
        assert_eq!(outcome.confidence, 0.95);
        assert_eq!(outcome.parsed_data["srcip"], json!("10.63.44.101"));
        assert_eq!(outcome.parsed_data["msg"], json!("DHCP server sends a DHCPACK"));
        assert_eq!(outcome.parsed_data["date"], json!("2025-07-06"));
    }

    #[test]
    fn test_apache_clf_dispatch_with_enrichment() {
        let mut parser = create_parser();
        let line = r#"192.168.1.100 - - [10/Oct/2023:13:55:36 +0000] "GET /index.html HTTP/1.1" 200 2326"#;
        let outcome = parser.parse(&entry(line, "access.log", 1));
        assert_eq!(outcome.parser_name, "apache_clf");
        assert_eq!(outcome.parsed_data["method"], json!("GET"));
        assert_eq!(outcome.parsed_data["path"], json!("/index.html"));
        assert_eq!(outcome.parsed_data["status"], json!(200));
        assert_eq!(outcome.parsed_data["remote_host"], json!("192.168.1.100"));
        // request survives, untouched by the enrichment
        assert_eq!(outcome.parsed_data["request"], json!("GET /index.html HTTP/1.1"));
    }

    #[test]
    fn test_json_strategy() {
        let mut parser = create_parser();
        let line = r#"{"timestamp":"2024-01-15T10:30:45.123Z","level":"ERROR","message":"Database connection failed"}"#;
        let outcome = parser.parse(&entry(line, "app.log", 1));
        assert_eq!(outcome.parser_name, "json");
        assert_eq!(outcome.parsed_data["level"], json!("ERROR"));
    }

    #[test]
    fn test_malformed_json_falls_through() {
        let mut parser = create_parser();
        let outcome = parser.parse(&entry("{not json at all}", "app.log", 1));
        assert_ne!(outcome.parser_name, "json");
    }

    #[test]
    fn test_csv_strategy_by_extension() {
        let mut parser = create_parser();
        let header = parser.parse(&entry("timestamp,level,message", "events.csv", 1));
        assert_eq!(header.parser_name, "csv_header");
        assert_eq!(
            header.detected_headers.as_deref(),
            Some(&["timestamp".to_string(), "level".to_string(), "message".to_string()][..])
        );

        let row = parser.parse(&entry("2024-01-15 10:30:45,ERROR,Out of memory", "events.csv", 2));
        assert_eq!(row.parser_name, "csv");
        assert_eq!(row.parsed_data["level"], json!("ERROR"));
    }

    #[test]
    fn test_syslog_dispatch() {
        let mut parser = create_parser();
        let outcome = parser.parse(&entry(
            "Jul  6 00:30:24 gateway sshd[4321]: Accepted publickey for root",
            "syslog.log",
            1,
        ));
        assert_eq!(outcome.parser_name, "syslog_bracket_format");
        assert_eq!(outcome.parsed_data["hostname"], json!("gateway"));
        assert_eq!(outcome.parsed_data["pid"], json!(4321));
    }

    #[test]
    fn test_blacklisted_pattern_never_wins() {
        let mut parser = create_parser();
        let outcome = parser.parse(&entry(
            "2024-01-15 10:30:45 | ERROR | broken pipe",
            "pipe.log",
            1,
        ));
        assert_ne!(outcome.parser_name, "timestamp_pipe_format");
    }

    #[test]
    fn test_adaptive_fallback() {
        let mut parser = create_parser();
        let outcome = parser.parse(&entry("completely unstructured words only", "misc.log", 1));
        assert_eq!(outcome.parser_name, "adaptive_drain");
        assert_eq!(outcome.confidence, 0.6);
        assert_eq!(
            outcome.parsed_data[BASE_MESSAGE_KEY],
            json!("completely unstructured words only")
        );
    }

    #[test]
    fn test_failure_outcome_shape() {
        let outcome = ParseOutcome::failure("boom");
        assert_eq!(outcome.parser_name, "fallback_failure");
        assert_eq!(outcome.confidence, 0.1);
        assert!(outcome.parsed_data.is_empty());
        assert_eq!(outcome.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_timestamp_level_dispatch() {
        let mut parser = create_parser();
        let outcome = parser.parse(&entry(
            "2024-01-15 10:30:45 ERROR out of memory in worker",
            "app.log",
            1,
        ));
        assert_eq!(outcome.parser_name, "timestamp_level_format");
        assert_eq!(outcome.parsed_data["level"], json!("ERROR"));
        assert_eq!(outcome.parsed_data["message"], json!("out of memory in worker"));
    }
}
