//! Semantic entity detection over raw content
//!
//! Runs the detection pattern category over a line and returns a map of
//! pattern name to the matched values, deduplicated preserving first
//! occurrence. Independent of the parse result.

use crate::patterns::{PatternCategory, PatternRegistry};
use crate::record::JsonMap;
use serde_json::Value;
use std::sync::Arc;

/// Content above this size is scanned on a prefix only
const SCAN_THRESHOLD: usize = 20 * 1024;
/// Prefix length used for oversized content
const SCAN_PREFIX: usize = 10 * 1024;

/// Registry-driven pattern detector
pub struct PatternDetector {
    registry: Arc<PatternRegistry>,
}

impl PatternDetector {
    pub fn new(registry: Arc<PatternRegistry>) -> Self {
        Self { registry }
    }

    /// Detect all configured entities in a text
    ///
    /// Returns pattern name -> ordered, deduplicated matches. Patterns with a
    /// capture group contribute the first group, mirroring findall semantics;
    /// patterns without groups contribute the whole match.
    pub fn detect(&self, text: &str) -> JsonMap {
        let text = if text.len() > SCAN_THRESHOLD {
            truncate_on_char_boundary(text, SCAN_PREFIX)
        } else {
            text
        };

        let mut detected = JsonMap::new();

        for pattern in self.registry.by_category(PatternCategory::Detection) {
            let has_group = pattern.regex.captures_len() > 1;
            let mut values: Vec<String> = Vec::new();

            if has_group {
                for caps in pattern.regex.captures_iter(text) {
                    if let Some(group) = caps.get(1) {
                        let value = group.as_str().to_string();
                        if !values.contains(&value) {
                            values.push(value);
                        }
                    }
                }
            } else {
                for m in pattern.regex.find_iter(text) {
                    let value = m.as_str().to_string();
                    if !values.contains(&value) {
                        values.push(value);
                    }
                }
            }

            if !values.is_empty() {
                detected.insert(
                    pattern.name.clone(),
                    Value::Array(values.into_iter().map(Value::String).collect()),
                );
            }
        }

        detected
    }
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

    fn create_detector() -> PatternDetector {
        PatternDetector::new(Arc::new(PatternRegistry::builtin()))
    }

    #[test]
    fn test_detect_ip_and_email() {
        let detector = create_detector();
        let detected = detector.detect("host 192.168.1.100 mailed root@example.org");
        assert_eq!(detected["ip_address"], serde_json::json!(["192.168.1.100"]));
        assert_eq!(detected["email"], serde_json::json!(["root@example.org"]));
    }

    #[test]
    fn test_dedup_preserves_first_occurrence() {
        let detector = create_detector();
        let detected = detector.detect("10.0.0.2 then 10.0.0.1 then 10.0.0.2 again");
        assert_eq!(
            detected["ip_address"],
            serde_json::json!(["10.0.0.2", "10.0.0.1"])
        );
    }

    #[test]
    fn test_capture_group_patterns_yield_group() {
        let detector = create_detector();
        let detected = detector.detect("worker started pid=4242");
        assert_eq!(detected["process_id"], serde_json::json!(["4242"]));
    }

    #[test]
    fn test_unix_timestamp_requires_ten_digits() {
        let detector = create_detector();
        let detected = detector.detect("eventtime=1751754624 other=175175462484376");
        assert_eq!(
            detected["unix_timestamp"],
            serde_json::json!(["1751754624"])
        );
    }

    #[test]
    fn test_no_matches_yields_empty_map() {
        let detector = create_detector();
        let detected = detector.detect("nothing interesting here");
        assert!(!detected.contains_key("ip_address"));
        assert!(!detected.contains_key("email"));
    }

    #[test]
    fn test_oversized_content_scans_prefix_only() {
        let detector = create_detector();
        let mut content = "lead 10.1.1.1 ".to_string();
        content.push_str(&"x".repeat(SCAN_THRESHOLD + 1024));
        content.push_str(" tail 10.2.2.2");
        let detected = detector.detect(&content);
        assert_eq!(detected["ip_address"], serde_json::json!(["10.1.1.1"]));
    }

    #[test]
    fn test_severity_detection() {
        let detector = create_detector();
        let detected = detector.detect("2024-01-15 10:30:45 ERROR out of memory");
        assert_eq!(detected["severity_level"], serde_json::json!(["ERROR"]));
        assert!(detected.contains_key("timestamp_log"));
    }
}
