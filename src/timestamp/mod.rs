//! Timestamp normalization
//!
//! Attaches at most one normalized UTC instant per record, following a
//! confidence hierarchy: explicit record timestamp, explicit parsed fields,
//! detected unix-epoch candidates, then an optional content scan. Records
//! with nothing found keep an unset timestamp (`source = none`).

use crate::config::TimestampNormalizationConfig;
use crate::record::{ParsedRecord, TimestampInfo, TimestampSource};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

/// Parsed-data fields consulted for an explicit timestamp, in order
const TIMESTAMP_FIELDS: [&str; 8] = [
    "timestamp",
    "time",
    "date",
    "datetime",
    "created_at",
    "event_time",
    "log_time",
    "event_timestamp",
];

/// Processing-time fields that never count as log timestamps
const EXCLUDED_FIELDS: [&str; 3] = ["parsed_at", "processing_time", "parse_time"];

/// Naive formats accepted for explicit values, specificity descending
const DATETIME_FORMATS: [&str; 7] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%SZ",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y%m%d-%H:%M:%S:%3f",
    "%d/%b/%Y:%H:%M:%S",
];

/// Year-less syslog formats, resolved against the current UTC year
const YEARLESS_FORMATS: [&str; 2] = ["%Y %b %d %H:%M:%S%.f", "%Y %b %d %H:%M:%S"];

/// Content-scan family: (pattern, confidence), specificity descending
const CONTENT_PATTERNS: [(&str, f64); 7] = [
    (
        r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:\d{2})",
        0.95,
    ),
    (r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?", 0.9),
    (r"\d{4}-\d{2}-\d{2}\s+\d{2}:\d{2}:\d{2}(?:\.\d+)?", 0.85),
    (r"[A-Z][a-z]{2}\s+\d{1,2}\s+\d{2}:\d{2}:\d{2}(?:\.\d+)?", 0.8),
    (r"\d{8}-\d{2}:\d{2}:\d{2}:\d{3}", 0.75),
    (r"\d{4}-\d{2}-\d{2}", 0.6),
    (r"\d{2}:\d{2}:\d{2}(?:\.\d+)?", 0.5),
];

/// Stateless timestamp normalizer
pub struct TimestampNormalizer {
    allow_content_scan: bool,
    content_patterns: Vec<(Regex, f64)>,
}

impl TimestampNormalizer {
    pub fn new(config: &TimestampNormalizationConfig) -> Self {
        let content_patterns = CONTENT_PATTERNS
            .iter()
            .map(|(source, confidence)| {
                (
                    Regex::new(source).expect("content scan pattern must compile"),
                    *confidence,
                )
            })
            .collect();

        Self {
            allow_content_scan: config.allow_content_scan,
            content_patterns,
        }
    }

    /// Normalize the record timestamp in place
    ///
    /// A record that already carries a normalized timestamp is left
    /// untouched.
    pub fn normalize(&self, record: &mut ParsedRecord) {
        // 1. Explicit timestamp already present on the record
        if let Some(existing) = record.timestamp {
            if record.timestamp_info().is_none() {
                record.set_timestamp_info(&TimestampInfo {
                    value: Some(existing.to_rfc3339()),
                    parsed_timestamp: Some(existing),
                    confidence: 0.9,
                    source: TimestampSource::Explicit,
                });
            }
            return;
        }

        // 2. Explicit fields in parsed data
        if let Some(info) = self.from_parsed_fields(record) {
            record.timestamp = info.parsed_timestamp;
            record.set_timestamp_info(&info);
            return;
        }

        // 3. Detected unix-epoch candidates
        if let Some(info) = self.from_unix_candidates(record) {
            record.timestamp = info.parsed_timestamp;
            record.set_timestamp_info(&info);
            return;
        }

        // 4. Content scan, only for empty parse results or when enabled
        let parsed_data_empty = record.parsed_data.is_empty();
        if parsed_data_empty || self.allow_content_scan {
            let source = if parsed_data_empty {
                TimestampSource::PatternInference
            } else {
                TimestampSource::ContentScan
            };
            if let Some(info) = self.scan_content(&record.original_content, source) {
                record.timestamp = info.parsed_timestamp;
                record.set_timestamp_info(&info);
                return;
            }
        }

        // 5. Nothing found: timestamp stays unset
        record.set_timestamp_info(&TimestampInfo::none());
    }

    fn from_parsed_fields(&self, record: &ParsedRecord) -> Option<TimestampInfo> {
        // Separate date and time columns combine into one instant
        if let (Some(date), Some(time)) = (
            field_as_string(record, "date"),
            field_as_string(record, "time"),
        ) {
            let combined = format!("{} {}", date, time);
            if let Some(parsed) = parse_timestamp_value(&combined) {
                return Some(TimestampInfo {
                    value: Some(combined),
                    parsed_timestamp: Some(parsed),
                    confidence: 0.85,
                    source: TimestampSource::Explicit,
                });
            }
        }

        for field in TIMESTAMP_FIELDS {
            if EXCLUDED_FIELDS.contains(&field) {
                continue;
            }
            let Some(value) = field_as_string(record, field) else {
                continue;
            };
            if value.trim().is_empty() {
                continue;
            }
            if let Some(parsed) = parse_timestamp_value(&value) {
                return Some(TimestampInfo {
                    value: Some(value),
                    parsed_timestamp: Some(parsed),
                    confidence: 0.85,
                    source: TimestampSource::Explicit,
                });
            }
        }
        None
    }

    fn from_unix_candidates(&self, record: &ParsedRecord) -> Option<TimestampInfo> {
        let candidates = record
            .detected_patterns
            .as_ref()?
            .get("unix_timestamp")?
            .as_array()?;

        let mut valid: Vec<(String, DateTime<Utc>)> = candidates
            .iter()
            .filter_map(|v| v.as_str())
            .filter_map(|s| parse_unix_candidate(s).map(|dt| (s.to_string(), dt)))
            .filter(|(_, dt)| is_valid_timestamp(dt))
            .collect();

        // More digits preferred (millisecond precision), then the later instant
        valid.sort_by(|a, b| (b.0.len(), b.1).cmp(&(a.0.len(), a.1)));
        let (raw, parsed) = valid.into_iter().next()?;

        Some(TimestampInfo {
            value: Some(raw),
            parsed_timestamp: Some(parsed),
            confidence: 0.7,
            source: TimestampSource::DetectedPatterns,
        })
    }

    fn scan_content(&self, content: &str, source: TimestampSource) -> Option<TimestampInfo> {
        let mut best: Option<(f64, String, DateTime<Utc>)> = None;

        for (regex, confidence) in &self.content_patterns {
            if best.as_ref().is_some_and(|(c, _, _)| c >= confidence) {
                continue;
            }
            if let Some(m) = regex.find(content) {
                let matched = m.as_str().to_string();
                if let Some(parsed) = parse_timestamp_value(&matched) {
                    best = Some((*confidence, matched, parsed));
                }
            }
        }

        best.map(|(confidence, value, parsed)| TimestampInfo {
            value: Some(value),
            parsed_timestamp: Some(parsed),
            confidence,
            source,
        })
    }
}

/// Temporal coverage summary over a record set
#[derive(Debug, Clone, Serialize)]
pub struct TimelineStatistics {
    pub total_records: usize,
    pub records_with_timestamp: usize,
    pub timestamp_coverage: f64,
    pub average_confidence: f64,
    pub span: Option<TimeSpan>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimeSpan {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_seconds: i64,
}

impl TimestampNormalizer {
    /// Sort records chronologically; records without a timestamp go last
    pub fn sort_records(&self, records: &mut [ParsedRecord]) {
        records.sort_by_key(|r| (r.timestamp.is_none(), r.timestamp));
    }

    /// Coverage, confidence and span statistics over normalized records
    pub fn timeline_statistics(&self, records: &[ParsedRecord]) -> TimelineStatistics {
        let timestamps: Vec<DateTime<Utc>> =
            records.iter().filter_map(|r| r.timestamp).collect();
        let with_timestamp = timestamps.len();

        let confidence_sum: f64 = records
            .iter()
            .filter(|r| r.timestamp.is_some())
            .filter_map(|r| r.timestamp_info())
            .map(|info| info.confidence)
            .sum();

        let span = match (timestamps.iter().min(), timestamps.iter().max()) {
            (Some(&start), Some(&end)) => Some(TimeSpan {
                start,
                end,
                duration_seconds: (end - start).num_seconds(),
            }),
            _ => None,
        };

        TimelineStatistics {
            total_records: records.len(),
            records_with_timestamp: with_timestamp,
            timestamp_coverage: if records.is_empty() {
                0.0
            } else {
                with_timestamp as f64 / records.len() as f64
            },
            average_confidence: if with_timestamp == 0 {
                0.0
            } else {
                confidence_sum / with_timestamp as f64
            },
            span,
        }
    }
}

fn field_as_string(record: &ParsedRecord, field: &str) -> Option<String> {
    match record.parsed_data.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse one timestamp string against the accepted formats
///
/// RFC 3339 is tried first, then the fixed naive format table, then
/// year-less syslog, date-only and time-only forms. Naive instants become
/// UTC; out-of-range instants are rejected.
pub fn parse_timestamp_value(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        let utc = dt.with_timezone(&Utc);
        if is_valid_timestamp(&utc) {
            return Some(utc);
        }
    }

    // Apache CLF carries an explicit offset
    if let Ok(dt) = DateTime::parse_from_str(value, "%d/%b/%Y:%H:%M:%S %z") {
        let utc = dt.with_timezone(&Utc);
        if is_valid_timestamp(&utc) {
            return Some(utc);
        }
    }

    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            let utc = Utc.from_utc_datetime(&naive);
            if is_valid_timestamp(&utc) {
                return Some(utc);
            }
        }
    }

    let with_year = format!("{} {}", Utc::now().year(), value);
    for format in YEARLESS_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&with_year, format) {
            let utc = Utc.from_utc_datetime(&naive);
            if is_valid_timestamp(&utc) {
                return Some(utc);
            }
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        let utc = Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?);
        if is_valid_timestamp(&utc) {
            return Some(utc);
        }
    }

    if let Ok(time) = NaiveTime::parse_from_str(value, "%H:%M:%S%.f") {
        let date = NaiveDate::from_ymd_opt(1970, 1, 1)?;
        return Some(Utc.from_utc_datetime(&date.and_time(time)));
    }

    None
}

/// Interpret a digit string as a unix epoch: 13+ digits are milliseconds
fn parse_unix_candidate(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() || !value.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let number: i64 = value.parse().ok()?;
    if value.len() >= 13 {
        Utc.timestamp_millis_opt(number).single()
    } else {
        Utc.timestamp_opt(number, 0).single()
    }
}

/// Accept instants in [1970-01-01, now + 10 years]
fn is_valid_timestamp(dt: &DateTime<Utc>) -> bool {
    let year = dt.year();
    year >= 1970 && year <= Utc::now().year() + 10
}
