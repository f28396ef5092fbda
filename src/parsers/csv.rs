//! CSV strategy with header inference
//!
//! The first line of a `.csv` file is sniffed for a delimiter and classified
//! as header or data by a weighted indicator heuristic; the resulting field
//! names and delimiter are cached per file and applied to every later line.

use crate::record::JsonMap;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Delimiter candidates; comma and semicolon get the full sniffing bonus
const DELIMITERS: [(u8, f64); 4] = [(b',', 1.0), (b';', 1.0), (b'|', 0.5), (b'\t', 0.5)];

/// Field-name fragments that suggest a header row
const HEADER_KEYWORDS: [&str; 11] = [
    "id", "name", "type", "date", "time", "ip", "user", "session", "attack", "protocol", "browser",
];

/// Result of parsing one CSV line
pub struct CsvParse {
    pub data: JsonMap,
    pub parser_name: &'static str,
    pub headers: Vec<String>,
}

/// Stateful per-file CSV parser
#[derive(Default)]
pub struct CsvLineParser {
    /// source file -> (clean field names, delimiter)
    headers: HashMap<PathBuf, (Vec<String>, u8)>,
}

impl CsvLineParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one line of a `.csv` file; `None` falls through to other strategies
    pub fn parse_line(&mut self, content: &str, source_file: &Path, line_number: u64) -> Option<CsvParse> {
        if line_number == 1 {
            return self.parse_first_line(content, source_file);
        }

        let (names, delimiter) = self.headers.get(source_file)?.clone();
        let values = split_row(content, delimiter)?;

        let mut data = JsonMap::new();
        for (idx, value) in values.iter().enumerate() {
            if idx < names.len() {
                data.insert(names[idx].clone(), Value::String(value.trim().to_string()));
            } else {
                // Overflow beyond the cached header
                data.insert(
                    format!("extra_field_{}", idx - names.len() + 1),
                    Value::String(value.trim().to_string()),
                );
            }
        }

        Some(CsvParse {
            data,
            parser_name: "csv",
            headers: names,
        })
    }

    fn parse_first_line(&mut self, content: &str, source_file: &Path) -> Option<CsvParse> {
        let delimiter = sniff_delimiter(content)?;
        let values = split_row(content, delimiter)?;
        if values.len() < 2 {
            return None;
        }

        let (names, parser_name) = if is_likely_header(&values) {
            let clean: Vec<String> = values
                .iter()
                .enumerate()
                .map(|(i, v)| clean_field_name(v, i))
                .collect();
            (clean, "csv_header")
        } else {
            let generic: Vec<String> = (1..=values.len()).map(|i| format!("column_{i}")).collect();
            (generic, "csv")
        };

        self.headers
            .insert(source_file.to_path_buf(), (names.clone(), delimiter));

        let mut data = JsonMap::new();
        for (name, value) in names.iter().zip(values.iter()) {
            data.insert(name.clone(), Value::String(value.trim().to_string()));
        }

        Some(CsvParse {
            data,
            parser_name,
            headers: names,
        })
    }
}

/// Pick the delimiter with the best occurrence score
fn sniff_delimiter(content: &str) -> Option<u8> {
    let mut best: Option<(f64, u8)> = None;
    for (delimiter, bonus) in DELIMITERS {
        let count = content.bytes().filter(|&b| b == delimiter).count();
        if count == 0 {
            continue;
        }
        let score = count as f64 * bonus;
        if best.map_or(true, |(s, _)| score > s) {
            best = Some((score, delimiter));
        }
    }
    best.map(|(_, d)| d)
}

/// Split one row with the csv crate, honoring quoting
fn split_row(content: &str, delimiter: u8) -> Option<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(content.as_bytes());

    let mut record = csv::StringRecord::new();
    match reader.read_record(&mut record) {
        Ok(true) => Some(record.iter().map(str::to_string).collect()),
        Ok(false) => None,
        Err(e) => {
            tracing::debug!("CSV row split failed: {e}");
            None
        }
    }
}

/// Weighted indicator heuristic: the row is a header iff the indicator sum
/// reaches 0.6 per field
fn is_likely_header(row: &[String]) -> bool {
    if row.is_empty() {
        return false;
    }

    let mut indicators: f64 = 0.0;
    for field in row {
        let field = field.trim();
        if field.is_empty() {
            continue;
        }
        let lowered = field.to_lowercase();

        if HEADER_KEYWORDS.iter().any(|k| lowered.contains(k)) {
            indicators += 1.0;
        } else if field
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .all(|c| c.is_alphabetic())
            && field.chars().any(|c| c.is_alphabetic())
        {
            indicators += 1.0;
        } else if field.len() <= 20 && !field.chars().any(|c| c.is_ascii_digit()) {
            indicators += 0.5;
        }

        if field.chars().any(|c| c.is_ascii_digit()) {
            indicators -= 0.5;
            if field.contains('.') {
                // Decimal-looking values count strongly against a header
                indicators -= 1.0;
            }
        }
    }

    indicators / row.len() as f64 >= 0.6
}

fn clean_field_name(raw: &str, index: usize) -> String {
    let cleaned: String = raw
        .trim()
        .replace(' ', "_")
        .replace('-', "_")
        .to_lowercase();
    if cleaned.is_empty() {
        format!("field_{index}")
    } else {
        cleaned
    }
}
