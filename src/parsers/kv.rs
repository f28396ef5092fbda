//! Generic key=value extractor
//!
//! Pulls `key="quoted"` and `key=bare` pairs out of a payload; whatever text
//! is left between pairs lands under `base_message`.

use crate::record::JsonMap;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Key under which unparsed residue is stored
pub const BASE_MESSAGE_KEY: &str = "base_message";

fn pair_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"([A-Za-z0-9_.\-]+)\s*=\s*(?:"(.*?)"|(\S+))"#).expect("kv pattern compiles")
    })
}

/// Extract all key=value pairs; residue is stored under `base_message`
pub fn extract(content: &str) -> JsonMap {
    let mut data = JsonMap::new();
    let mut consumed: Vec<(usize, usize)> = Vec::new();

    for caps in pair_regex().captures_iter(content) {
        let whole = caps.get(0).unwrap();
        let key = caps.get(1).unwrap().as_str();
        let value = caps
            .get(2)
            .map(|m| m.as_str())
            .filter(|v| !v.is_empty())
            .or_else(|| caps.get(3).map(|m| m.as_str()))
            .unwrap_or("");

        // A matched pair is consumed even when its empty value is dropped
        consumed.push((whole.start(), whole.end()));
        if value.is_empty() {
            continue;
        }
        data.insert(key.to_string(), Value::String(value.trim().to_string()));
    }

    let mut residue = String::new();
    let mut cursor = 0;
    for (start, end) in consumed {
        residue.push_str(&content[cursor..start]);
        cursor = end;
    }
    residue.push_str(&content[cursor..]);
    let residue = residue.split_whitespace().collect::<Vec<_>>().join(" ");
    if !residue.is_empty() {
        data.insert(BASE_MESSAGE_KEY.to_string(), Value::String(residue));
    }

    data
}
