//! Token masking applied before tokenization
//!
//! Variable-looking tokens (decimals, hex runs, IPv4 addresses) are replaced
//! with the wildcard sentinel so that the tree routes structurally similar
//! messages together.

use regex::Regex;

/// The wildcard sentinel used in templates
pub const PARAM_TOKEN: &str = "<*>";

/// Pre-compiled masking instructions
pub struct LogMasker {
    instructions: Vec<Regex>,
}

impl LogMasker {
    pub fn new(mask_digits: bool, mask_hex: bool, mask_ips: bool) -> Self {
        let mut instructions = Vec::new();
        // IPs first: digit masking alone would leave the dots behind
        if mask_ips {
            instructions.push(Regex::new(r"\b\d{1,3}(?:\.\d{1,3}){3}\b").unwrap());
        }
        if mask_hex {
            instructions.push(Regex::new(r"\b0[xX][0-9a-fA-F]+\b|\b[0-9a-fA-F]{8,}\b").unwrap());
        }
        if mask_digits {
            instructions.push(Regex::new(r"\b\d+\b").unwrap());
        }
        Self { instructions }
    }

    /// Replace all variable tokens with the wildcard sentinel
    pub fn mask(&self, content: &str) -> String {
        let mut masked = content.to_string();
        for regex in &self.instructions {
            masked = regex.replace_all(&masked, PARAM_TOKEN).into_owned();
        }
        masked
    }
}

impl Default for LogMasker {
    fn default() -> Self {
        Self::new(true, true, true)
    }
}
