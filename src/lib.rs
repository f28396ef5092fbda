//! Logweave - unified log parsing and template mining
//!
//! Ingests heterogeneous log lines (CSV, JSON, key=value, syslog, Apache
//! CLF, free text) and produces a per-record stream enriched with normalized
//! timestamps, a pattern-detection map, and two Drain-style template
//! clusterings: one over the raw content and one over its anonymized
//! projection.

pub mod anonymize;
pub mod config;
pub mod detection;
pub mod error;
pub mod miner;
pub mod parsers;
pub mod patterns;
pub mod pipeline;
pub mod record;
pub mod timestamp;

pub use error::{LogweaveError, Result};
