//! Pipeline orchestration
//!
//! The streaming pass turns every `LogEntry` into exactly one
//! `ParsedRecord`: parse, detect, normalize the timestamp, anonymize. The
//! batch pass then mines the whole collected dataset twice (original and
//! anonymized projections), grouped by file similarity, and finishes with a
//! re-coherence sweep that regenerates anonymized templates still carrying
//! plaintext always-anonymize fields.

use crate::anonymize::Anonymizer;
use crate::config::Config;
use crate::detection::PatternDetector;
use crate::error::Result;
use crate::miner::{MinerStatistics, MiningOutcome, TemplateMiner};
use crate::parsers::{MultiStrategyParser, ParseOutcome};
use crate::patterns::PatternRegistry;
use crate::record::{LogEntry, MiningSummary, ParsedRecord};
use crate::timestamp::TimestampNormalizer;
use regex::Regex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Records above this size bypass mining with a truncated template
const MINING_SIZE_LIMIT: usize = 50 * 1024;
/// Characters kept in the truncated template
const TRUNCATED_TEMPLATE_PREFIX: usize = 200;

/// Counters over one pipeline run
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub total_processed: u64,
    pub successfully_parsed: u64,
    pub fallback_used: u64,
    pub anonymized: u64,
    pub errors: u64,
    pub timestamp_normalized: u64,
}

/// The full processing pipeline: one instance per run
pub struct Pipeline {
    parser: MultiStrategyParser,
    detector: PatternDetector,
    normalizer: TimestampNormalizer,
    anonymizer: Anonymizer,
    original_miner: TemplateMiner,
    anonymized_miner: TemplateMiner,
    /// `(?i)field="…"` matcher + expected placeholder, per always field
    coherence_checks: Vec<(Regex, String)>,
    config: Config,
    stats: PipelineStats,
}

impl Pipeline {
    /// Build a pipeline from configuration
    pub fn new(config: Config) -> Result<Self> {
        let registry = match &config.regex.patterns_file {
            Some(path) => PatternRegistry::from_catalog_file(path)?,
            None => PatternRegistry::builtin(),
        };
        let registry = Arc::new(registry);

        let anonymizer = Anonymizer::new(registry.clone(), config.anonymization.clone());
        let coherence_checks = anonymizer
            .always_fields()
            .iter()
            .filter_map(|field| {
                let source = format!(r#"(?i)\b{}\s*=\s*"([^"]*)""#, regex::escape(field));
                Regex::new(&source)
                    .ok()
                    .map(|regex| (regex, anonymizer.placeholder(field)))
            })
            .collect();

        Ok(Self {
            parser: MultiStrategyParser::new(registry.clone()),
            detector: PatternDetector::new(registry.clone()),
            normalizer: TimestampNormalizer::new(&config.timestamp_normalization),
            anonymizer,
            original_miner: TemplateMiner::new(config.drain3.original.clone()),
            anonymized_miner: TemplateMiner::new(config.drain3.anonymized.clone()),
            coherence_checks,
            config,
            stats: PipelineStats::default(),
        })
    }

    /// Streaming pass: parse, detect, normalize, anonymize one entry
    ///
    /// Never fails: every contained error ends up in the record diagnostics.
    pub fn process_entry(&mut self, entry: &LogEntry) -> ParsedRecord {
        self.stats.total_processed += 1;

        let outcome = self.parser.parse(entry);
        let confidence = if outcome.confidence.is_finite() {
            outcome.confidence.clamp(0.0, 1.0)
        } else {
            0.5
        };
        let mut record = match ParsedRecord::new(
            entry.content.clone(),
            entry.source_file.clone(),
            entry.line_number,
            outcome.parser_name.clone(),
            confidence,
        ) {
            Ok(record) => {
                let mut record = record;
                record.parsed_data = outcome.parsed_data;
                record.detected_headers = outcome.detected_headers;
                record
            }
            Err(e) => {
                // Contained: fall back to the minimal failure record
                let failure = ParseOutcome::failure(e.to_string());
                let mut record = ParsedRecord::new(
                    entry.content.clone(),
                    entry.source_file.clone(),
                    entry.line_number,
                    failure.parser_name,
                    failure.confidence,
                )
                .expect("validated entry always yields a fallback record");
                record.add_error(format!("ParseStrategyFailed: {e}"));
                self.stats.errors += 1;
                record
            }
        };
        if let Some(error) = outcome.error {
            self.stats.errors += 1;
            record.add_error(format!("ParseStrategyFailed: {error}"));
        }

        let detected = self.detector.detect(&entry.content);
        if !detected.is_empty() {
            record.detected_patterns = Some(detected);
        }

        if let Some(timestamp) = entry.timestamp {
            record.timestamp = Some(timestamp);
        }
        self.normalizer.normalize(&mut record);
        if record.timestamp.is_some() {
            self.stats.timestamp_normalized += 1;
        }

        if let Err(e) = self.anonymizer.anonymize_record(&mut record) {
            self.stats.errors += 1;
            record.add_error(format!("AnonymizationFailed: {e}"));
        } else {
            self.stats.anonymized += 1;
        }

        match record.parser_name.as_str() {
            "adaptive_drain" | "fallback_failure" => self.stats.fallback_used += 1,
            _ => self.stats.successfully_parsed += 1,
        }

        record
    }

    /// Streaming pass over an entry sequence
    pub fn process_entries<I>(&mut self, entries: I) -> Vec<ParsedRecord>
    where
        I: IntoIterator<Item = LogEntry>,
    {
        entries
            .into_iter()
            .map(|entry| self.process_entry(&entry))
            .collect()
    }

    /// Batch pass: global dual mining over the collected dataset
    ///
    /// Records are grouped by source file, files by a similarity signature,
    /// and fed to both miners in record order within dynamically sized
    /// batches. Afterwards every record carries both mining maps, and the
    /// re-coherence sweep regenerates anonymized templates when needed.
    pub fn process_dataset(&mut self, records: &mut [ParsedRecord]) {
        if records.is_empty() {
            return;
        }

        let batch_size = self.batch_size(records.len());
        let batches = self.partition(records, batch_size);
        tracing::debug!(
            "mining {} records in {} batches of up to {}",
            records.len(),
            batches.len(),
            batch_size
        );

        for batch in batches {
            for idx in batch {
                self.mine_record(records, idx);
            }
        }

        // Guarantee both maps on every record
        for record in records.iter_mut() {
            if record.drain3_original.is_none() {
                record.drain3_original = Some(MiningSummary::Failed {
                    error: "not processed".to_string(),
                });
            }
            if record.drain3_anonymized.is_none() {
                record.drain3_anonymized = Some(MiningSummary::Failed {
                    error: "not processed".to_string(),
                });
            }
        }

        self.recohere_anonymized_templates(records);
    }

    /// Mine one record into both miners, bypassing oversize content
    fn mine_record(&mut self, records: &mut [ParsedRecord], idx: usize) {
        let content = records[idx].original_content.clone();

        if content.len() > MINING_SIZE_LIMIT {
            let anonymized = self.anonymized_message_for(records, idx);
            records[idx].drain3_original = Some(truncated_summary(&content));
            records[idx].drain3_anonymized = Some(truncated_summary(&anonymized));
            records[idx].add_warning("content too long for template mining".to_string());
            return;
        }

        let original = self.original_miner.add(&content);
        records[idx].drain3_original = Some(summary(original));

        // The anonymized miner must never see raw content
        let anonymized = self.anonymized_message_for(records, idx);
        let mined = self.anonymized_miner.add(&anonymized);
        records[idx].drain3_anonymized = Some(summary(mined));
    }

    /// The exact text fed to the anonymized miner, synthesizing the
    /// projection when the streaming pass did not leave one
    fn anonymized_message_for(&self, records: &mut [ParsedRecord], idx: usize) -> String {
        if let Some(message) = &records[idx].anonymized_message {
            return message.clone();
        }
        let projected = self
            .anonymizer
            .anonymize_text(&records[idx].original_content)
            .text;
        records[idx].anonymized_message = Some(projected.clone());
        records[idx].add_warning("anonymized projection synthesized during mining".to_string());
        projected
    }

    /// Batch size: configured override (clamped) or dynamic by dataset size
    fn batch_size(&self, total_records: usize) -> usize {
        if let Some(size) = self.config.batch_processing.clamped_override() {
            return size;
        }
        match total_records {
            0..=5_000 => 4_000,
            5_001..=20_000 => 6_000,
            20_001..=50_000 => 8_000,
            50_001..=100_000 => 12_000,
            _ => 15_000,
        }
    }

    /// Group record indices by file, then files by similarity signature,
    /// then partition each group into batches
    fn partition(&self, records: &[ParsedRecord], batch_size: usize) -> Vec<Vec<usize>> {
        // file -> indices, in first-seen order
        let mut file_order: Vec<PathBuf> = Vec::new();
        let mut by_file: HashMap<PathBuf, Vec<usize>> = HashMap::new();
        for (idx, record) in records.iter().enumerate() {
            match by_file.entry(record.source_file.clone()) {
                std::collections::hash_map::Entry::Vacant(vacant) => {
                    file_order.push(record.source_file.clone());
                    vacant.insert(vec![idx]);
                }
                std::collections::hash_map::Entry::Occupied(mut occupied) => {
                    occupied.get_mut().push(idx);
                }
            }
        }

        // signature -> file group, in first-seen order
        let mut group_order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
        for file in file_order {
            let indices = by_file.remove(&file).unwrap_or_default();
            let first = indices.first().map(|&i| records[i].original_content.as_str());
            let signature = similarity_signature(&file, first.unwrap_or(""));
            if !groups.contains_key(&signature) {
                group_order.push(signature.clone());
            }
            groups.entry(signature).or_default().extend(indices);
        }

        let mut batches = Vec::new();
        for signature in group_order {
            let indices = groups.remove(&signature).unwrap_or_default();
            for chunk in indices.chunks(batch_size) {
                batches.push(chunk.to_vec());
            }
        }
        batches
    }

    /// Regenerate anonymized templates when any still leaks an
    /// always-anonymize field in plaintext
    fn recohere_anonymized_templates(&mut self, records: &mut [ParsedRecord]) {
        let violating = records.iter().any(|record| {
            record
                .drain3_anonymized
                .as_ref()
                .and_then(MiningSummary::template)
                .is_some_and(|template| self.template_leaks(template))
        });
        if !violating {
            return;
        }

        tracing::warn!("anonymized templates leak always-anonymize fields; re-mining");
        self.anonymized_miner.reset();

        for idx in 0..records.len() {
            if records[idx].original_content.len() > MINING_SIZE_LIMIT {
                continue;
            }
            let anonymized = self.anonymized_message_for(records, idx);
            let mined = self.anonymized_miner.add(&anonymized);
            records[idx].drain3_anonymized = Some(summary(mined));
        }
    }

    /// True when a template carries a plaintext value for an always field
    fn template_leaks(&self, template: &str) -> bool {
        for (regex, placeholder) in &self.coherence_checks {
            for caps in regex.captures_iter(template) {
                let value = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                if value != placeholder && value != crate::miner::PARAM_TOKEN {
                    return true;
                }
            }
        }
        false
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Aggregate cluster statistics for (original, anonymized) miners
    pub fn miner_statistics(&self, top: usize) -> (MinerStatistics, MinerStatistics) {
        (
            self.original_miner.statistics(top),
            self.anonymized_miner.statistics(top),
        )
    }

    /// Serialize both miner states (original, anonymized)
    pub fn save_miner_state(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        Ok((
            self.original_miner.save_state()?,
            self.anonymized_miner.save_state()?,
        ))
    }

    /// Restore both miner states from bytes produced by `save_miner_state`
    pub fn restore_miner_state(&mut self, original: &[u8], anonymized: &[u8]) -> Result<()> {
        self.original_miner.restore_state(original)?;
        self.anonymized_miner.restore_state(anonymized)?;
        Ok(())
    }
}

fn summary(outcome: MiningOutcome) -> MiningSummary {
    MiningSummary::Mined {
        cluster_id: outcome.cluster_id,
        template: outcome.template,
        cluster_size: outcome.cluster_size,
    }
}

/// Truncated-template summary for oversize records
fn truncated_summary(content: &str) -> MiningSummary {
    let prefix: String = content.chars().take(TRUNCATED_TEMPLATE_PREFIX).collect();
    MiningSummary::Mined {
        cluster_id: -1,
        template: format!("{prefix}... [TRUNCATED]"),
        cluster_size: 1,
    }
}

/// Extension plus the first 20 normalized characters of the first record
fn similarity_signature(file: &std::path::Path, first_content: &str) -> String {
    let extension = file
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let normalized: String = first_content
        .chars()
        .take(50)
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();
    let prefix: String = normalized.trim().chars().take(20).collect();

    format!("{extension}_{prefix}")
}
