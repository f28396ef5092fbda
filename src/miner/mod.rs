//! Streaming template miner
//!
//! A Drain-style clusterer: messages are masked, tokenized and routed
//! through a depth-limited prefix tree; similar messages merge into clusters
//! whose templates carry the `<*>` wildcard at variable positions. The
//! pipeline owns two independent instances, one over original content and
//! one over the anonymized projection.

mod drain;
mod masking;
mod persistence;

pub use drain::{Cluster, Drain};
pub use masking::{LogMasker, PARAM_TOKEN};
pub use persistence::{FilePersistence, PersistenceHandler};

use crate::config::MinerConfig;
use crate::error::{LogweaveError, Result};
use regex::Regex;
use serde::Serialize;

/// Per-message mining result
#[derive(Debug, Clone, PartialEq)]
pub struct MiningOutcome {
    pub cluster_id: i64,
    pub template: String,
    pub cluster_size: u64,
}

/// Aggregate view over one miner instance
#[derive(Debug, Clone, Serialize)]
pub struct MinerStatistics {
    pub total_clusters: usize,
    pub total_messages: u64,
    pub top_templates: Vec<TemplateStat>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateStat {
    pub cluster_id: i64,
    pub template: String,
    pub size: u64,
}

/// Masking plus clustering over one message stream
pub struct TemplateMiner {
    masker: LogMasker,
    drain: Drain,
    config: MinerConfig,
}

impl TemplateMiner {
    pub fn new(config: MinerConfig) -> Self {
        let max_clusters = if config.unbounded_clusters() {
            None
        } else {
            Some(config.max_clusters)
        };
        Self {
            masker: LogMasker::default(),
            drain: Drain::new(
                config.depth,
                config.similarity_threshold,
                config.max_children,
                max_clusters,
            ),
            config,
        }
    }

    /// Mask and cluster one message
    pub fn add(&mut self, message: &str) -> MiningOutcome {
        let masked = self.masker.mask(message);
        let cluster = self.drain.add_message(&masked);
        MiningOutcome {
            cluster_id: cluster.cluster_id,
            template: cluster.template(),
            cluster_size: cluster.size,
        }
    }

    /// Discard all clusters and tree state, keeping the configuration
    pub fn reset(&mut self) {
        let max_clusters = if self.config.unbounded_clusters() {
            None
        } else {
            Some(self.config.max_clusters)
        };
        self.drain = Drain::new(
            self.config.depth,
            self.config.similarity_threshold,
            self.config.max_children,
            max_clusters,
        );
    }

    pub fn clusters(&self) -> impl Iterator<Item = &Cluster> {
        self.drain.clusters()
    }

    pub fn cluster_count(&self) -> usize {
        self.drain.cluster_count()
    }

    pub fn get_cluster(&self, cluster_id: i64) -> Option<&Cluster> {
        self.drain.get_cluster(cluster_id)
    }

    /// Serialize the tree and cluster map to an opaque byte stream
    pub fn save_state(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.drain).map_err(|e| LogweaveError::Json {
            source: e,
            context: "Failed to serialize miner state".to_string(),
        })
    }

    /// Restore a miner from bytes produced by `save_state`
    pub fn restore_state(&mut self, state: &[u8]) -> Result<()> {
        self.drain = serde_json::from_slice(state).map_err(|e| LogweaveError::MinerState(
            format!("Failed to restore miner state: {e}"),
        ))?;
        Ok(())
    }

    /// Cluster counts and the most frequent templates
    pub fn statistics(&self, top: usize) -> MinerStatistics {
        let mut stats: Vec<TemplateStat> = self
            .clusters()
            .map(|c| TemplateStat {
                cluster_id: c.cluster_id,
                template: c.template(),
                size: c.size,
            })
            .collect();
        let total_messages = stats.iter().map(|s| s.size).sum();
        let total_clusters = stats.len();

        stats.sort_by(|a, b| b.size.cmp(&a.size).then(a.cluster_id.cmp(&b.cluster_id)));
        stats.truncate(top);

        MinerStatistics {
            total_clusters,
            total_messages,
            top_templates: stats,
        }
    }

    /// Persist through a handler (file-backed in production)
    pub fn persist(&self, handler: &mut dyn PersistenceHandler) -> Result<()> {
        handler.save_state(&self.save_state()?)
    }

    /// Load state through a handler if a snapshot exists
    pub fn load(&mut self, handler: &mut dyn PersistenceHandler) -> Result<bool> {
        match handler.load_state()? {
            Some(state) => {
                self.restore_state(&state)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Extract the values a message carries at a template's `<*>` positions
///
/// The template is turned into an anchored regex with one lazy group per
/// wildcard; a message that does not fit the template yields no parameters.
pub fn extract_parameters(template: &str, message: &str) -> Vec<String> {
    let escaped_wildcard = regex::escape(PARAM_TOKEN);
    let source = format!(
        "^{}$",
        regex::escape(template).replace(&escaped_wildcard, "(.+?)")
    );
    let Ok(regex) = Regex::new(&source) else {
        return Vec::new();
    };
    let Some(caps) = regex.captures(message) else {
        return Vec::new();
    };
    caps.iter()
        .skip(1)
        .flatten()
        .map(|m| m.as_str().trim().to_string())
        .collect()
}
