//! Depth-limited prefix tree clusterer
//!
//! Nodes live in an arena indexed by small integers; clusters live in a flat
//! vector and leaves hold cluster indices. The first tree level is keyed by
//! token count, so similarity only ever compares equal-length templates.

use super::masking::PARAM_TOKEN;
use ahash::RandomState;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A group of messages sharing one template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Dense id, assigned in insertion order starting at 1
    pub cluster_id: i64,
    pub template_tokens: Vec<String>,
    pub size: u64,
    /// Monotonic match counter value at the last match, for eviction
    last_matched: u64,
}

impl Cluster {
    pub fn template(&self) -> String {
        self.template_tokens.join(" ")
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Node {
    children: HashMap<String, usize, RandomState>,
    /// Cluster slots attached to this leaf
    cluster_slots: Vec<usize>,
}

/// Streaming Drain-style clusterer
#[derive(Debug, Serialize, Deserialize)]
pub struct Drain {
    depth: usize,
    sim_th: f64,
    max_children: usize,
    /// None disables eviction
    max_clusters: Option<usize>,
    nodes: Vec<Node>,
    clusters: Vec<Option<Cluster>>,
    live_clusters: usize,
    match_counter: u64,
}

const ROOT: usize = 0;

impl Drain {
    pub fn new(depth: usize, sim_th: f64, max_children: usize, max_clusters: Option<usize>) -> Self {
        assert!(depth >= 3, "depth must be at least 3");
        Self {
            depth,
            sim_th,
            max_children,
            max_clusters,
            nodes: vec![Node::default()],
            clusters: Vec::new(),
            live_clusters: 0,
            match_counter: 0,
        }
    }

    /// Token levels below the token-count level
    fn max_node_depth(&self) -> usize {
        self.depth - 2
    }

    fn tokenize(content: &str) -> Vec<String> {
        content.split_whitespace().map(str::to_string).collect()
    }

    /// Route a masked message through the tree and return its cluster
    pub fn add_message(&mut self, content: &str) -> &Cluster {
        let tokens = Self::tokenize(content);
        self.match_counter += 1;

        if let Some(slot) = self.search(&tokens) {
            let recency = self.match_counter;
            let cluster = self.clusters[slot]
                .as_mut()
                .expect("matched slot must be live");
            merge_template(&mut cluster.template_tokens, &tokens);
            cluster.size += 1;
            cluster.last_matched = recency;
            return self.clusters[slot].as_ref().unwrap();
        }

        let slot = self.clusters.len();
        let cluster = Cluster {
            cluster_id: (slot + 1) as i64,
            template_tokens: tokens.clone(),
            size: 1,
            last_matched: self.match_counter,
        };
        self.clusters.push(Some(cluster));
        self.live_clusters += 1;

        let leaf = self.insert_path(&tokens);
        if let Some(max) = self.max_clusters {
            if self.live_clusters > max {
                self.evict_at_leaf(leaf, slot);
            }
        }
        self.nodes[leaf].cluster_slots.push(slot);

        self.clusters[slot].as_ref().unwrap()
    }

    /// Find the leaf for a token sequence and the best matching cluster slot
    fn search(&self, tokens: &[String]) -> Option<usize> {
        let leaf = self.find_leaf(tokens)?;
        self.best_match(&self.nodes[leaf].cluster_slots, tokens)
    }

    fn find_leaf(&self, tokens: &[String]) -> Option<usize> {
        let count_key = tokens.len().to_string();
        let mut current = *self.nodes[ROOT].children.get(&count_key)?;

        if tokens.is_empty() {
            return Some(current);
        }

        let mut level = 1;
        for token in tokens {
            if level >= self.max_node_depth() || level == tokens.len() {
                break;
            }
            let node = &self.nodes[current];
            if let Some(&child) = node.children.get(token) {
                current = child;
            } else if let Some(&child) = node.children.get(PARAM_TOKEN) {
                current = child;
            } else {
                return None;
            }
            level += 1;
        }
        Some(current)
    }

    /// Best candidate by similarity, ties broken by wildcard count
    fn best_match(&self, slots: &[usize], tokens: &[String]) -> Option<usize> {
        let mut best: Option<(f64, i64, usize)> = None;

        for &slot in slots {
            let Some(cluster) = self.clusters.get(slot).and_then(Option::as_ref) else {
                continue;
            };
            let (sim, params) = sequence_distance(&cluster.template_tokens, tokens);
            if best.map_or(true, |(s, p, _)| sim > s || (sim == s && params > p)) {
                best = Some((sim, params, slot));
            }
        }

        match best {
            Some((sim, _, slot)) if sim >= self.sim_th => Some(slot),
            _ => None,
        }
    }

    /// Create (or follow) the path for a new cluster's tokens, returning the leaf
    fn insert_path(&mut self, tokens: &[String]) -> usize {
        let count_key = tokens.len().to_string();
        let mut current = self.child_or_new(ROOT, &count_key);

        if tokens.is_empty() {
            return current;
        }

        let mut level = 1;
        for token in tokens {
            if level >= self.max_node_depth() || level == tokens.len() {
                break;
            }

            if self.nodes[current].children.contains_key(token) {
                current = self.nodes[current].children[token];
            } else if token_has_digits(token) {
                // Numeric-looking tokens route through the wildcard branch
                current = self.child_or_new(current, PARAM_TOKEN);
            } else if self.nodes[current].children.contains_key(PARAM_TOKEN) {
                if self.nodes[current].children.len() < self.max_children {
                    current = self.child_or_new(current, token);
                } else {
                    current = self.nodes[current].children[PARAM_TOKEN];
                }
            } else if self.nodes[current].children.len() + 1 < self.max_children {
                current = self.child_or_new(current, token);
            } else {
                // Saturated: the last slot becomes the wildcard branch
                current = self.child_or_new(current, PARAM_TOKEN);
            }

            level += 1;
        }
        current
    }

    fn child_or_new(&mut self, parent: usize, key: &str) -> usize {
        if let Some(&child) = self.nodes[parent].children.get(key) {
            return child;
        }
        let child = self.nodes.len();
        self.nodes.push(Node::default());
        self.nodes[parent].children.insert(key.to_string(), child);
        child
    }

    /// Drop the least-recently-matched cluster at a leaf
    fn evict_at_leaf(&mut self, leaf: usize, keep_slot: usize) {
        let victim = self.nodes[leaf]
            .cluster_slots
            .iter()
            .copied()
            .filter(|&s| s != keep_slot)
            .filter_map(|s| {
                self.clusters[s]
                    .as_ref()
                    .map(|c| (c.last_matched, s))
            })
            .min();

        if let Some((_, slot)) = victim {
            let evicted = self.clusters[slot].take();
            self.nodes[leaf].cluster_slots.retain(|&s| s != slot);
            self.live_clusters -= 1;
            if let Some(cluster) = evicted {
                tracing::debug!(
                    "evicted cluster {} ({} messages)",
                    cluster.cluster_id,
                    cluster.size
                );
            }
        }
    }

    /// Live clusters in insertion order
    pub fn clusters(&self) -> impl Iterator<Item = &Cluster> {
        self.clusters.iter().filter_map(Option::as_ref)
    }

    pub fn cluster_count(&self) -> usize {
        self.live_clusters
    }

    pub fn get_cluster(&self, cluster_id: i64) -> Option<&Cluster> {
        if cluster_id < 1 {
            return None;
        }
        self.clusters
            .get((cluster_id - 1) as usize)
            .and_then(Option::as_ref)
    }
}

fn token_has_digits(token: &str) -> bool {
    token.chars().any(|c| c.is_ascii_digit())
}

/// (similarity, wildcard count) between a template and a token sequence
fn sequence_distance(template: &[String], tokens: &[String]) -> (f64, i64) {
    if template.len() != tokens.len() {
        return (0.0, 0);
    }
    if template.is_empty() {
        return (1.0, 0);
    }

    let mut equal = 0usize;
    let mut params = 0i64;
    for (t, token) in template.iter().zip(tokens) {
        if t == PARAM_TOKEN {
            params += 1;
        } else if t == token {
            equal += 1;
        }
    }
    (equal as f64 / template.len() as f64, params)
}

/// Wildcard every position where the new tokens differ from the template
fn merge_template(template: &mut [String], tokens: &[String]) {
    for (t, token) in template.iter_mut().zip(tokens) {
        if t != token && t != PARAM_TOKEN {
            *t = PARAM_TOKEN.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_drain() -> Drain {
        Drain::new(4, 0.4, 100, None)
    }

    #[test]
    fn test_identical_messages_share_cluster() {
        let mut drain = small_drain();
        let a = drain.add_message("connection from host alpha").cluster_id;
        let b = drain.add_message("connection from host alpha").cluster_id;
        assert_eq!(a, b);
        assert_eq!(drain.get_cluster(a).unwrap().size, 2);
    }

    #[test]
    fn test_similar_messages_merge_with_wildcard() {
        let mut drain = small_drain();
        drain.add_message("connection from host alpha");
        let cluster = drain.add_message("connection from host beta");
        assert_eq!(cluster.template(), "connection from host <*>");
        assert_eq!(cluster.size, 2);
    }

    #[test]
    fn test_different_lengths_never_merge() {
        let mut drain = small_drain();
        let a = drain.add_message("one two three").cluster_id;
        let b = drain.add_message("one two three four").cluster_id;
        assert_ne!(a, b);
    }

    #[test]
    fn test_ids_assigned_in_insertion_order() {
        let mut drain = small_drain();
        assert_eq!(drain.add_message("alpha path x").cluster_id, 1);
        assert_eq!(drain.add_message("totally different stanza here").cluster_id, 2);
        assert_eq!(drain.add_message("third shape of line").cluster_id, 3);
    }

    #[test]
    fn test_dissimilar_same_length_split() {
        let mut drain = Drain::new(4, 0.9, 100, None);
        let a = drain.add_message("alpha beta gamma delta").cluster_id;
        let b = drain.add_message("alpha beta other thing").cluster_id;
        assert_ne!(a, b, "0.5 similarity must not merge at threshold 0.9");
    }

    #[test]
    fn test_numeric_tokens_route_through_wildcard() {
        let mut drain = small_drain();
        let a = drain.add_message("worker 17 started fine").cluster_id;
        let b = drain.add_message("worker 99 started fine").cluster_id;
        assert_eq!(a, b);
        assert_eq!(
            drain.get_cluster(a).unwrap().template(),
            "worker <*> started fine"
        );
    }

    #[test]
    fn test_max_children_saturation_uses_wildcard() {
        let mut drain = Drain::new(4, 0.0, 2, None);
        // One literal child fits, the second arrival claims the wildcard
        // branch; later words all route through it and sim_th 0 merges them.
        for word in ["aa", "bb", "cc", "dd"] {
            drain.add_message(&format!("{word} middle suffix tail"));
        }
        assert_eq!(drain.cluster_count(), 2);
    }

    #[test]
    fn test_eviction_least_recently_matched() {
        let mut drain = Drain::new(4, 1.0, 100, Some(2));
        // sim_th 1.0: every distinct message becomes its own cluster, all in
        // the same leaf (same token count, same first tokens).
        drain.add_message("job aa finished ok");
        drain.add_message("job bb finished ok");
        drain.add_message("job aa finished ok"); // refresh cluster 1
        drain.add_message("job cc finished ok"); // evicts cluster 2
        assert_eq!(drain.cluster_count(), 2);
        assert!(drain.get_cluster(1).is_some());
        assert!(drain.get_cluster(2).is_none());
        assert!(drain.get_cluster(3).is_some());
    }

    #[test]
    fn test_sequence_distance() {
        let template = vec!["a".to_string(), PARAM_TOKEN.to_string(), "c".to_string()];
        let tokens = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let (sim, params) = sequence_distance(&template, &tokens);
        assert!((sim - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(params, 1);
    }

    #[test]
    fn test_determinism() {
        let inputs = [
            "src=10.0.0.1 msg=ok",
            "src=10.0.0.2 msg=ok",
            "error code 500 from upstream",
            "src=10.0.0.3 msg=ok",
            "error code 404 from upstream",
        ];
        let run = || {
            let mut drain = small_drain();
            inputs
                .iter()
                .map(|m| {
                    let c = drain.add_message(m);
                    (c.cluster_id, c.template(), c.size)
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }
}
