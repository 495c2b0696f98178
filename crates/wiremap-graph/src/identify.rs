//! Fuzzy node identity: does a new utterance match an existing node?

use wiremap_schema::{ConversationNode, NodeId};

use crate::similarity;

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.85;

/// Decides whether an utterance belongs to an existing node.
#[derive(Debug, Clone, Copy)]
pub struct NodeIdentifier {
    threshold: f64,
}

impl Default for NodeIdentifier {
    fn default() -> Self {
        Self::new(DEFAULT_SIMILARITY_THRESHOLD)
    }
}

impl NodeIdentifier {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Return the best-matching node at or above the threshold, preferring the
    /// lower node id on score ties. `normalized` must already be normalized.
    ///
    /// Callers that intend to insert on a miss must hold the graph write lock
    /// across the lookup and the insert.
    pub fn find_match<'a, I>(&self, candidates: I, normalized: &str) -> Option<NodeId>
    where
        I: IntoIterator<Item = &'a ConversationNode>,
    {
        let mut best: Option<(f64, NodeId)> = None;
        for node in candidates {
            // Cheap length-based bound prunes most non-matches.
            if similarity::score_upper_bound(&node.normalized_utterance, normalized)
                < self.threshold
            {
                continue;
            }
            let s = similarity::score(&node.normalized_utterance, normalized);
            if s < self.threshold {
                continue;
            }
            let better = match best {
                None => true,
                Some((best_score, best_id)) => {
                    s > best_score || (s == best_score && node.id < best_id)
                }
            };
            if better {
                best = Some((s, node.id));
            }
        }
        best.map(|(_, id)| id)
    }
}
