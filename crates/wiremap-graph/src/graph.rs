//! Thread-safe store of discovered nodes and edges.

use std::collections::{BTreeMap, VecDeque};

use tokio::sync::RwLock;
use wiremap_schema::{
    ConversationEdge, ConversationNode, ErrorMarker, GraphSnapshot, NodeId, PathStep, TerminalKind,
};

use crate::identify::NodeIdentifier;
use crate::normalize::normalize;

pub const DEFAULT_BREADTH_CAP: usize = 8;

/// The conversation graph. All mutation serializes through one writer lock;
/// readers take whole-graph snapshots.
pub struct ConversationGraph {
    identifier: NodeIdentifier,
    breadth_cap: usize,
    inner: RwLock<GraphInner>,
}

#[derive(Default)]
struct GraphInner {
    nodes: Vec<ConversationNode>,
    /// Keyed by `(from_id, normalized user response)`. BTreeMap keeps
    /// iteration deterministic for snapshots and path reconstruction.
    edges: BTreeMap<(NodeId, String), ConversationEdge>,
    root_id: Option<NodeId>,
    error_markers: Vec<ErrorMarker>,
}

impl GraphInner {
    fn out_degree(&self, id: NodeId) -> usize {
        self.edges
            .range((id, String::new())..(id + 1, String::new()))
            .count()
    }
}

impl ConversationGraph {
    pub fn new(identifier: NodeIdentifier, breadth_cap: usize) -> Self {
        Self {
            identifier,
            breadth_cap,
            inner: RwLock::new(GraphInner::default()),
        }
    }

    pub fn identifier(&self) -> &NodeIdentifier {
        &self.identifier
    }

    /// Atomic find-or-insert. Holds the write lock across match and insert so
    /// concurrent workers observing the same utterance converge on one node.
    pub async fn get_or_create_node(&self, utterance: &str, depth_hint: u32) -> (NodeId, bool) {
        let mut inner = self.inner.write().await;
        self.find_or_insert(&mut inner, utterance, depth_hint)
    }

    fn find_or_insert(
        &self,
        inner: &mut GraphInner,
        utterance: &str,
        depth_hint: u32,
    ) -> (NodeId, bool) {
        let normalized = normalize(utterance);
        if let Some(id) = self.identifier.find_match(inner.nodes.iter(), &normalized) {
            let node = &mut inner.nodes[id as usize];
            node.visit_count += 1;
            node.depth_min = node.depth_min.min(depth_hint);
            return (id, false);
        }

        let id = inner.nodes.len() as NodeId;
        inner.nodes.push(ConversationNode {
            id,
            utterance: utterance.to_string(),
            normalized_utterance: normalized,
            terminal: None,
            depth_min: depth_hint,
            visit_count: 1,
        });
        if inner.root_id.is_none() {
            inner.root_id = Some(id);
        }
        tracing::debug!(node_id = id, "created graph node");
        (id, true)
    }

    /// Record the first agent turn of a call. With a canonical root every
    /// opening maps onto the existing root; with variant greetings allowed it
    /// behaves like [`Self::get_or_create_node`].
    pub async fn observe_root(&self, utterance: &str, allow_variants: bool) -> (NodeId, bool) {
        let mut inner = self.inner.write().await;
        if !allow_variants {
            if let Some(root) = inner.root_id {
                inner.nodes[root as usize].visit_count += 1;
                return (root, false);
            }
        }
        self.find_or_insert(&mut inner, utterance, 0)
    }

    /// Insert or re-observe an edge. Returns true when a new edge was created.
    ///
    /// Panics if either endpoint does not exist: edges are only added for node
    /// ids just returned by `get_or_create_node`, so a dangling reference is a
    /// bug, not input noise.
    pub async fn add_edge(&self, from_id: NodeId, user_response: &str, to_id: NodeId) -> bool {
        let mut inner = self.inner.write().await;
        assert!(
            (from_id as usize) < inner.nodes.len() && (to_id as usize) < inner.nodes.len(),
            "edge references unknown node ({from_id} -> {to_id})"
        );

        let key = (from_id, normalize(user_response));
        if let Some(edge) = inner.edges.get_mut(&key) {
            edge.observation_count += 1;
            return false;
        }

        let depth_via_from = inner.nodes[from_id as usize].depth_min.saturating_add(1);
        let to = &mut inner.nodes[to_id as usize];
        to.depth_min = to.depth_min.min(depth_via_from);

        inner.edges.insert(
            key,
            ConversationEdge {
                from_id,
                to_id,
                user_response: user_response.to_string(),
                observation_count: 1,
            },
        );
        true
    }

    pub async fn mark_terminal(&self, id: NodeId, kind: TerminalKind) {
        let mut inner = self.inner.write().await;
        if let Some(node) = inner.nodes.get_mut(id as usize) {
            node.terminal = Some(kind);
        }
    }

    /// Record a dropped transition after a non-retryable failure.
    pub async fn record_error_marker(&self, node_id: NodeId, user_response: &str, reason: &str) {
        let mut inner = self.inner.write().await;
        inner.error_markers.push(ErrorMarker {
            node_id,
            user_response: user_response.to_string(),
            reason: reason.to_string(),
        });
    }

    pub async fn node(&self, id: NodeId) -> Option<ConversationNode> {
        self.inner.read().await.nodes.get(id as usize).cloned()
    }

    pub async fn root_id(&self) -> Option<NodeId> {
        self.inner.read().await.root_id
    }

    /// Normalized user responses already recorded on outgoing edges of `id`.
    pub async fn outgoing_responses(&self, id: NodeId) -> Vec<String> {
        let inner = self.inner.read().await;
        inner
            .edges
            .range((id, String::new())..(id + 1, String::new()))
            .map(|((_, response), _)| response.clone())
            .collect()
    }

    /// Non-terminal nodes with spare branching budget, shallowest first.
    pub async fn frontier_candidates(&self, limit: usize) -> Vec<NodeId> {
        let inner = self.inner.read().await;
        let mut candidates: Vec<&ConversationNode> = inner
            .nodes
            .iter()
            .filter(|n| !n.is_terminal() && inner.out_degree(n.id) < self.breadth_cap)
            .collect();
        candidates.sort_by_key(|n| (n.depth_min, n.id));
        candidates.into_iter().take(limit).map(|n| n.id).collect()
    }

    /// Shortest path of `(agent utterance, user response)` steps from the root
    /// to `target`, excluding the target's own utterance. Deterministic: BFS
    /// visits edges in key order.
    pub async fn script_path(&self, target: NodeId) -> Vec<PathStep> {
        let inner = self.inner.read().await;
        let Some(root) = inner.root_id else {
            return Vec::new();
        };
        if root == target {
            return Vec::new();
        }

        let mut prev: BTreeMap<NodeId, (NodeId, String)> = BTreeMap::new();
        let mut queue = VecDeque::from([root]);
        while let Some(current) = queue.pop_front() {
            if current == target {
                break;
            }
            for ((_, _), edge) in inner
                .edges
                .range((current, String::new())..(current + 1, String::new()))
            {
                if edge.to_id != root && !prev.contains_key(&edge.to_id) {
                    prev.insert(edge.to_id, (current, edge.user_response.clone()));
                    queue.push_back(edge.to_id);
                }
            }
        }

        let mut steps = Vec::new();
        let mut cursor = target;
        while cursor != root {
            let Some((parent, response)) = prev.get(&cursor) else {
                // Unreachable target: caller raced a snapshot. Empty path keeps
                // the worker on a cold call rather than panicking.
                return Vec::new();
            };
            steps.push(PathStep {
                agent_utterance: inner.nodes[*parent as usize].utterance.clone(),
                user_response: response.clone(),
            });
            cursor = *parent;
        }
        steps.reverse();
        steps
    }

    pub async fn snapshot(&self) -> GraphSnapshot {
        let inner = self.inner.read().await;
        GraphSnapshot {
            root_id: inner.root_id,
            nodes: inner.nodes.clone(),
            edges: inner.edges.values().cloned().collect(),
            error_markers: inner.error_markers.clone(),
        }
    }

    pub async fn counts(&self) -> (usize, usize) {
        let inner = self.inner.read().await;
        (inner.nodes.len(), inner.edges.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> ConversationGraph {
        ConversationGraph::new(NodeIdentifier::default(), DEFAULT_BREADTH_CAP)
    }

    #[tokio::test]
    async fn first_node_becomes_root() {
        let g = graph();
        let (id, created) = g.get_or_create_node("Welcome to Acme!", 0).await;
        assert!(created);
        assert_eq!(g.root_id().await, Some(id));
    }

    #[tokio::test]
    async fn noisy_duplicate_collapses_to_one_node() {
        let g = graph();
        let (a, _) = g.get_or_create_node("Please say your account number.", 1).await;
        let (b, created) = g
            .get_or_create_node("please say your account number", 1)
            .await;
        assert_eq!(a, b);
        assert!(!created);
        assert_eq!(g.node(a).await.unwrap().visit_count, 2);
    }

    #[tokio::test]
    async fn duplicate_edge_increments_observation_count() {
        let g = graph();
        let (root, _) = g.get_or_create_node("menu", 0).await;
        let (child, _) = g.get_or_create_node("sales hours are nine to five", 1).await;
        assert!(g.add_edge(root, "Press 1", child).await);
        assert!(!g.add_edge(root, "press one", child).await);

        let snapshot = g.snapshot().await;
        assert_eq!(snapshot.edges.len(), 1);
        assert_eq!(snapshot.edges[0].observation_count, 2);
    }

    #[tokio::test]
    async fn depth_min_tracks_shortest_discovery() {
        let g = graph();
        let (root, _) = g.get_or_create_node("greeting", 0).await;
        let (deep, _) = g.get_or_create_node("shared state", 5).await;
        g.add_edge(root, "shortcut", deep).await;
        assert_eq!(g.node(deep).await.unwrap().depth_min, 1);
    }

    #[tokio::test]
    async fn terminal_nodes_leave_frontier() {
        let g = graph();
        let (root, _) = g.get_or_create_node("greeting", 0).await;
        let (done, _) = g.get_or_create_node("goodbye", 1).await;
        g.add_edge(root, "bye", done).await;
        g.mark_terminal(done, TerminalKind::Success).await;

        let frontier = g.frontier_candidates(10).await;
        assert!(frontier.contains(&root));
        assert!(!frontier.contains(&done));
    }

    #[tokio::test]
    async fn script_path_replays_shortest_route() {
        let g = graph();
        let (root, _) = g.get_or_create_node("welcome how can i help", 0).await;
        let (menu, _) = g.get_or_create_node("sales or support", 1).await;
        let (sales, _) = g.get_or_create_node("connecting you to sales now", 2).await;
        g.add_edge(root, "I need something", menu).await;
        g.add_edge(menu, "sales", sales).await;

        let path = g.script_path(sales).await;
        assert_eq!(path.len(), 2);
        assert_eq!(path[0].agent_utterance, "welcome how can i help");
        assert_eq!(path[0].user_response, "I need something");
        assert_eq!(path[1].user_response, "sales");
    }

    #[tokio::test]
    async fn cycle_does_not_break_path_or_duplicate_edges() {
        let g = graph();
        let (menu, _) = g.get_or_create_node("main menu sales or support", 0).await;
        let (error, _) = g.get_or_create_node("invalid choice try again", 1).await;
        assert!(g.add_edge(menu, "banana", error).await);
        assert!(g.add_edge(error, "anything", menu).await);
        assert!(!g.add_edge(error, "anything", menu).await);

        let snapshot = g.snapshot().await;
        assert_eq!(snapshot.nodes.len(), 2);
        assert_eq!(snapshot.edges.len(), 2);

        let path = g.script_path(error).await;
        assert_eq!(path.len(), 1);
    }

    #[tokio::test]
    async fn observe_root_with_canonical_greeting_always_maps_to_root() {
        let g = graph();
        let (root, created) = g.observe_root("Thanks for calling Acme", false).await;
        assert!(created);
        let (again, created) = g
            .observe_root("Completely different opening line", false)
            .await;
        assert_eq!(root, again);
        assert!(!created);
    }
}
