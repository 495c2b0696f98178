use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sequential id assigned by the graph at node creation. Lower ids are older;
/// identifier tie-breaks resolve toward the lower id.
pub type NodeId = u64;

/// How a conversation ended at a terminal node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalKind {
    /// Agent completed the caller's request (appointment booked, question answered).
    Success,
    /// Agent handed off to a human.
    Transfer,
    /// Agent gave up or hit voicemail.
    Fallback,
}

/// One distinct agent utterance class discovered during exploration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationNode {
    pub id: NodeId,
    /// First observed form of the utterance.
    pub utterance: String,
    /// Canonical form used for identity comparisons.
    pub normalized_utterance: String,
    pub terminal: Option<TerminalKind>,
    /// Shortest known path length from the root.
    pub depth_min: u32,
    pub visit_count: u64,
}

impl ConversationNode {
    pub fn is_terminal(&self) -> bool {
        self.terminal.is_some()
    }
}

/// A labeled transition. Identity is `(from_id, normalized user_response)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEdge {
    pub from_id: NodeId,
    pub to_id: NodeId,
    /// First observed form of the user response that caused this transition.
    pub user_response: String,
    pub observation_count: u64,
}

/// Marker left behind when a non-retryable failure drops an attempted
/// transition. Kept out of the edge set so dedup invariants stay clean.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMarker {
    pub node_id: NodeId,
    pub user_response: String,
    pub reason: String,
}

/// Consistent read-only copy of the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub root_id: Option<NodeId>,
    pub nodes: Vec<ConversationNode>,
    pub edges: Vec<ConversationEdge>,
    pub error_markers: Vec<ErrorMarker>,
}

impl GraphSnapshot {
    pub fn node(&self, id: NodeId) -> Option<&ConversationNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn outgoing(&self, id: NodeId) -> impl Iterator<Item = &ConversationEdge> {
        self.edges.iter().filter(move |e| e.from_id == id)
    }
}

/// Wire form of a node as served by `GET /graph`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDto {
    pub id: NodeId,
    pub utterance: String,
    pub is_terminal: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_kind: Option<TerminalKind>,
    pub depth_min: u32,
    pub visit_count: u64,
}

/// Wire form of an edge as served by `GET /graph`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDto {
    pub from: NodeId,
    pub to: NodeId,
    pub user_response: String,
    pub observation_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphDto {
    pub nodes: Vec<NodeDto>,
    pub edges: Vec<EdgeDto>,
}

impl From<&GraphSnapshot> for GraphDto {
    fn from(snapshot: &GraphSnapshot) -> Self {
        Self {
            nodes: snapshot
                .nodes
                .iter()
                .map(|n| NodeDto {
                    id: n.id,
                    utterance: n.utterance.clone(),
                    is_terminal: n.is_terminal(),
                    terminal_kind: n.terminal,
                    depth_min: n.depth_min,
                    visit_count: n.visit_count,
                })
                .collect(),
            edges: snapshot
                .edges
                .iter()
                .map(|e| EdgeDto {
                    from: e.from_id,
                    to: e.to_id,
                    user_response: e.user_response.clone(),
                    observation_count: e.observation_count,
                })
                .collect(),
        }
    }
}

/// One replayed step of dialogue: what the agent said and what the scripted
/// caller answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathStep {
    pub agent_utterance: String,
    pub user_response: String,
}

/// Inbound `POST /webhook/call-complete` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallCompletedEvent {
    pub call_id: String,
    pub status: CallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_s: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Completed,
    Failed,
    NoAnswer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Agent,
    User,
}

/// One diarized segment of a call recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptTurn {
    /// None when the transcriber could not diarize.
    pub speaker: Option<Speaker>,
    pub text: String,
    pub t_start: f64,
    pub t_end: f64,
}

impl TranscriptTurn {
    pub fn new(speaker: Option<Speaker>, text: impl Into<String>, t_start: f64, t_end: f64) -> Self {
        Self {
            speaker,
            text: text.into(),
            t_start,
            t_end,
        }
    }
}

/// Why a call task failed. Retry policy hangs off the kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    DialFailed { carrier_reject: bool },
    WebhookTimeout,
    RecordingUnavailable,
    TranscriptionFailed,
    LlmParseFailed,
}

impl FailureKind {
    pub fn retryable(&self) -> bool {
        !matches!(
            self,
            FailureKind::DialFailed {
                carrier_reject: true
            }
        )
    }

    /// Retry budget for this kind, given the configured task retry cap.
    /// A missing recording gets a single retry before the task is dropped.
    pub fn retry_limit(&self, task_retry_max: u32) -> u32 {
        match self {
            FailureKind::RecordingUnavailable => 1,
            _ => task_retry_max,
        }
    }

    /// Stable label used for stats keys and log fields.
    pub fn label(&self) -> &'static str {
        match self {
            FailureKind::DialFailed { .. } => "dial_failed",
            FailureKind::WebhookTimeout => "webhook_timeout",
            FailureKind::RecordingUnavailable => "recording_unavailable",
            FailureKind::TranscriptionFailed => "transcription_failed",
            FailureKind::LlmParseFailed => "llm_parse_failed",
        }
    }
}

/// Counters served by `GET /stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub calls_attempted: u64,
    pub calls_succeeded: u64,
    pub calls_failed: u64,
    pub failures_by_kind: BTreeMap<String, u64>,
    pub nodes_added: u64,
    pub edges_added: u64,
    pub terminals_marked: u64,
    pub llm_parse_failures: u64,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_s: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_event_deserializes_minimal_body() {
        let raw = serde_json::json!({
            "call_id": "call-1",
            "status": "no_answer"
        });
        let event: CallCompletedEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event.call_id, "call-1");
        assert_eq!(event.status, CallStatus::NoAnswer);
        assert!(event.recording_url.is_none());
    }

    #[test]
    fn webhook_event_rejects_unknown_status() {
        let raw = serde_json::json!({
            "call_id": "call-1",
            "status": "exploded"
        });
        assert!(serde_json::from_value::<CallCompletedEvent>(raw).is_err());
    }

    #[test]
    fn failure_kind_retry_policy() {
        assert!(FailureKind::WebhookTimeout.retryable());
        assert!(FailureKind::DialFailed {
            carrier_reject: false
        }
        .retryable());
        assert!(!FailureKind::DialFailed {
            carrier_reject: true
        }
        .retryable());
        assert_eq!(FailureKind::RecordingUnavailable.retry_limit(3), 1);
        assert_eq!(FailureKind::WebhookTimeout.retry_limit(3), 3);
    }

    #[test]
    fn graph_dto_mirrors_snapshot() {
        let snapshot = GraphSnapshot {
            root_id: Some(0),
            nodes: vec![ConversationNode {
                id: 0,
                utterance: "Hello, thanks for calling.".into(),
                normalized_utterance: "hello thanks for calling".into(),
                terminal: Some(TerminalKind::Success),
                depth_min: 0,
                visit_count: 2,
            }],
            edges: vec![ConversationEdge {
                from_id: 0,
                to_id: 0,
                user_response: "hello?".into(),
                observation_count: 1,
            }],
            error_markers: vec![],
        };

        let dto = GraphDto::from(&snapshot);
        assert_eq!(dto.nodes.len(), 1);
        assert!(dto.nodes[0].is_terminal);
        assert_eq!(dto.nodes[0].terminal_kind, Some(TerminalKind::Success));
        assert_eq!(dto.edges[0].from, 0);
        assert_eq!(dto.edges[0].to, 0);
    }
}
