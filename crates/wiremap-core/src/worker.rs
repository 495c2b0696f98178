//! One exploration step: place the scripted call, await the webhook,
//! transcribe the recording, walk agent turns into the graph, then ask the
//! model for the next responses to try.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tokio::sync::{broadcast, Mutex};
use wiremap_graph::{normalize, score, ConversationGraph};
use wiremap_llm::{parse_expansion, LlmClient, LlmOptions, PromptContextualizer};
use wiremap_schema::{CallStatus, FailureKind, Speaker, TerminalKind};
use wiremap_voice::{assign_roles, Transcriber, VoiceClient};

use crate::config::ExplorerConfig;
use crate::correlator::WebhookCorrelator;
use crate::frontier::{Frontier, FrontierEntry};
use crate::progress::ProgressTracker;

/// Shared dependency bundle passed into every worker. Built once at startup,
/// torn down in reverse order at shutdown.
pub struct WorkerContext {
    pub config: ExplorerConfig,
    pub graph: Arc<ConversationGraph>,
    pub frontier: Arc<Frontier>,
    pub correlator: Arc<WebhookCorrelator>,
    pub progress: Arc<ProgressTracker>,
    pub voice: Arc<dyn VoiceClient>,
    pub transcriber: Arc<dyn Transcriber>,
    pub llm: Arc<dyn LlmClient>,
    pub contextualizer: PromptContextualizer,
    /// Seeded once per run; orders candidate enqueueing reproducibly.
    pub rng: Mutex<StdRng>,
}

#[derive(Debug)]
pub enum TaskOutcome {
    Completed {
        terminal: bool,
        new_nodes: u64,
        new_edges: u64,
        enqueued: usize,
    },
    Failed {
        kind: FailureKind,
        new_nodes: u64,
        new_edges: u64,
    },
    Cancelled,
}

#[derive(Debug)]
pub struct TaskResult {
    pub entry: FrontierEntry,
    pub outcome: TaskOutcome,
}

pub struct ConversationWorker {
    ctx: Arc<WorkerContext>,
}

impl ConversationWorker {
    pub fn new(ctx: Arc<WorkerContext>) -> Self {
        Self { ctx }
    }

    pub async fn run(
        &self,
        entry: FrontierEntry,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> TaskResult {
        let outcome = self.run_inner(&entry, shutdown).await;
        match &outcome {
            TaskOutcome::Completed {
                new_nodes,
                new_edges,
                enqueued,
                ..
            } => {
                tracing::info!(
                    node = ?entry.node_id,
                    new_nodes,
                    new_edges,
                    enqueued,
                    "task done"
                );
                self.ctx.progress.call_completed(new_nodes + new_edges);
            }
            TaskOutcome::Failed {
                kind,
                new_nodes,
                new_edges,
            } => {
                tracing::warn!(node = ?entry.node_id, kind = kind.label(), "task failed");
                self.ctx.progress.call_failed(kind, new_nodes + new_edges);
            }
            TaskOutcome::Cancelled => {
                tracing::debug!(node = ?entry.node_id, "task cancelled");
            }
        }
        TaskResult { entry, outcome }
    }

    async fn run_inner(
        &self,
        entry: &FrontierEntry,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> TaskOutcome {
        let ctx = &self.ctx;
        let config = &ctx.config;

        // Replay the shortest path to the node, then the response under test.
        let path = match entry.node_id {
            Some(id) => ctx.graph.script_path(id).await,
            None => Vec::new(),
        };
        let script = ctx.contextualizer.caller_script(&path, &entry.user_response);

        tracing::debug!(phase = "dialing", lines = script.len(), "placing call");
        let call_id = match ctx
            .voice
            .place_call(&script, &config.target_phone_number)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(error = %e, "dial failed");
                return failed(
                    FailureKind::DialFailed {
                        carrier_reject: is_carrier_reject(&e.to_string()),
                    },
                    0,
                    0,
                );
            }
        };

        // The provider can fire the webhook before registration lands; the
        // correlator's late-arrival buffer covers that race.
        let rx = ctx.correlator.register(&call_id).await;
        tracing::debug!(phase = "awaiting_webhook", %call_id, "call placed");
        let event = tokio::select! {
            ev = rx => match ev {
                Ok(ev) => ev,
                Err(_) => {
                    ctx.correlator.unregister(&call_id).await;
                    return failed(FailureKind::WebhookTimeout, 0, 0);
                }
            },
            _ = tokio::time::sleep(config.call_timeout) => {
                ctx.correlator.unregister(&call_id).await;
                return failed(FailureKind::WebhookTimeout, 0, 0);
            }
            _ = shutdown.recv() => {
                ctx.correlator.unregister(&call_id).await;
                return TaskOutcome::Cancelled;
            }
        };

        match event.status {
            CallStatus::Completed => {}
            CallStatus::Failed => {
                let carrier_reject = event.error.as_deref().map_or(false, is_carrier_reject);
                return failed(FailureKind::DialFailed { carrier_reject }, 0, 0);
            }
            CallStatus::NoAnswer => {
                return failed(
                    FailureKind::DialFailed {
                        carrier_reject: false,
                    },
                    0,
                    0,
                )
            }
        }

        let Some(recording_url) = event.recording_url else {
            return failed(FailureKind::RecordingUnavailable, 0, 0);
        };

        tracing::debug!(phase = "transcribing", %call_id, "downloading recording");
        let audio = tokio::select! {
            out = ctx.voice.fetch_recording(&recording_url) => match out {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(error = %e, "recording unavailable");
                    return failed(FailureKind::RecordingUnavailable, 0, 0);
                }
            },
            _ = shutdown.recv() => return TaskOutcome::Cancelled,
        };

        let turns = tokio::select! {
            out = ctx.transcriber.transcribe(&audio, "wav") => match out {
                Ok(turns) => turns,
                Err(e) => {
                    tracing::warn!(error = %e, "transcription failed");
                    return failed(FailureKind::TranscriptionFailed, 0, 0);
                }
            },
            _ = shutdown.recv() => return TaskOutcome::Cancelled,
        };

        let turns = assign_roles(turns, &script, config.similarity_threshold);
        let agent_turns: Vec<String> = turns
            .iter()
            .filter(|t| t.speaker == Some(Speaker::Agent))
            .map(|t| t.text.clone())
            .collect();
        if agent_turns.is_empty() {
            return failed(FailureKind::TranscriptionFailed, 0, 0);
        }

        // Walk agent turns into the graph. Turn i was reached by script line
        // i-1; the last transition is labeled by the response under test.
        tracing::debug!(phase = "integrating", %call_id, turns = agent_turns.len(), "walking transcript");
        let (mut current, root_created) = ctx
            .graph
            .observe_root(&agent_turns[0], config.allow_variant_greetings)
            .await;
        let mut new_nodes = u64::from(root_created);
        let mut new_edges = 0u64;
        for (i, turn) in agent_turns.iter().enumerate().skip(1) {
            let Some(prev_user) = script.get(i - 1) else {
                // Agent kept talking past the scripted lines; no user line
                // labels the transition.
                break;
            };
            let (next, created) = ctx.graph.get_or_create_node(turn, i as u32).await;
            new_nodes += u64::from(created);
            if ctx.graph.add_edge(current, prev_user, next).await {
                new_edges += 1;
            }
            current = next;
        }
        ctx.progress.discovery(new_nodes, new_edges);

        let node = ctx
            .graph
            .node(current)
            .await
            .expect("integrated node exists");
        if node.is_terminal() {
            // Another path already classified this state; nothing to expand.
            return TaskOutcome::Completed {
                terminal: true,
                new_nodes,
                new_edges,
                enqueued: 0,
            };
        }

        // Ask the model what to try next from here.
        let expansion_path = ctx.graph.script_path(current).await;
        let explored = ctx.graph.outgoing_responses(current).await;
        let options = LlmOptions::default();
        let mut expansion = None;
        for attempt in 0..=config.llm_retry_max {
            let prompt = if attempt == 0 {
                ctx.contextualizer
                    .expansion_prompt(&expansion_path, &node.utterance, &explored)
            } else {
                ctx.contextualizer
                    .strict_reprompt(&expansion_path, &node.utterance, &explored)
            };
            let raw = tokio::select! {
                out = ctx.llm.complete(&prompt, &options) => match out {
                    Ok(raw) => raw,
                    Err(e) => {
                        tracing::warn!(error = %e, attempt, "model request failed");
                        continue;
                    }
                },
                _ = shutdown.recv() => return TaskOutcome::Cancelled,
            };
            match parse_expansion(&raw) {
                Ok(parsed) => {
                    expansion = Some(parsed);
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "unparseable expansion");
                    ctx.progress.llm_parse_failure();
                }
            }
        }
        let Some(expansion) = expansion else {
            // Node stays un-expanded; the frontier may revisit it later.
            return failed(FailureKind::LlmParseFailed, new_nodes, new_edges);
        };

        if expansion.is_terminal {
            ctx.graph
                .mark_terminal(
                    current,
                    expansion.terminal_kind.unwrap_or(TerminalKind::Success),
                )
                .await;
            ctx.progress.terminal_marked();
            return TaskOutcome::Completed {
                terminal: true,
                new_nodes,
                new_edges,
                enqueued: 0,
            };
        }

        let mut candidates = expansion.candidates;
        {
            let mut rng = ctx.rng.lock().await;
            candidates.shuffle(&mut *rng);
        }
        // Stay under the per-node branching budget, counting edges already
        // observed from this node.
        let branch_budget = config.breadth_cap.saturating_sub(explored.len());
        let mut seen = explored;
        let mut enqueued = 0;
        for candidate in candidates {
            if enqueued >= branch_budget {
                break;
            }
            let normalized = normalize(&candidate);
            if normalized.is_empty() {
                continue;
            }
            if seen
                .iter()
                .any(|s| score(s, &normalized) >= config.similarity_threshold)
            {
                continue;
            }
            seen.push(normalized);
            ctx.frontier
                .push(FrontierEntry::new(current, candidate, node.depth_min + 1));
            enqueued += 1;
        }

        TaskOutcome::Completed {
            terminal: false,
            new_nodes,
            new_edges,
            enqueued,
        }
    }
}

fn failed(kind: FailureKind, new_nodes: u64, new_edges: u64) -> TaskOutcome {
    TaskOutcome::Failed {
        kind,
        new_nodes,
        new_edges,
    }
}

/// Carrier rejects never succeed on retry; everything else might.
fn is_carrier_reject(error: &str) -> bool {
    let e = error.to_lowercase();
    e.contains("reject") || e.contains("invalid number") || e.contains("unallocated")
}
