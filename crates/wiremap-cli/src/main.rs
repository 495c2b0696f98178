use std::sync::Arc;

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use wiremap_core::{
    ConversationExplorer, ExplorerConfig, Frontier, ProgressTracker, WebhookCorrelator,
    WorkerContext,
};
use wiremap_graph::{ConversationGraph, NodeIdentifier};
use wiremap_llm::prompt::EXPLORER_ROLE;
use wiremap_llm::{AnthropicClient, LlmClient, PromptContextualizer};
use wiremap_server::state::AppState;
use wiremap_voice::{DeepgramTranscriber, HammingVoiceClient, Transcriber, VoiceClient};

const DEFAULT_ANTHROPIC_API_BASE: &str = "https://api.anthropic.com";
const DEFAULT_HAMMING_API_BASE: &str = "https://app.hamming.ai/api";
const DEFAULT_LLM_MODEL: &str = "claude-3-5-haiku-latest";

#[tokio::main]
async fn main() -> Result<()> {
    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&log_dir, "wiremap.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("wiremap=info,tower_http=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .init();

    // Fatal configuration problems abort here with a non-zero exit.
    let config = ExplorerConfig::from_env().context("configuration error")?;
    let bind_addr = std::env::var("WIREMAP_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let webhook_url = std::env::var("WEBHOOK_PUBLIC_URL")
        .unwrap_or_else(|_| format!("http://{bind_addr}/webhook/call-complete"));

    let llm_model = std::env::var("LLM_MODEL").unwrap_or_else(|_| DEFAULT_LLM_MODEL.to_string());
    let anthropic_base = std::env::var("ANTHROPIC_API_BASE")
        .unwrap_or_else(|_| DEFAULT_ANTHROPIC_API_BASE.to_string());
    let hamming_base =
        std::env::var("HAMMING_API_BASE").unwrap_or_else(|_| DEFAULT_HAMMING_API_BASE.to_string());

    let llm: Arc<dyn LlmClient> = Arc::new(
        AnthropicClient::from_env(anthropic_base, llm_model)
            .context("configuration error")?
            .with_system(EXPLORER_ROLE),
    );
    let voice: Arc<dyn VoiceClient> = Arc::new(
        HammingVoiceClient::from_env(hamming_base, webhook_url).context("configuration error")?,
    );
    let transcriber: Arc<dyn Transcriber> =
        Arc::new(DeepgramTranscriber::from_env().context("configuration error")?);

    let graph = Arc::new(ConversationGraph::new(
        NodeIdentifier::new(config.similarity_threshold),
        config.breadth_cap,
    ));
    let correlator = Arc::new(WebhookCorrelator::new(config.webhook_buffer_ttl));
    let progress = Arc::new(ProgressTracker::new(config.plateau_window));
    let contextualizer = PromptContextualizer::new(&config.scenario_description);
    let rng = Mutex::new(StdRng::seed_from_u64(config.random_seed));

    let ctx = Arc::new(WorkerContext {
        config,
        graph: graph.clone(),
        frontier: Arc::new(Frontier::new()),
        correlator: correlator.clone(),
        progress: progress.clone(),
        voice,
        transcriber,
        llm,
        contextualizer,
        rng,
    });

    let server_state = AppState {
        graph,
        correlator,
        progress,
    };
    let server = tokio::spawn(async move { wiremap_server::serve(server_state, &bind_addr).await });

    let explorer = ConversationExplorer::new(ctx);
    let stop = explorer.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("stop requested, finishing in-flight work");
            stop.stop();
        }
    });

    tokio::select! {
        report = explorer.explore() => {
            let report = report?;
            tracing::info!(
                stop_reason = ?report.stop_reason,
                nodes = report.graph.nodes.len(),
                edges = report.graph.edges.len(),
                "exploration finished"
            );
            Ok(())
        }
        result = server => {
            // The server only returns early on a fatal error (bind failure).
            result.context("server task panicked")??;
            anyhow::bail!("server exited unexpectedly")
        }
    }
}
