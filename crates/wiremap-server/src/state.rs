use std::sync::Arc;

use wiremap_core::{ProgressTracker, WebhookCorrelator};
use wiremap_graph::ConversationGraph;

/// Shared application state accessible from all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub graph: Arc<ConversationGraph>,
    pub correlator: Arc<WebhookCorrelator>,
    pub progress: Arc<ProgressTracker>,
}
