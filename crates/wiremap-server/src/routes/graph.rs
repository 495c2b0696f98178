use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use wiremap_schema::{GraphDto, StatsSnapshot};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/graph", get(get_graph))
        .route("/stats", get(get_stats))
}

async fn get_graph(State(state): State<AppState>) -> Json<GraphDto> {
    let snapshot = state.graph.snapshot().await;
    Json(GraphDto::from(&snapshot))
}

async fn get_stats(State(state): State<AppState>) -> Json<StatsSnapshot> {
    Json(state.progress.snapshot())
}
