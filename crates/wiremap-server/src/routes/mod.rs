pub mod graph;
pub mod webhook;

use axum::Router;

use crate::state::AppState;

pub fn api_router() -> Router<AppState> {
    Router::new()
        .merge(graph::router())
        .nest("/webhook", webhook::router())
}
