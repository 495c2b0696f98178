use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use wiremap_core::Delivery;
use wiremap_schema::CallCompletedEvent;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/call-complete", post(call_complete))
}

/// Provider callback for finished calls. Idempotent by `call_id`; malformed
/// bodies get a 400 rather than the default rejection.
async fn call_complete(
    State(state): State<AppState>,
    payload: Result<Json<CallCompletedEvent>, JsonRejection>,
) -> impl IntoResponse {
    let Json(event) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            tracing::warn!(error = %rejection.body_text(), "malformed webhook body");
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": rejection.body_text()})),
            );
        }
    };

    let call_id = event.call_id.clone();
    match state.correlator.deliver(event).await {
        Delivery::Matched => tracing::debug!(%call_id, "webhook matched waiting task"),
        Delivery::Buffered => tracing::debug!(%call_id, "webhook buffered"),
    }
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
}
