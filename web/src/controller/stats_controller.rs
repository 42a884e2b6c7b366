use crate::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use log::*;

/// GET a snapshot of every broadcaster session in the pool, ordered by key.
pub async fn index(State(app_state): State<AppState>) -> impl IntoResponse {
    let stats = app_state.sse_manager.stats().await;
    debug!("Reporting stats for {} broadcaster session(s)", stats.len());

    (StatusCode::OK, Json(stats))
}
