use axum::http::StatusCode;
use axum::response::IntoResponse;

/// GET liveness text for the root path
pub async fn liveness() -> impl IntoResponse {
    (StatusCode::OK, "chat relay is running")
}

/// GET health of the relay process
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "healthy")
}
