use crate::{
    controller::{health_check_controller, stats_controller},
    sse::handler::sse_handler,
    AppState,
};
use axum::{routing::get, Router};

pub fn define_routes(app_state: AppState) -> Router {
    Router::new()
        .merge(health_routes())
        .merge(stats_routes(app_state.clone()))
        .merge(sse_routes(app_state))
}

fn health_routes() -> Router {
    Router::new()
        .route("/", get(health_check_controller::liveness))
        .route("/health", get(health_check_controller::health_check))
}

fn stats_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/stats", get(stats_controller::index))
        .with_state(app_state)
}

fn sse_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/:broadcaster/sse", get(sse_handler))
        .with_state(app_state)
}
