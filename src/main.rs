use log::{error, info};
use service::{config::Config, logging::Logger, AppState};
use sse::Manager;
use std::sync::Arc;
use upstream::EventStreamConnector;

#[tokio::main]
async fn main() {
    let config = Config::new();
    if let Err(e) = Logger::init_logger(&config as &Config) {
        eprintln!("Failed to start logger: {e}");
    }

    info!("Starting chat relay...");

    let connector = match EventStreamConnector::new(
        config.upstream_url_template(),
        config.upstream_connect_timeout(),
    ) {
        Ok(connector) => Arc::new(connector),
        Err(e) => {
            error!("Failed to set up the upstream connector: {e}");
            std::process::exit(1);
        }
    };

    let sse_manager = Arc::new(Manager::new(connector, config.relay_settings()));
    let app_state = AppState::new(config, &sse_manager);

    if let Err(e) = web::init_server(app_state).await {
        error!("Server failed: {e}");
        std::process::exit(1);
    }

    info!("Chat relay stopped");
}
