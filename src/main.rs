use anyhow::Result;
use tracing::info;

use pathology_quiz::{
    config::Config, create_app, log_system_event, logging::init_logging, AppState, Database,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    let _guard = init_logging(&config.logging)?;
    config.validate()?;
    config.log_configuration_summary();

    log_system_event!(startup, component = "server", "Starting pathology quiz server");

    let db = Database::connect(&config.database.url, config.database.max_connections).await?;
    info!("Database initialized successfully");

    let state = AppState::new(db, &config.quiz);
    let app = create_app(state, config.server.request_timeout());

    let addr = config.server.address();
    info!("Server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log_system_event!(shutdown, component = "server", "Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}
