use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

use metrics_sql_translator::api;
use metrics_sql_translator::config::Config;
use metrics_sql_translator::services::{MetricDictionary, TranslationService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration first so logging can follow it; report failures once logging is up
    let config = Config::from_env();
    let (level, ansi) = match &config {
        Ok(config) => (config.logging.level.clone(), config.logging.style != "never"),
        Err(_) => ("info".to_string(), true),
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_ansi(ansi)
        .init();

    let config = config.map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!("Starting server on {}", config.server_address());

    // Load the metric catalog
    let dictionary = Arc::new(MetricDictionary::from_csv_path(&config.catalog.path).map_err(|e| {
        error!("Failed to load metric catalog: {}", e);
        e
    })?);

    let translator = Arc::new(TranslationService::from_config(&config, dictionary).map_err(|e| {
        error!("Failed to initialize translation service: {}", e);
        e
    })?);

    // Create router with state
    let app: Router = api::routes::create_router_with_state(translator, config.clone());

    // Start server
    let addr: SocketAddr = config.server_address().parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
