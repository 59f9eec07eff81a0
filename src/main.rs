use actix_web::{middleware, web, App, HttpServer};
use anyhow::Result;
use invoice_intake::api::{configure_routes, ApiState};
use invoice_intake::core::AppConfig;
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;

#[actix_web::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    tracing::info!("Starting Invoice Intake API");

    // Initialize Prometheus metrics
    prometheus::default_registry()
        .register(Box::new(prometheus::process_collector::ProcessCollector::for_self()))?;

    // Load configuration
    let config = AppConfig::load()?;
    let host = config.host.clone();
    let port = config.port;
    tracing::info!(
        storage = ?config.storage.backend,
        extraction = ?config.extraction.mode,
        export = ?config.export.mode,
        "Configuration loaded"
    );

    // Initialize application state
    let state = web::Data::new(ApiState::new(config).await?);

    tracing::info!("Starting server on {}:{}", host, port);

    // Start HTTP server
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(TracingLogger::default())
            .wrap(middleware::NormalizePath::trim())
            .configure(configure_routes)
    })
    .bind((host.as_str(), port))?
    .run()
    .await?;

    Ok(())
}
