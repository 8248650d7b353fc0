use anyhow::{Context, Result};
use multisite_hreflang::config::Config;
use multisite_hreflang::registry::SiteRegistry;
use multisite_hreflang::retry::{with_retry, RetryConfig};
use multisite_hreflang::scheduler::SweepScheduler;
use multisite_hreflang::server::{self, AppState};
use multisite_hreflang::store::{ContentStore, MySqlStore};
use multisite_hreflang::HreflangService;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignored in production)
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("multisite_hreflang=info".parse()?),
        )
        .init();

    info!("Starting multisite hreflang service");

    let config = Config::from_env()?;
    let registry = SiteRegistry::from_config(&config)?;
    info!(
        "Loaded {} sites ({} active), strategy: {}",
        registry.list_all().len(),
        registry.list_active_sites().len(),
        config.resolution_strategy
    );

    let database_url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL not set")?;
    let store = with_retry(&RetryConfig::connect(), "Database connection", || {
        MySqlStore::connect(database_url, &config.table_prefix, &config.product_base)
    })
    .await?
    .with_permalink_structure(&config.permalink_structure)?;
    let store: Arc<dyn ContentStore> = Arc::new(store);

    let service = Arc::new(HreflangService::from_config(&config, store, registry));

    // Register the sweep once at startup
    let scheduler = SweepScheduler::start().await?;
    scheduler
        .ensure_scheduled(&config.sweep_cron, Arc::clone(&service))
        .await?;

    let app = server::router(AppState {
        service,
        api_key: config.api_key.clone(),
    });

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("✓ Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown().await?;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}
