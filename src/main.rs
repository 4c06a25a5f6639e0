use pricing_api::config::AppConfig;
use pricing_api::db;
use pricing_api::pricing::{PricingBackend, PricingService};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .init();

    tracing::info!("Pricing API - Starting...");

    let config = AppConfig::from_env().expect("Invalid configuration");

    tracing::info!("Connecting to database...");
    let db_pool = db::create_pool(
        &config.database_url,
        config.max_connections,
        config.acquire_timeout,
    )
    .await
    .expect("Failed to create database pool");

    // Run SQLx migrations on startup
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Migrations completed successfully");

    let service = PricingService::new(
        PricingBackend::postgres(db_pool, config.store.store_id),
        config.store,
        config.cache_ttl,
    );

    if let Err(e) = service.warm_cache().await {
        tracing::error!("Failed to warm pricing cache: {}", e);
        std::process::exit(1);
    }

    service.metrics().log_summary();
    tracing::info!("Pricing API ready for store {}", service.context().store_id);
}
