use axum::Router;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use eventify_server::config::Config;
use eventify_server::ledger::PgInventoryLedger;
use eventify_server::purchases::PurchaseService;
use eventify_server::routes::create_routes;

const DEFAULT_LOG_FILTER: &str = "eventify_server=info,tower_http=info";

#[tokio::main]
async fn main() {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let config = Config::from_env();

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Successfully connected to database");

    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    tracing::info!("Migrations run successfully");

    let ledger = PgInventoryLedger::new(pool, config.lock_timeout);
    let service = PurchaseService::new(ledger, config.purchase);
    let app: Router = create_routes(service, &config);

    let addr = config.bind_addr();
    tracing::info!(
        lock_timeout_ms = config.lock_timeout.as_millis() as u64,
        max_attempts = config.purchase.max_attempts,
        "Server running at http://{}",
        addr
    );

    let listener = TcpListener::bind(addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server failed");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, draining in-flight requests");
}
