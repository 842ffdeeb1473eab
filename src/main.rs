use std::sync::Arc;

use ladder_backend::api;
use ladder_backend::config::{self, Config};
use ladder_backend::db;
use ladder_backend::metrics;
use ladder_backend::provider::ProviderClient;
use ladder_backend::rate_limit::RateLimiter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::load();
    config::set_local_mode(config.local_mode);
    if config.local_mode {
        tracing::info!("Local mode enabled: rate limiting disabled");
    }

    metrics::register_metrics();

    let db = db::Database::new(&config.database_url)
        .await
        .expect("Failed to initialize database");
    let db = Arc::new(db);

    let provider = Arc::new(ProviderClient::new(config.provider.clone()));
    let rate_limiter = RateLimiter::new();

    let app = api::app(db, provider, rate_limiter);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .expect("Failed to bind port");

    tracing::info!("Ladder backend listening on port {}", config.port);
    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
