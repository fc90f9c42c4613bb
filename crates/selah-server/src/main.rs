mod auth;
mod config;
mod db;
mod error;
mod reconcile;
mod routes;

use std::sync::Arc;

use config::AppConfig;
use db::ServerDb;
use routes::{app_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses platform-native env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("selah_server=info".parse().expect("valid directive")),
        )
        .init();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!("Starting selah-server with config: {:?}", config);

    let database = ServerDb::open(&config.database_path)?;
    for seed in &config.seed_tokens {
        database.insert_api_token(&seed.token, &seed.user_id, None)?;
    }
    if !config.seed_tokens.is_empty() {
        tracing::info!("Seeded {} API token(s)", config.seed_tokens.len());
    }

    let bind_addr = config.bind_addr.clone();
    let state = AppState {
        config,
        db: Arc::new(database),
    };
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("selah-server listening on {}", bind_addr);
    axum::serve(listener, router).await?;
    Ok(())
}
