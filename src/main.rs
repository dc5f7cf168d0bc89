//! SMS Guard API server

use std::net::SocketAddr;

use anyhow::Context;
use sqlx::SqlitePool;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use smsguard::config::Config;
use smsguard::handlers::auth::hash_password;
use smsguard::models::User;
use smsguard::{build_state, create_router, db};

const DEMO_USERNAME: &str = "demo";
const DEMO_EMAIL: &str = "demo@example.com";
const DEMO_PASSWORD: &str = "demo123";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "smsguard=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    tracing::info!("SMS Guard server starting ({})...", config.environment);
    tracing::info!("Database: {}", config.database_url);

    let pool = db::create_pool(&config.database_url)
        .await
        .context("Failed to create database pool")?;

    tracing::info!("Running database migrations...");
    db::run_migrations(&pool)
        .await
        .context("Failed to run migrations")?;

    if config.seed_demo_user {
        seed_demo_user(&pool).await?;
    }

    tracing::info!("Training spam detector...");
    let state = build_state(config.clone(), pool).await?;
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn seed_demo_user(pool: &SqlitePool) -> anyhow::Result<()> {
    if User::find_by_username(pool, DEMO_USERNAME).await?.is_some() {
        return Ok(());
    }
    let hash = hash_password(DEMO_PASSWORD.to_string())
        .await
        .map_err(|e| anyhow::anyhow!("hashing demo password: {:?}", e))?;
    User::create(pool, DEMO_USERNAME, DEMO_EMAIL, &hash).await?;
    tracing::info!("Created demo user '{}'", DEMO_USERNAME);
    Ok(())
}
