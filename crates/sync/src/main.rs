//! Pressroom Catalog Sync
//!
//! Operator batch job that reconciles the built-in product catalog into
//! Stripe: run it after editing product definitions or pointing at a fresh
//! Stripe account. Safe to re-run at any time; matching is by internal-id
//! metadata, so repeated runs converge instead of duplicating products.

use std::time::Duration;

use pressroom_credits::CreditService;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

async fn create_db_pool() -> anyhow::Result<sqlx::PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&database_url)
        .await?;

    info!("Database pool created");
    Ok(pool)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting Pressroom catalog sync");

    let pool = create_db_pool().await?;

    pressroom_credits::run_migrations(&pool).await?;

    let credits = CreditService::from_env(pool)?;

    let report = credits.sync.sync_all().await?;

    // Full report on stdout for operators capturing the run
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.errors.is_empty() {
        info!(
            created = report.created,
            updated = report.updated,
            "Catalog sync finished cleanly"
        );
        Ok(())
    } else {
        for e in &report.errors {
            error!(internal_id = %e.internal_id, message = %e.message, "Product failed to sync");
        }
        anyhow::bail!(
            "catalog sync finished with {} failed product(s)",
            report.errors.len()
        );
    }
}
