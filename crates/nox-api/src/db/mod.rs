//! # Database Persistence Layer
//!
//! Postgres persistence via SQLx. The database is optional: with
//! `DATABASE_URL` set, processed payment events live in the
//! `processed_events` table and survive restarts; without it the API runs
//! on in-memory stores, suitable for development and tests only, since a
//! restart forgets which transactions were already applied.

pub mod processed_events;

use sqlx::postgres::{PgPool, PgPoolOptions};

/// Initialize the connection pool and run migrations.
///
/// Returns `None` when `database_url` is absent (in-memory mode).
/// Returns `Err` if the URL is set but connecting or migrating fails.
pub async fn init_pool(database_url: Option<&str>) -> Result<Option<PgPool>, sqlx::Error> {
    let Some(url) = database_url else {
        tracing::warn!(
            "DATABASE_URL not set; running in-memory only mode. \
             Processed transactions will not survive restarts."
        );
        return Ok(None);
    };

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(url)
        .await?;

    tracing::info!("Connected to PostgreSQL");

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    Ok(Some(pool))
}
