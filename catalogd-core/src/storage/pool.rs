//! Postgres connection pool setup, grounded in the teacher's
//! `database::postgres` module.

use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;

use crate::error::Result;

/// Connects a pool and runs pending migrations.
pub async fn connect(database_url: &str) -> Result<PgPool> {
    let max_connections = std::env::var("DB_MAX_CONNECTIONS")
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(10);
    let min_connections = std::env::var("DB_MIN_CONNECTIONS")
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(1);

    let connect_options: PgConnectOptions = database_url.parse()?;

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(min_connections)
        .acquire_timeout(Duration::from_secs(30))
        .max_lifetime(Duration::from_secs(1800))
        .idle_timeout(Duration::from_secs(600))
        .test_before_acquire(true)
        .connect_with(connect_options)
        .await?;

    crate::MIGRATOR.run(&pool).await?;

    Ok(pool)
}
