//! Database bootstrap
//!
//! Runs at application startup: waits for PostgreSQL, enables the trigram
//! extensions and creates the durable tables if absent. Final-table indexes
//! are NOT created here - bulk-loading into an unindexed table and indexing
//! afterwards (Phase 3 Part 3 / Phase 4) is strictly faster than the reverse.

use crate::db::tables;
use crate::error::{PipelineError, Result};
use cnpj_common::Settings;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{info, warn};

const MAX_CONNECT_ATTEMPTS: u32 = 20;
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Connect to PostgreSQL, retrying while the database comes up.
pub async fn connect_with_retry(settings: &Settings) -> Result<PgPool> {
    let url = settings.database_url();
    let mut attempt = 0;
    loop {
        attempt += 1;
        match PgPoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
        {
            Ok(pool) => {
                sqlx::query("SELECT 1").execute(&pool).await?;
                info!(attempt, "PostgreSQL connection established");
                return Ok(pool);
            }
            Err(err) if attempt < MAX_CONNECT_ATTEMPTS => {
                warn!(
                    attempt,
                    max_attempts = MAX_CONNECT_ATTEMPTS,
                    error = %err,
                    "Waiting for PostgreSQL"
                );
                tokio::time::sleep(CONNECT_RETRY_DELAY).await;
            }
            Err(err) => {
                return Err(PipelineError::Internal(format!(
                    "PostgreSQL did not become available after {MAX_CONNECT_ATTEMPTS} attempts: {err}"
                )));
            }
        }
    }
}

/// Enable extensions and create the durable tables if absent.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    sqlx::query("CREATE EXTENSION IF NOT EXISTS pg_trgm")
        .execute(pool)
        .await?;
    sqlx::query("CREATE EXTENSION IF NOT EXISTS btree_gin")
        .execute(pool)
        .await?;

    sqlx::query(tables::CREATE_DATA_VERSIONS).execute(pool).await?;
    sqlx::query(&tables::create_estabelecimentos_sql(true))
        .execute(pool)
        .await?;
    sqlx::query(tables::CREATE_SOCIOS).execute(pool).await?;

    info!("Database schema ready");
    Ok(())
}
