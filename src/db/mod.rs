//! Postgres backend for the remote document store.
//!
//! Documents live in one JSONB `documents` table keyed by collection; see
//! `migrations/` for the schema.

pub mod documents;

use crate::config::Config;
use crate::error::Result;
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tracing::info;

/// The reporting service writes one document per trigger, serialized, so
/// a handful of connections covers it plus CLI use.
const MAX_CONNECTIONS: u32 = 4;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Database handle. Owns the connection pool.
pub struct Db {
    pool: PgPool,
}

impl Db {
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Connect using `WORKER_BEACON_DATABASE_URL` and bring the schema up
    /// to date.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let db = Self::connect(config.require_database()?.expose_secret()).await?;
        db.migrate().await?;
        Ok(db)
    }

    /// Run pending migrations from `migrations/`.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(sqlx::Error::from)?;
        info!("document schema up to date");
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
