//! Database connection and operations

pub mod groups;
pub mod recordings;
pub mod schema_sync;
pub mod sqlite_helpers;

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Result, bail};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tracing::{info, warn};

pub use groups::{GroupAdjacency, GroupRepository};
pub use recordings::{
    CreateRecording, Placement, RecordingRecord, RecordingRepository, RecordingStatus,
    StorageTier, TierStats,
};

/// Database wrapper providing connection pool access
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database wrapper from an existing pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the maximum connection pool size from environment or default
    fn get_max_connections() -> u32 {
        std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10)
    }

    fn connect_options(url: &str) -> Result<SqliteConnectOptions> {
        Ok(SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10))
            .foreign_keys(true))
    }

    /// Create a new database connection pool. The database file is created if missing.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(Self::get_max_connections())
            .connect_with(Self::connect_options(url)?)
            .await?;

        Ok(Self { pool })
    }

    /// Connect to a database file by path
    pub async fn connect_path(path: &Path) -> Result<Self> {
        Self::connect(&format!("sqlite://{}", path.display())).await
    }

    /// Create a new database connection pool with retry logic
    /// Retries every `retry_interval` until successful
    pub async fn connect_with_retry(url: &str, retry_interval: Duration) -> Result<Self> {
        let options = Self::connect_options(url)?;
        loop {
            match SqlitePoolOptions::new()
                .max_connections(Self::get_max_connections())
                .acquire_timeout(Duration::from_secs(10))
                .connect_with(options.clone())
                .await
            {
                Ok(pool) => return Ok(Self { pool }),
                Err(e) => {
                    warn!(
                        error = %e,
                        retry_in_secs = retry_interval.as_secs(),
                        "Database connection failed, retrying"
                    );
                    tokio::time::sleep(retry_interval).await;
                }
            }
        }
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Get a recording repository
    pub fn recordings(&self) -> RecordingRepository {
        RecordingRepository::new(self.pool.clone())
    }

    /// Get a group hierarchy repository
    pub fn groups(&self) -> GroupRepository {
        GroupRepository::new(self.pool.clone())
    }

    /// Cheap round trip used to tell "store unreachable" apart from per-item failures
    pub async fn ping(&self) -> std::result::Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Create any missing tables and indexes
    pub async fn sync_schema(&self) -> Result<()> {
        let result = schema_sync::sync_schema(&self.pool).await;
        if !result.tables_created.is_empty() {
            info!(tables = ?result.tables_created, "Created tables");
        }
        if !result.is_ok() {
            bail!("Schema sync failed: {}", result.errors.join("; "));
        }
        Ok(())
    }
}
