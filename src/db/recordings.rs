//! Recording catalog repository
//!
//! Every managed recording has one row here. `filename` is unique and is the
//! final guard against importing the same recording twice. Mutations made by
//! the maintenance engines go through a per-row lease (`lease_token`,
//! `lease_expires_at`) so that two overlapping runs never act on the same
//! recording at once.

use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::sqlite_helpers::{
    bool_to_int, datetime_to_str, decode_err, from_json, int_to_bool, now_iso8601,
    str_to_datetime, str_to_datetime_opt, str_to_uuid, to_json, uuid_to_str,
};

/// Storage placement, ordered from most to least expensive
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageTier {
    Hot,
    Warm,
    Cold,
}

impl StorageTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hot => "hot",
            Self::Warm => "warm",
            Self::Cold => "cold",
        }
    }

    pub fn all() -> [StorageTier; 3] {
        [Self::Hot, Self::Warm, Self::Cold]
    }
}

impl fmt::Display for StorageTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageTier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hot" => Ok(Self::Hot),
            "warm" => Ok(Self::Warm),
            "cold" => Ok(Self::Cold),
            other => Err(anyhow!("Unknown storage tier '{}'", other)),
        }
    }
}

/// Lifecycle status; `Archived` and `Deleted` are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingStatus {
    Active,
    Archived,
    Deleted,
}

impl RecordingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
            Self::Deleted => "deleted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl fmt::Display for RecordingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordingStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "archived" => Ok(Self::Archived),
            "deleted" => Ok(Self::Deleted),
            other => Err(anyhow!("Unknown recording status '{}'", other)),
        }
    }
}

/// A recording record from the database
#[derive(Debug, Clone, Serialize)]
pub struct RecordingRecord {
    pub id: Uuid,
    pub filename: String,
    pub original_path: Option<String>,
    pub stored_path: Option<String>,
    pub session_name: Option<String>,
    pub owner_id: Option<Uuid>,
    pub owner_username: Option<String>,
    pub client_ip: Option<String>,
    pub file_size: i64,
    pub original_size: Option<i64>,
    pub is_compressed: bool,
    pub duration_seconds: i64,
    pub session_start: Option<DateTime<Utc>>,
    pub session_end: Option<DateTime<Utc>>,
    pub imported_at: DateTime<Utc>,
    pub storage_tier: StorageTier,
    pub status: RecordingStatus,
    pub checksum_sha256: Option<String>,
    pub metadata: Map<String, JsonValue>,
    pub updated_at: DateTime<Utc>,
}

impl RecordingRecord {
    /// Timestamp used to partition tiered placements: session start, else import time
    pub fn partition_date(&self) -> DateTime<Utc> {
        self.session_start.unwrap_or(self.imported_at)
    }
}

impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for RecordingRecord {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;

        let id_str: String = row.try_get("id")?;
        let owner_id_str: Option<String> = row.try_get("owner_id")?;
        let session_start_str: Option<String> = row.try_get("session_start")?;
        let session_end_str: Option<String> = row.try_get("session_end")?;
        let imported_at_str: String = row.try_get("imported_at")?;
        let updated_at_str: String = row.try_get("updated_at")?;
        let tier_str: String = row.try_get("storage_tier")?;
        let status_str: String = row.try_get("status")?;
        let metadata_str: String = row.try_get("metadata_json")?;
        let is_compressed: i32 = row.try_get("is_compressed")?;

        Ok(Self {
            id: str_to_uuid(&id_str).map_err(decode_err)?,
            filename: row.try_get("filename")?,
            original_path: row.try_get("original_path")?,
            stored_path: row.try_get("stored_path")?,
            session_name: row.try_get("session_name")?,
            owner_id: owner_id_str
                .map(|s| str_to_uuid(&s))
                .transpose()
                .map_err(decode_err)?,
            owner_username: row.try_get("owner_username")?,
            client_ip: row.try_get("client_ip")?,
            file_size: row.try_get("file_size")?,
            original_size: row.try_get("original_size")?,
            is_compressed: int_to_bool(is_compressed),
            duration_seconds: row.try_get("duration_seconds")?,
            session_start: str_to_datetime_opt(session_start_str.as_deref()).map_err(decode_err)?,
            session_end: str_to_datetime_opt(session_end_str.as_deref()).map_err(decode_err)?,
            imported_at: str_to_datetime(&imported_at_str).map_err(decode_err)?,
            storage_tier: tier_str.parse().map_err(decode_err)?,
            status: status_str.parse().map_err(decode_err)?,
            checksum_sha256: row.try_get("checksum_sha256")?,
            metadata: from_json(&metadata_str).unwrap_or_default(),
            updated_at: str_to_datetime(&updated_at_str).map_err(decode_err)?,
        })
    }
}

const RECORDING_COLUMNS: &str = r#"
    id, filename, original_path, stored_path, session_name, owner_id, owner_username,
    client_ip, file_size, original_size, is_compressed, duration_seconds, session_start,
    session_end, imported_at, storage_tier, status, checksum_sha256, metadata_json, updated_at
"#;

/// Input for cataloging a newly imported recording
#[derive(Debug, Clone)]
pub struct CreateRecording {
    pub filename: String,
    pub original_path: Option<String>,
    pub stored_path: String,
    pub session_name: Option<String>,
    pub owner_id: Option<Uuid>,
    pub owner_username: Option<String>,
    pub client_ip: Option<String>,
    pub file_size: i64,
    pub duration_seconds: i64,
    pub session_start: Option<DateTime<Utc>>,
    pub session_end: Option<DateTime<Utc>>,
    pub imported_at: DateTime<Utc>,
    pub metadata: Map<String, JsonValue>,
}

/// New on-disk placement committed after a file transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub stored_path: String,
    pub storage_tier: StorageTier,
    pub file_size: i64,
    pub original_size: Option<i64>,
    pub is_compressed: bool,
}

/// Count and size of active recordings in one tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierStats {
    pub tier: StorageTier,
    pub count: i64,
    pub size_bytes: i64,
}

/// Recording repository for database operations
pub struct RecordingRepository {
    pool: SqlitePool,
}

impl RecordingRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a recording unless one with the same filename is already cataloged.
    ///
    /// Returns `None` when the filename already exists, including when a
    /// concurrent import won the race between our lookup and this insert.
    pub async fn create_if_absent(&self, input: CreateRecording) -> Result<Option<RecordingRecord>> {
        let id = Uuid::new_v4();
        let now = now_iso8601();

        let result = sqlx::query(
            r#"
            INSERT INTO recordings (
                id, filename, original_path, stored_path, session_name, owner_id,
                owner_username, client_ip, file_size, duration_seconds, session_start,
                session_end, imported_at, storage_tier, status, metadata_json,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'hot', 'active', ?, ?, ?)
            ON CONFLICT(filename) DO NOTHING
            "#,
        )
        .bind(uuid_to_str(id))
        .bind(&input.filename)
        .bind(&input.original_path)
        .bind(&input.stored_path)
        .bind(&input.session_name)
        .bind(input.owner_id.map(uuid_to_str))
        .bind(&input.owner_username)
        .bind(&input.client_ip)
        .bind(input.file_size)
        .bind(input.duration_seconds)
        .bind(input.session_start.map(datetime_to_str))
        .bind(input.session_end.map(datetime_to_str))
        .bind(datetime_to_str(input.imported_at))
        .bind(to_json(&input.metadata))
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.get_by_id(id).await
    }

    /// Get a recording by ID
    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<RecordingRecord>> {
        let record = sqlx::query_as::<_, RecordingRecord>(&format!(
            "SELECT {} FROM recordings WHERE id = ?",
            RECORDING_COLUMNS
        ))
        .bind(uuid_to_str(id))
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Get a recording by its unique filename
    pub async fn get_by_filename(&self, filename: &str) -> Result<Option<RecordingRecord>> {
        let record = sqlx::query_as::<_, RecordingRecord>(&format!(
            "SELECT {} FROM recordings WHERE filename = ?",
            RECORDING_COLUMNS
        ))
        .bind(filename)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Check if a filename is already cataloged
    pub async fn exists_by_filename(&self, filename: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM recordings WHERE filename = ?")
            .bind(filename)
            .fetch_one(&self.pool)
            .await?;

        Ok(count > 0)
    }

    /// Recordings in `tier` with `status` imported at or before `cutoff`, oldest first
    pub async fn list_for_tier_change(
        &self,
        tier: StorageTier,
        status: RecordingStatus,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<RecordingRecord>> {
        let records = sqlx::query_as::<_, RecordingRecord>(&format!(
            r#"
            SELECT {} FROM recordings
            WHERE storage_tier = ? AND status = ? AND imported_at <= ?
            ORDER BY imported_at ASC
            "#,
            RECORDING_COLUMNS
        ))
        .bind(tier.as_str())
        .bind(status.as_str())
        .bind(datetime_to_str(cutoff))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Active recordings imported at or before `cutoff`, in any tier
    pub async fn list_active_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<RecordingRecord>> {
        let records = sqlx::query_as::<_, RecordingRecord>(&format!(
            r#"
            SELECT {} FROM recordings
            WHERE status = 'active' AND imported_at <= ?
            ORDER BY imported_at ASC
            "#,
            RECORDING_COLUMNS
        ))
        .bind(datetime_to_str(cutoff))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Recordings whose file is still retained on disk (not deleted).
    ///
    /// Unsealed recordings come first, then those checked least recently, so
    /// successive batches cycle through the whole catalog.
    pub async fn list_for_integrity(&self, limit: i64) -> Result<Vec<RecordingRecord>> {
        let records = sqlx::query_as::<_, RecordingRecord>(&format!(
            r#"
            SELECT {} FROM recordings
            WHERE status != 'deleted' AND stored_path IS NOT NULL
            ORDER BY checksum_sha256 IS NOT NULL, last_verified_at ASC, imported_at ASC
            LIMIT ?
            "#,
            RECORDING_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Try to take exclusive ownership of a recording.
    ///
    /// Succeeds when nobody holds the lease or the previous holder's lease has
    /// expired. Returns `false` if another worker currently owns it.
    pub async fn try_acquire_lease(&self, id: Uuid, token: Uuid, ttl: Duration) -> Result<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE recordings
            SET lease_token = ?, lease_expires_at = ?
            WHERE id = ? AND (lease_token IS NULL OR lease_expires_at < ?)
            "#,
        )
        .bind(uuid_to_str(token))
        .bind(datetime_to_str(now + ttl))
        .bind(uuid_to_str(id))
        .bind(datetime_to_str(now))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Push out the expiry of a lease still held under `token`. Returns
    /// `false` when the lease has passed to another worker.
    pub async fn renew_lease(&self, id: Uuid, token: Uuid, ttl: Duration) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE recordings SET lease_expires_at = ? WHERE id = ? AND lease_token = ?",
        )
        .bind(datetime_to_str(Utc::now() + ttl))
        .bind(uuid_to_str(id))
        .bind(uuid_to_str(token))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Release a lease held under `token`. A lease held by someone else is left alone.
    pub async fn release_lease(&self, id: Uuid, token: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE recordings SET lease_token = NULL, lease_expires_at = NULL
            WHERE id = ? AND lease_token = ?
            "#,
        )
        .bind(uuid_to_str(id))
        .bind(uuid_to_str(token))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Commit a new placement. Only applies while `token` still owns the lease.
    pub async fn commit_placement(&self, id: Uuid, token: Uuid, placement: &Placement) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE recordings
            SET stored_path = ?, storage_tier = ?, file_size = ?, original_size = ?,
                is_compressed = ?, updated_at = ?
            WHERE id = ? AND lease_token = ?
            "#,
        )
        .bind(&placement.stored_path)
        .bind(placement.storage_tier.as_str())
        .bind(placement.file_size)
        .bind(placement.original_size)
        .bind(bool_to_int(placement.is_compressed))
        .bind(now_iso8601())
        .bind(uuid_to_str(id))
        .bind(uuid_to_str(token))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Move an active recording to a terminal status. Only applies while
    /// `token` owns the lease and the recording is still active.
    pub async fn commit_status(&self, id: Uuid, token: Uuid, status: RecordingStatus) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE recordings SET status = ?, updated_at = ?
            WHERE id = ? AND lease_token = ? AND status = 'active'
            "#,
        )
        .bind(status.as_str())
        .bind(now_iso8601())
        .bind(uuid_to_str(id))
        .bind(uuid_to_str(token))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Store a freshly computed content checksum
    pub async fn set_checksum(&self, id: Uuid, checksum: &str) -> Result<()> {
        let now = now_iso8601();
        sqlx::query(
            "UPDATE recordings SET checksum_sha256 = ?, last_verified_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(checksum)
        .bind(&now)
        .bind(&now)
        .bind(uuid_to_str(id))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record that the integrity job examined a recording, whatever the result
    pub async fn mark_checked(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE recordings SET last_verified_at = ? WHERE id = ?")
            .bind(now_iso8601())
            .bind(uuid_to_str(id))
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Remove a recording row. Only applies while `token` owns the lease.
    pub async fn delete(&self, id: Uuid, token: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM recordings WHERE id = ? AND lease_token = ?")
            .bind(uuid_to_str(id))
            .bind(uuid_to_str(token))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Count and total size of active recordings per tier (every tier is present)
    pub async fn tier_stats(&self) -> Result<Vec<TierStats>> {
        let rows: Vec<(String, i64, Option<i64>)> = sqlx::query_as(
            r#"
            SELECT storage_tier, COUNT(*), SUM(file_size)
            FROM recordings
            WHERE status = 'active'
            GROUP BY storage_tier
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let stats = StorageTier::all()
            .into_iter()
            .map(|tier| {
                let row = rows.iter().find(|(t, _, _)| t == tier.as_str());
                TierStats {
                    tier,
                    count: row.map(|(_, c, _)| *c).unwrap_or(0),
                    size_bytes: row.and_then(|(_, _, s)| *s).unwrap_or(0),
                }
            })
            .collect();

        Ok(stats)
    }

    /// Look up a user id in the user catalog by username
    pub async fn find_user_id(&self, username: &str) -> Result<Option<Uuid>> {
        let id: Option<String> = sqlx::query_scalar("SELECT id FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

        id.map(|s| str_to_uuid(&s)).transpose()
    }
}
