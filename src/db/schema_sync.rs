//! Schema synchronization for the recording catalog
//!
//! Creates every table and index the engine needs if it is missing. Statements
//! are idempotent (`IF NOT EXISTS`) so this runs on every startup. Columns
//! added after a table was first created are appended with `ALTER TABLE`.
//! Column renames and type changes are not handled.

use sqlx::SqlitePool;
use tracing::{debug, info, warn};

/// Result of a schema sync operation
#[derive(Debug, Default)]
pub struct SchemaSyncResult {
    pub tables_created: Vec<String>,
    pub columns_added: Vec<(String, String)>, // (table, column)
    pub errors: Vec<String>,
}

impl SchemaSyncResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Check if a table exists in the database
async fn table_exists(pool: &SqlitePool, table_name: &str) -> Result<bool, sqlx::Error> {
    let result: Option<(String,)> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' AND name = ?")
            .bind(table_name)
            .fetch_optional(pool)
            .await?;

    Ok(result.is_some())
}

/// Get existing columns for a table
async fn get_table_columns(pool: &SqlitePool, table_name: &str) -> Result<Vec<String>, sqlx::Error> {
    let rows: Vec<(i32, String, String, i32, Option<String>, i32)> =
        sqlx::query_as(&format!("PRAGMA table_info({})", table_name))
            .fetch_all(pool)
            .await?;

    Ok(rows.into_iter().map(|(_, name, _, _, _, _)| name).collect())
}

/// Table name and its CREATE statement
const TABLES: &[(&str, &str)] = &[
    (
        "recordings",
        r#"
        CREATE TABLE IF NOT EXISTS recordings (
            id TEXT PRIMARY KEY,
            filename TEXT NOT NULL UNIQUE,
            original_path TEXT,
            stored_path TEXT,
            session_name TEXT,
            owner_id TEXT,
            owner_username TEXT,
            client_ip TEXT,
            file_size INTEGER NOT NULL DEFAULT 0,
            original_size INTEGER,
            is_compressed INTEGER NOT NULL DEFAULT 0,
            duration_seconds INTEGER NOT NULL DEFAULT 0,
            session_start TEXT,
            session_end TEXT,
            imported_at TEXT NOT NULL,
            storage_tier TEXT NOT NULL DEFAULT 'hot',
            status TEXT NOT NULL DEFAULT 'active',
            checksum_sha256 TEXT,
            last_verified_at TEXT,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            lease_token TEXT,
            lease_expires_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    ),
    (
        "users",
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE
        )
        "#,
    ),
    (
        "user_groups",
        r#"
        CREATE TABLE IF NOT EXISTS user_groups (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )
        "#,
    ),
    (
        "group_hierarchy",
        r#"
        CREATE TABLE IF NOT EXISTS group_hierarchy (
            parent_group_id TEXT NOT NULL REFERENCES user_groups(id) ON DELETE CASCADE,
            child_group_id TEXT NOT NULL REFERENCES user_groups(id) ON DELETE CASCADE,
            PRIMARY KEY (parent_group_id, child_group_id)
        )
        "#,
    ),
];

/// Columns introduced after their table's first release: (table, column, type)
const LATER_COLUMNS: &[(&str, &str, &str)] = &[("recordings", "last_verified_at", "TEXT")];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_recordings_status ON recordings(status)",
    "CREATE INDEX IF NOT EXISTS idx_recordings_tier_status_imported ON recordings(storage_tier, status, imported_at)",
    "CREATE INDEX IF NOT EXISTS idx_recordings_owner_username ON recordings(owner_username)",
    "CREATE INDEX IF NOT EXISTS idx_recordings_session_start ON recordings(session_start)",
    "CREATE INDEX IF NOT EXISTS idx_recordings_last_verified ON recordings(last_verified_at)",
];

/// Create all catalog tables and indexes that do not exist yet
pub async fn sync_schema(pool: &SqlitePool) -> SchemaSyncResult {
    let mut result = SchemaSyncResult::default();

    for (table, sql) in TABLES {
        let existed = table_exists(pool, table).await.unwrap_or(false);
        match sqlx::query(sql.trim()).execute(pool).await {
            Ok(_) if !existed => {
                debug!(table = %table, "Created table");
                result.tables_created.push(table.to_string());
            }
            Ok(_) => {}
            Err(e) => {
                let msg = format!("Failed to create table {}: {}", table, e);
                warn!("{}", msg);
                result.errors.push(msg);
            }
        }
    }

    for (table, column, sql_type) in LATER_COLUMNS {
        let existing = match get_table_columns(pool, table).await {
            Ok(columns) => columns,
            Err(e) => {
                let msg = format!("Failed to read columns of {}: {}", table, e);
                warn!("{}", msg);
                result.errors.push(msg);
                continue;
            }
        };
        if existing.iter().any(|c| c == column) {
            continue;
        }

        let alter_sql = format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, sql_type);
        match sqlx::query(&alter_sql).execute(pool).await {
            Ok(_) => {
                info!("Added column {}.{}", table, column);
                result.columns_added.push((table.to_string(), column.to_string()));
            }
            Err(e) => {
                let msg = format!("Failed to add column {}.{}: {}", table, column, e);
                warn!("{}", msg);
                result.errors.push(msg);
            }
        }
    }

    for sql in INDEXES {
        if let Err(e) = sqlx::query(sql).execute(pool).await {
            let msg = format!("Failed to create index: {}", e);
            warn!("{}", msg);
            result.errors.push(msg);
        }
    }

    result
}
