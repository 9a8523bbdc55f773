//! Retention and deletion
//!
//! Active recordings older than the retention period are archived: optionally
//! gzip-compressed in place, then moved to the terminal ARCHIVED status.
//! Operators can also delete a recording outright. A hard delete removes the
//! file and then the catalog row; a soft delete only marks the row DELETED.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::lease;
use super::storage::{StorageLayout, TransferMode, compressed_name, relocate, remove_if_exists};
use super::worker_pool::{ShutdownSignal, process_concurrent};
use crate::config::LifecyclePolicy;
use crate::db::{Database, Placement, RecordingRecord, RecordingStatus};
use crate::error::{ItemError, LifecycleError, LifecycleResult};

/// Totals from one retention run
#[derive(Debug, Default, Clone, Serialize)]
pub struct RetentionSummary {
    pub archived: usize,
    /// Archived recordings compressed by this run
    pub compressed: usize,
    pub skipped: usize,
    pub errors: Vec<ItemError>,
}

/// Result of an operator delete request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    /// File and catalog row are gone
    HardDeleted,
    /// Row kept with status DELETED, file left in place
    SoftDeleted,
    /// Soft delete of a recording already in a terminal status; nothing changed
    AlreadyTerminal(RecordingStatus),
    NotFound,
}

enum ArchiveOutcome {
    Archived { compressed: bool },
    Skipped,
}

/// Applies the retention policy and operator deletes
pub struct RetentionService {
    db: Database,
    policy: Arc<LifecyclePolicy>,
    layout: StorageLayout,
    shutdown: ShutdownSignal,
}

impl RetentionService {
    pub fn new(db: Database, policy: Arc<LifecyclePolicy>, shutdown: ShutdownSignal) -> Self {
        let layout = StorageLayout::new(policy.storage_root.clone());
        Self {
            db,
            policy,
            layout,
            shutdown,
        }
    }

    /// Archive every active recording past the retention period
    pub async fn run(&self) -> LifecycleResult<RetentionSummary> {
        let cutoff = self.policy.cutoff(self.policy.retention_period)?;
        self.db.ping().await?;
        self.layout.ensure_root().await?;

        let due = self
            .db
            .recordings()
            .list_active_older_than(cutoff)
            .await
            .map_err(LifecycleError::Query)?;

        info!(count = due.len(), cutoff = %cutoff, "Starting retention run");

        let db = self.db.clone();
        let policy = self.policy.clone();
        let outcome = process_concurrent(
            due,
            self.policy.max_concurrent,
            &self.shutdown,
            move |record: RecordingRecord| {
                let db = db.clone();
                let policy = policy.clone();
                async move {
                    let result = archive_one(&db, &policy, record.id).await;
                    (record.filename, result)
                }
            },
        )
        .await;

        let mut summary = RetentionSummary {
            skipped: outcome.skipped,
            ..Default::default()
        };
        for (filename, result) in outcome.results {
            match result {
                Ok(ArchiveOutcome::Archived { compressed }) => {
                    summary.archived += 1;
                    if compressed {
                        summary.compressed += 1;
                    }
                }
                Ok(ArchiveOutcome::Skipped) => summary.skipped += 1,
                Err(e) => {
                    warn!(filename = %filename, error = %e, "Failed to archive recording");
                    summary.errors.push(ItemError::new(filename, &e));
                }
            }
        }

        info!(
            archived = summary.archived,
            compressed = summary.compressed,
            skipped = summary.skipped,
            errors = summary.errors.len(),
            "Retention run complete"
        );
        Ok(summary)
    }

    /// Delete a recording. A hard delete removes the file first, then the row.
    ///
    /// Fails if another worker currently owns the recording.
    pub async fn delete(&self, id: Uuid, hard: bool) -> Result<DeleteOutcome> {
        let repo = self.db.recordings();
        let Some(leased) = lease::acquire(&self.db, id, self.policy.lease_ttl).await? else {
            // No lease either because the row is gone or because someone holds it
            if repo.get_by_id(id).await?.is_none() {
                return Ok(DeleteOutcome::NotFound);
            }
            bail!("Recording {} is busy, try again later", id);
        };

        let result: Result<DeleteOutcome> = async {
            let record = &leased.record;
            if hard {
                if let Some(path) = record.stored_path.as_deref() {
                    remove_if_exists(&PathBuf::from(path))
                        .await
                        .with_context(|| format!("Failed to remove {}", path))?;
                }
                if !repo.delete(record.id, leased.token).await? {
                    bail!("Lost recording lease before deleting {}", record.filename);
                }
                info!(filename = %record.filename, recording_id = %record.id, "Hard deleted recording");
                return Ok(DeleteOutcome::HardDeleted);
            }

            if record.status.is_terminal() {
                debug!(filename = %record.filename, status = %record.status, "Recording already terminal");
                return Ok(DeleteOutcome::AlreadyTerminal(record.status));
            }
            if !repo.commit_status(record.id, leased.token, RecordingStatus::Deleted).await? {
                bail!("Lost recording lease before deleting {}", record.filename);
            }
            info!(filename = %record.filename, recording_id = %record.id, "Soft deleted recording");
            Ok(DeleteOutcome::SoftDeleted)
        }
        .await;

        leased.release(&self.db).await;
        result
    }
}

async fn archive_one(db: &Database, policy: &LifecyclePolicy, id: Uuid) -> Result<ArchiveOutcome> {
    let Some(leased) = lease::acquire(db, id, policy.lease_ttl).await? else {
        return Ok(ArchiveOutcome::Skipped);
    };

    let result = leased
        .hold_during(db, archive_leased(db, policy, &leased.record, leased.token))
        .await;
    leased.release(db).await;
    result
}

async fn archive_leased(
    db: &Database,
    policy: &LifecyclePolicy,
    record: &RecordingRecord,
    token: Uuid,
) -> Result<ArchiveOutcome> {
    if record.status != RecordingStatus::Active {
        return Ok(ArchiveOutcome::Skipped);
    }

    let repo = db.recordings();
    let mut compressed = false;

    if policy.archive_compression && !record.is_compressed {
        let source = record
            .stored_path
            .as_deref()
            .map(PathBuf::from)
            .ok_or_else(|| anyhow!("Recording has no stored file"))?;
        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .map(compressed_name)
            .ok_or_else(|| anyhow!("Stored path {} has no file name", source.display()))?;
        let dest = source.with_file_name(name);

        let moved = relocate(&source, &dest, TransferMode::Compress)
            .await
            .context("Failed to compress for archive")?;

        let placement = Placement {
            stored_path: moved.stored_path.to_string_lossy().to_string(),
            storage_tier: record.storage_tier,
            file_size: moved.file_size as i64,
            original_size: Some(moved.source_bytes.map(|b| b as i64).unwrap_or(record.file_size)),
            is_compressed: true,
        };
        if !repo.commit_placement(record.id, token, &placement).await? {
            bail!("Lost recording lease before committing archive compression");
        }
        compressed = true;
    }

    if !repo.commit_status(record.id, token, RecordingStatus::Archived).await? {
        bail!("Lost recording lease before archiving");
    }

    info!(
        filename = %record.filename,
        tier = %record.storage_tier,
        compressed,
        "Archived recording"
    );
    Ok(ArchiveOutcome::Archived { compressed })
}
