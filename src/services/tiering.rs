//! Storage tier migration
//!
//! Active recordings age from HOT to WARM to COLD. Large recordings are
//! gzip-compressed on their way into COLD. Every move follows the same
//! sequence under the recording's lease: write and verify the new file,
//! remove the old one, then commit the new placement. A run interrupted at
//! any point is picked up by the next one.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::lease;
use super::storage::{StorageLayout, TransferMode, compressed_name, relocate};
use super::worker_pool::{ShutdownSignal, process_concurrent};
use crate::config::LifecyclePolicy;
use crate::db::{Database, Placement, RecordingRecord, RecordingStatus, StorageTier};
use crate::error::{ItemError, LifecycleError, LifecycleResult};

/// Totals from one tier migration run
#[derive(Debug, Default, Clone, Serialize)]
pub struct TierMigrationSummary {
    pub hot_to_warm: usize,
    pub warm_to_cold: usize,
    /// Recordings compressed on the way into COLD
    pub compressed: usize,
    /// Leased elsewhere, no longer eligible, or left for the next run on shutdown
    pub skipped: usize,
    pub errors: Vec<ItemError>,
}

#[derive(Debug, PartialEq, Eq)]
enum MigrationOutcome {
    Migrated { compressed: bool },
    Skipped,
}

/// Moves aged recordings to cheaper tiers
pub struct TierMigrationService {
    db: Database,
    policy: Arc<LifecyclePolicy>,
    layout: StorageLayout,
    shutdown: ShutdownSignal,
}

impl TierMigrationService {
    pub fn new(db: Database, policy: Arc<LifecyclePolicy>, shutdown: ShutdownSignal) -> Self {
        let layout = StorageLayout::new(policy.storage_root.clone());
        Self {
            db,
            policy,
            layout,
            shutdown,
        }
    }

    pub async fn run(&self) -> LifecycleResult<TierMigrationSummary> {
        let warm_cutoff = self.policy.cutoff(self.policy.hot_to_warm_age)?;
        let cold_cutoff = self.policy.cutoff(self.policy.warm_to_cold_age)?;
        self.db.ping().await?;
        self.layout.ensure_root().await?;

        let mut summary = TierMigrationSummary::default();

        let due_warm = self
            .db
            .recordings()
            .list_for_tier_change(StorageTier::Hot, RecordingStatus::Active, warm_cutoff)
            .await
            .map_err(LifecycleError::Query)?;
        self.migrate_batch(due_warm, StorageTier::Warm, &mut summary).await;

        if self.shutdown.is_shutdown() {
            return Ok(summary);
        }

        let due_cold = self
            .db
            .recordings()
            .list_for_tier_change(StorageTier::Warm, RecordingStatus::Active, cold_cutoff)
            .await
            .map_err(LifecycleError::Query)?;
        self.migrate_batch(due_cold, StorageTier::Cold, &mut summary).await;

        info!(
            hot_to_warm = summary.hot_to_warm,
            warm_to_cold = summary.warm_to_cold,
            compressed = summary.compressed,
            skipped = summary.skipped,
            errors = summary.errors.len(),
            "Tier migration complete"
        );
        Ok(summary)
    }

    async fn migrate_batch(
        &self,
        records: Vec<RecordingRecord>,
        target: StorageTier,
        summary: &mut TierMigrationSummary,
    ) {
        if records.is_empty() {
            return;
        }
        info!(count = records.len(), target = %target, "Migrating recordings");

        let db = self.db.clone();
        let policy = self.policy.clone();
        let layout = self.layout.clone();
        let outcome = process_concurrent(
            records,
            self.policy.max_concurrent,
            &self.shutdown,
            move |record: RecordingRecord| {
                let db = db.clone();
                let policy = policy.clone();
                let layout = layout.clone();
                async move {
                    let result = migrate_one(&db, &policy, &layout, record.id, target).await;
                    (record.filename, result)
                }
            },
        )
        .await;

        summary.skipped += outcome.skipped;
        for (filename, result) in outcome.results {
            match result {
                Ok(MigrationOutcome::Migrated { compressed }) => {
                    match target {
                        StorageTier::Warm => summary.hot_to_warm += 1,
                        StorageTier::Cold => summary.warm_to_cold += 1,
                        StorageTier::Hot => {}
                    }
                    if compressed {
                        summary.compressed += 1;
                    }
                }
                Ok(MigrationOutcome::Skipped) => summary.skipped += 1,
                Err(e) => {
                    warn!(filename = %filename, target = %target, error = %e, "Tier migration failed");
                    summary.errors.push(ItemError::new(filename, &e));
                }
            }
        }
    }
}

/// Whether a move into `target` compresses the recording
pub fn should_compress(record: &RecordingRecord, target: StorageTier, threshold_bytes: u64) -> bool {
    target == StorageTier::Cold
        && !record.is_compressed
        && u64::try_from(record.file_size).is_ok_and(|size| size >= threshold_bytes)
}

async fn migrate_one(
    db: &Database,
    policy: &LifecyclePolicy,
    layout: &StorageLayout,
    id: Uuid,
    target: StorageTier,
) -> Result<MigrationOutcome> {
    let Some(leased) = lease::acquire(db, id, policy.lease_ttl).await? else {
        return Ok(MigrationOutcome::Skipped);
    };

    let result = leased
        .hold_during(db, migrate_leased(db, policy, layout, &leased.record, leased.token, target))
        .await;
    leased.release(db).await;
    result
}

async fn migrate_leased(
    db: &Database,
    policy: &LifecyclePolicy,
    layout: &StorageLayout,
    record: &RecordingRecord,
    token: Uuid,
    target: StorageTier,
) -> Result<MigrationOutcome> {
    // Terminal recordings keep their tier; others may have moved since listing
    if record.status != RecordingStatus::Active || record.storage_tier >= target {
        debug!(filename = %record.filename, tier = %record.storage_tier, "No longer due for migration");
        return Ok(MigrationOutcome::Skipped);
    }

    let source = record
        .stored_path
        .as_deref()
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("Recording has no stored file"))?;
    let stored_name = source
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| record.filename.clone());

    let compress = should_compress(record, target, policy.compression_threshold_bytes);
    let (dest_name, mode) = if compress {
        (compressed_name(&stored_name), TransferMode::Compress)
    } else {
        (stored_name, TransferMode::Copy)
    };
    let dest = layout.tier_path(target, &dest_name, record.partition_date());

    let moved = relocate(&source, &dest, mode)
        .await
        .with_context(|| format!("Failed to move into {}", target))?;

    let original_size = if compress {
        Some(moved.source_bytes.map(|b| b as i64).unwrap_or(record.file_size))
    } else {
        record.original_size
    };
    let placement = Placement {
        stored_path: path_string(&moved.stored_path),
        storage_tier: target,
        file_size: moved.file_size as i64,
        original_size,
        is_compressed: record.is_compressed || compress,
    };

    if !db.recordings().commit_placement(record.id, token, &placement).await? {
        bail!("Lost recording lease before committing the move to {}", target);
    }

    info!(
        filename = %record.filename,
        from = %record.storage_tier,
        to = %target,
        compressed = compress,
        resumed = moved.resumed,
        file_size = placement.file_size,
        stored_path = %placement.stored_path,
        "Migrated recording"
    );
    Ok(MigrationOutcome::Migrated { compressed: compress })
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
