//! Content integrity
//!
//! A recording's checksum is SHA-256 over its logical content: the bytes as
//! captured, decompressed first when the stored file is gzip. The checksum
//! therefore survives tier moves and compression unchanged.

use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::lease;
use super::storage::open_logical;
use super::worker_pool::{ShutdownSignal, process_concurrent};
use crate::config::LifecyclePolicy;
use crate::db::{Database, RecordingRecord};
use crate::error::{ItemError, LifecycleError, LifecycleResult};

/// Read size used while hashing
pub const HASH_CHUNK_BYTES: usize = 8192;

/// Outcome of checking a recording against its stored checksum
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum IntegrityStatus {
    Verified,
    Mismatch { expected: String, actual: String },
    /// The stored file opens but its content cannot be read back, such as a
    /// gzip stream failing its own CRC
    Corrupt { expected: String, reason: String },
    /// No checksum has been recorded yet
    Unverified,
}

impl IntegrityStatus {
    /// Whether the content was read back and matched its checksum
    pub fn is_intact(&self) -> bool {
        matches!(self, Self::Verified)
    }
}

/// SHA-256 (lowercase hex) of a recording's logical content
pub async fn compute_checksum(record: &RecordingRecord) -> Result<String> {
    let path = stored_path(record)?;
    let digest = hash_stored(path.clone(), record.is_compressed).await?;
    digest.with_context(|| format!("Failed to read {}", path.display()))
}

/// Hash a stored file. The outer error means the file could not be opened;
/// the inner one means it opened but reading or decoding its content failed.
async fn hash_stored(path: PathBuf, compressed: bool) -> Result<io::Result<String>> {
    tokio::task::spawn_blocking(move || {
        let reader = open_logical(&path, compressed)?;
        Ok(hash_reader(reader))
    })
    .await
    .context("Checksum task panicked")?
}

fn hash_reader(mut reader: Box<dyn Read + Send>) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK_BYTES];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Recompute the checksum and compare it with the stored one. Never mutates the catalog.
///
/// Content that can no longer be read back is reported as
/// [`IntegrityStatus::Corrupt`]; only a file that cannot be opened at all is
/// an error.
pub async fn verify(record: &RecordingRecord) -> Result<IntegrityStatus> {
    let Some(expected) = record.checksum_sha256.as_deref() else {
        return Ok(IntegrityStatus::Unverified);
    };

    let path = stored_path(record)?;
    match hash_stored(path, record.is_compressed).await? {
        Ok(actual) if actual.eq_ignore_ascii_case(expected) => Ok(IntegrityStatus::Verified),
        Ok(actual) => Ok(IntegrityStatus::Mismatch {
            expected: expected.to_string(),
            actual,
        }),
        Err(e) => Ok(IntegrityStatus::Corrupt {
            expected: expected.to_string(),
            reason: e.to_string(),
        }),
    }
}

fn stored_path(record: &RecordingRecord) -> Result<PathBuf> {
    record
        .stored_path
        .as_ref()
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("Recording {} has no stored file", record.filename))
}

/// Totals from one integrity run
#[derive(Debug, Default, Clone, Serialize)]
pub struct IntegritySummary {
    /// Checksums computed and stored for the first time
    pub sealed: usize,
    pub verified: usize,
    /// Filenames whose content no longer matches the stored checksum
    pub mismatched: Vec<String>,
    /// Recordings owned by another worker or left for a later run
    pub skipped: usize,
    pub errors: Vec<ItemError>,
}

enum CheckOutcome {
    Sealed,
    Checked(IntegrityStatus),
    Busy,
}

/// Seals unsealed recordings and verifies sealed ones
pub struct IntegrityService {
    db: Database,
    policy: Arc<LifecyclePolicy>,
    shutdown: ShutdownSignal,
}

impl IntegrityService {
    pub fn new(db: Database, policy: Arc<LifecyclePolicy>, shutdown: ShutdownSignal) -> Self {
        Self { db, policy, shutdown }
    }

    pub async fn run(&self) -> LifecycleResult<IntegritySummary> {
        self.db.ping().await?;

        let records = self
            .db
            .recordings()
            .list_for_integrity(self.policy.integrity_batch_size)
            .await
            .map_err(LifecycleError::Query)?;

        info!(count = records.len(), "Starting integrity run");

        let db = self.db.clone();
        let ttl = self.policy.lease_ttl;
        let outcome = process_concurrent(
            records,
            self.policy.max_concurrent,
            &self.shutdown,
            move |record: RecordingRecord| {
                let db = db.clone();
                async move {
                    let result = check_one(&db, record.id, ttl).await;
                    (record.filename, result)
                }
            },
        )
        .await;

        let mut summary = IntegritySummary {
            skipped: outcome.skipped,
            ..Default::default()
        };
        for (filename, result) in outcome.results {
            match result {
                Ok(CheckOutcome::Sealed) => summary.sealed += 1,
                Ok(CheckOutcome::Checked(IntegrityStatus::Verified)) => summary.verified += 1,
                Ok(CheckOutcome::Checked(IntegrityStatus::Mismatch { expected, actual })) => {
                    error!(
                        filename = %filename,
                        expected = %expected,
                        actual = %actual,
                        "Recording content does not match its checksum"
                    );
                    summary.mismatched.push(filename);
                }
                Ok(CheckOutcome::Checked(IntegrityStatus::Corrupt { expected, reason })) => {
                    error!(
                        filename = %filename,
                        expected = %expected,
                        reason = %reason,
                        "Recording content can no longer be read back"
                    );
                    summary.mismatched.push(filename);
                }
                Ok(CheckOutcome::Checked(IntegrityStatus::Unverified)) | Ok(CheckOutcome::Busy) => {
                    summary.skipped += 1
                }
                Err(e) => {
                    warn!(filename = %filename, error = %e, "Integrity check failed");
                    summary.errors.push(ItemError::new(filename, &e));
                }
            }
        }

        info!(
            sealed = summary.sealed,
            verified = summary.verified,
            mismatched = summary.mismatched.len(),
            skipped = summary.skipped,
            errors = summary.errors.len(),
            "Integrity run complete"
        );
        Ok(summary)
    }
}

async fn check_one(db: &Database, id: Uuid, ttl: chrono::Duration) -> Result<CheckOutcome> {
    let Some(leased) = lease::acquire(db, id, ttl).await? else {
        return Ok(CheckOutcome::Busy);
    };

    let record = &leased.record;
    let result: Result<CheckOutcome> = leased
        .hold_during(db, async {
            if record.checksum_sha256.is_some() {
                return Ok(CheckOutcome::Checked(verify(record).await?));
            }

            let checksum = compute_checksum(record).await?;
            db.recordings().set_checksum(record.id, &checksum).await?;
            info!(filename = %record.filename, checksum = %checksum, "Sealed recording checksum");
            Ok(CheckOutcome::Sealed)
        })
        .await;

    // Failed checks count as checked too, so a broken file cannot hold the
    // head of every batch
    if let Err(e) = db.recordings().mark_checked(record.id).await {
        warn!(filename = %record.filename, error = %e, "Failed to record integrity check time");
    }

    leased.release(db).await;
    result
}
