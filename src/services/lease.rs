//! Exclusive per-recording ownership
//!
//! A lease is taken in the catalog before any engine touches a recording's
//! file or row, and every commit made under it is conditional on still
//! holding it. Leases expire after a TTL so that a crashed worker never
//! blocks a recording forever. Long file work runs under
//! [`LeasedRecording::hold_during`], which keeps pushing the expiry out
//! while the work is in progress.

use std::future::Future;

use anyhow::{Context, Result, bail};
use chrono::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::{Database, RecordingRecord};

/// Shortest interval between lease renewals
const MIN_RENEW_INTERVAL: std::time::Duration = std::time::Duration::from_millis(50);

/// A recording currently owned by this worker, freshly re-read after acquisition
#[derive(Debug)]
pub struct LeasedRecording {
    pub record: RecordingRecord,
    pub token: Uuid,
    ttl: Duration,
}

/// Try to take the lease on a recording.
///
/// Returns `None` when the recording is owned by someone else or no longer exists.
pub async fn acquire(db: &Database, id: Uuid, ttl: Duration) -> Result<Option<LeasedRecording>> {
    let repo = db.recordings();
    let token = Uuid::new_v4();

    if !repo.try_acquire_lease(id, token, ttl).await? {
        debug!(recording_id = %id, "Recording is owned by another worker");
        return Ok(None);
    }

    // State may have changed between listing and acquiring
    match repo.get_by_id(id).await? {
        Some(record) => Ok(Some(LeasedRecording { record, token, ttl })),
        None => Ok(None),
    }
}

impl LeasedRecording {
    /// Run `work`, renewing the lease every third of its TTL until it finishes.
    ///
    /// If a renewal finds the lease has passed to another worker, `work` is
    /// dropped at its next await point and an error is returned.
    pub async fn hold_during<T, F>(&self, db: &Database, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let period = (self.ttl / 3)
            .to_std()
            .context("Lease TTL must be positive")?
            .max(MIN_RENEW_INTERVAL);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately and the lease is fresh
        ticker.tick().await;

        tokio::pin!(work);
        loop {
            tokio::select! {
                result = &mut work => return result,
                _ = ticker.tick() => {
                    let renewed = db
                        .recordings()
                        .renew_lease(self.record.id, self.token, self.ttl)
                        .await
                        .context("Failed to renew recording lease")?;
                    if !renewed {
                        bail!("Lost lease on {} while working on it", self.record.filename);
                    }
                    debug!(filename = %self.record.filename, "Renewed recording lease");
                }
            }
        }
    }

    /// Give the lease back. Failure only delays the next run until the TTL passes.
    pub async fn release(self, db: &Database) {
        if let Err(e) = db.recordings().release_lease(self.record.id, self.token).await {
            warn!(
                recording_id = %self.record.id,
                error = %e,
                "Failed to release recording lease"
            );
        }
    }
}
