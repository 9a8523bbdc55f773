//! Retention (archival) job

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

use super::{LifecycleJob, log_tier_stats};
use crate::db::Database;
use crate::services::RetentionService;

/// Archives recordings past the retention period
pub struct RetentionJob {
    retention: Arc<RetentionService>,
    db: Database,
}

impl RetentionJob {
    pub fn new(retention: Arc<RetentionService>, db: Database) -> Self {
        Self { retention, db }
    }
}

#[async_trait]
impl LifecycleJob for RetentionJob {
    fn name(&self) -> &str {
        "retention"
    }

    async fn run(&self) -> Result<()> {
        let summary = self.retention.run().await?;

        for err in &summary.errors {
            warn!(recording = %err.recording, error = %err.message, "Recording not archived");
        }
        log_tier_stats(&self.db).await;
        Ok(())
    }
}
