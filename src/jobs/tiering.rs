//! Storage tier migration job

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

use super::{LifecycleJob, log_tier_stats};
use crate::db::Database;
use crate::services::TierMigrationService;

/// Moves aged recordings from HOT to WARM to COLD
pub struct TierMigrationJob {
    tiering: Arc<TierMigrationService>,
    db: Database,
}

impl TierMigrationJob {
    pub fn new(tiering: Arc<TierMigrationService>, db: Database) -> Self {
        Self { tiering, db }
    }
}

#[async_trait]
impl LifecycleJob for TierMigrationJob {
    fn name(&self) -> &str {
        "tier_migration"
    }

    async fn run(&self) -> Result<()> {
        let summary = self.tiering.run().await?;

        for err in &summary.errors {
            warn!(recording = %err.recording, error = %err.message, "Recording not migrated");
        }
        log_tier_stats(&self.db).await;
        Ok(())
    }
}
