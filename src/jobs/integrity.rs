//! Integrity job

use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;
use tracing::warn;

use super::LifecycleJob;
use crate::services::IntegrityService;

/// Seals new recordings with a checksum and re-verifies sealed ones
pub struct IntegrityJob {
    integrity: Arc<IntegrityService>,
}

impl IntegrityJob {
    pub fn new(integrity: Arc<IntegrityService>) -> Self {
        Self { integrity }
    }
}

#[async_trait]
impl LifecycleJob for IntegrityJob {
    fn name(&self) -> &str {
        "integrity"
    }

    async fn run(&self) -> Result<()> {
        let summary = self.integrity.run().await?;

        for err in &summary.errors {
            warn!(recording = %err.recording, error = %err.message, "Recording not checked");
        }
        // Corruption is surfaced as a failed run so it cannot go unnoticed
        if !summary.mismatched.is_empty() {
            bail!(
                "{} recording(s) failed integrity verification: {}",
                summary.mismatched.len(),
                summary.mismatched.join(", ")
            );
        }
        Ok(())
    }
}
