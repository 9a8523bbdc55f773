//! Recording import job

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use super::LifecycleJob;
use crate::services::ImporterService;

/// Imports finished recordings from the gateway's source directory
pub struct ImportJob {
    importer: Arc<ImporterService>,
}

impl ImportJob {
    pub fn new(importer: Arc<ImporterService>) -> Self {
        Self { importer }
    }
}

#[async_trait]
impl LifecycleJob for ImportJob {
    fn name(&self) -> &str {
        "import"
    }

    async fn run(&self) -> Result<()> {
        let summary = self.importer.scan().await?;

        for err in &summary.errors {
            warn!(recording = %err.recording, error = %err.message, "Recording not imported");
        }
        if !summary.imported.is_empty() {
            info!(files = ?summary.imported, "New recordings imported");
        }
        Ok(())
    }
}
