//! Recording lifecycle engines and their building blocks

pub mod group_scope;
pub mod importer;
pub mod integrity;
pub mod lease;
pub mod recording_parser;
pub mod retention;
pub mod storage;
pub mod tiering;
pub mod worker_pool;

use std::sync::Arc;

pub use group_scope::descendant_groups;
pub use importer::{ImportSummary, ImporterService};
pub use integrity::{IntegrityService, IntegrityStatus, IntegritySummary, compute_checksum, verify};
pub use recording_parser::{ParsedRecording, extract_duration, parse_filename};
pub use retention::{DeleteOutcome, RetentionService, RetentionSummary};
pub use storage::StorageLayout;
pub use tiering::{TierMigrationService, TierMigrationSummary};
pub use worker_pool::{ShutdownSignal, ShutdownTrigger, process_concurrent, shutdown_channel};

use crate::config::LifecyclePolicy;
use crate::db::Database;

/// Every engine, wired to one catalog, policy and shutdown signal
#[derive(Clone)]
pub struct LifecycleServices {
    pub importer: Arc<ImporterService>,
    pub tiering: Arc<TierMigrationService>,
    pub retention: Arc<RetentionService>,
    pub integrity: Arc<IntegrityService>,
}

impl LifecycleServices {
    pub fn new(db: Database, policy: LifecyclePolicy, shutdown: ShutdownSignal) -> Self {
        let policy = Arc::new(policy);
        Self {
            importer: Arc::new(ImporterService::new(db.clone(), policy.clone(), shutdown.clone())),
            tiering: Arc::new(TierMigrationService::new(db.clone(), policy.clone(), shutdown.clone())),
            retention: Arc::new(RetentionService::new(db.clone(), policy.clone(), shutdown.clone())),
            integrity: Arc::new(IntegrityService::new(db, policy, shutdown)),
        }
    }
}
