//! End-to-end tests for the recording lifecycle
//!
//! Each test gets its own source directory, storage root and SQLite catalog
//! under a temp dir, and drives the engines the way the scheduler would.

use std::path::{Path, PathBuf};
use std::time::{Duration as StdDuration, SystemTime};

use chrono::{Datelike, Duration, Utc};
use pretty_assertions::assert_eq;
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use uuid::Uuid;

use replay_steward::LifecycleError;
use replay_steward::config::LifecyclePolicy;
use replay_steward::jobs::{IntegrityJob, LifecycleJob};
use replay_steward::db::sqlite_helpers::{datetime_to_str, uuid_to_str};
use replay_steward::db::{Database, RecordingRecord, RecordingStatus, StorageTier};
use replay_steward::services::storage::{TransferMode, compressed_name, transfer};
use replay_steward::services::{
    DeleteOutcome, IntegrityStatus, LifecycleServices, ShutdownSignal, StorageLayout,
    descendant_groups, verify,
};

const ALICE: &str = "alice_1700000000.guac";

struct Harness {
    _dir: TempDir,
    source: PathBuf,
    storage: PathBuf,
    db: Database,
}

impl Harness {
    async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("gateway");
        let storage = dir.path().join("replays");
        std::fs::create_dir_all(&source).unwrap();

        let db = Database::connect_path(&dir.path().join("replays.db")).await.unwrap();
        db.sync_schema().await.unwrap();

        Self {
            _dir: dir,
            source,
            storage,
            db,
        }
    }

    fn policy(&self) -> LifecyclePolicy {
        LifecyclePolicy {
            source_root: self.source.clone(),
            storage_root: self.storage.clone(),
            recording_extension: "guac".to_string(),
            import_delay: Duration::hours(24),
            hot_to_warm_age: Duration::days(120),
            warm_to_cold_age: Duration::days(730),
            compression_threshold_bytes: 1024,
            archive_compression: true,
            retention_period: Duration::days(365),
            max_concurrent: 2,
            lease_ttl: Duration::minutes(10),
            integrity_batch_size: 100,
        }
    }

    fn services(&self) -> LifecycleServices {
        self.services_with(self.policy())
    }

    fn services_with(&self, policy: LifecyclePolicy) -> LifecycleServices {
        LifecycleServices::new(self.db.clone(), policy.validated().unwrap(), ShutdownSignal::never())
    }

    /// Drop a finished recording into the gateway directory, last modified two days ago
    fn write_source(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.source.join(name);
        std::fs::write(&path, content).unwrap();
        let when = SystemTime::now() - StdDuration::from_secs(48 * 3600);
        filetime::set_file_mtime(&path, filetime::FileTime::from_system_time(when)).unwrap();
        path
    }

    async fn import(&self, name: &str, content: &[u8]) -> RecordingRecord {
        self.write_source(name, content);
        let summary = self.services().importer.scan().await.unwrap();
        assert!(summary.errors.is_empty(), "{:?}", summary.errors);
        self.record(name).await
    }

    async fn record(&self, name: &str) -> RecordingRecord {
        self.db.recordings().get_by_filename(name).await.unwrap().unwrap()
    }

    async fn backdate(&self, id: Uuid, days: i64) {
        sqlx::query("UPDATE recordings SET imported_at = ? WHERE id = ?")
            .bind(datetime_to_str(Utc::now() - Duration::days(days)))
            .bind(uuid_to_str(id))
            .execute(self.db.pool())
            .await
            .unwrap();
    }
}

fn session(duration_ms: u64) -> Vec<u8> {
    let mut body = String::from("0.size,1.0,4.1024,3.768;\n");
    let mut t = 0;
    while t < duration_ms {
        body.push_str(&format!("{}.mouse,3.120,2.80;\n", t));
        t += 500;
    }
    body.push_str(&format!("{}.sync;\n", duration_ms));
    body.into_bytes()
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn stored(record: &RecordingRecord) -> PathBuf {
    PathBuf::from(record.stored_path.as_deref().unwrap())
}

fn flip_first_byte(path: &Path) {
    let mut bytes = std::fs::read(path).unwrap();
    bytes[0] ^= 0xff;
    std::fs::write(path, bytes).unwrap();
}

fn flip_middle_byte(path: &Path) {
    let mut bytes = std::fs::read(path).unwrap();
    let middle = bytes.len() / 2;
    bytes[middle] ^= 0x01;
    std::fs::write(path, bytes).unwrap();
}

/// Regular files under `dir`, recursively
fn files_under(dir: &Path) -> Vec<PathBuf> {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect()
}

// ============================================================================
// Import
// ============================================================================

#[tokio::test]
async fn test_import_catalogs_recording() {
    let h = Harness::new().await;
    let source = h.write_source(ALICE, &session(125_000));

    let summary = h.services().importer.scan().await.unwrap();
    assert_eq!(summary.imported, vec![ALICE.to_string()]);

    let record = h.record(ALICE).await;
    assert_eq!(record.owner_username.as_deref(), Some("alice"));
    assert_eq!(record.duration_seconds, 125);
    assert_eq!(record.storage_tier, StorageTier::Hot);
    assert_eq!(record.status, RecordingStatus::Active);
    assert!(!record.is_compressed);
    assert_eq!(record.session_start.unwrap().timestamp(), 1_700_000_000);
    assert_eq!(record.session_end.unwrap().timestamp(), 1_700_000_125);

    let expected = h
        .storage
        .join(record.imported_at.year().to_string())
        .join(format!("{:02}", record.imported_at.month()))
        .join(ALICE);
    assert_eq!(stored(&record), expected);
    assert_eq!(std::fs::read(&expected).unwrap(), session(125_000));
    assert_eq!(record.file_size, session(125_000).len() as i64);

    // Copied, never moved
    assert!(source.exists());
}

#[tokio::test]
async fn test_import_is_idempotent() {
    let h = Harness::new().await;
    h.write_source(ALICE, &session(1_000));

    let first = h.services().importer.scan().await.unwrap();
    assert_eq!(first.imported.len(), 1);

    let second = h.services().importer.scan().await.unwrap();
    assert!(second.imported.is_empty());
    assert_eq!(second.already_imported, 1);
    assert!(second.errors.is_empty());
}

#[tokio::test]
async fn test_concurrent_scans_import_once() {
    let h = Harness::new().await;
    h.write_source(ALICE, &session(3_000));

    let (a, b) = (h.services(), h.services());
    let (first, second) = tokio::join!(a.importer.scan(), b.importer.scan());
    let (first, second) = (first.unwrap(), second.unwrap());

    assert!(first.errors.is_empty() && second.errors.is_empty());
    assert_eq!(first.imported.len() + second.imported.len(), 1);
    assert_eq!(first.already_imported + second.already_imported, 1);

    let record = h.record(ALICE).await;
    assert_eq!(files_under(&h.storage), vec![stored(&record)]);
    assert_eq!(std::fs::read(stored(&record)).unwrap(), session(3_000));
}

#[tokio::test]
async fn test_uppercase_extension_is_parsed() {
    let h = Harness::new().await;
    let name = "ALICE_1700000000.GUAC";
    let record = h.import(name, &session(2_000)).await;

    assert_eq!(record.session_name.as_deref(), Some("ALICE_1700000000"));
    assert_eq!(record.session_start.unwrap().timestamp(), 1_700_000_000);
}

#[tokio::test]
async fn test_import_waits_for_delay() {
    let h = Harness::new().await;
    std::fs::write(h.source.join("bob_1700000001.guac"), session(1_000)).unwrap();
    std::fs::write(h.source.join("notes.txt"), b"not a recording").unwrap();

    let summary = h.services().importer.scan().await.unwrap();
    assert!(summary.imported.is_empty());
    assert_eq!(summary.too_recent, 1);
    assert!(!h.db.recordings().exists_by_filename("bob_1700000001.guac").await.unwrap());
}

#[tokio::test]
async fn test_import_links_known_owner() {
    let h = Harness::new().await;
    let user_id = Uuid::new_v4();
    sqlx::query("INSERT INTO users (id, username) VALUES (?, ?)")
        .bind(uuid_to_str(user_id))
        .bind("alice")
        .execute(h.db.pool())
        .await
        .unwrap();

    let record = h.import(ALICE, &session(2_000)).await;
    assert_eq!(record.owner_id, Some(user_id));
}

#[tokio::test]
async fn test_unwritable_storage_root_fails_run() {
    let h = Harness::new().await;
    // A regular file where the storage directory should be
    std::fs::write(&h.storage, b"").unwrap();

    let result = h.services().importer.scan().await;
    assert!(matches!(result, Err(LifecycleError::StorageUnavailable { .. })));
}

// ============================================================================
// Tier migration
// ============================================================================

#[tokio::test]
async fn test_hot_to_warm_happens_once() {
    let h = Harness::new().await;
    let record = h.import(ALICE, &session(3_000)).await;
    let hot_path = stored(&record);
    h.backdate(record.id, 130).await;

    let summary = h.services().tiering.run().await.unwrap();
    assert_eq!(summary.hot_to_warm, 1);
    assert_eq!(summary.warm_to_cold, 0);

    let moved = h.record(ALICE).await;
    assert_eq!(moved.storage_tier, StorageTier::Warm);
    // Partitioned by session start (2023-11-14)
    assert_eq!(stored(&moved), h.storage.join("warm/2023/11").join(ALICE));
    assert!(stored(&moved).exists());
    assert!(!hot_path.exists());

    let again = h.services().tiering.run().await.unwrap();
    assert_eq!(again.hot_to_warm, 0);
    assert_eq!(h.record(ALICE).await.storage_tier, StorageTier::Warm);
}

#[tokio::test]
async fn test_recent_recordings_stay_hot() {
    let h = Harness::new().await;
    let record = h.import(ALICE, &session(3_000)).await;
    h.backdate(record.id, 30).await;

    let summary = h.services().tiering.run().await.unwrap();
    assert_eq!(summary.hot_to_warm, 0);
    assert_eq!(h.record(ALICE).await.storage_tier, StorageTier::Hot);
}

#[tokio::test]
async fn test_cold_compression_preserves_content() {
    let h = Harness::new().await;
    let content = session(600_000);
    assert!(content.len() > 1024);

    let record = h.import(ALICE, &content).await;
    h.backdate(record.id, 800).await;

    let summary = h.services().tiering.run().await.unwrap();
    assert_eq!(summary.hot_to_warm, 1);
    assert_eq!(summary.warm_to_cold, 1);
    assert_eq!(summary.compressed, 1);

    let cold = h.record(ALICE).await;
    assert_eq!(cold.storage_tier, StorageTier::Cold);
    assert!(cold.is_compressed);
    assert_eq!(cold.original_size, Some(content.len() as i64));
    assert!(cold.file_size < content.len() as i64);
    assert_eq!(stored(&cold), h.storage.join("cold/2023").join(compressed_name(ALICE)));

    let integrity = h.services().integrity.run().await.unwrap();
    assert_eq!(integrity.sealed, 1);

    let sealed = h.record(ALICE).await;
    assert_eq!(sealed.checksum_sha256.as_deref(), Some(sha256_hex(&content).as_str()));
    assert_eq!(verify(&sealed).await.unwrap(), IntegrityStatus::Verified);

    flip_middle_byte(&stored(&sealed));
    let status = verify(&sealed).await.unwrap();
    assert!(matches!(status, IntegrityStatus::Corrupt { .. }), "{:?}", status);
    assert!(!status.is_intact());

    let services = h.services();
    let report = services.integrity.run().await.unwrap();
    assert_eq!(report.mismatched, vec![ALICE.to_string()]);
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert!(IntegrityJob::new(services.integrity.clone()).run().await.is_err());
}

#[tokio::test]
async fn test_small_recordings_are_not_compressed() {
    let h = Harness::new().await;
    let policy = LifecyclePolicy {
        compression_threshold_bytes: 10 * 1024 * 1024,
        ..h.policy()
    };
    let record = h.import(ALICE, &session(2_000)).await;
    h.backdate(record.id, 800).await;

    let summary = h.services_with(policy).tiering.run().await.unwrap();
    assert_eq!(summary.warm_to_cold, 1);
    assert_eq!(summary.compressed, 0);

    let cold = h.record(ALICE).await;
    assert!(!cold.is_compressed);
    assert_eq!(stored(&cold), h.storage.join("cold/2023").join(ALICE));
}

#[tokio::test]
async fn test_leased_recording_is_skipped() {
    let h = Harness::new().await;
    let record = h.import(ALICE, &session(2_000)).await;
    h.backdate(record.id, 130).await;

    let repo = h.db.recordings();
    let holder = Uuid::new_v4();
    assert!(repo.try_acquire_lease(record.id, holder, Duration::minutes(5)).await.unwrap());

    let summary = h.services().tiering.run().await.unwrap();
    assert_eq!(summary.hot_to_warm, 0);
    assert_eq!(summary.skipped, 1);
    assert_eq!(h.record(ALICE).await.storage_tier, StorageTier::Hot);

    repo.release_lease(record.id, holder).await.unwrap();
    let summary = h.services().tiering.run().await.unwrap();
    assert_eq!(summary.hot_to_warm, 1);
}

#[tokio::test]
async fn test_interrupted_move_is_resumed() {
    let h = Harness::new().await;
    let content = session(4_000);
    let record = h.import(ALICE, &content).await;
    let hot_path = stored(&record);
    h.backdate(record.id, 130).await;

    // A previous run published the WARM copy, then died before removing the
    // HOT file and committing
    let layout = StorageLayout::new(&h.storage);
    let warm_path = layout.tier_path(StorageTier::Warm, ALICE, record.partition_date());
    std::fs::create_dir_all(warm_path.parent().unwrap()).unwrap();
    std::fs::copy(&hot_path, &warm_path).unwrap();

    let summary = h.services().tiering.run().await.unwrap();
    assert_eq!(summary.hot_to_warm, 1);
    assert!(summary.errors.is_empty());

    let moved = h.record(ALICE).await;
    assert_eq!(stored(&moved), warm_path);
    assert!(!hot_path.exists());
    assert_eq!(std::fs::read(&warm_path).unwrap(), content);
}

#[tokio::test]
async fn test_interrupted_move_after_source_removal_is_resumed() {
    let h = Harness::new().await;
    let record = h.import(ALICE, &session(4_000)).await;
    let hot_path = stored(&record);
    h.backdate(record.id, 130).await;

    let layout = StorageLayout::new(&h.storage);
    let warm_path = layout.tier_path(StorageTier::Warm, ALICE, record.partition_date());
    std::fs::create_dir_all(warm_path.parent().unwrap()).unwrap();
    std::fs::rename(&hot_path, &warm_path).unwrap();

    let summary = h.services().tiering.run().await.unwrap();
    assert_eq!(summary.hot_to_warm, 1);
    assert_eq!(stored(&h.record(ALICE).await), warm_path);
}

#[tokio::test]
async fn test_interrupted_compression_is_resumed() {
    let h = Harness::new().await;
    let content = session(600_000);
    let record = h.import(ALICE, &content).await;
    let hot_path = stored(&record);
    h.backdate(record.id, 800).await;

    // A previous run published the compressed COLD file, then died
    let layout = StorageLayout::new(&h.storage);
    let cold_path = layout.tier_path(StorageTier::Cold, &compressed_name(ALICE), record.partition_date());
    transfer(&hot_path, &cold_path, TransferMode::Compress).await.unwrap();

    let summary = h.services().tiering.run().await.unwrap();
    assert!(summary.errors.is_empty(), "{:?}", summary.errors);
    assert_eq!(summary.warm_to_cold, 1);
    assert_eq!(summary.compressed, 1);

    let cold = h.record(ALICE).await;
    assert_eq!(cold.storage_tier, StorageTier::Cold);
    assert!(cold.is_compressed);
    assert_eq!(cold.original_size, Some(content.len() as i64));
    assert_eq!(stored(&cold), cold_path);
    assert_eq!(files_under(&h.storage), vec![cold_path]);

    let integrity = h.services().integrity.run().await.unwrap();
    assert_eq!(integrity.sealed, 1);
    assert_eq!(h.record(ALICE).await.checksum_sha256, Some(sha256_hex(&content)));
}

#[tokio::test]
async fn test_overlapping_tier_runs_move_once() {
    let h = Harness::new().await;
    let record = h.import(ALICE, &session(4_000)).await;
    h.backdate(record.id, 130).await;

    let (a, b) = (h.services(), h.services());
    let (first, second) = tokio::join!(a.tiering.run(), b.tiering.run());
    let (first, second) = (first.unwrap(), second.unwrap());

    assert!(first.errors.is_empty() && second.errors.is_empty());
    assert_eq!(first.hot_to_warm + second.hot_to_warm, 1);
    assert_eq!(h.record(ALICE).await.storage_tier, StorageTier::Warm);
    assert_eq!(files_under(&h.storage).len(), 1);
}

#[tokio::test]
async fn test_missing_file_is_isolated_per_item() {
    let h = Harness::new().await;
    let broken = h.import(ALICE, &session(2_000)).await;
    let healthy = h.import("bob_1700000500.guac", &session(2_000)).await;
    h.backdate(broken.id, 130).await;
    h.backdate(healthy.id, 130).await;
    std::fs::remove_file(stored(&broken)).unwrap();

    let summary = h.services().tiering.run().await.unwrap();
    assert_eq!(summary.hot_to_warm, 1);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].recording, ALICE);

    assert_eq!(h.record(ALICE).await.storage_tier, StorageTier::Hot);
    assert_eq!(h.record("bob_1700000500.guac").await.storage_tier, StorageTier::Warm);
}

// ============================================================================
// Integrity
// ============================================================================

#[tokio::test]
async fn test_integrity_reports_tampering_without_mutation() {
    let h = Harness::new().await;
    let content = session(5_000);
    h.import(ALICE, &content).await;

    let first = h.services().integrity.run().await.unwrap();
    assert_eq!(first.sealed, 1);
    let sealed = h.record(ALICE).await;
    assert_eq!(sealed.checksum_sha256, Some(sha256_hex(&content)));

    let second = h.services().integrity.run().await.unwrap();
    assert_eq!(second.verified, 1);
    assert!(second.mismatched.is_empty());

    flip_first_byte(&stored(&sealed));
    assert!(matches!(
        verify(&sealed).await.unwrap(),
        IntegrityStatus::Mismatch { .. }
    ));

    let third = h.services().integrity.run().await.unwrap();
    assert_eq!(third.mismatched, vec![ALICE.to_string()]);
    // The stored checksum still reflects the original content
    assert_eq!(h.record(ALICE).await.checksum_sha256, Some(sha256_hex(&content)));
}

#[tokio::test]
async fn test_integrity_batches_cover_whole_catalog() {
    let h = Harness::new().await;
    let policy = LifecyclePolicy {
        integrity_batch_size: 1,
        ..h.policy()
    };
    h.import(ALICE, &session(1_000)).await;
    h.import("bob_1700000500.guac", &session(2_000)).await;

    let (h, policy) = (&h, &policy);
    let run = move || async move { h.services_with(policy.clone()).integrity.run().await.unwrap() };

    assert_eq!(run().await.sealed, 1);
    assert_eq!(run().await.sealed, 1);
    assert!(h.record(ALICE).await.checksum_sha256.is_some());
    assert!(h.record("bob_1700000500.guac").await.checksum_sha256.is_some());

    // Verification rotates too: each run takes the least recently checked
    let stale = sqlx::query_scalar::<_, String>(
        "SELECT filename FROM recordings ORDER BY last_verified_at ASC LIMIT 1",
    )
    .fetch_one(h.db.pool())
    .await
    .unwrap();
    assert_eq!(stale, ALICE);
    assert_eq!(run().await.verified, 1);
    let stale = sqlx::query_scalar::<_, String>(
        "SELECT filename FROM recordings ORDER BY last_verified_at ASC LIMIT 1",
    )
    .fetch_one(h.db.pool())
    .await
    .unwrap();
    assert_eq!(stale, "bob_1700000500.guac");
}

#[tokio::test]
async fn test_checksum_survives_tier_moves() {
    let h = Harness::new().await;
    let record = h.import(ALICE, &session(600_000)).await;
    h.services().integrity.run().await.unwrap();
    let checksum = h.record(ALICE).await.checksum_sha256;

    h.backdate(record.id, 800).await;
    h.services().tiering.run().await.unwrap();

    let cold = h.record(ALICE).await;
    assert!(cold.is_compressed);
    assert_eq!(cold.checksum_sha256, checksum);
    assert_eq!(verify(&cold).await.unwrap(), IntegrityStatus::Verified);
}

// ============================================================================
// Retention and deletion
// ============================================================================

#[tokio::test]
async fn test_retention_archives_and_compresses_in_place() {
    let h = Harness::new().await;
    let content = session(10_000);
    let record = h.import(ALICE, &content).await;
    let hot_path = stored(&record);
    h.backdate(record.id, 400).await;

    let summary = h.services().retention.run().await.unwrap();
    assert_eq!(summary.archived, 1);
    assert_eq!(summary.compressed, 1);

    let archived = h.record(ALICE).await;
    assert_eq!(archived.status, RecordingStatus::Archived);
    assert!(archived.is_compressed);
    assert_eq!(stored(&archived), hot_path.with_file_name(compressed_name(ALICE)));
    assert!(!hot_path.exists());
    assert_eq!(archived.original_size, Some(content.len() as i64));

    // Archived recordings are never picked up again
    let again = h.services().retention.run().await.unwrap();
    assert_eq!(again.archived, 0);
    let tiering = h.services().tiering.run().await.unwrap();
    assert_eq!(tiering.hot_to_warm + tiering.warm_to_cold, 0);
    assert_eq!(h.record(ALICE).await.storage_tier, StorageTier::Hot);
}

#[tokio::test]
async fn test_retention_without_compression() {
    let h = Harness::new().await;
    let policy = LifecyclePolicy {
        archive_compression: false,
        ..h.policy()
    };
    let record = h.import(ALICE, &session(1_000)).await;
    h.backdate(record.id, 400).await;

    let summary = h.services_with(policy).retention.run().await.unwrap();
    assert_eq!(summary.archived, 1);
    assert_eq!(summary.compressed, 0);

    let archived = h.record(ALICE).await;
    assert_eq!(archived.status, RecordingStatus::Archived);
    assert_eq!(stored(&archived), stored(&record));
}

#[tokio::test]
async fn test_hard_delete_removes_file_and_record() {
    let h = Harness::new().await;
    let record = h.import(ALICE, &session(1_000)).await;
    let path = stored(&record);

    let outcome = h.services().retention.delete(record.id, true).await.unwrap();
    assert_eq!(outcome, DeleteOutcome::HardDeleted);
    assert!(!path.exists());
    assert!(h.db.recordings().get_by_id(record.id).await.unwrap().is_none());

    let again = h.services().retention.delete(record.id, true).await.unwrap();
    assert_eq!(again, DeleteOutcome::NotFound);
}

#[tokio::test]
async fn test_soft_delete_keeps_file() {
    let h = Harness::new().await;
    let record = h.import(ALICE, &session(1_000)).await;

    let outcome = h.services().retention.delete(record.id, false).await.unwrap();
    assert_eq!(outcome, DeleteOutcome::SoftDeleted);

    let deleted = h.record(ALICE).await;
    assert_eq!(deleted.status, RecordingStatus::Deleted);
    assert!(stored(&deleted).exists());

    let again = h.services().retention.delete(record.id, false).await.unwrap();
    assert_eq!(again, DeleteOutcome::AlreadyTerminal(RecordingStatus::Deleted));

    // Deleted recordings are out of retention and integrity scope
    h.backdate(record.id, 400).await;
    assert_eq!(h.services().retention.run().await.unwrap().archived, 0);
    assert_eq!(h.services().integrity.run().await.unwrap().sealed, 0);
}

#[tokio::test]
async fn test_delete_of_unknown_recording() {
    let h = Harness::new().await;
    let outcome = h.services().retention.delete(Uuid::new_v4(), true).await.unwrap();
    assert_eq!(outcome, DeleteOutcome::NotFound);
}

#[tokio::test]
async fn test_delete_of_busy_recording_fails() {
    let h = Harness::new().await;
    let record = h.import(ALICE, &session(1_000)).await;
    h.db.recordings()
        .try_acquire_lease(record.id, Uuid::new_v4(), Duration::minutes(5))
        .await
        .unwrap();

    assert!(h.services().retention.delete(record.id, true).await.is_err());
    assert!(stored(&record).exists());
}

// ============================================================================
// Group scope
// ============================================================================

#[tokio::test]
async fn test_group_scope_from_catalog() {
    let h = Harness::new().await;
    let groups = h.db.groups();
    let ops = groups.add_group("ops").await.unwrap();
    let sre = groups.add_group("sre").await.unwrap();
    let oncall = groups.add_group("oncall").await.unwrap();
    let finance = groups.add_group("finance").await.unwrap();
    groups.add_child(ops, sre).await.unwrap();
    groups.add_child(sre, oncall).await.unwrap();
    groups.add_child(oncall, ops).await.unwrap();

    let adjacency = groups.adjacency().await.unwrap();
    let mut scope = descendant_groups(&adjacency, &[sre]);
    scope.sort();
    let mut expected = vec![ops, sre, oncall];
    expected.sort();
    assert_eq!(scope, expected);
    assert!(!scope.contains(&finance));
}
