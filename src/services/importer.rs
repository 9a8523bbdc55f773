//! Recording importer
//!
//! Walks the gateway's source directory for finished recordings, copies each
//! new one into managed HOT storage and catalogs it. Source files are never
//! moved or deleted. A file is only considered finished once it has not been
//! modified for the configured import delay.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use super::recording_parser::{extract_duration, parse_filename};
use super::storage::{StorageLayout, TransferMode, file_len, remove_if_exists, transfer};
use super::worker_pool::{ShutdownSignal, process_concurrent};
use crate::config::LifecyclePolicy;
use crate::db::{CreateRecording, Database};
use crate::error::{ItemError, LifecycleError, LifecycleResult};

/// A finished recording found in the source directory
#[derive(Debug, Clone)]
struct SourceFile {
    path: PathBuf,
    filename: String,
}

/// Totals from one import scan
#[derive(Debug, Default, Clone, Serialize)]
pub struct ImportSummary {
    /// Filenames cataloged by this scan
    pub imported: Vec<String>,
    pub already_imported: usize,
    /// Matching files still inside the import delay
    pub too_recent: usize,
    /// Files left for the next scan because shutdown was requested
    pub skipped: usize,
    pub errors: Vec<ItemError>,
}

enum ImportOutcome {
    Imported,
    AlreadyImported,
}

/// Imports finished recordings from the source directory
pub struct ImporterService {
    db: Database,
    policy: Arc<LifecyclePolicy>,
    layout: StorageLayout,
    shutdown: ShutdownSignal,
}

impl ImporterService {
    pub fn new(db: Database, policy: Arc<LifecyclePolicy>, shutdown: ShutdownSignal) -> Self {
        let layout = StorageLayout::new(policy.storage_root.clone());
        Self {
            db,
            policy,
            layout,
            shutdown,
        }
    }

    /// Scan the source directory once and import every eligible recording
    pub async fn scan(&self) -> LifecycleResult<ImportSummary> {
        let cutoff = self.policy.cutoff(self.policy.import_delay)?;
        self.db.ping().await?;
        self.layout.ensure_root().await?;

        let source_root = self.policy.source_root.clone();
        if !tokio::fs::try_exists(&source_root).await.unwrap_or(false) {
            warn!(path = %source_root.display(), "Recording source directory not found, nothing to import");
            return Ok(ImportSummary::default());
        }

        let extension = self.policy.recording_extension.clone();
        let (candidates, too_recent) = tokio::task::spawn_blocking(move || {
            discover(&source_root, &extension, cutoff)
        })
        .await
        .map_err(|e| LifecycleError::Query(anyhow::Error::new(e).context("Source walk panicked")))?;

        info!(
            candidates = candidates.len(),
            too_recent,
            source = %self.policy.source_root.display(),
            "Scanning for new recordings"
        );

        let db = self.db.clone();
        let policy = self.policy.clone();
        let layout = self.layout.clone();
        let outcome = process_concurrent(
            candidates,
            self.policy.max_concurrent,
            &self.shutdown,
            move |file: SourceFile| {
                let db = db.clone();
                let policy = policy.clone();
                let layout = layout.clone();
                async move {
                    let result = import_one(&db, &policy, &layout, &file).await;
                    (file, result)
                }
            },
        )
        .await;

        let mut summary = ImportSummary {
            too_recent,
            skipped: outcome.skipped,
            ..Default::default()
        };
        for (file, result) in outcome.results {
            match result {
                Ok(ImportOutcome::Imported) => summary.imported.push(file.filename),
                Ok(ImportOutcome::AlreadyImported) => summary.already_imported += 1,
                Err(e) => {
                    error!(path = %file.path.display(), error = %e, "Failed to import recording");
                    summary
                        .errors
                        .push(ItemError::new(file.path.display().to_string(), &e));
                }
            }
        }

        info!(
            imported = summary.imported.len(),
            already_imported = summary.already_imported,
            errors = summary.errors.len(),
            "Import scan complete"
        );
        Ok(summary)
    }
}

/// Walk the source tree for recordings last modified at or before `cutoff`.
/// Returns the candidates and the number of matching files that are too recent.
fn discover(root: &Path, extension: &str, cutoff: DateTime<Utc>) -> (Vec<SourceFile>, usize) {
    let mut found = Vec::new();
    let mut too_recent = 0;

    for entry in WalkDir::new(root).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable source entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let matches_extension = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(extension));
        if !matches_extension {
            continue;
        }

        let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
            warn!(path = %path.display(), "Skipping recording with non UTF-8 name");
            continue;
        };

        let modified = match entry.metadata().map(|m| m.modified()) {
            Ok(Ok(modified)) => DateTime::<Utc>::from(modified),
            Ok(Err(e)) => {
                warn!(path = %path.display(), error = %e, "Cannot read modification time");
                continue;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot read metadata");
                continue;
            }
        };

        if modified > cutoff {
            debug!(path = %path.display(), "Recording still inside import delay");
            too_recent += 1;
            continue;
        }

        found.push(SourceFile {
            path: path.to_path_buf(),
            filename: filename.to_string(),
        });
    }

    (found, too_recent)
}

async fn import_one(
    db: &Database,
    policy: &LifecyclePolicy,
    layout: &StorageLayout,
    file: &SourceFile,
) -> Result<ImportOutcome> {
    let repo = db.recordings();
    if repo.exists_by_filename(&file.filename).await? {
        return Ok(ImportOutcome::AlreadyImported);
    }

    let parsed = parse_filename(&file.filename, &policy.recording_extension);
    let imported_at = Utc::now();
    let dest = layout.import_path(&file.filename, imported_at);

    transfer(&file.path, &dest, TransferMode::Copy)
        .await
        .with_context(|| format!("Failed to copy into {}", dest.display()))?;

    let file_size = file_len(&dest)
        .await?
        .with_context(|| format!("Copied file {} disappeared", dest.display()))?;
    let duration_seconds = extract_duration(&dest).await;

    let owner_id = match parsed.owner_username.as_deref() {
        Some(username) => repo.find_user_id(username).await?,
        None => None,
    };
    let session_end = parsed
        .session_start
        .filter(|_| duration_seconds > 0)
        .map(|start| start + Duration::seconds(duration_seconds));

    let created = repo
        .create_if_absent(CreateRecording {
            filename: file.filename.clone(),
            original_path: Some(file.path.to_string_lossy().to_string()),
            stored_path: dest.to_string_lossy().to_string(),
            session_name: Some(parsed.session_name.clone()),
            owner_id,
            owner_username: parsed.owner_username.clone(),
            client_ip: parsed.client_ip.clone(),
            file_size: file_size as i64,
            duration_seconds,
            session_start: parsed.session_start,
            session_end,
            imported_at,
            metadata: parsed.to_metadata(),
        })
        .await?;

    match created {
        Some(record) => {
            info!(
                filename = %record.filename,
                recording_id = %record.id,
                owner = ?record.owner_username,
                duration_seconds,
                file_size,
                stored_path = %dest.display(),
                "Imported recording"
            );
            Ok(ImportOutcome::Imported)
        }
        None => {
            // Another scan cataloged it first; drop our copy unless it is the one in use
            let winner = repo.get_by_filename(&file.filename).await?;
            let in_use = winner
                .and_then(|r| r.stored_path)
                .is_some_and(|p| Path::new(&p) == dest);
            if !in_use {
                remove_if_exists(&dest).await?;
            }
            debug!(filename = %file.filename, "Recording imported concurrently");
            Ok(ImportOutcome::AlreadyImported)
        }
    }
}
