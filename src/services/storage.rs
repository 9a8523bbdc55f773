//! Managed storage layout and file transfer protocol
//!
//! Layout under the storage root:
//! - import / HOT: `<root>/<year>/<month>/<filename>`
//! - WARM: `<root>/warm/<year>/<month>/<filename>`
//! - COLD: `<root>/cold/<year>/<filename>`
//!
//! Compressed recordings carry an extra `.gz` suffix.
//!
//! Files are never renamed across directories. A transfer writes a uniquely
//! named partial file next to the destination, verifies it, then renames it
//! into place within the same directory. A file at a final destination path
//! is therefore always complete, which is what lets an interrupted
//! relocation be resumed instead of redone.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Datelike, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::StorageTier;
use crate::error::{LifecycleError, LifecycleResult};

/// Suffix appended to the stored filename of compressed recordings
pub const COMPRESSED_SUFFIX: &str = "gz";

/// gzip level used for every compressed recording
const COMPRESSION_LEVEL: u32 = 6;

const IO_BUFFER_BYTES: usize = 64 * 1024;

/// Computes where recordings live under the storage root
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Placement for a freshly imported recording, partitioned by import time
    pub fn import_path(&self, filename: &str, imported_at: DateTime<Utc>) -> PathBuf {
        self.tier_path(StorageTier::Hot, filename, imported_at)
    }

    /// Placement of `filename` in `tier`, partitioned by `date`
    pub fn tier_path(&self, tier: StorageTier, filename: &str, date: DateTime<Utc>) -> PathBuf {
        let year = date.year().to_string();
        let month = format!("{:02}", date.month());
        match tier {
            StorageTier::Hot => self.root.join(year).join(month).join(filename),
            StorageTier::Warm => self.root.join("warm").join(year).join(month).join(filename),
            StorageTier::Cold => self.root.join("cold").join(year).join(filename),
        }
    }

    /// Check the root exists (creating it if needed) and accepts writes
    pub async fn ensure_root(&self) -> LifecycleResult<()> {
        let root = self.root.clone();
        let unavailable = |source: io::Error| LifecycleError::StorageUnavailable {
            path: root.display().to_string(),
            source,
        };

        tokio::fs::create_dir_all(&self.root).await.map_err(unavailable)?;

        let probe = self.root.join(format!(".probe-{}", Uuid::new_v4()));
        tokio::fs::write(&probe, b"ok").await.map_err(unavailable)?;
        tokio::fs::remove_file(&probe).await.map_err(unavailable)?;
        Ok(())
    }
}

/// Stored filename of a compressed recording
pub fn compressed_name(filename: &str) -> String {
    format!("{}.{}", filename, COMPRESSED_SUFFIX)
}

/// How a transfer writes its destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Copy,
    Compress,
}

/// Result of a completed transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOutcome {
    /// Logical (uncompressed) bytes read from the source
    pub source_bytes: u64,
    /// Bytes now on disk at the destination
    pub dest_bytes: u64,
}

/// Write `source` to `dest` (plain copy or gzip), verify it, and publish it
/// atomically. The source is left untouched.
pub async fn transfer(source: &Path, dest: &Path, mode: TransferMode) -> Result<TransferOutcome> {
    let source = source.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || transfer_blocking(&source, &dest, mode))
        .await
        .context("Transfer task panicked")?
}

fn partial_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    dest.with_file_name(format!(".{}.{}.partial", name, Uuid::new_v4().simple()))
}

fn transfer_blocking(source: &Path, dest: &Path, mode: TransferMode) -> Result<TransferOutcome> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    let partial = partial_path(dest);
    let result = write_and_verify(source, &partial, mode).and_then(|outcome| {
        fs::rename(&partial, dest).with_context(|| {
            format!("Failed to publish {} as {}", partial.display(), dest.display())
        })?;
        Ok(outcome)
    });

    if result.is_err() {
        let _ = fs::remove_file(&partial);
    }
    result
}

fn write_and_verify(source: &Path, partial: &Path, mode: TransferMode) -> Result<TransferOutcome> {
    let input = File::open(source).with_context(|| format!("Failed to open {}", source.display()))?;
    let source_len = input.metadata()?.len();
    let mut reader = BufReader::with_capacity(IO_BUFFER_BYTES, input);

    let output = File::create(partial)
        .with_context(|| format!("Failed to create {}", partial.display()))?;
    let mut writer = BufWriter::with_capacity(IO_BUFFER_BYTES, output);

    let copied = match mode {
        TransferMode::Copy => {
            let copied = io::copy(&mut reader, &mut writer)?;
            writer.flush()?;
            writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
            copied
        }
        TransferMode::Compress => {
            let mut encoder = GzEncoder::new(writer, Compression::new(COMPRESSION_LEVEL));
            let copied = io::copy(&mut reader, &mut encoder)?;
            let mut writer = encoder.finish()?;
            writer.flush()?;
            writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
            copied
        }
    };

    if copied != source_len {
        bail!(
            "Source {} changed during transfer ({} bytes expected, {} read)",
            source.display(),
            source_len,
            copied
        );
    }

    let logical_len = match mode {
        TransferMode::Copy => fs::metadata(partial)?.len(),
        TransferMode::Compress => decoded_len(partial)?,
    };
    if logical_len != source_len {
        bail!(
            "Verification failed for {}: wrote {} logical bytes, source has {}",
            partial.display(),
            logical_len,
            source_len
        );
    }

    let dest_bytes = fs::metadata(partial)?.len();
    debug!(
        source = %source.display(),
        mode = ?mode,
        source_bytes = source_len,
        dest_bytes,
        "Transfer written and verified"
    );

    Ok(TransferOutcome {
        source_bytes: source_len,
        dest_bytes,
    })
}

/// Number of bytes a gzip file decodes to
fn decoded_len(path: &Path) -> Result<u64> {
    let mut reader = open_logical(path, true)?;
    Ok(io::copy(&mut reader, &mut io::sink())?)
}

/// Open a stored recording for reading its logical (uncompressed) content
pub fn open_logical(path: &Path, compressed: bool) -> Result<Box<dyn Read + Send>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let reader = BufReader::with_capacity(IO_BUFFER_BYTES, file);
    if compressed {
        Ok(Box::new(GzDecoder::new(reader)))
    } else {
        Ok(Box::new(reader))
    }
}

/// Size of a file, or `None` when it does not exist
pub async fn file_len(path: &Path) -> io::Result<Option<u64>> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(Some(meta.len())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Remove a file, treating "already gone" as success. Returns whether it existed.
pub async fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Result of a copy-verify-delete relocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    pub stored_path: PathBuf,
    /// Bytes on disk at the new location
    pub file_size: u64,
    /// Logical size of the source, when this call performed the transfer
    pub source_bytes: Option<u64>,
    /// The destination was already complete from an interrupted earlier attempt
    pub resumed: bool,
}

/// Move a recording from `source` to `dest`: write and verify the destination,
/// then remove the source. The caller commits the new pointer afterwards.
///
/// If a previous attempt died after publishing the destination, the existing
/// destination is reused and only the remaining steps run.
pub async fn relocate(source: &Path, dest: &Path, mode: TransferMode) -> Result<Relocation> {
    if source == dest {
        bail!("Relocation source and destination are both {}", dest.display());
    }

    let source_len = file_len(source).await?;
    let dest_len = file_len(dest).await?;

    let (source_bytes, resumed) = match (source_len, dest_len) {
        (Some(_), None) => {
            let outcome = transfer(source, dest, mode).await?;
            (Some(outcome.source_bytes), false)
        }
        (Some(_), Some(_)) => {
            info!(
                source = %source.display(),
                dest = %dest.display(),
                "Destination already complete, finishing interrupted relocation"
            );
            (None, true)
        }
        (None, Some(_)) => {
            info!(
                dest = %dest.display(),
                "Source already removed, committing interrupted relocation"
            );
            (None, true)
        }
        (None, None) => bail!("Stored file {} is missing", source.display()),
    };

    remove_if_exists(source)
        .await
        .with_context(|| format!("Failed to remove source {}", source.display()))?;

    let file_size = file_len(dest)
        .await?
        .with_context(|| format!("Destination {} vanished after transfer", dest.display()))?;

    Ok(Relocation {
        stored_path: dest.to_path_buf(),
        file_size,
        source_bytes,
        resumed,
    })
}
