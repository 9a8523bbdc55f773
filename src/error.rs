//! Run-level errors and per-item failure records
//!
//! A [`LifecycleError`] aborts a whole engine run and is surfaced to the
//! scheduler as a failed run. Anything that goes wrong with a single
//! recording is captured as an [`ItemError`] in the run summary instead.

use serde::Serialize;
use thiserror::Error;

/// Errors that prevent an engine run from starting or completing
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The lifecycle policy is invalid; no part of it is applied
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The managed storage root cannot be reached or written
    #[error("storage root {path} is unavailable: {source}")]
    StorageUnavailable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The record store could not be queried
    #[error("record store unavailable: {0}")]
    Database(#[from] sqlx::Error),

    /// A catalog query needed to plan the run failed
    #[error("catalog query failed: {0:#}")]
    Query(anyhow::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type LifecycleResult<T> = std::result::Result<T, LifecycleError>;

/// A failure isolated to one recording during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemError {
    /// Filename (or source path for the importer) of the affected recording
    pub recording: String,
    pub message: String,
}

impl ItemError {
    pub fn new(recording: impl Into<String>, error: &anyhow::Error) -> Self {
        Self {
            recording: recording.into(),
            message: format!("{:#}", error),
        }
    }
}

impl std::fmt::Display for ItemError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.recording, self.message)
    }
}
