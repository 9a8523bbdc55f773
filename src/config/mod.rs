//! Application configuration management

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};

use crate::error::{LifecycleError, LifecycleResult};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database path or `sqlite://` URL
    pub database_url: String,

    /// Directory the recording gateway writes finished sessions into
    pub source_path: PathBuf,

    /// Managed storage root all tiers live under
    pub storage_path: PathBuf,

    /// File extension (without dot) identifying recordings
    pub recording_extension: String,

    /// Hours a source file must sit unmodified before import
    pub import_delay_hours: i64,

    /// Age in days after which HOT recordings move to WARM
    pub hot_to_warm_days: i64,

    /// Age in days after which WARM recordings move to COLD
    pub warm_to_cold_days: i64,

    /// Recordings at least this large are gzip-compressed when moving to COLD
    pub compression_threshold_bytes: u64,

    /// Compress recordings when the retention job archives them
    pub archive_enabled: bool,

    /// Age in days after which ACTIVE recordings are archived
    pub retention_days: i64,

    /// Maximum recordings processed in parallel within one run
    pub max_concurrent: usize,

    /// How long a per-recording lease stays valid if its holder dies
    pub lease_ttl_seconds: i64,

    /// Cron expressions (with seconds) for each job
    pub import_schedule: String,
    pub archive_schedule: String,
    pub tier_schedule: String,
    pub integrity_schedule: String,

    /// Recordings examined per integrity run
    pub integrity_batch_size: i64,
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}: {:?}", key, raw)),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_PATH")
            .or_else(|_| env::var("DATABASE_URL"))
            .unwrap_or_else(|_| "./data/replays.db".to_string());

        Ok(Self {
            database_url,

            source_path: env::var("RECORDINGS_SOURCE_PATH")
                .unwrap_or_else(|_| "/guacamole/recordings".to_string())
                .into(),

            storage_path: env::var("REPLAY_STORAGE_PATH")
                .unwrap_or_else(|_| "./data/replays".to_string())
                .into(),

            recording_extension: env::var("RECORDING_EXTENSION")
                .unwrap_or_else(|_| "guac".to_string()),

            import_delay_hours: env_or("REPLAY_IMPORT_DELAY_HOURS", 24)?,

            // 4 months of 30 days, 2 years of 365 days
            hot_to_warm_days: env_or("HOT_TO_WARM_DAYS", 4 * 30)?,
            warm_to_cold_days: env_or("WARM_TO_COLD_DAYS", 2 * 365)?,

            compression_threshold_bytes: env_or("COMPRESSION_THRESHOLD_BYTES", 2 * 1024 * 1024 * 1024)?,

            archive_enabled: env::var("ARCHIVE_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),

            retention_days: env_or("RETENTION_DAYS", 365)?,

            max_concurrent: env_or("MAINTENANCE_MAX_CONCURRENT", 4)?,

            lease_ttl_seconds: env_or("LEASE_TTL_SECONDS", 3600)?,

            import_schedule: env::var("IMPORT_SCHEDULE").unwrap_or_else(|_| "0 */5 * * * *".to_string()),
            archive_schedule: env::var("ARCHIVE_SCHEDULE").unwrap_or_else(|_| "0 0 2 * * *".to_string()),
            tier_schedule: env::var("TIER_SCHEDULE").unwrap_or_else(|_| "0 0 3 * * *".to_string()),
            integrity_schedule: env::var("INTEGRITY_SCHEDULE").unwrap_or_else(|_| "0 0 4 * * 0".to_string()),

            integrity_batch_size: env_or("INTEGRITY_BATCH_SIZE", 500)?,
        })
    }

    /// Validated policy shared by every engine. Fails on any invalid value so
    /// that no run ever applies a partially valid policy.
    pub fn lifecycle_policy(&self) -> LifecycleResult<LifecyclePolicy> {
        LifecyclePolicy {
            source_root: self.source_path.clone(),
            storage_root: self.storage_path.clone(),
            recording_extension: self.recording_extension.clone(),
            import_delay: span("import delay", Duration::try_hours(self.import_delay_hours))?,
            hot_to_warm_age: span("hot-to-warm age", Duration::try_days(self.hot_to_warm_days))?,
            warm_to_cold_age: span("warm-to-cold age", Duration::try_days(self.warm_to_cold_days))?,
            compression_threshold_bytes: self.compression_threshold_bytes,
            archive_compression: self.archive_enabled,
            retention_period: span("retention period", Duration::try_days(self.retention_days))?,
            max_concurrent: self.max_concurrent,
            lease_ttl: span("lease TTL", Duration::try_seconds(self.lease_ttl_seconds))?,
            integrity_batch_size: self.integrity_batch_size,
        }
        .validated()
    }
}

fn span(what: &str, value: Option<Duration>) -> LifecycleResult<Duration> {
    value.ok_or_else(|| LifecycleError::InvalidConfig(format!("{} is out of range", what)))
}

/// Upper bound on every age, delay and TTL in a policy
pub const MAX_POLICY_SPAN_DAYS: i64 = 100 * 365;

/// Constants every engine run works against
#[derive(Debug, Clone)]
pub struct LifecyclePolicy {
    pub source_root: PathBuf,
    pub storage_root: PathBuf,
    pub recording_extension: String,
    pub import_delay: Duration,
    pub hot_to_warm_age: Duration,
    pub warm_to_cold_age: Duration,
    pub compression_threshold_bytes: u64,
    pub archive_compression: bool,
    pub retention_period: Duration,
    pub max_concurrent: usize,
    pub lease_ttl: Duration,
    pub integrity_batch_size: i64,
}

impl LifecyclePolicy {
    /// Check every threshold, returning the policy unchanged when all are valid
    pub fn validated(self) -> LifecycleResult<Self> {
        let invalid = |msg: String| Err(LifecycleError::InvalidConfig(msg));

        let max_span = Duration::days(MAX_POLICY_SPAN_DAYS);
        for (what, value) in [
            ("import delay", self.import_delay),
            ("hot-to-warm age", self.hot_to_warm_age),
            ("warm-to-cold age", self.warm_to_cold_age),
            ("retention period", self.retention_period),
            ("lease TTL", self.lease_ttl),
        ] {
            if value > max_span {
                return invalid(format!(
                    "{} must not exceed {} days, got {} days",
                    what,
                    MAX_POLICY_SPAN_DAYS,
                    value.num_days()
                ));
            }
        }

        if self.recording_extension.trim().is_empty() || self.recording_extension.contains('.') {
            return invalid(format!(
                "recording extension must be a bare extension, got {:?}",
                self.recording_extension
            ));
        }
        if self.import_delay < Duration::zero() {
            return invalid("import delay must not be negative".to_string());
        }
        if self.hot_to_warm_age < Duration::zero() {
            return invalid("hot-to-warm age must not be negative".to_string());
        }
        if self.warm_to_cold_age <= self.hot_to_warm_age {
            return invalid(format!(
                "warm-to-cold age ({} days) must exceed hot-to-warm age ({} days)",
                self.warm_to_cold_age.num_days(),
                self.hot_to_warm_age.num_days()
            ));
        }
        if self.retention_period <= Duration::zero() {
            return invalid("retention period must be positive".to_string());
        }
        if self.max_concurrent == 0 {
            return invalid("max concurrency must be at least 1".to_string());
        }
        if self.lease_ttl <= Duration::zero() {
            return invalid("lease TTL must be positive".to_string());
        }
        if self.integrity_batch_size <= 0 {
            return invalid("integrity batch size must be positive".to_string());
        }

        Ok(self)
    }

    /// The instant `age` before now, for selecting recordings older than a threshold
    pub fn cutoff(&self, age: Duration) -> LifecycleResult<DateTime<Utc>> {
        Utc::now().checked_sub_signed(age).ok_or_else(|| {
            LifecycleError::InvalidConfig(format!("age of {} days is out of range", age.num_days()))
        })
    }
}
