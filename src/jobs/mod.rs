//! Background job scheduling
//!
//! [`LifecycleScheduler`] owns the cron scheduler and the jobs registered on
//! it. Nothing runs until [`LifecycleScheduler::start`] is called, and
//! [`LifecycleScheduler::shutdown`] stops new firings and waits for running
//! jobs to finish their in-flight recordings.

pub mod import;
pub mod integrity;
pub mod retention;
pub mod tiering;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info};

use crate::config::Config;
use crate::db::Database;
use crate::services::{LifecycleServices, ShutdownSignal, ShutdownTrigger};

pub use import::ImportJob;
pub use integrity::IntegrityJob;
pub use retention::RetentionJob;
pub use tiering::TierMigrationJob;

/// A unit of scheduled work
#[async_trait]
pub trait LifecycleJob: Send + Sync + 'static {
    /// Unique name for logging and lookup
    fn name(&self) -> &str;

    /// Run once. An error marks the whole run as failed.
    async fn run(&self) -> Result<()>;
}

type JobFn = dyn Fn() -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync;

/// Adapts a closure into a [`LifecycleJob`]
pub struct FnJob {
    name: String,
    run: Box<JobFn>,
}

impl FnJob {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            run: Box::new(move || Box::pin(f())),
        }
    }
}

#[async_trait]
impl LifecycleJob for FnJob {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> Result<()> {
        (self.run)().await
    }
}

struct ScheduledJob {
    schedule: String,
    job: Arc<dyn LifecycleJob>,
}

/// Owns the cron scheduler and every registered job
pub struct LifecycleScheduler {
    jobs: Vec<ScheduledJob>,
    scheduler: Mutex<Option<JobScheduler>>,
    in_flight: Arc<RwLock<()>>,
    trigger: ShutdownTrigger,
    signal: ShutdownSignal,
}

impl LifecycleScheduler {
    /// Create a scheduler that raises `trigger` on shutdown
    pub fn new(trigger: ShutdownTrigger) -> Self {
        let signal = trigger.signal();
        Self {
            jobs: Vec::new(),
            scheduler: Mutex::new(None),
            in_flight: Arc::new(RwLock::new(())),
            trigger,
            signal,
        }
    }

    /// Register a job on a 6-field (seconds first) cron schedule
    pub fn with_job(mut self, schedule: impl Into<String>, job: Arc<dyn LifecycleJob>) -> Self {
        self.jobs.push(ScheduledJob {
            schedule: schedule.into(),
            job,
        });
        self
    }

    pub fn job_names(&self) -> Vec<&str> {
        self.jobs.iter().map(|j| j.job.name()).collect()
    }

    /// Register every job with the cron scheduler and start it. Calling
    /// `start` on a running scheduler does nothing.
    pub async fn start(&self) -> Result<()> {
        let mut slot = self.scheduler.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        let scheduler = JobScheduler::new().await?;
        for scheduled in &self.jobs {
            let job = scheduled.job.clone();
            let in_flight = self.in_flight.clone();
            let signal = self.signal.clone();
            let cron_job = Job::new_async(scheduled.schedule.as_str(), move |_uuid, _l| {
                let job = job.clone();
                let in_flight = in_flight.clone();
                let signal = signal.clone();
                Box::pin(async move {
                    run_guarded(job.as_ref(), &in_flight, &signal).await;
                })
            })
            .with_context(|| {
                format!("Invalid schedule {:?} for job {}", scheduled.schedule, scheduled.job.name())
            })?;
            scheduler.add(cron_job).await?;
            info!(job = scheduled.job.name(), schedule = %scheduled.schedule, "Scheduled job");
        }

        scheduler.start().await?;
        *slot = Some(scheduler);
        info!(jobs = self.jobs.len(), "Job scheduler started");
        Ok(())
    }

    /// Run a registered job immediately, outside its schedule
    pub async fn run_now(&self, name: &str) -> Result<()> {
        let scheduled = self
            .jobs
            .iter()
            .find(|j| j.job.name() == name)
            .with_context(|| format!("Unknown job {}", name))?;

        let _guard = self.in_flight.read().await;
        scheduled.job.run().await
    }

    /// Stop firing jobs, let running ones finish their in-flight recordings,
    /// and wait for them
    pub async fn shutdown(&self) -> Result<()> {
        self.trigger.trigger();

        if let Some(mut scheduler) = self.scheduler.lock().await.take() {
            scheduler.shutdown().await?;
        }

        // Running jobs hold a read guard until they return
        let _drained = self.in_flight.write().await;
        info!("Job scheduler stopped");
        Ok(())
    }
}

async fn run_guarded(job: &dyn LifecycleJob, in_flight: &RwLock<()>, signal: &ShutdownSignal) {
    if signal.is_shutdown() {
        debug!(job = job.name(), "Shutting down, not starting job");
        return;
    }
    let _guard = in_flight.read().await;
    if signal.is_shutdown() {
        return;
    }

    let started = Instant::now();
    info!(job = job.name(), "Running job");
    match job.run().await {
        Ok(()) => info!(
            job = job.name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Job finished"
        ),
        Err(e) => error!(job = job.name(), error = %format!("{:#}", e), "Job failed"),
    }
}

/// Log count and size of active recordings per tier
pub async fn log_tier_stats(db: &Database) {
    match db.recordings().tier_stats().await {
        Ok(stats) => {
            for s in stats {
                info!(tier = %s.tier, count = s.count, size_bytes = s.size_bytes, "Tier usage");
            }
        }
        Err(e) => error!(error = %e, "Failed to read tier usage"),
    }
}

/// Build the scheduler with every lifecycle job on its configured schedule
pub fn build_scheduler(
    config: &Config,
    db: &Database,
    services: &LifecycleServices,
    trigger: ShutdownTrigger,
) -> LifecycleScheduler {
    LifecycleScheduler::new(trigger)
        .with_job(
            config.import_schedule.clone(),
            Arc::new(ImportJob::new(services.importer.clone())),
        )
        .with_job(
            config.archive_schedule.clone(),
            Arc::new(RetentionJob::new(services.retention.clone(), db.clone())),
        )
        .with_job(
            config.tier_schedule.clone(),
            Arc::new(TierMigrationJob::new(services.tiering.clone(), db.clone())),
        )
        .with_job(
            config.integrity_schedule.clone(),
            Arc::new(IntegrityJob::new(services.integrity.clone())),
        )
}
