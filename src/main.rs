//! Replay Steward - session recording lifecycle service
//!
//! Runs the import, tier migration, retention and integrity jobs on their
//! cron schedules until interrupted.

use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use replay_steward::cli::{CliOptions, Command};
use replay_steward::config::Config;
use replay_steward::db::Database;
use replay_steward::jobs::build_scheduler;
use replay_steward::services::{LifecycleServices, shutdown_channel};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let options = CliOptions::from_args();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "replay_steward=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!("Starting Replay Steward");

    let config = Config::from_env()?;
    // Refuse to start on an invalid policy rather than apply part of it
    let policy = config.lifecycle_policy()?;
    tracing::info!(
        source = %policy.source_root.display(),
        storage = %policy.storage_root.display(),
        max_concurrent = policy.max_concurrent,
        "Configuration loaded"
    );

    let db = Database::connect_with_retry(&config.database_url, Duration::from_secs(5)).await?;
    db.sync_schema().await?;
    tracing::info!("Database connected");

    let (trigger, signal) = shutdown_channel();
    let services = LifecycleServices::new(db.clone(), policy, signal);

    if let Command::Delete { id, hard } = options.command {
        let outcome = services.retention.delete(id, hard).await?;
        tracing::info!(recording_id = %id, hard, outcome = ?outcome, "Delete finished");
        return Ok(());
    }

    let scheduler = build_scheduler(&config, &db, &services, trigger);

    if let Command::RunOnce(job) = options.command {
        let names: Vec<String> = if job == "all" {
            scheduler.job_names().into_iter().map(str::to_string).collect()
        } else {
            vec![job]
        };
        for name in names {
            scheduler
                .run_now(&name)
                .await
                .with_context(|| format!("Job {} failed", name))?;
        }
        return Ok(());
    }

    scheduler.start().await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested, waiting for running jobs");

    scheduler.shutdown().await?;
    tracing::info!("Replay Steward stopped");
    Ok(())
}
