//! Bounded concurrent processing with cooperative shutdown
//!
//! Every engine run hands its work items to [`process_concurrent`]. At most
//! `max_concurrent` items run at once. Once shutdown is requested, items that
//! have not started yet are skipped while items already in flight finish.

use std::future::Future;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::{Semaphore, watch};
use tracing::debug;

/// Receiving side of the shutdown flag, cheap to clone into every worker
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// A signal that is never raised, for one-off runs
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been requested
    pub async fn wait(&mut self) {
        // An error means the trigger was dropped, which can no longer raise the flag
        let _ = self.rx.wait_for(|raised| *raised).await;
    }
}

/// Sending side of the shutdown flag
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Create a linked shutdown trigger and signal
pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, ShutdownSignal { rx })
}

/// Results of one bounded batch
#[derive(Debug)]
pub struct PoolOutcome<R> {
    /// Results of items that ran, in completion order
    pub results: Vec<R>,
    /// Items never started because shutdown was requested
    pub skipped: usize,
}

/// Process items with at most `max_concurrent` in flight.
///
/// The shutdown flag is checked right before each item starts.
pub async fn process_concurrent<T, F, Fut, R>(
    items: impl IntoIterator<Item = T>,
    max_concurrent: usize,
    shutdown: &ShutdownSignal,
    processor: F,
) -> PoolOutcome<R>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = R> + Send,
    R: Send + 'static,
{
    let max_concurrent = max_concurrent.max(1);
    let semaphore = Arc::new(Semaphore::new(max_concurrent));

    let outcomes: Vec<Option<R>> = stream::iter(items)
        .map(|item| {
            let sem = semaphore.clone();
            let proc = processor.clone();
            let shutdown = shutdown.clone();
            async move {
                // The semaphore is never closed
                let _permit = sem.acquire().await.ok()?;
                if shutdown.is_shutdown() {
                    return None;
                }
                Some(proc(item).await)
            }
        })
        .buffer_unordered(max_concurrent)
        .collect()
        .await;

    let total = outcomes.len();
    let results: Vec<R> = outcomes.into_iter().flatten().collect();
    let skipped = total - results.len();
    if skipped > 0 {
        debug!(skipped, "Shutdown requested, remaining items not started");
    }

    PoolOutcome { results, skipped }
}
