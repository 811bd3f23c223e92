//! Periodic tick task

use proctor_api::Snapshot;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{TrackError, TrackResult, TrackingEngine};

/// Starts the tick loop that feeds snapshots to the broadcast hub
pub struct Tracker;

impl Tracker {
    /// Spawn the tick loop. Each tick runs on the blocking pool and is
    /// awaited before the next one, so ticks never overlap.
    pub fn start(engine: Arc<TrackingEngine>, snapshots: mpsc::Sender<Snapshot>) -> TrackerHandle {
        let cancel = CancellationToken::new();
        let refresh = Arc::new(Notify::new());

        let join = tokio::spawn(run(engine, snapshots, cancel.clone(), refresh.clone()));

        TrackerHandle {
            cancel,
            refresh,
            join: Some(join),
        }
    }
}

async fn run(
    engine: Arc<TrackingEngine>,
    snapshots: mpsc::Sender<Snapshot>,
    cancel: CancellationToken,
    refresh: Arc<Notify>,
) {
    let mut ticker = interval(engine.config().tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(period = ?engine.config().tick, "Tracker started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
            _ = refresh.notified() => debug!("Refresh requested"),
        }

        let snapshot = match tick_once(&engine).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(error = %e, "Tick failed");
                continue;
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            sent = snapshots.send(snapshot) => {
                if sent.is_err() {
                    info!("Snapshot receiver closed");
                    break;
                }
            }
        }
    }

    info!("Tracker stopped");
}

async fn tick_once(engine: &Arc<TrackingEngine>) -> TrackResult<Snapshot> {
    let engine = engine.clone();
    tokio::task::spawn_blocking(move || engine.tick(proctor_util::now()))
        .await
        .map_err(|e| TrackError::Task(e.to_string()))?
}

/// Running tracker
pub struct TrackerHandle {
    cancel: CancellationToken,
    refresh: Arc<Notify>,
    join: Option<JoinHandle<()>>,
}

impl TrackerHandle {
    /// Run an extra tick as soon as the current one finishes.
    pub fn refresh(&self) {
        self.refresh.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|j| !j.is_finished())
    }

    /// Cancel the loop and wait for it to exit.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(join) = self.join.take()
            && let Err(e) = join.await
        {
            error!(error = %e, "Tracker task panicked");
        }
    }
}

impl Drop for TrackerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
