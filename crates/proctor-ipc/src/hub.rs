//! Snapshot fan-out
//!
//! A single task owns the subscriber set. Each snapshot is serialized once
//! and offered to every subscriber's bounded queue; a subscriber whose queue
//! is full or closed is dropped, which ends its connection writer.

use proctor_api::Snapshot;
use proctor_util::ClientId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{IpcError, IpcResult};

/// Serialized snapshot line shared by all subscribers
pub type SnapshotLine = Arc<str>;

struct Registration {
    client_id: ClientId,
    queue: mpsc::Sender<SnapshotLine>,
}

/// Cloneable handle for registering subscribers
#[derive(Clone)]
pub struct HubHandle {
    register_tx: mpsc::Sender<Registration>,
    subscribers: Arc<AtomicUsize>,
    queue_size: usize,
}

impl HubHandle {
    /// Register a subscriber. The most recent snapshot, if any, is queued
    /// immediately.
    pub async fn subscribe(&self, client_id: ClientId) -> IpcResult<mpsc::Receiver<SnapshotLine>> {
        let (queue, rx) = mpsc::channel(self.queue_size.max(1));
        self.register_tx
            .send(Registration { client_id, queue })
            .await
            .map_err(|_| IpcError::HubClosed)?;
        Ok(rx)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.load(Ordering::Relaxed)
    }
}

pub struct BroadcastHub {
    handle: HubHandle,
    cancel: CancellationToken,
    join: Option<JoinHandle<()>>,
}

impl BroadcastHub {
    /// Spawn the fan-out task reading from `snapshots`.
    pub fn start(snapshots: mpsc::Receiver<Snapshot>, queue_size: usize) -> Self {
        let (register_tx, register_rx) = mpsc::channel(16);
        let subscribers = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let join = tokio::spawn(fan_out(
            snapshots,
            register_rx,
            subscribers.clone(),
            cancel.clone(),
        ));

        Self {
            handle: HubHandle {
                register_tx,
                subscribers,
                queue_size,
            },
            cancel,
            join: Some(join),
        }
    }

    pub fn handle(&self) -> HubHandle {
        self.handle.clone()
    }

    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(join) = self.join.take()
            && let Err(e) = join.await
        {
            error!(error = %e, "Broadcast hub task panicked");
        }
    }
}

impl Drop for BroadcastHub {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn fan_out(
    mut snapshots: mpsc::Receiver<Snapshot>,
    mut registrations: mpsc::Receiver<Registration>,
    count: Arc<AtomicUsize>,
    cancel: CancellationToken,
) {
    let mut subscribers: HashMap<ClientId, mpsc::Sender<SnapshotLine>> = HashMap::new();
    let mut latest: Option<SnapshotLine> = None;

    info!("Broadcast hub started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            Some(reg) = registrations.recv() => {
                if let Some(line) = &latest
                    && !offer(&reg.client_id, &reg.queue, line)
                {
                    continue;
                }
                debug!(client_id = %reg.client_id, "Subscriber registered");
                subscribers.insert(reg.client_id, reg.queue);
            }

            snapshot = snapshots.recv() => {
                let Some(snapshot) = snapshot else {
                    info!("Snapshot source closed");
                    break;
                };

                let line: SnapshotLine = match serde_json::to_string(&snapshot) {
                    Ok(json) => json.into(),
                    Err(e) => {
                        error!(error = %e, "Failed to serialize snapshot");
                        continue;
                    }
                };

                subscribers.retain(|client_id, queue| offer(client_id, queue, &line));
                latest = Some(line);
            }
        }

        count.store(subscribers.len(), Ordering::Relaxed);
    }

    subscribers.clear();
    count.store(0, Ordering::Relaxed);
    info!("Broadcast hub stopped");
}

/// Queue a line for one subscriber; false means the subscriber is gone.
fn offer(client_id: &ClientId, queue: &mpsc::Sender<SnapshotLine>, line: &SnapshotLine) -> bool {
    match queue.try_send(line.clone()) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!(client_id = %client_id, "Subscriber queue full, dropping subscriber");
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!(client_id = %client_id, "Subscriber went away");
            false
        }
    }
}
