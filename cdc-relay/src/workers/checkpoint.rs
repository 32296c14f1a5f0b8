use std::collections::BTreeMap;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, warn};

use crate::concurrency::signal::{SignalRx, SignalTx, create_signal};
use crate::error::{RelayError, RelayResult};
use crate::metrics::RelayStats;
use crate::state::stream::{StateUpdateListener, StateUpdatedEvent};
use crate::store::base::CheckpointStore;
use crate::types::{PartitionId, PartitionPosition};
use crate::workers::base::{Worker, WorkerHandle};

#[derive(Debug, Default)]
struct Batch {
    full: Option<Arc<[PartitionPosition]>>,
    partials: BTreeMap<PartitionId, PartitionPosition>,
}

impl Batch {
    fn is_empty(&self) -> bool {
        self.full.is_none() && self.partials.is_empty()
    }
}

/// Checkpoint requests waiting to be written by the [`CheckpointWorker`].
///
/// At most one full checkpoint is pending at any time. A newer full request replaces the
/// pending one and supersedes every pending partial request, since it already contains those
/// positions. Partial requests are coalesced per partition, the latest position wins.
#[derive(Debug, Clone, Default)]
pub struct PendingCheckpoints {
    batch: Arc<Mutex<Batch>>,
    notify: Arc<Notify>,
}

impl PendingCheckpoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the checkpoint request carried by `event` and wakes the worker.
    pub fn push(&self, event: StateUpdatedEvent) {
        {
            let mut batch = self.lock();
            match event {
                StateUpdatedEvent::Full { positions } => {
                    batch.full = Some(positions);
                    batch.partials.clear();
                }
                StateUpdatedEvent::Partial {
                    partition,
                    position,
                } => {
                    batch.partials.insert(partition, position);
                }
            }
        }

        self.notify.notify_one();
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Returns whether a full checkpoint is waiting to be written.
    pub fn has_pending_full(&self) -> bool {
        self.lock().full.is_some()
    }

    /// Returns the number of partitions with a pending partial checkpoint.
    pub fn pending_partials(&self) -> usize {
        self.lock().partials.len()
    }

    fn take(&self) -> Batch {
        mem::take(&mut *self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, Batch> {
        self.batch.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Listener turning state updates into pending checkpoint requests.
///
/// It never performs I/O, so it can run inside the state write that produced the event.
#[derive(Debug, Clone)]
pub struct CheckpointListener {
    pending: PendingCheckpoints,
}

impl CheckpointListener {
    pub fn new(pending: PendingCheckpoints) -> Self {
        Self { pending }
    }
}

impl StateUpdateListener for CheckpointListener {
    fn on_update(&mut self, event: StateUpdatedEvent) {
        self.pending.push(event);
    }
}

#[derive(Debug)]
pub struct CheckpointWorkerHandle {
    handle: Option<JoinHandle<RelayResult<()>>>,
    stop_tx: SignalTx,
    pending: PendingCheckpoints,
}

impl CheckpointWorkerHandle {
    /// Asks the worker to write what is still pending and exit.
    pub fn stop(&self) {
        // The worker may already be gone, in which case there is nothing left to stop.
        let _ = self.stop_tx.send(());
    }
}

impl WorkerHandle<PendingCheckpoints> for CheckpointWorkerHandle {
    fn state(&self) -> PendingCheckpoints {
        self.pending.clone()
    }

    async fn wait(mut self) -> RelayResult<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        handle.await.map_err(RelayError::from)?
    }
}

/// Background worker writing pending checkpoints to a [`CheckpointStore`].
///
/// Write failures are logged and counted but never stop the worker, the next request simply
/// tries again.
#[derive(Debug)]
pub struct CheckpointWorker<S> {
    store: S,
    pending: PendingCheckpoints,
    stats: RelayStats,
}

impl<S> CheckpointWorker<S> {
    pub fn new(store: S, pending: PendingCheckpoints, stats: RelayStats) -> Self {
        Self {
            store,
            pending,
            stats,
        }
    }
}

impl<S> Worker<CheckpointWorkerHandle, PendingCheckpoints> for CheckpointWorker<S>
where
    S: CheckpointStore + Clone + Send + Sync + 'static,
{
    type Error = RelayError;

    async fn start(self) -> Result<CheckpointWorkerHandle, Self::Error> {
        info!("starting checkpoint worker");

        let (stop_tx, stop_rx) = create_signal();
        let pending = self.pending.clone();

        let checkpoint_worker_span = tracing::info_span!("checkpoint_worker");
        let checkpoint_worker = run_checkpoint_loop(self.store, self.pending, self.stats, stop_rx)
            .instrument(checkpoint_worker_span);

        let handle = tokio::spawn(checkpoint_worker);

        Ok(CheckpointWorkerHandle {
            handle: Some(handle),
            stop_tx,
            pending,
        })
    }
}

async fn run_checkpoint_loop<S>(
    store: S,
    pending: PendingCheckpoints,
    stats: RelayStats,
    mut stop_rx: SignalRx,
) -> RelayResult<()>
where
    S: CheckpointStore,
{
    loop {
        tokio::select! {
            biased;

            _ = stop_rx.changed() => {
                debug!("checkpoint worker stopping, writing pending checkpoints");
                while flush_pending(&store, &pending, &stats).await {}
                break;
            }

            _ = pending.notify.notified() => {
                flush_pending(&store, &pending, &stats).await;
            }
        }
    }

    info!("checkpoint worker completed");

    Ok(())
}

/// Writes everything currently pending, full checkpoint first. Returns whether anything was
/// pending.
async fn flush_pending<S>(store: &S, pending: &PendingCheckpoints, stats: &RelayStats) -> bool
where
    S: CheckpointStore,
{
    let batch = pending.take();
    if batch.is_empty() {
        return false;
    }

    if let Some(positions) = batch.full {
        match store.persist(&positions).await {
            Ok(()) => {
                debug!(partitions = positions.len(), "full checkpoint written");
                stats.record_checkpoint(true);
            }
            Err(err) => {
                warn!(error = %err, "failed to write full checkpoint");
                stats.record_checkpoint_failure(true);
            }
        }
    }

    for (partition, position) in batch.partials {
        match store.persist_partition(partition, position).await {
            Ok(()) => {
                debug!(partition, %position, "partial checkpoint written");
                stats.record_checkpoint(false);
            }
            Err(err) => {
                warn!(partition, error = %err, "failed to write partial checkpoint");
                stats.record_checkpoint_failure(false);
            }
        }
    }

    true
}
