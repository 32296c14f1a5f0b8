//! Stream driver orchestrating a relay run.
//!
//! Contains the [`Relay`] that bootstraps the cluster connection, obtains the initial stream
//! state, opens and reconciles every partition stream and then consumes the merged streams,
//! routing snapshot markers into the state and data events to the downstream queue.

use std::future::Future;
use std::sync::Arc;

use cdc_relay_config::shared::{RelayConfig, RunMode, StreamOpenPolicy, TransportFailurePolicy};
use futures::StreamExt;
use futures::future::try_join_all;
use futures::stream::{SelectAll, select_all};
use metrics::gauge;
use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, warn};

use crate::bail;
use crate::concurrency::shutdown::{ShutdownRx, ShutdownTx, create_shutdown_channel};
use crate::destination::publisher::EventPublisher;
use crate::destination::queue::{EventQueueRx, EventQueueTx, create_event_queue};
use crate::error::{ErrorKind, RelayError, RelayResult};
use crate::metrics::{CDC_RELAY_PARTITIONS_TOTAL, RelayStats, register_metrics};
use crate::relay_error;
use crate::replication::client::{ClusterClient, EventStream, OpenedStream};
use crate::replication::reconcile::apply_failover_log;
use crate::replication::snapshot::track_snapshot_marker;
use crate::state::stream::StreamState;
use crate::store::base::CheckpointStore;
use crate::types::{PartitionId, PartitionPosition, StreamEvent};
use crate::workers::base::{Worker, WorkerHandle};
use crate::workers::checkpoint::{CheckpointListener, CheckpointWorker, PendingCheckpoints};

/// Lifecycle phase of a [`Relay`].
///
/// `Consuming` is the only long-lived phase and `Stopped` is terminal, reached both on a clean
/// stop and on a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayPhase {
    Disconnected,
    Bootstrapped,
    StreamsOpening,
    Consuming,
    Stopped,
}

/// Why a run stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A shutdown was requested through [`Relay::shutdown_tx`].
    Shutdown,
    /// Every partition stream was closed by the cluster.
    UpstreamClosed,
}

/// Result of a run that stopped cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOutcome {
    /// Final positions of all partitions, as written by the final checkpoint.
    pub state: Vec<PartitionPosition>,
    pub stop_reason: StopReason,
}

enum ConsumeEnd {
    Stopped(StopReason),
    TransportFailed(RelayError),
}

/// Change data capture relay from a partitioned replication stream to a bounded queue.
///
/// A relay performs a single run: [`Relay::connect`] bootstraps the cluster connection and
/// [`Relay::run`] or [`Relay::run_with_state`] drive the streams until a shutdown is requested,
/// the cluster closes every stream or a fatal error occurs.
#[derive(Debug)]
pub struct Relay<C, S> {
    config: Arc<RelayConfig>,
    client: C,
    store: S,
    publisher: EventPublisher,
    stats: RelayStats,
    shutdown_tx: ShutdownTx,
    shutdown_rx: ShutdownRx,
    phase_tx: watch::Sender<RelayPhase>,
    partition_count: Option<u16>,
}

impl<C, S> Relay<C, S>
where
    C: ClusterClient + Send + Sync + 'static,
    S: CheckpointStore + Clone + Send + Sync + 'static,
{
    /// Creates a relay publishing into `queue_tx`.
    pub fn new(config: RelayConfig, client: C, store: S, queue_tx: EventQueueTx) -> Self {
        // Safe to call for every relay, the descriptions are registered once.
        register_metrics();

        // The receiver is kept so that a shutdown requested before the run starts is observed.
        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
        let (phase_tx, _) = watch::channel(RelayPhase::Disconnected);
        let stats = RelayStats::new();
        let publisher = EventPublisher::new(queue_tx, config.publish.clone(), stats.clone());

        Self {
            config: Arc::new(config),
            client,
            store,
            publisher,
            stats,
            shutdown_tx,
            shutdown_rx,
            phase_tx,
            partition_count: None,
        }
    }

    /// Creates a relay together with a downstream queue of the configured capacity.
    pub fn with_queue(config: RelayConfig, client: C, store: S) -> (Self, EventQueueRx) {
        let (queue_tx, queue_rx) = create_event_queue(config.queue_capacity);
        (Self::new(config, client, store, queue_tx), queue_rx)
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Returns a handle for requesting the relay to stop.
    ///
    /// After a shutdown no new event is pulled from the cluster, an in-flight publish or
    /// checkpoint write may still complete.
    pub fn shutdown_tx(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    /// Returns the counters of this relay.
    pub fn stats(&self) -> RelayStats {
        self.stats.clone()
    }

    pub fn phase(&self) -> RelayPhase {
        *self.phase_tx.borrow()
    }

    /// Returns a receiver observing every phase transition.
    pub fn phase_rx(&self) -> watch::Receiver<RelayPhase> {
        self.phase_tx.subscribe()
    }

    /// Returns the number of partitions, known once the relay is bootstrapped.
    pub fn partition_count(&self) -> Option<u16> {
        self.partition_count
    }

    /// Bootstraps the connection to the cluster.
    ///
    /// Seeds the cluster membership, opens the bucket and determines the partition count. Each
    /// call runs under the configured bootstrap timeout, a call exceeding it fails with
    /// [`ErrorKind::BootstrapTimeout`].
    pub async fn connect(&mut self) -> RelayResult<()> {
        if self.phase() != RelayPhase::Disconnected {
            bail!(
                ErrorKind::InvalidState,
                "Relay is already connected",
                format!("connect called in phase {:?}", self.phase())
            );
        }

        if let Err(err) = self.config.validate() {
            self.set_phase(RelayPhase::Stopped);
            return Err(err.into());
        }

        info!(stream_name = %self.config.stream_name, "bootstrapping cluster connection");

        match self.bootstrap().await {
            Ok(partition_count) => {
                gauge!(CDC_RELAY_PARTITIONS_TOTAL).set(partition_count as f64);
                self.partition_count = Some(partition_count);
                self.set_phase(RelayPhase::Bootstrapped);

                info!(partition_count, "cluster connection bootstrapped");

                Ok(())
            }
            Err(err) => {
                error!(error = %err, "failed to bootstrap cluster connection");
                self.set_phase(RelayPhase::Stopped);

                Err(err)
            }
        }
    }

    /// Runs the relay with the initial state chosen by the configured [`RunMode`].
    ///
    /// Connects first if [`Relay::connect`] was not called. Fails with
    /// [`ErrorKind::ConfigError`] in [`RunMode::CallerState`], which requires
    /// [`Relay::run_with_state`].
    pub async fn run(&mut self) -> RelayResult<RelayOutcome> {
        let partition_count = self.ensure_connected().await?;

        let state = match self.config.mode {
            RunMode::Fresh => {
                info!(partition_count, "starting fresh from the beginning of every partition");
                StreamState::new(partition_count)
            }
            RunMode::LoadAndResume => match self.load_state(partition_count).await {
                Ok(state) => state,
                Err(err) => {
                    self.set_phase(RelayPhase::Stopped);
                    return Err(err);
                }
            },
            RunMode::CallerState => {
                self.set_phase(RelayPhase::Stopped);
                bail!(
                    ErrorKind::ConfigError,
                    "Caller state mode requires a stream state",
                    "use run_with_state to hand the initial stream state to the relay"
                );
            }
        };

        self.run_state(state).await
    }

    /// Runs the relay starting from `state`, skipping the checkpoint store for the initial
    /// positions.
    pub async fn run_with_state(&mut self, state: StreamState) -> RelayResult<RelayOutcome> {
        let partition_count = self.ensure_connected().await?;

        if state.len() != partition_count as usize {
            self.set_phase(RelayPhase::Stopped);
            bail!(
                ErrorKind::InvalidState,
                "Stream state does not match the cluster",
                format!(
                    "the state has {} partitions, the cluster has {partition_count}",
                    state.len()
                )
            );
        }

        info!(partition_count, "starting from caller supplied state");

        self.run_state(state).await
    }

    /// Requests the relay to stop without waiting for it.
    pub fn shutdown(&self) {
        info!("trying to shut down the relay");

        if let Err(err) = self.shutdown_tx.shutdown() {
            error!("failed to send shutdown signal to the relay: {}", err);
            return;
        }

        info!("shut down signal successfully sent to the relay");
    }

    async fn bootstrap(&self) -> RelayResult<u16> {
        self.bootstrap_call("seed nodes", self.client.seed_nodes())
            .await?;
        self.bootstrap_call("open bucket", self.client.open_bucket())
            .await?;
        let reported = self
            .bootstrap_call("partition count", self.client.partition_count())
            .await?;

        match (reported, self.config.partition_count) {
            (0, Some(configured)) => {
                info!(
                    partition_count = configured,
                    "cluster did not report a partition count, using the configured one"
                );
                Ok(configured)
            }
            (0, None) => bail!(
                ErrorKind::BootstrapFailed,
                "Partition count is unknown",
                "the cluster reported no partitions and none are configured"
            ),
            (reported, Some(configured)) if reported != configured => {
                warn!(
                    reported,
                    configured, "configured partition count differs from the cluster, using the cluster one"
                );
                Ok(reported)
            }
            (reported, _) => Ok(reported),
        }
    }

    async fn bootstrap_call<T>(
        &self,
        step: &'static str,
        call: impl Future<Output = RelayResult<T>>,
    ) -> RelayResult<T> {
        let timeout = self.config.bootstrap_timeout();

        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => bail!(
                ErrorKind::BootstrapTimeout,
                "Bootstrap timed out",
                format!("{step} did not complete within {}ms", timeout.as_millis())
            ),
        }
    }

    async fn ensure_connected(&mut self) -> RelayResult<u16> {
        if self.phase() == RelayPhase::Disconnected {
            self.connect().await?;
        }

        match (self.phase(), self.partition_count) {
            (RelayPhase::Bootstrapped, Some(partition_count)) => Ok(partition_count),
            (phase, _) => bail!(
                ErrorKind::InvalidState,
                "Relay cannot start a run",
                format!("a run can only start once bootstrapped, the relay is {phase:?}")
            ),
        }
    }

    async fn load_state(&self, partition_count: u16) -> RelayResult<StreamState> {
        let Some(positions) = self.store.load().await? else {
            info!(
                partition_count,
                "no stored checkpoint found, starting from the beginning of every partition"
            );
            return Ok(StreamState::new(partition_count));
        };

        if positions.len() != partition_count as usize {
            error!(
                stored = positions.len(),
                partition_count, "stored checkpoint does not match the partition count"
            );
            bail!(
                ErrorKind::CheckpointPartitionCountMismatch,
                "Stored checkpoint does not match the partition count",
                format!(
                    "the checkpoint has {} partitions, the cluster has {partition_count}",
                    positions.len()
                )
            );
        }

        info!(partition_count, "resuming from stored checkpoint");

        Ok(StreamState::from_positions(positions))
    }

    async fn run_state(&mut self, mut state: StreamState) -> RelayResult<RelayOutcome> {
        let pending = PendingCheckpoints::new();
        state.subscribe(CheckpointListener::new(pending.clone()));

        let checkpoint_worker = CheckpointWorker::new(self.store.clone(), pending, self.stats())
            .start()
            .await?;

        let relay_span = tracing::info_span!(
            "relay",
            stream_name = %self.config.stream_name,
            partitions = state.partition_count()
        );
        let result = self.drive(&mut state).instrument(relay_span).await;

        let outcome = match result {
            Ok(stop_reason) => {
                info!(?stop_reason, "relay stopped, writing final checkpoint");

                state.notify_full();
                checkpoint_worker.stop();
                checkpoint_worker
                    .wait()
                    .await
                    .map(|()| RelayOutcome {
                        state: state.positions().to_vec(),
                        stop_reason,
                    })
            }
            Err(err) => {
                error!(error = %err, "relay stopped with an error");

                checkpoint_worker.stop();
                if let Err(worker_err) = checkpoint_worker.wait().await {
                    error!(error = %worker_err, "checkpoint worker failed while stopping");
                }

                Err(err)
            }
        };

        state.unsubscribe();
        self.set_phase(RelayPhase::Stopped);

        outcome
    }

    async fn drive(&self, state: &mut StreamState) -> RelayResult<StopReason> {
        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut failed_reconnects = 0;
        let mut reconnecting = false;

        loop {
            self.set_phase(RelayPhase::StreamsOpening);

            let opened = tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    info!("shutdown requested while opening partition streams");
                    return Ok(StopReason::Shutdown);
                }

                events = self.open_streams(state) => events,
            };

            let err = match opened {
                Ok(mut events) => {
                    self.set_phase(RelayPhase::Consuming);
                    info!("all partition streams opened, consuming events");

                    match self
                        .consume(state, &mut events, &mut shutdown_rx, &mut failed_reconnects)
                        .await?
                    {
                        ConsumeEnd::Stopped(stop_reason) => return Ok(stop_reason),
                        ConsumeEnd::TransportFailed(err) => err,
                    }
                }
                // A reopen that fails inside a reconnect cycle uses up one reconnect attempt.
                Err(err) if reconnecting && err.kind() == ErrorKind::StreamOpenFailed => {
                    warn!(error = %err, "failed to reopen partition streams");
                    err
                }
                Err(err) => return Err(err),
            };

            let TransportFailurePolicy::Reconnect { retry } = &self.config.transport_failure else {
                error!(error = %err, "transport failed, surfacing to the caller");
                return Err(err);
            };

            failed_reconnects += 1;
            if failed_reconnects > retry.max_attempts {
                error!(
                    error = %err,
                    attempts = retry.max_attempts,
                    "transport failed after exhausting reconnect attempts"
                );
                return Err(err);
            }
            reconnecting = true;

            let delay = retry.delay_for_attempt(failed_reconnects);
            warn!(
                error = %err,
                attempt = failed_reconnects,
                delay_ms = delay.as_millis() as u64,
                "transport failed, reopening partition streams"
            );
            self.stats.record_reconnect();

            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    info!("shutdown requested while waiting to reconnect");
                    return Ok(StopReason::Shutdown);
                }

                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Opens every partition stream from its current position and reconciles the positions
    /// against the returned failover logs before any event is consumed.
    async fn open_streams(&self, state: &mut StreamState) -> RelayResult<SelectAll<EventStream>> {
        let positions = state.positions().to_vec();
        let opened = try_join_all(
            positions
                .into_iter()
                .enumerate()
                .map(|(partition, position)| self.open_partition(partition as PartitionId, position)),
        )
        .await?;

        let mut streams = Vec::with_capacity(opened.len());
        for (partition, opened) in opened.into_iter().enumerate() {
            apply_failover_log(state, partition as PartitionId, &opened.failover_log)?;
            streams.push(opened.events);
        }

        Ok(select_all(streams))
    }

    async fn open_partition(
        &self,
        partition: PartitionId,
        position: PartitionPosition,
    ) -> RelayResult<OpenedStream> {
        let mut attempt = 1;
        loop {
            debug!(partition, %position, attempt, "opening partition stream");

            let err = match self
                .client
                .open_partition_stream(&self.config.stream_name, partition, position)
                .await
            {
                Ok(opened) => return Ok(opened),
                Err(err) => err,
            };

            let StreamOpenPolicy::Retry { retry } = &self.config.stream_open else {
                return Err(stream_open_error(partition, err));
            };
            if attempt >= retry.max_attempts {
                return Err(stream_open_error(partition, err));
            }

            let delay = retry.delay_for_attempt(attempt);
            warn!(
                partition,
                attempt,
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "failed to open partition stream, retrying"
            );
            tokio::time::sleep(delay).await;

            attempt += 1;
        }
    }

    /// Pulls one event at a time until a shutdown, the end of every stream, a transport
    /// failure or a fatal error.
    async fn consume(
        &self,
        state: &mut StreamState,
        events: &mut SelectAll<EventStream>,
        shutdown_rx: &mut ShutdownRx,
        failed_reconnects: &mut u32,
    ) -> RelayResult<ConsumeEnd> {
        loop {
            let next = tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    info!("shutdown requested, stopping the consume loop");
                    return Ok(ConsumeEnd::Stopped(StopReason::Shutdown));
                }

                next = events.next() => next,
            };

            let event = match next {
                Some(Ok(event)) => event,
                Some(Err(err)) if is_transport_failure(&err) => {
                    return Ok(ConsumeEnd::TransportFailed(err));
                }
                Some(Err(err)) => return Err(err),
                None => {
                    info!("every partition stream was closed by the cluster");
                    return Ok(ConsumeEnd::Stopped(StopReason::UpstreamClosed));
                }
            };

            *failed_reconnects = 0;
            self.handle_event(state, event).await?;
        }
    }

    async fn handle_event(&self, state: &mut StreamState, event: StreamEvent) -> RelayResult<()> {
        if let StreamEvent::SnapshotMarker(marker) = &event {
            track_snapshot_marker(state, marker)?;
            self.stats.record_snapshot_marker();

            return Ok(());
        }

        self.publisher.publish(event).await?;

        Ok(())
    }

    fn set_phase(&self, phase: RelayPhase) {
        let previous = self.phase_tx.send_replace(phase);
        if previous != phase {
            debug!(from = ?previous, to = ?phase, "relay phase changed");
        }
    }
}

fn is_transport_failure(err: &RelayError) -> bool {
    matches!(err.kind(), ErrorKind::TransportFailure | ErrorKind::IoError)
}

fn stream_open_error(partition: PartitionId, err: RelayError) -> RelayError {
    if err.kind() == ErrorKind::StreamOpenFailed {
        return err;
    }

    relay_error!(
        ErrorKind::StreamOpenFailed,
        "Failed to open partition stream",
        format!("partition {partition}: {err}")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryCheckpointStore;
    use crate::test_utils::cluster::MemoryClusterClient;

    #[test]
    fn open_errors_are_reported_as_stream_open_failures() {
        let err = stream_open_error(4, relay_error!(ErrorKind::IoError, "connection reset"));

        assert_eq!(err.kind(), ErrorKind::StreamOpenFailed);
        assert!(err.detail().unwrap().contains("partition 4"));
    }

    #[test]
    fn only_transport_errors_allow_reconnecting() {
        assert!(is_transport_failure(&relay_error!(
            ErrorKind::TransportFailure,
            "connection lost"
        )));
        assert!(!is_transport_failure(&relay_error!(
            ErrorKind::DeserializationError,
            "bad frame"
        )));
    }

    #[tokio::test]
    async fn invalid_configuration_stops_before_bootstrapping() {
        let config = RelayConfig {
            queue_capacity: 0,
            ..RelayConfig::default()
        };
        let (mut relay, _queue_rx) =
            Relay::with_queue(config, MemoryClusterClient::new(2), MemoryCheckpointStore::new());

        let err = relay.connect().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConfigError);
        assert_eq!(relay.phase(), RelayPhase::Stopped);
    }

    #[tokio::test]
    async fn connecting_twice_is_rejected() {
        let (mut relay, _queue_rx) = Relay::with_queue(
            RelayConfig::default(),
            MemoryClusterClient::new(2),
            MemoryCheckpointStore::new(),
        );

        relay.connect().await.unwrap();
        assert_eq!(relay.partition_count(), Some(2));

        let err = relay.connect().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn configured_partition_count_is_used_when_the_cluster_reports_none() {
        let config = RelayConfig {
            partition_count: Some(3),
            ..RelayConfig::default()
        };
        let (mut relay, _queue_rx) =
            Relay::with_queue(config, MemoryClusterClient::new(0), MemoryCheckpointStore::new());

        relay.connect().await.unwrap();

        assert_eq!(relay.partition_count(), Some(3));
        assert_eq!(relay.phase(), RelayPhase::Bootstrapped);
    }

    #[tokio::test]
    async fn caller_state_mode_requires_a_state() {
        let config = RelayConfig {
            mode: RunMode::CallerState,
            ..RelayConfig::default()
        };
        let (mut relay, _queue_rx) =
            Relay::with_queue(config, MemoryClusterClient::new(1), MemoryCheckpointStore::new());

        let err = relay.run().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConfigError);
        assert_eq!(relay.phase(), RelayPhase::Stopped);
    }
}
