use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::stream;
use tokio::sync::{Mutex, Notify, mpsc};

use crate::bail;
use crate::error::{ErrorKind, RelayError, RelayResult};
use crate::replication::client::{ClusterClient, OpenedStream};
use crate::types::{FailoverLogEntry, PartitionId, PartitionPosition, StreamEvent};

/// The bootstrap calls of a [`ClusterClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BootstrapStep {
    SeedNodes,
    OpenBucket,
    PartitionCount,
}

/// Injected misbehaviour of a bootstrap call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapFault {
    /// The call never completes.
    Hang,
    /// The call is rejected by the cluster.
    Reject,
}

/// A stream-open request that [`MemoryClusterClient`] accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    pub stream_name: String,
    pub partition: PartitionId,
    pub position: PartitionPosition,
}

type EventSender = mpsc::UnboundedSender<RelayResult<StreamEvent>>;

struct Inner {
    partition_count: u16,
    failover_logs: HashMap<PartitionId, Vec<FailoverLogEntry>>,
    bootstrap_faults: HashMap<BootstrapStep, BootstrapFault>,
    open_failures: HashMap<PartitionId, u32>,
    senders: HashMap<PartitionId, EventSender>,
    open_requests: Vec<OpenRequest>,
    open_conditions: Vec<(usize, Arc<Notify>)>,
}

impl Inner {
    fn check_conditions(&mut self) {
        let opened = self.open_requests.len();
        self.open_conditions.retain(|(expected, notify)| {
            let should_retain = opened < *expected;
            if !should_retain {
                notify.notify_one();
            }
            should_retain
        });
    }
}

/// An in-memory cluster whose partition streams are fed by the test.
///
/// Every successful stream open creates a fresh event channel for the partition. Events sent
/// with [`MemoryClusterClient::send`] go to the most recently opened stream of that partition.
#[derive(Clone)]
pub struct MemoryClusterClient {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryClusterClient {
    pub fn new(partition_count: u16) -> Self {
        let inner = Inner {
            partition_count,
            failover_logs: HashMap::new(),
            bootstrap_faults: HashMap::new(),
            open_failures: HashMap::new(),
            senders: HashMap::new(),
            open_requests: Vec::new(),
            open_conditions: Vec::new(),
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Sets the failover log returned when `partition` is opened.
    pub async fn set_failover_log(&self, partition: PartitionId, log: Vec<FailoverLogEntry>) {
        self.inner.lock().await.failover_logs.insert(partition, log);
    }

    pub async fn set_bootstrap_fault(&self, step: BootstrapStep, fault: BootstrapFault) {
        self.inner.lock().await.bootstrap_faults.insert(step, fault);
    }

    /// Makes the next `times` opens of `partition` fail.
    pub async fn fail_opens(&self, partition: PartitionId, times: u32) {
        self.inner.lock().await.open_failures.insert(partition, times);
    }

    pub async fn open_requests(&self) -> Vec<OpenRequest> {
        self.inner.lock().await.open_requests.clone()
    }

    /// Returns a [`Notify`] fired once at least `count` streams were opened.
    pub async fn notify_on_opens(&self, count: usize) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        let mut inner = self.inner.lock().await;
        inner.open_conditions.push((count, notify.clone()));
        inner.check_conditions();

        notify
    }

    /// Delivers `event` on the currently open stream of its partition.
    ///
    /// Panics if the partition has no open stream.
    pub async fn send(&self, event: StreamEvent) {
        let partition = event.partition();
        let inner = self.inner.lock().await;
        let sender = inner
            .senders
            .get(&partition)
            .unwrap_or_else(|| panic!("partition {partition} has no open stream"));
        // A send error means the relay already dropped the stream, which tests observe
        // through the relay outcome.
        let _ = sender.send(Ok(event));
    }

    /// Fails the currently open stream of `partition` with `error`.
    pub async fn fail_stream(&self, partition: PartitionId, error: RelayError) {
        let inner = self.inner.lock().await;
        if let Some(sender) = inner.senders.get(&partition) {
            let _ = sender.send(Err(error));
        }
    }

    /// Closes the streams of all partitions, ending them cleanly.
    pub async fn close_all(&self) {
        self.inner.lock().await.senders.clear();
    }
}

impl fmt::Debug for MemoryClusterClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryClusterClient").finish_non_exhaustive()
    }
}

impl MemoryClusterClient {
    async fn bootstrap_step(&self, step: BootstrapStep) -> RelayResult<()> {
        let fault = self.inner.lock().await.bootstrap_faults.get(&step).copied();
        match fault {
            None => Ok(()),
            Some(BootstrapFault::Hang) => std::future::pending().await,
            Some(BootstrapFault::Reject) => bail!(
                ErrorKind::BootstrapFailed,
                "Cluster rejected the bootstrap request",
                format!("{step:?} was rejected")
            ),
        }
    }
}

impl ClusterClient for MemoryClusterClient {
    async fn seed_nodes(&self) -> RelayResult<()> {
        self.bootstrap_step(BootstrapStep::SeedNodes).await
    }

    async fn open_bucket(&self) -> RelayResult<()> {
        self.bootstrap_step(BootstrapStep::OpenBucket).await
    }

    async fn partition_count(&self) -> RelayResult<u16> {
        self.bootstrap_step(BootstrapStep::PartitionCount).await?;

        Ok(self.inner.lock().await.partition_count)
    }

    async fn open_partition_stream(
        &self,
        stream_name: &str,
        partition: PartitionId,
        position: PartitionPosition,
    ) -> RelayResult<OpenedStream> {
        let mut inner = self.inner.lock().await;

        if let Some(remaining) = inner.open_failures.get_mut(&partition)
            && *remaining > 0
        {
            *remaining -= 1;
            bail!(
                ErrorKind::StreamOpenFailed,
                "Cluster refused to open the partition stream",
                format!("partition {partition} open was rejected")
            );
        }

        if partition >= inner.partition_count {
            bail!(
                ErrorKind::StreamOpenFailed,
                "Cluster refused to open the partition stream",
                format!("partition {partition} does not exist")
            );
        }

        let (tx, rx) = mpsc::unbounded_channel();
        inner.senders.insert(partition, tx);
        inner.open_requests.push(OpenRequest {
            stream_name: stream_name.to_owned(),
            partition,
            position,
        });
        inner.check_conditions();

        let failover_log = inner
            .failover_logs
            .get(&partition)
            .cloned()
            .unwrap_or_default();
        let events = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });

        Ok(OpenedStream::new(failover_log, Box::pin(events)))
    }
}
