use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{Notify, RwLock};

use crate::error::{ErrorKind, RelayResult};
use crate::relay_error;
use crate::store::base::CheckpointStore;
use crate::types::{PartitionId, PartitionPosition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckpointStoreMethod {
    Load,
    Persist,
    PersistPartition,
}

/// A successful write observed by [`NotifyingCheckpointStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointWrite {
    Full(Vec<PartitionPosition>),
    Partial {
        partition: PartitionId,
        position: PartitionPosition,
    },
}

impl CheckpointWrite {
    pub fn is_full(&self) -> bool {
        matches!(self, CheckpointWrite::Full(_))
    }
}

type WriteCondition = Box<dyn Fn(&[CheckpointWrite]) -> bool + Send + Sync>;

struct Inner {
    positions: Option<Vec<PartitionPosition>>,
    writes: Vec<CheckpointWrite>,
    loads: usize,
    failing: HashSet<CheckpointStoreMethod>,
    write_conditions: Vec<(WriteCondition, Arc<Notify>)>,
}

impl Inner {
    fn check_conditions(&mut self) {
        let writes = &self.writes;
        self.write_conditions.retain(|(condition, notify)| {
            let should_retain = !condition(writes.as_slice());
            if !should_retain {
                notify.notify_one();
            }
            should_retain
        });
    }

    fn check_failure(&self, method: CheckpointStoreMethod) -> RelayResult<()> {
        if self.failing.contains(&method) {
            let kind = match method {
                CheckpointStoreMethod::Load => ErrorKind::CheckpointLoadFailed,
                CheckpointStoreMethod::Persist | CheckpointStoreMethod::PersistPartition => {
                    ErrorKind::CheckpointWriteFailed
                }
            };

            return Err(relay_error!(
                kind,
                "Injected checkpoint store failure",
                format!("{method:?} was configured to fail")
            ));
        }

        Ok(())
    }
}

/// A checkpoint store recording every write and notifying waiters about them.
#[derive(Clone)]
pub struct NotifyingCheckpointStore {
    inner: Arc<RwLock<Inner>>,
}

impl NotifyingCheckpointStore {
    pub fn new() -> Self {
        Self::build(None)
    }

    pub fn with_positions(positions: Vec<PartitionPosition>) -> Self {
        Self::build(Some(positions))
    }

    fn build(positions: Option<Vec<PartitionPosition>>) -> Self {
        let inner = Inner {
            positions,
            writes: Vec::new(),
            loads: 0,
            failing: HashSet::new(),
            write_conditions: Vec::new(),
        };

        Self {
            inner: Arc::new(RwLock::new(inner)),
        }
    }

    pub async fn positions(&self) -> Option<Vec<PartitionPosition>> {
        self.inner.read().await.positions.clone()
    }

    pub async fn writes(&self) -> Vec<CheckpointWrite> {
        self.inner.read().await.writes.clone()
    }

    pub async fn full_writes(&self) -> usize {
        let inner = self.inner.read().await;
        inner.writes.iter().filter(|write| write.is_full()).count()
    }

    pub async fn partial_writes(&self) -> usize {
        let inner = self.inner.read().await;
        inner.writes.iter().filter(|write| !write.is_full()).count()
    }

    pub async fn loads(&self) -> usize {
        self.inner.read().await.loads
    }

    /// Makes every following call of `method` fail until [`Self::recover`] is called.
    pub async fn fail_on(&self, method: CheckpointStoreMethod) {
        self.inner.write().await.failing.insert(method);
    }

    pub async fn recover(&self, method: CheckpointStoreMethod) {
        self.inner.write().await.failing.remove(&method);
    }

    /// Returns a [`Notify`] fired once the recorded writes satisfy `condition`.
    pub async fn notify_on_writes<F>(&self, condition: F) -> Arc<Notify>
    where
        F: Fn(&[CheckpointWrite]) -> bool + Send + Sync + 'static,
    {
        let notify = Arc::new(Notify::new());
        let mut inner = self.inner.write().await;
        inner
            .write_conditions
            .push((Box::new(condition), notify.clone()));

        // The condition may already hold.
        inner.check_conditions();

        notify
    }
}

impl Default for NotifyingCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NotifyingCheckpointStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifyingCheckpointStore").finish_non_exhaustive()
    }
}

impl CheckpointStore for NotifyingCheckpointStore {
    async fn load(&self) -> RelayResult<Option<Vec<PartitionPosition>>> {
        let mut inner = self.inner.write().await;
        inner.check_failure(CheckpointStoreMethod::Load)?;
        inner.loads += 1;

        Ok(inner.positions.clone())
    }

    async fn persist(&self, positions: &[PartitionPosition]) -> RelayResult<()> {
        let mut inner = self.inner.write().await;
        inner.check_failure(CheckpointStoreMethod::Persist)?;

        inner.positions = Some(positions.to_vec());
        inner.writes.push(CheckpointWrite::Full(positions.to_vec()));
        inner.check_conditions();

        Ok(())
    }

    async fn persist_partition(
        &self,
        partition: PartitionId,
        position: PartitionPosition,
    ) -> RelayResult<()> {
        let mut inner = self.inner.write().await;
        inner.check_failure(CheckpointStoreMethod::PersistPartition)?;

        let Some(slot) = inner
            .positions
            .as_mut()
            .and_then(|positions| positions.get_mut(partition as usize))
        else {
            return Err(relay_error!(
                ErrorKind::CheckpointWriteFailed,
                "No stored checkpoint contains the partition",
                format!("partition {partition} has no stored position to update")
            ));
        };
        *slot = position;

        inner.writes.push(CheckpointWrite::Partial {
            partition,
            position,
        });
        inner.check_conditions();

        Ok(())
    }
}
