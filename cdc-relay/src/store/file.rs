use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use crate::bail;
use crate::error::{ErrorKind, RelayResult};
use crate::store::base::CheckpointStore;
use crate::types::{PartitionId, PartitionPosition};

/// Version of the on-disk checkpoint document.
const CHECKPOINT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointDocument {
    version: u32,
    positions: Vec<PartitionPosition>,
}

/// Checkpoint store persisting all positions as a single JSON document.
///
/// Every write replaces the document through a temporary file and a rename, so a crash never
/// leaves a truncated checkpoint behind. Writes of clones of the same store are serialized.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: Arc<PathBuf>,
    write_lock: Arc<Mutex<()>>,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Arc::new(path.into()),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> RelayResult<Option<CheckpointDocument>> {
        let bytes = match fs::read(self.path.as_path()).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == IoErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let document: CheckpointDocument = serde_json::from_slice(&bytes)?;
        if document.version != CHECKPOINT_FORMAT_VERSION {
            bail!(
                ErrorKind::CheckpointLoadFailed,
                "Unsupported checkpoint format",
                format!(
                    "checkpoint {} has version {}, expected {}",
                    self.path.display(),
                    document.version,
                    CHECKPOINT_FORMAT_VERSION
                )
            );
        }

        Ok(Some(document))
    }

    async fn write_document(&self, positions: Vec<PartitionPosition>) -> RelayResult<()> {
        let document = CheckpointDocument {
            version: CHECKPOINT_FORMAT_VERSION,
            positions,
        };
        let bytes = serde_json::to_vec_pretty(&document)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }

        let mut tmp_path = self.path.as_os_str().to_owned();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);

        fs::write(&tmp_path, &bytes).await?;
        fs::rename(&tmp_path, self.path.as_path()).await?;

        debug!(
            path = %self.path.display(),
            partitions = document.positions.len(),
            "checkpoint written"
        );

        Ok(())
    }
}

impl CheckpointStore for FileCheckpointStore {
    async fn load(&self) -> RelayResult<Option<Vec<PartitionPosition>>> {
        Ok(self
            .read_document()
            .await?
            .map(|document| document.positions))
    }

    async fn persist(&self, positions: &[PartitionPosition]) -> RelayResult<()> {
        let _guard = self.write_lock.lock().await;

        self.write_document(positions.to_vec()).await
    }

    async fn persist_partition(
        &self,
        partition: PartitionId,
        position: PartitionPosition,
    ) -> RelayResult<()> {
        let _guard = self.write_lock.lock().await;

        let Some(mut document) = self.read_document().await? else {
            bail!(
                ErrorKind::CheckpointWriteFailed,
                "No stored checkpoint contains the partition",
                format!("{} does not exist yet", self.path.display())
            );
        };

        let Some(slot) = document.positions.get_mut(partition as usize) else {
            bail!(
                ErrorKind::CheckpointWriteFailed,
                "No stored checkpoint contains the partition",
                format!(
                    "partition {partition} is outside the {} stored partitions",
                    document.positions.len()
                )
            );
        };
        *slot = position;

        self.write_document(document.positions).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SEQUENCE_UNBOUNDED;

    #[tokio::test]
    async fn missing_file_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("checkpoint.json"));

        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn full_and_partial_writes_are_loaded_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("nested").join("checkpoint.json"));
        let positions = vec![PartitionPosition::beginning(); 4];
        store.persist(&positions).await.unwrap();

        let position = PartitionPosition::new(3, 250, SEQUENCE_UNBOUNDED);
        store.persist_partition(2, position).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.len(), 4);
        assert_eq!(loaded[2], position);
        assert_eq!(loaded[0], PartitionPosition::beginning());
        assert!(!dir.path().join("nested").join("checkpoint.json.tmp").exists());
    }

    #[tokio::test]
    async fn partial_write_outside_stored_partitions_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("checkpoint.json"));
        store.persist(&[PartitionPosition::beginning()]).await.unwrap();

        let err = store
            .persist_partition(1, PartitionPosition::beginning())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::CheckpointWriteFailed);
    }

    #[tokio::test]
    async fn corrupt_file_is_a_deserialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        std::fs::write(&path, b"{not json").unwrap();
        let store = FileCheckpointStore::new(path);

        let err = store.load().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DeserializationError);
    }

    #[tokio::test]
    async fn concurrent_full_and_partial_writes_leave_a_valid_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("checkpoint.json"));
        store
            .persist(&vec![PartitionPosition::beginning(); 8])
            .await
            .unwrap();

        let mut handles = Vec::new();
        for partition in 0..8u16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let position = PartitionPosition::new(1, partition as u64 * 10, SEQUENCE_UNBOUNDED);
                store.persist_partition(partition, position).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let loaded = store.load().await.unwrap().unwrap();
        for (partition, position) in loaded.iter().enumerate() {
            assert_eq!(position.start_sequence, partition as u64 * 10);
        }
    }
}
