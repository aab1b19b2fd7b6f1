//! Decide when to write checkpoints.

use std::num::NonZeroUsize;

use super::{accumulator::Accumulator, store::CheckpointStore};
use crate::prelude::*;

/// Persists the accumulator every `batch_size` successes, and on demand.
#[derive(Debug)]
pub struct CheckpointManager {
    store: CheckpointStore,
    batch_size: NonZeroUsize,
    persisted_at: Option<usize>,
    writes: usize,
}

impl CheckpointManager {
    /// Create a checkpoint manager writing to `store`.
    pub fn new(store: CheckpointStore, batch_size: NonZeroUsize) -> Self {
        Self {
            store,
            batch_size,
            persisted_at: None,
            writes: 0,
        }
    }

    /// Call after every absorbed result. Writes a checkpoint when the number
    /// of new successes reaches a multiple of the batch size, once per
    /// multiple. Returns `true` if we wrote one.
    pub async fn maybe_checkpoint(&mut self, acc: &Accumulator) -> Result<bool> {
        let count = acc.new_processed();
        if count == 0
            || count % self.batch_size.get() != 0
            || self.persisted_at == Some(count)
        {
            return Ok(false);
        }
        info!(
            "Checkpoint: {} new items, {} records in dataset",
            count,
            acc.dataset().len()
        );
        self.checkpoint_now(acc).await?;
        Ok(true)
    }

    /// Write a checkpoint unconditionally.
    pub async fn checkpoint_now(&mut self, acc: &Accumulator) -> Result<()> {
        self.store.persist(acc.dataset(), acc.processed()).await?;
        self.persisted_at = Some(acc.new_processed());
        self.writes += 1;
        Ok(())
    }

    /// How many checkpoints have we written?
    pub fn writes(&self) -> usize {
        self.writes
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::engine::{
        FailureKind, ItemFailure, ProcessingResult, dataset::Dataset,
        processed::ProcessedSet, test_support::items,
    };

    #[tokio::test]
    async fn writes_once_per_batch_multiple() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::for_stage(dir.path(), "test");
        let mut manager =
            CheckpointManager::new(store.clone(), NonZeroUsize::new(2).unwrap());
        let mut acc = Accumulator::new(Dataset::new(), ProcessedSet::new());

        let mut wrote = vec![];
        for (idx, item) in items(&["a", "b", "c", "d", "e"]).into_iter().enumerate() {
            let outcome = if idx == 2 {
                Err(ItemFailure::from_error(
                    &item,
                    FailureKind::Fetch,
                    &anyhow!("gone"),
                ))
            } else {
                Ok(json!({}))
            };
            acc.absorb(ProcessingResult { item, outcome });
            wrote.push(manager.maybe_checkpoint(&acc).await.unwrap());
        }

        // The failure at "c" leaves the success count at 2, which must not
        // trigger a second write.
        assert_eq!(wrote, vec![false, true, false, false, true]);
        assert_eq!(manager.writes(), 2);

        let (dataset, processed) = store.load().await.unwrap();
        assert_eq!(dataset.len(), 4);
        assert_eq!(processed.len(), 4);
    }
}
