//! Merge processing results into the in-memory dataset.

use super::{
    ItemFailure, ProcessingResult, dataset::Dataset, processed::ProcessedSet,
};
use crate::prelude::*;

/// Owns the dataset and processed set while a run is in progress.
///
/// Results are absorbed one at a time by a single consumer, so there is no
/// locking here. A success merges the record and then marks the item. A
/// failure only records the failure, leaving the item to be retried by a
/// later run.
#[derive(Debug)]
pub struct Accumulator {
    dataset: Dataset,
    processed: ProcessedSet,
    new_processed: usize,
    absorbed: usize,
    failures: Vec<ItemFailure>,
}

impl Accumulator {
    /// Start from previously loaded state.
    pub fn new(dataset: Dataset, processed: ProcessedSet) -> Self {
        Self {
            dataset,
            processed,
            new_processed: 0,
            absorbed: 0,
            failures: vec![],
        }
    }

    /// Absorb a single result.
    pub fn absorb(&mut self, result: ProcessingResult) {
        self.absorbed += 1;
        let ProcessingResult { item, outcome } = result;
        match outcome {
            Ok(record) => {
                if self.dataset.upsert(&item.id, record) {
                    debug!(id = %item.id, "Replaced existing record");
                }
                self.processed.mark(&item.id);
                self.new_processed += 1;
            }
            Err(failure) => {
                warn!(
                    id = %failure.id,
                    kind = %failure.kind,
                    "Failed to process {}: {}",
                    failure.name,
                    failure.reason
                );
                self.failures.push(failure);
            }
        }
    }

    /// The current dataset.
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// The current processed set.
    pub fn processed(&self) -> &ProcessedSet {
        &self.processed
    }

    /// How many items succeeded during this run?
    pub fn new_processed(&self) -> usize {
        self.new_processed
    }

    /// How many results have we absorbed, successful or not?
    pub fn absorbed(&self) -> usize {
        self.absorbed
    }

    /// Failures seen during this run, in completion order.
    pub fn failures(&self) -> &[ItemFailure] {
        &self.failures
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::engine::{FailureKind, test_support::items};

    #[test]
    fn successes_merge_and_mark_failures_do_not() {
        let mut acc = Accumulator::new(Dataset::new(), ProcessedSet::new());
        let mut batch = items(&["good", "bad"]).into_iter();

        let good = batch.next().unwrap();
        acc.absorb(ProcessingResult {
            item: good,
            outcome: Ok(json!({ "text": "ok" })),
        });
        let bad = batch.next().unwrap();
        acc.absorb(ProcessingResult {
            outcome: Err(ItemFailure::from_error(
                &bad,
                FailureKind::Process,
                &anyhow!("broken PDF"),
            )),
            item: bad,
        });

        assert_eq!(acc.absorbed(), 2);
        assert_eq!(acc.new_processed(), 1);
        assert!(acc.processed().contains("good"));
        assert!(!acc.processed().contains("bad"));
        assert!(acc.dataset().contains("good"));
        assert!(!acc.dataset().contains("bad"));
        assert_eq!(acc.failures().len(), 1);
        assert_eq!(acc.failures()[0].kind, FailureKind::Process);
        assert_eq!(acc.failures()[0].reason, "broken PDF");
    }
}
