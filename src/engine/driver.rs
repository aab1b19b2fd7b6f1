//! The run driver: load, enumerate, filter, process, checkpoint, summarize.

use std::{fmt, num::NonZeroUsize, sync::Arc};

use chrono::Utc;
use futures::StreamExt as _;

use super::{
    ItemProcessor,
    accumulator::Accumulator,
    checkpoint::CheckpointManager,
    filter::plan_work,
    store::CheckpointStore,
    summary::{DryStats, RunSummary},
};
use crate::{
    async_utils::ShutdownFlag,
    prelude::*,
    queues::pool::ItemPool,
    remote::{RemoteItem, RemoteSource},
    ui::{ProgressConfig, Ui},
};

/// Settings for a single run.
#[derive(Clone, Debug)]
pub struct RunConfig {
    /// The stage name, used in logs and the summary.
    pub stage: String,

    /// Maximum number of items in flight.
    pub jobs: usize,

    /// Checkpoint after this many successes.
    pub batch_size: NonZeroUsize,

    /// Ignore the processed set and process everything.
    pub reprocess_all: bool,

    /// Process at most this many pending items.
    pub take_first: Option<usize>,
}

/// Where a run is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Init,
    Enumerating,
    Filtering,
    Processing,
    Interrupted,
    Finalizing,
    Done,
}

impl RunState {
    /// Can we move from `self` to `next`?
    pub fn can_enter(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Init, Enumerating)
                | (Enumerating, Filtering)
                | (Filtering, Processing)
                | (Filtering, Finalizing)
                | (Processing, Interrupted)
                | (Processing, Finalizing)
                | (Interrupted, Finalizing)
                | (Finalizing, Done)
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Init => "init",
            RunState::Enumerating => "enumerating",
            RunState::Filtering => "filtering",
            RunState::Processing => "processing",
            RunState::Interrupted => "interrupted",
            RunState::Finalizing => "finalizing",
            RunState::Done => "done",
        };
        f.write_str(name)
    }
}

/// Drives one run of a stage from start to finish.
pub struct RunDriver {
    ui: Ui,
    config: RunConfig,
    source: Arc<dyn RemoteSource>,
    processor: Arc<dyn ItemProcessor>,
    store: CheckpointStore,
    shutdown: ShutdownFlag,
    state: RunState,
}

impl RunDriver {
    /// Create a driver. Nothing happens until [`RunDriver::run`].
    pub fn new(
        ui: Ui,
        config: RunConfig,
        source: Arc<dyn RemoteSource>,
        processor: Arc<dyn ItemProcessor>,
        store: CheckpointStore,
        shutdown: ShutdownFlag,
    ) -> Self {
        Self {
            ui,
            config,
            source,
            processor,
            store,
            shutdown,
            state: RunState::Init,
        }
    }

    /// Run to completion, or until interrupted.
    ///
    /// Item failures are reported in the summary. Errors returned from here
    /// are fatal: the store could not be read or written, or the remote
    /// folder could not be listed.
    #[instrument(level = "debug", skip_all, fields(stage = %self.config.stage))]
    pub async fn run(mut self) -> Result<RunSummary> {
        let started_at = Utc::now();

        let (dataset, processed) = self.store.load().await?;
        let store_existed = self.store.exists();
        info!(
            "Loaded {} records and {} processed items",
            dataset.len(),
            processed.len()
        );
        let mut acc = Accumulator::new(dataset, processed);
        let mut checkpoints =
            CheckpointManager::new(self.store.clone(), self.config.batch_size);

        self.enter(RunState::Enumerating);
        let items = self
            .source
            .list_items(self.processor.mime_types())
            .await
            .context("Could not list remote items")?;
        let total_remote_items = items.len();
        info!("Found {} remote items", total_remote_items);

        self.enter(RunState::Filtering);
        let plan = plan_work(
            items,
            acc.processed(),
            self.config.reprocess_all,
            self.config.take_first,
        );
        info!(
            "{} pending, {} already processed, {} deferred",
            plan.pending.len(),
            plan.skipped,
            plan.deferred
        );

        let pending_count = plan.pending.len();
        if pending_count == 0 {
            self.ui.display_message("✅", "Nothing to do");
        } else {
            self.enter(RunState::Processing);
            if let Err(err) = self
                .process_pending(plan.pending, &mut acc, &mut checkpoints)
                .await
            {
                if acc.new_processed() > 0 {
                    warn!("Saving completed work before giving up");
                    if let Err(persist_err) = checkpoints.checkpoint_now(&acc).await {
                        error!("Could not save completed work: {:#}", persist_err);
                    }
                }
                return Err(err);
            }
            if acc.absorbed() < pending_count {
                self.enter(RunState::Interrupted);
            }
        }

        self.enter(RunState::Finalizing);
        if acc.new_processed() > 0 || !store_existed {
            checkpoints.checkpoint_now(&acc).await?;
        } else {
            debug!("Nothing changed, leaving the store as it is");
        }
        self.enter(RunState::Done);

        Ok(RunSummary {
            stage: self.config.stage.clone(),
            started_at,
            finished_at: Utc::now(),
            total_remote_items,
            new_processed: acc.new_processed(),
            skipped: plan.skipped,
            deferred: plan.deferred,
            not_started: pending_count - acc.absorbed(),
            failed: acc.failures().len(),
            total_dataset_size: acc.dataset().len(),
            checkpoints_written: checkpoints.writes(),
            interrupted: acc.absorbed() < pending_count,
            failures: acc.failures().to_vec(),
        })
    }

    /// Push `pending` through the worker pool, absorbing and checkpointing
    /// as results arrive.
    async fn process_pending(
        &self,
        pending: Vec<RemoteItem>,
        acc: &mut Accumulator,
        checkpoints: &mut CheckpointManager,
    ) -> Result<()> {
        let pb = self.ui.new_progress_bar(
            &ProgressConfig {
                emoji: "📄",
                msg: &format!("Running {}", self.config.stage),
                done_msg: &format!("Ran {}", self.config.stage),
            },
            pending.len() as u64,
        );
        let (pool, results) = ItemPool::start(
            self.source.clone(),
            self.processor.clone(),
            self.config.jobs,
            pending,
            self.shutdown.clone(),
        );
        let mut results = pb.wrap_stream(results);
        while let Some(result) = results.next().await {
            acc.absorb(result?);
            checkpoints.maybe_checkpoint(acc).await?;
        }
        // The stream holds a queue handle, so it must go before we close.
        drop(results);
        pool.close().await
    }

    fn enter(&mut self, next: RunState) {
        debug_assert!(
            self.state.can_enter(next),
            "invalid run state transition {} -> {}",
            self.state,
            next
        );
        debug!("Run state: {} -> {}", self.state, next);
        self.state = next;
    }
}

/// Report what a run would do, without processing or writing anything.
pub async fn dry_stats(
    source: &dyn RemoteSource,
    mime_types: &[&str],
    store: &CheckpointStore,
) -> Result<DryStats> {
    let (dataset, processed) = store.load().await?;
    let items = source
        .list_items(mime_types)
        .await
        .context("Could not list remote items")?;
    let total_remote_items = items.len();
    let plan = plan_work(items, &processed, false, None);
    Ok(DryStats {
        total_remote_items,
        already_processed: plan.skipped,
        pending: plan.pending.len(),
        dataset_size: dataset.len(),
    })
}
