//! Run summaries and dry-run statistics.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use tokio::fs;

use super::ItemFailure;
use crate::{async_utils::io::write_json_atomic, prelude::*, ui::Ui};

/// What happened during a run.
#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct RunSummary {
    /// The stage that ran, such as `rasterize` or `ocr`.
    pub stage: String,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run finished.
    pub finished_at: DateTime<Utc>,

    /// Items found in the remote folder.
    pub total_remote_items: usize,

    /// Items processed successfully during this run.
    pub new_processed: usize,

    /// Items skipped because an earlier run processed them.
    pub skipped: usize,

    /// Unprocessed items left for a later run because of `--take-first`.
    pub deferred: usize,

    /// Items not started because the run was interrupted.
    pub not_started: usize,

    /// Items which failed during this run.
    pub failed: usize,

    /// Records in the dataset after this run.
    pub total_dataset_size: usize,

    /// Checkpoints written during this run.
    pub checkpoints_written: usize,

    /// Did the operator interrupt the run?
    pub interrupted: bool,

    /// Details for each failed item.
    pub failures: Vec<ItemFailure>,
}

impl RunSummary {
    /// The fraction of attempted items which failed.
    pub fn failure_rate(&self) -> f32 {
        let attempted = self.new_processed + self.failed;
        if attempted == 0 {
            0.0
        } else {
            self.failed as f32 / attempted as f32
        }
    }

    /// Show the summary to the operator.
    pub fn display(&self, ui: &Ui) {
        ui.display_message(
            "📁",
            &format!(
                "{} remote items: {} new, {} already processed, {} failed",
                self.total_remote_items, self.new_processed, self.skipped, self.failed
            ),
        );
        if self.deferred > 0 {
            ui.display_message(
                "⏭️",
                &format!("{} items left for a later run", self.deferred),
            );
        }
        if self.interrupted {
            ui.display_message(
                "⏸️",
                &format!(
                    "Interrupted with {} items not started; re-run to continue",
                    self.not_started
                ),
            );
        }
        for failure in &self.failures {
            ui.display_message(
                "❌",
                &format!("{} ({}): {}", failure.name, failure.kind, failure.reason),
            );
        }
        ui.display_message(
            "📊",
            &format!("{} records in dataset", self.total_dataset_size),
        );
    }

    /// Fail if more than `allowed_failure_rate` of attempted items failed.
    pub fn check_failure_rate(&self, allowed_failure_rate: f32) -> Result<()> {
        let failure_rate = self.failure_rate();
        if failure_rate > allowed_failure_rate {
            Err(anyhow!(
                "{}/{} ({:.2}%) of items failed, but only {:.2}% were allowed",
                self.failed,
                self.new_processed + self.failed,
                failure_rate * 100.0,
                allowed_failure_rate * 100.0
            ))
        } else {
            Ok(())
        }
    }

    /// Write the summary to a timestamped file in `dir`. Never replaces the
    /// statistics of an earlier run.
    pub async fn write_stats_file(&self, dir: &Path) -> Result<PathBuf> {
        let stamp = self.finished_at.format("%Y%m%d_%H%M%S_%3f");
        let mut path = dir.join(format!("stats_{}_{}.json", self.stage, stamp));
        let mut attempt = 1;
        while fs::try_exists(&path).await.unwrap_or(false) {
            attempt += 1;
            path = dir.join(format!("stats_{}_{}_{}.json", self.stage, stamp, attempt));
        }
        write_json_atomic(&path, self).await?;
        Ok(path)
    }
}

/// What a run would do, without doing it.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct DryStats {
    /// Items found in the remote folder.
    pub total_remote_items: usize,

    /// Items an earlier run already processed.
    pub already_processed: usize,

    /// Items a run would process.
    pub pending: usize,

    /// Records in the stored dataset.
    pub dataset_size: usize,
}
