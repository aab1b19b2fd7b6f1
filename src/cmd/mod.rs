//! Command-line entry points.

use std::{num::NonZeroUsize, sync::Arc};

use clap::{Args, ValueEnum};

use crate::{
    async_utils::ShutdownFlag,
    engine::{
        FailureKind, ItemProcessor,
        driver::{RunConfig, RunDriver},
        store::CheckpointStore,
    },
    prelude::*,
    processors::ProcessOptions,
    remote::{IMAGE_MIME_TYPES, PDF_MIME_TYPE, RemoteSource},
    ui::Ui,
};

pub mod ocr;
pub mod rasterize;
pub mod schema;
pub mod split;
pub mod stats;

/// The pipeline stages.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Stage {
    /// PDFs to page images.
    Rasterize,
    /// Page images to Label Studio tasks.
    Ocr,
}

impl Stage {
    /// The name used for state files.
    pub fn name(self) -> &'static str {
        match self {
            Stage::Rasterize => "rasterize",
            Stage::Ocr => "ocr",
        }
    }

    /// The MIME types this stage reads.
    pub fn mime_types(self) -> &'static [&'static str] {
        match self {
            Stage::Rasterize => &[PDF_MIME_TYPE],
            Stage::Ocr => IMAGE_MIME_TYPES,
        }
    }
}

/// Where a stage keeps its state.
#[derive(Debug, Clone, Args)]
pub struct StateOpts {
    /// Directory for datasets, processed sets and run statistics.
    #[clap(long, default_value = "ocr_harvest_state")]
    pub state_dir: PathBuf,

    /// Use this dataset file instead of the one in --state-dir.
    #[clap(long)]
    pub dataset_path: Option<PathBuf>,

    /// Use this processed set file instead of the one in --state-dir. Files
    /// written by older tools are accepted.
    #[clap(long)]
    pub processed_path: Option<PathBuf>,
}

impl StateOpts {
    /// The checkpoint store for `stage`.
    pub fn store(&self, stage: Stage) -> CheckpointStore {
        let default = CheckpointStore::for_stage(&self.state_dir, stage.name());
        CheckpointStore::new(
            self.dataset_path
                .clone()
                .unwrap_or_else(|| default.dataset_path().to_owned()),
            self.processed_path
                .clone()
                .unwrap_or_else(|| default.processed_path().to_owned()),
        )
    }
}

/// Options shared by the processing subcommands.
#[derive(Debug, Clone, Args)]
pub struct RunOpts {
    #[clap(flatten)]
    pub state: StateOpts,

    /// Max number of items to process at a time.
    #[clap(short = 'j', long = "jobs", default_value = "4")]
    pub job_count: usize,

    /// Save progress after this many successful items.
    #[clap(long, default_value = "50")]
    pub batch_size: NonZeroUsize,

    /// Process every item again, even ones already processed.
    #[clap(long)]
    pub reprocess_all: bool,

    /// Limit processing to the first N pending items.
    #[clap(long)]
    pub take_first: Option<usize>,

    /// What portion of attempted items should we allow to fail? Specified as
    /// a number between 0.0 and 1.0.
    #[clap(long, default_value = "0.01")]
    pub allowed_failure_rate: f32,

    /// A TOML or JSON file of processing options.
    #[clap(long = "options")]
    pub options_path: Option<PathBuf>,

    /// Set a processing option, overriding --options. May be repeated.
    #[clap(short = 'O', long = "option", value_name = "KEY=VALUE")]
    pub option: Vec<String>,
}

impl RunOpts {
    /// Load processing options.
    pub async fn process_options(&self) -> Result<ProcessOptions> {
        ProcessOptions::load(self.options_path.as_deref(), &self.option).await
    }

    /// Run `stage` to completion, then report and check the failure rate.
    pub async fn run_stage(
        &self,
        ui: Ui,
        stage: Stage,
        source: Arc<dyn RemoteSource>,
        processor: Arc<dyn ItemProcessor>,
    ) -> Result<()> {
        if self.job_count == 0 {
            return Err(anyhow!("--jobs must be at least 1"));
        }
        let config = RunConfig {
            stage: stage.name().to_owned(),
            jobs: self.job_count,
            batch_size: self.batch_size,
            reprocess_all: self.reprocess_all,
            take_first: self.take_first,
        };
        let shutdown = ShutdownFlag::new();
        shutdown.listen_for_ctrl_c();

        let driver = RunDriver::new(
            ui.clone(),
            config,
            source,
            processor,
            self.state.store(stage),
            shutdown,
        );
        let summary = driver.run().await?;
        summary.display(&ui);
        match summary.write_stats_file(&self.state.state_dir).await {
            Ok(path) => debug!("Wrote run statistics to {:?}", path),
            Err(err) => warn!("Could not write run statistics: {:#}", err),
        }
        if summary
            .failures
            .iter()
            .any(|failure| failure.kind == FailureKind::Transient)
        {
            ui.display_message(
                "🐢",
                "Some items failed because the remote service was busy; try a lower --jobs",
            );
        }
        summary.check_failure_rate(self.allowed_failure_rate)
    }
}
