//! The `ocr` subcommand.

use std::sync::Arc;

use clap::Args;

use super::{RunOpts, Stage};
use crate::{prelude::*, processors::ocr::OcrProcessor, remote::SourceOpts, ui::Ui};

/// OCR command line arguments.
#[derive(Debug, Args)]
pub struct OcrOpts {
    #[clap(flatten)]
    pub source: SourceOpts,

    #[clap(flatten)]
    pub run: RunOpts,

    /// Read images from this folder below the source root, such as the
    /// `--images-dir` of an earlier `rasterize` run.
    #[clap(long)]
    pub images_folder: Option<String>,
}

/// The `ocr` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_ocr(ui: Ui, opts: &OcrOpts) -> Result<()> {
    let process_opts = opts.run.process_options().await?;
    let source = opts
        .source
        .create_source(opts.images_folder.as_deref())
        .await?;
    let processor = Arc::new(OcrProcessor::new(source.clone(), &process_opts)?);
    opts.run.run_stage(ui, Stage::Ocr, source, processor).await
}
