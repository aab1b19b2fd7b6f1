//! The `stats` subcommand.

use clap::Args;
use tokio::io::AsyncWriteExt as _;

use super::{Stage, StateOpts};
use crate::{
    async_utils::io::create_writer, engine::driver::dry_stats, prelude::*,
    remote::SourceOpts,
};

/// Stats command line arguments.
#[derive(Debug, Args)]
pub struct StatsOpts {
    /// The stage to report on.
    #[clap(value_enum)]
    pub stage: Stage,

    #[clap(flatten)]
    pub source: SourceOpts,

    #[clap(flatten)]
    pub state: StateOpts,

    /// Read images from this folder below the source root (OCR only).
    #[clap(long)]
    pub images_folder: Option<String>,

    /// Write the statistics here instead of standard output.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,
}

/// The `stats` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_stats(opts: &StatsOpts) -> Result<()> {
    let subfolder = match opts.stage {
        Stage::Ocr => opts.images_folder.as_deref(),
        Stage::Rasterize => None,
    };
    let source = opts.source.create_source(subfolder).await?;
    let store = opts.state.store(opts.stage);
    let stats = dry_stats(source.as_ref(), opts.stage.mime_types(), &store).await?;

    let mut wtr = create_writer(opts.output_path.as_deref()).await?;
    let json =
        serde_json::to_string_pretty(&stats).context("failed to serialize stats")?;
    wtr.write_all(json.as_bytes())
        .await
        .context("failed to write stats")?;
    wtr.write_all(b"\n").await.context("failed to write stats")?;
    wtr.flush().await.context("failed to flush stats")?;
    Ok(())
}
