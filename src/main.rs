use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::Directive, fmt::format::FmtSpan, layer::SubscriberExt,
    util::SubscriberInitExt as _,
};

use self::{prelude::*, ui::Ui};

mod async_utils;
mod cmd;
mod cpu_limit;
mod engine;
mod prelude;
mod processors;
mod queues;
mod rate_limit;
mod remote;
mod retry;
mod ui;

/// Build Label Studio OCR datasets from folders of scanned PDFs,
/// incrementally.
#[derive(Debug, Parser)]
#[clap(
    version,
    author,
    after_help = r#"
Environment Variables:
  - GOOGLE_DRIVE_ACCESS_TOKEN: OAuth bearer token for --drive-folder.
  - GOOGLE_DRIVE_API_BASE (optional): Override the Drive API URL.
  - DRIVE_FOLDER_ID (optional): Default for --drive-folder.

  These variables may be set in a standard `.env` file.

  Runs can be interrupted with Ctrl-C. Completed items are saved, and
  the next run picks up where this one stopped.
"#
)]
struct Opts {
    #[clap(subcommand)]
    subcmd: Cmd,
}

/// The subcommands we support.
#[derive(Debug, Subcommand)]
enum Cmd {
    /// Render PDF pages to images.
    Rasterize(cmd::rasterize::RasterizeOpts),
    /// OCR page images into Label Studio tasks.
    Ocr(cmd::ocr::OcrOpts),
    /// Report how much work a stage has left, without doing any.
    Stats(cmd::stats::StatsOpts),
    /// Split a dataset into smaller files for import.
    Split(cmd::split::SplitOpts),
    /// Print schemas for our file formats.
    Schema(cmd::schema::SchemaOpts),
}

impl Cmd {
    /// Are we using stdout for output?
    fn using_stdout_for_output(&self) -> bool {
        match self {
            Cmd::Stats(opts) => opts.output_path.is_none(),
            Cmd::Schema(opts) => opts.output_path.is_none(),
            Cmd::Rasterize(_) | Cmd::Ocr(_) | Cmd::Split(_) => false,
        }
    }
}

/// Our entry point, which can return an error. [`anyhow::Result`] will
/// automatically print a nice error message with optional backtrace.
#[tokio::main]
async fn main() -> Result<()> {
    let ui = Ui::init();

    // Initialize tracing.
    let directive =
        Directive::from_str("info").expect("built-in directive should be valid");
    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();
    let subscriber = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(ui.get_stderr_writer())
        .with_filter(env_filter);
    tracing_subscriber::registry().with(subscriber).init();

    real_main(ui).await
}

/// Our real entry point.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main(ui: Ui) -> Result<()> {
    // Load environment variables from a `.env` file, if it exists.
    dotenvy::dotenv().ok();

    let opts = Opts::parse();
    debug!("Parsed options: {:?}", opts);

    if opts.subcmd.using_stdout_for_output() {
        ui.hide_progress_bars();
    }

    match &opts.subcmd {
        Cmd::Rasterize(opts) => cmd::rasterize::cmd_rasterize(ui, opts).await?,
        Cmd::Ocr(opts) => cmd::ocr::cmd_ocr(ui, opts).await?,
        Cmd::Stats(opts) => cmd::stats::cmd_stats(opts).await?,
        Cmd::Split(opts) => cmd::split::cmd_split(ui, opts).await?,
        Cmd::Schema(opts) => cmd::schema::cmd_schema(opts).await?,
    }
    Ok(())
}
