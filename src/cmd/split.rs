//! The `split` subcommand.
//!
//! Label Studio imports large task files slowly, so we split a dataset into
//! numbered batches that can be uploaded one at a time.

use std::num::NonZeroUsize;

use clap::Args;
use tokio::fs;

use crate::{async_utils::io::write_json_atomic, prelude::*, ui::Ui};

/// Split command line arguments.
#[derive(Debug, Args)]
pub struct SplitOpts {
    /// The dataset to split: a JSON array of tasks.
    pub input_path: PathBuf,

    /// Directory to write the batches to.
    #[clap(short = 'o', long = "out-dir")]
    pub output_dir: PathBuf,

    /// Tasks per batch file.
    #[clap(long, default_value = "50")]
    pub tasks_per_file: NonZeroUsize,

    /// Batch file name prefix.
    #[clap(long, default_value = "recibos")]
    pub prefix: String,
}

/// The `split` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_split(ui: Ui, opts: &SplitOpts) -> Result<()> {
    let data = fs::read(&opts.input_path)
        .await
        .with_context(|| format!("Failed to read {:?}", opts.input_path))?;
    let tasks = serde_json::from_slice::<Vec<Value>>(&data)
        .with_context(|| format!("Expected a JSON array of tasks in {:?}", opts.input_path))?;

    let paths =
        write_batches(&opts.output_dir, &opts.prefix, &tasks, opts.tasks_per_file).await?;
    ui.display_message(
        "📦",
        &format!(
            "Wrote {} tasks to {} files in {:?}",
            tasks.len(),
            paths.len(),
            opts.output_dir
        ),
    );
    Ok(())
}

/// Write `tasks` to `<prefix>_batch_NNN_of_MMM.json` files in `dir`.
pub async fn write_batches(
    dir: &Path,
    prefix: &str,
    tasks: &[Value],
    tasks_per_file: NonZeroUsize,
) -> Result<Vec<PathBuf>> {
    let chunks = tasks.chunks(tasks_per_file.get()).collect::<Vec<_>>();
    let total = chunks.len();
    let mut paths = Vec::with_capacity(total);
    for (idx, chunk) in chunks.into_iter().enumerate() {
        let path = dir.join(format!(
            "{prefix}_batch_{:03}_of_{:03}.json",
            idx + 1,
            total
        ));
        write_json_atomic(&path, chunk).await?;
        debug!(tasks = chunk.len(), "Wrote {:?}", path);
        paths.push(path);
    }
    Ok(paths)
}
