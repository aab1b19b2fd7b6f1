//! The `rasterize` subcommand.

use std::sync::Arc;

use clap::Args;

use super::{RunOpts, Stage};
use crate::{
    prelude::*,
    processors::rasterize::{PageOutput, Rasterizer},
    remote::{
        SourceOpts,
        drive::{DriveClient, DriveUploader},
    },
    ui::Ui,
};

/// Rasterize command line arguments.
#[derive(Debug, Args)]
pub struct RasterizeOpts {
    #[clap(flatten)]
    pub source: SourceOpts,

    #[clap(flatten)]
    pub run: RunOpts,

    /// Write page images below this directory.
    #[clap(long, default_value = "Recibos_Imagenes", conflicts_with = "drive_images_folder")]
    pub images_dir: PathBuf,

    /// Upload page images into the folder with this name inside
    /// --drive-folder, creating it if needed, instead of writing them to
    /// --images-dir. Run `ocr --images-folder` with the same name.
    #[clap(long, requires = "drive_folder")]
    pub drive_images_folder: Option<String>,
}

impl RasterizeOpts {
    /// Where rendered pages should go.
    async fn page_output(&self) -> Result<PageOutput> {
        match (&self.drive_images_folder, &self.source.drive_folder) {
            (Some(name), Some(folder_id)) => {
                let client = DriveClient::from_env(self.source.rate_limit.as_ref())?;
                let uploader = DriveUploader::open(client, folder_id, name).await?;
                Ok(PageOutput::Drive(uploader))
            }
            (Some(_), None) => Err(anyhow!("--drive-images-folder requires --drive-folder")),
            (None, _) => Ok(PageOutput::Local(self.images_dir.clone())),
        }
    }
}

/// The `rasterize` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_rasterize(ui: Ui, opts: &RasterizeOpts) -> Result<()> {
    let process_opts = opts.run.process_options().await?;
    let processor = Arc::new(Rasterizer::new(opts.page_output().await?, &process_opts)?);
    let source = opts.source.create_source(None).await?;
    opts.run
        .run_stage(ui, Stage::Rasterize, source, processor)
        .await
}
