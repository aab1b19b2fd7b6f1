//! The `schema` subcommand.

use clap::{Args, ValueEnum};
use schemars::schema_for;
use tokio::io::AsyncWriteExt as _;

use crate::{
    async_utils::io::create_writer,
    engine::{
        store::ProcessedSetFile,
        summary::{DryStats, RunSummary},
    },
    prelude::*,
    processors::{ocr::LabelStudioTask, rasterize::PageManifest},
    remote::RemoteItem,
};

/// The different schema types we support.
///
/// We parse these as PascalCase, because they represent type names.
#[derive(Debug, Clone, Copy, ValueEnum)]
#[clap(rename_all = "PascalCase")]
pub enum SchemaType {
    /// A dataset record from the `ocr` stage.
    LabelStudioTask,
    /// A dataset record from the `rasterize` stage.
    PageManifest,
    /// The processed set file.
    ProcessedSet,
    /// A run statistics file.
    RunSummary,
    /// Output of the `stats` subcommand.
    DryStats,
    /// A remote item.
    RemoteItem,
}

/// Schema command line arguments.
#[derive(Debug, Args)]
pub struct SchemaOpts {
    /// The schema type to generate.
    #[clap(value_enum, value_name = "TYPE")]
    pub schema_type: SchemaType,

    /// The output path to write the schema to.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,
}

/// The `schema` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_schema(schema_opts: &SchemaOpts) -> Result<()> {
    let schema = match schema_opts.schema_type {
        SchemaType::LabelStudioTask => schema_for!(LabelStudioTask),
        SchemaType::PageManifest => schema_for!(PageManifest),
        SchemaType::ProcessedSet => schema_for!(ProcessedSetFile),
        SchemaType::RunSummary => schema_for!(RunSummary),
        SchemaType::DryStats => schema_for!(DryStats),
        SchemaType::RemoteItem => schema_for!(RemoteItem),
    };

    let mut wtr = create_writer(schema_opts.output_path.as_deref()).await?;
    let schema_str =
        serde_json::to_string_pretty(&schema).context("failed to serialize schema")?;
    wtr.write_all(schema_str.as_bytes())
        .await
        .context("failed to write schema")?;
    wtr.flush().await.context("failed to flush schema")?;
    Ok(())
}
