//! The incremental processing engine.
//!
//! A run enumerates a remote folder, skips everything recorded in the
//! processed set, pushes the rest through a bounded worker pool, and merges
//! each result into a growing dataset. The dataset and processed set are
//! checkpointed together every few results, so an interrupted run loses at
//! most one batch of work and never records an item as processed without its
//! output.

use std::fmt;

use schemars::JsonSchema;

use crate::{
    prelude::*,
    remote::{RemoteItem, is_transient},
};

pub mod accumulator;
pub mod checkpoint;
pub mod dataset;
pub mod driver;
pub mod filter;
pub mod processed;
pub mod store;
pub mod summary;

#[cfg(test)]
pub(crate) mod test_support;

/// Turns the contents of one remote item into one dataset record.
///
/// Implementations must not touch the dataset or processed set. They may
/// write side outputs, such as rendered pages, but those must be safe to
/// overwrite if the item is processed again.
#[async_trait]
pub trait ItemProcessor: Send + Sync + 'static {
    /// The MIME types this processor accepts.
    fn mime_types(&self) -> &'static [&'static str];

    /// Process an item.
    async fn process(&self, item: &RemoteItem, content: Vec<u8>) -> Result<Value>;
}

/// The outcome of processing a single item.
#[derive(Debug)]
pub struct ProcessingResult {
    /// The item we processed.
    pub item: RemoteItem,

    /// The output record, or why we couldn't produce one.
    pub outcome: Result<Value, ItemFailure>,
}

/// Broad categories of item failures.
#[derive(Clone, Copy, Debug, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// We couldn't download the item.
    Fetch,

    /// We downloaded the item, but couldn't process it.
    Process,

    /// The remote service throttled us or was temporarily unavailable.
    /// Lowering `--jobs` and re-running usually helps.
    Transient,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Fetch => write!(f, "fetch"),
            FailureKind::Process => write!(f, "process"),
            FailureKind::Transient => write!(f, "transient"),
        }
    }
}

/// A failed item, as reported in the run summary.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct ItemFailure {
    /// The item's identifier.
    pub id: String,

    /// The item's folder path and name.
    pub name: String,

    /// What kind of failure this was.
    pub kind: FailureKind,

    /// A human-readable reason, including the error chain.
    pub reason: String,
}

impl ItemFailure {
    /// Build a failure from an error. Errors caused by a transient remote
    /// condition are reported as [`FailureKind::Transient`] no matter where
    /// they happened.
    pub fn from_error(item: &RemoteItem, kind: FailureKind, err: &anyhow::Error) -> Self {
        let kind = if is_transient(err) {
            FailureKind::Transient
        } else {
            kind
        };
        Self {
            id: item.id.clone(),
            name: item.display_path(),
            kind,
            reason: format!("{err:#}"),
        }
    }
}
