//! Durable storage for the dataset and processed set.
//!
//! The dataset is a plain JSON array of records, which annotation tools can
//! import directly. The processed set lives next to it in a small JSON
//! document. Both are replaced atomically, dataset first, so a crash between
//! the two writes can only leave records which aren't yet marked. Those items
//! are re-processed and their records replaced on the next run.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;

use super::{dataset::Dataset, processed::ProcessedSet};
use crate::{
    async_utils::io::{read_json_if_exists, write_json_atomic},
    prelude::*,
};

/// The on-disk format of the processed set.
#[derive(Debug, JsonSchema, Serialize)]
pub struct ProcessedSetFile {
    /// Identifiers of every processed item, sorted.
    pub processed: Vec<String>,

    /// When this file was written.
    pub last_update: DateTime<Utc>,

    /// The number of processed items.
    pub total: usize,
}

/// Formats we accept when reading the processed set.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredProcessedSet {
    Document {
        #[serde(alias = "processed_image_ids")]
        processed: Vec<String>,
    },
    Bare(Vec<String>),
}

impl From<StoredProcessedSet> for ProcessedSet {
    fn from(stored: StoredProcessedSet) -> Self {
        match stored {
            StoredProcessedSet::Document { processed } => processed.into_iter().collect(),
            StoredProcessedSet::Bare(ids) => ids.into_iter().collect(),
        }
    }
}

/// Where a stage keeps its dataset and processed set.
#[derive(Clone, Debug)]
pub struct CheckpointStore {
    dataset_path: PathBuf,
    processed_path: PathBuf,
}

impl CheckpointStore {
    /// Use the standard file names for `stage` inside `state_dir`.
    pub fn for_stage(state_dir: &Path, stage: &str) -> Self {
        Self {
            dataset_path: state_dir.join(format!("{stage}_dataset.json")),
            processed_path: state_dir.join(format!("{stage}_processed.json")),
        }
    }

    /// Use explicit file paths.
    pub fn new(dataset_path: PathBuf, processed_path: PathBuf) -> Self {
        Self {
            dataset_path,
            processed_path,
        }
    }

    /// The path to the dataset file.
    pub fn dataset_path(&self) -> &Path {
        &self.dataset_path
    }

    /// The path to the processed set file.
    pub fn processed_path(&self) -> &Path {
        &self.processed_path
    }

    /// Have both files been written?
    pub fn exists(&self) -> bool {
        self.dataset_path.exists() && self.processed_path.exists()
    }

    /// Load the dataset and processed set. Missing files are treated as
    /// empty. Unreadable files are errors, because starting over from empty
    /// would overwrite them at the next checkpoint.
    #[instrument(level = "debug", skip_all)]
    pub async fn load(&self) -> Result<(Dataset, ProcessedSet)> {
        let records = read_json_if_exists::<Vec<Value>>(&self.dataset_path)
            .await
            .context("Could not load the existing dataset")?
            .unwrap_or_default();
        let mut processed = read_json_if_exists::<StoredProcessedSet>(&self.processed_path)
            .await
            .context("Could not load the processed set")?
            .map(ProcessedSet::from)
            .unwrap_or_default();
        let dataset = Dataset::from_records(records);

        // Every mark must have a record.
        let orphans = orphaned_marks(&dataset, &processed)
            .into_iter()
            .map(str::to_owned)
            .collect::<Vec<_>>();
        if !orphans.is_empty() {
            warn!(
                "{} items are marked as processed but have no dataset record, so they will be processed again (first: {:?})",
                orphans.len(),
                orphans[0],
            );
            processed.retain(|id| dataset.contains(id));
        }
        debug!(
            records = dataset.len(),
            processed = processed.len(),
            "Loaded checkpoint"
        );
        Ok((dataset, processed))
    }

    /// Write the dataset, then the processed set.
    #[instrument(level = "debug", skip_all, fields(records = dataset.len(), processed = processed.len()))]
    pub async fn persist(&self, dataset: &Dataset, processed: &ProcessedSet) -> Result<()> {
        write_json_atomic(&self.dataset_path, dataset.records())
            .await
            .context("Could not save the dataset")?;
        let file = ProcessedSetFile {
            processed: processed.iter().map(str::to_owned).collect(),
            last_update: Utc::now(),
            total: processed.len(),
        };
        write_json_atomic(&self.processed_path, &file)
            .await
            .context("Could not save the processed set")?;
        Ok(())
    }
}

/// Identifiers marked as processed which have no record in the dataset.
///
/// Stores written by this tool never contain these, but files carried over
/// from older tools, or edited by hand, might. [`CheckpointStore::load`]
/// drops them.
pub fn orphaned_marks<'a>(dataset: &Dataset, processed: &'a ProcessedSet) -> Vec<&'a str> {
    processed.iter().filter(|id| !dataset.contains(id)).collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn missing_files_load_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::for_stage(dir.path(), "ocr");
        let (dataset, processed) = store.load().await.unwrap();
        assert_eq!(dataset.len(), 0);
        assert!(processed.is_empty());
    }

    #[tokio::test]
    async fn persist_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::for_stage(&dir.path().join("state"), "ocr");

        let mut dataset = Dataset::new();
        let mut processed = ProcessedSet::new();
        for id in ["b", "a"] {
            dataset.upsert(id, json!({ "text": id }));
            processed.mark(id);
        }
        store.persist(&dataset, &processed).await.unwrap();

        let (dataset2, processed2) = store.load().await.unwrap();
        assert_eq!(dataset2.records(), dataset.records());
        assert_eq!(processed2, processed);
        assert!(orphaned_marks(&dataset2, &processed2).is_empty());

        let raw: Value =
            serde_json::from_slice(&std::fs::read(store.processed_path()).unwrap())
                .unwrap();
        assert_eq!(raw["processed"], json!(["a", "b"]));
        assert_eq!(raw["total"], 2);
        assert!(raw["last_update"].is_string());
    }

    #[tokio::test]
    async fn loads_legacy_processed_formats() {
        let dir = tempfile::tempdir().unwrap();
        let dataset_path = dir.path().join("tasks.json");
        let processed_path = dir.path().join("processed.json");
        std::fs::write(
            &dataset_path,
            r#"[{"meta": {"image_id": "x"}}, {"meta": {"image_id": "y"}}]"#,
        )
        .unwrap();
        let store = CheckpointStore::new(dataset_path, processed_path.clone());

        std::fs::write(
            &processed_path,
            r#"{"processed_image_ids": ["x", "y"], "last_update": "2024-01-01T00:00:00"}"#,
        )
        .unwrap();
        let (dataset, processed) = store.load().await.unwrap();
        assert_eq!(dataset.len(), 2);
        assert!(processed.contains("x") && processed.contains("y"));

        std::fs::write(&processed_path, r#"["x"]"#).unwrap();
        let (_, processed) = store.load().await.unwrap();
        assert_eq!(processed.len(), 1);
    }

    #[tokio::test]
    async fn marks_without_records_are_dropped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::for_stage(dir.path(), "ocr");
        std::fs::write(store.dataset_path(), r#"[{"meta": {"source_id": "kept"}}]"#).unwrap();
        std::fs::write(store.processed_path(), r#"["kept", "orphan"]"#).unwrap();

        let (dataset, processed) = store.load().await.unwrap();
        assert!(processed.contains("kept"));
        assert!(!processed.contains("orphan"));
        assert!(orphaned_marks(&dataset, &processed).is_empty());
    }

    #[tokio::test]
    async fn corrupt_files_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::for_stage(dir.path(), "ocr");
        std::fs::write(store.dataset_path(), "[{ not json").unwrap();
        assert!(store.load().await.is_err());
    }
}
