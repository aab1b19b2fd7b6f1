//! The accumulated output records.

use std::collections::HashMap;

use crate::prelude::*;

/// The key under each record's `meta` object that ties it to its source item.
pub const SOURCE_ID_KEY: &str = "source_id";

/// An older key which served the same purpose. We read it, but never write it.
const LEGACY_SOURCE_ID_KEY: &str = "image_id";

/// Find the source identifier a record was produced from, if any.
pub fn source_id(record: &Value) -> Option<&str> {
    let meta = record.get("meta")?;
    meta.get(SOURCE_ID_KEY)
        .or_else(|| meta.get(LEGACY_SOURCE_ID_KEY))
        .and_then(Value::as_str)
}

/// An ordered collection of output records, at most one per source item.
///
/// Records appear in the order their items were first merged. Re-processing
/// an item replaces its record where it stands.
#[derive(Clone, Debug, Default)]
pub struct Dataset {
    records: Vec<Value>,
    by_source_id: HashMap<String, usize>,
}

impl Dataset {
    /// Create an empty dataset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a dataset from stored records.
    ///
    /// Records without a source identifier are kept as-is but can never be
    /// replaced. If a source identifier appears more than once, we keep the
    /// last copy in the position of the first.
    pub fn from_records(records: Vec<Value>) -> Self {
        let mut dataset = Self::new();
        let mut duplicates = 0;
        for record in records {
            match source_id(&record).map(str::to_owned) {
                Some(id) => {
                    if let Some(&idx) = dataset.by_source_id.get(&id) {
                        duplicates += 1;
                        dataset.records[idx] = record;
                    } else {
                        dataset.by_source_id.insert(id, dataset.records.len());
                        dataset.records.push(record);
                    }
                }
                None => dataset.records.push(record),
            }
        }
        if duplicates > 0 {
            warn!(
                "Dropped {} duplicate records while loading the dataset",
                duplicates
            );
        }
        dataset
    }

    /// Insert or replace the record for `id`, tagging it with `id` so we can
    /// find it again after a reload. Returns `true` if an older record was
    /// replaced.
    pub fn upsert(&mut self, id: &str, record: Value) -> bool {
        let record = tag_record(id, record);
        if let Some(&idx) = self.by_source_id.get(id) {
            self.records[idx] = record;
            true
        } else {
            self.by_source_id.insert(id.to_owned(), self.records.len());
            self.records.push(record);
            false
        }
    }

    /// Do we have a record for `id`?
    pub fn contains(&self, id: &str) -> bool {
        self.by_source_id.contains_key(id)
    }

    /// Get the record for `id`.
    #[cfg(test)]
    pub fn get(&self, id: &str) -> Option<&Value> {
        self.by_source_id.get(id).map(|&idx| &self.records[idx])
    }

    /// How many records do we have?
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// All records, in order.
    pub fn records(&self) -> &[Value] {
        &self.records
    }
}

/// Store `id` under `meta.source_id`, wrapping non-object records so there is
/// somewhere to put it.
fn tag_record(id: &str, record: Value) -> Value {
    let mut record = match record {
        Value::Object(_) => record,
        other => serde_json::json!({ "data": other }),
    };
    if let Some(obj) = record.as_object_mut() {
        let meta = obj
            .entry("meta")
            .or_insert_with(|| Value::Object(Default::default()));
        if !meta.is_object() {
            *meta = Value::Object(Default::default());
        }
        if let Some(meta) = meta.as_object_mut() {
            meta.insert(SOURCE_ID_KEY.to_owned(), Value::String(id.to_owned()));
        }
    }
    record
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn upsert_tags_and_replaces_in_place() {
        let mut dataset = Dataset::new();
        assert!(!dataset.upsert("a", json!({ "text": "first" })));
        assert!(!dataset.upsert("b", json!({ "text": "second" })));
        assert!(dataset.upsert("a", json!({ "text": "again" })));

        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.records()[0]["text"], "again");
        assert_eq!(dataset.records()[0]["meta"]["source_id"], "a");
        assert_eq!(dataset.records()[1]["meta"]["source_id"], "b");
    }

    #[test]
    fn non_object_records_are_wrapped() {
        let mut dataset = Dataset::new();
        dataset.upsert("a", json!("just text"));
        assert_eq!(dataset.get("a").unwrap()["data"], "just text");
        assert_eq!(source_id(dataset.get("a").unwrap()), Some("a"));
    }

    #[test]
    fn reload_understands_legacy_ids_and_drops_duplicates() {
        let dataset = Dataset::from_records(vec![
            json!({ "meta": { "image_id": "a" }, "v": 1 }),
            json!({ "meta": { "source_id": "b" } }),
            json!({ "untracked": true }),
            json!({ "meta": { "image_id": "a" }, "v": 2 }),
        ]);
        assert_eq!(dataset.len(), 3);
        assert!(dataset.contains("a"));
        assert!(dataset.contains("b"));
        assert_eq!(dataset.get("a").unwrap()["v"], 2);
        assert_eq!(dataset.records()[2]["untracked"], true);
    }
}
