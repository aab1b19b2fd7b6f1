//! The set of identifiers we have already processed.

use std::collections::BTreeSet;

/// Identifiers whose output is already in the dataset.
///
/// Only the [`Accumulator`](super::accumulator::Accumulator) marks items, and
/// only after their record has been merged. Marks are only removed when a
/// loaded store has no record to back them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessedSet {
    ids: BTreeSet<String>,
}

impl ProcessedSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Has `id` been processed?
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Mark `id` as processed. Returns `false` if it was already marked.
    pub fn mark(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            false
        } else {
            self.ids.insert(id.to_owned())
        }
    }

    /// How many identifiers have been processed?
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Is the set empty?
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Keep only the identifiers for which `keep` returns `true`.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.ids.retain(|id| keep(id.as_str()));
    }

    /// Iterate over identifiers in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }
}

impl FromIterator<String> for ProcessedSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}
