//! Decide which enumerated items still need work.

use std::collections::HashSet;

use super::processed::ProcessedSet;
use crate::remote::RemoteItem;

/// The items a run will process, and what it left out.
#[derive(Debug, Default)]
pub struct WorkPlan {
    /// Items to process, in enumeration order.
    pub pending: Vec<RemoteItem>,

    /// Items skipped because they were already processed.
    pub skipped: usize,

    /// Unprocessed items left for a later run by `take_first`.
    pub deferred: usize,
}

/// Split `items` into pending and skipped items.
///
/// With `reprocess_all`, nothing is skipped. `take_first` caps the number of
/// pending items. Items listed twice are only processed once.
pub fn plan_work(
    items: Vec<RemoteItem>,
    processed: &ProcessedSet,
    reprocess_all: bool,
    take_first: Option<usize>,
) -> WorkPlan {
    let mut plan = WorkPlan::default();
    let mut seen = HashSet::new();
    for item in items {
        if !seen.insert(item.id.clone()) {
            continue;
        }
        if !reprocess_all && processed.contains(&item.id) {
            plan.skipped += 1;
        } else if take_first.is_some_and(|limit| plan.pending.len() >= limit) {
            plan.deferred += 1;
        } else {
            plan.pending.push(item);
        }
    }
    plan
}
