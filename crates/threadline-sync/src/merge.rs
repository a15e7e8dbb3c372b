//! Combines accumulated history with the live head into the rendered sequence.

use std::collections::HashMap;

use threadline_shared::{EntryId, TimelineItem};

/// Union `older` and `head`, keep one copy per id (the head copy wins), and
/// order by creation time ascending, ids breaking ties.
///
/// Pure: the same inputs always produce the same sequence.
pub fn merge_view<T: TimelineItem>(older: &[T], head: &[T]) -> Vec<T> {
    let mut by_id: HashMap<EntryId, &T> = HashMap::with_capacity(older.len() + head.len());
    for item in older {
        by_id.entry(item.id()).or_insert(item);
    }
    for item in head {
        by_id.insert(item.id(), item);
    }

    let mut merged: Vec<T> = by_id.into_values().cloned().collect();
    merged.sort_by(|a, b| {
        a.created_at()
            .cmp(&b.created_at())
            .then_with(|| a.id().cmp(&b.id()))
    });
    merged
}
