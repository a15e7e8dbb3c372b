//! Client-side cache of every view that can hold a likeable entity.
//!
//! The same entity may appear in several independent views at once (a feed
//! page, a profile feed, a single-item view). Optimistic mutations operate on
//! all of them together.

use std::collections::HashMap;

use serde::Serialize;

use threadline_shared::{EntryId, FeedItem, Page};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "key", rename_all = "camelCase")]
pub enum CacheKey {
    /// A paginated feed, by feed name.
    Feed(String),
    /// A single-entity view.
    Item(EntryId),
    Custom(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "camelCase")]
pub enum CachedView {
    Paged(Vec<Page<FeedItem>>),
    Single(FeedItem),
}

impl CachedView {
    pub fn contains(&self, id: EntryId) -> bool {
        match self {
            Self::Paged(pages) => pages.iter().any(|p| p.entries.iter().any(|i| i.id == id)),
            Self::Single(item) => item.id == id,
        }
    }

    /// Apply `f` to every copy of `id`; returns how many were touched.
    pub fn update_item(&mut self, id: EntryId, mut f: impl FnMut(&mut FeedItem)) -> usize {
        match self {
            Self::Paged(pages) => {
                let mut touched = 0;
                for item in pages
                    .iter_mut()
                    .flat_map(|p| p.entries.iter_mut())
                    .filter(|i| i.id == id)
                {
                    f(item);
                    touched += 1;
                }
                touched
            }
            Self::Single(item) if item.id == id => {
                f(item);
                1
            }
            Self::Single(_) => 0,
        }
    }

    pub fn find(&self, id: EntryId) -> Option<&FeedItem> {
        match self {
            Self::Paged(pages) => pages.iter().flat_map(|p| p.entries.iter()).find(|i| i.id == id),
            Self::Single(item) => (item.id == id).then_some(item),
        }
    }
}

/// Verbatim copies of every view that held an entity, taken just before an
/// optimistic write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationSnapshot {
    entity_id: EntryId,
    views: Vec<(CacheKey, CachedView)>,
}

impl MutationSnapshot {
    pub fn entity_id(&self) -> EntryId {
        self.entity_id
    }

    pub fn keys(&self) -> impl Iterator<Item = &CacheKey> {
        self.views.iter().map(|(k, _)| k)
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryCache {
    views: HashMap<CacheKey, CachedView>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: CacheKey, view: CachedView) {
        self.views.insert(key, view);
    }

    pub fn get(&self, key: &CacheKey) -> Option<&CachedView> {
        self.views.get(key)
    }

    pub fn remove(&mut self, key: &CacheKey) -> Option<CachedView> {
        self.views.remove(key)
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    /// Any cached copy of `id`.
    pub fn find(&self, id: EntryId) -> Option<&FeedItem> {
        self.views.values().find_map(|v| v.find(id))
    }

    pub fn keys_containing(&self, id: EntryId) -> Vec<CacheKey> {
        self.views
            .iter()
            .filter(|(_, v)| v.contains(id))
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn snapshot(&self, id: EntryId) -> MutationSnapshot {
        MutationSnapshot {
            entity_id: id,
            views: self
                .views
                .iter()
                .filter(|(_, v)| v.contains(id))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Put every snapshotted view back exactly as it was.
    pub fn restore(&mut self, snapshot: &MutationSnapshot) {
        for (key, view) in &snapshot.views {
            self.views.insert(key.clone(), view.clone());
        }
    }

    /// Apply `f` to every cached copy of `id`.
    pub fn update_entity(&mut self, id: EntryId, mut f: impl FnMut(&mut FeedItem)) -> usize {
        self.views
            .values_mut()
            .map(|v| v.update_item(id, &mut f))
            .sum()
    }

    /// Overwrite every cached copy of `item.id` with `item`.
    pub fn replace_entity(&mut self, item: &FeedItem) -> usize {
        self.update_entity(item.id, |cached| *cached = item.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::feed_item;

    #[test]
    fn test_snapshot_only_views_holding_entity() {
        let target = feed_item(4, false);
        let other = feed_item(1, true);

        let mut cache = QueryCache::new();
        cache.insert(
            CacheKey::Feed("home".into()),
            CachedView::Paged(vec![Page::new(vec![other.clone(), target.clone()], None, false)]),
        );
        cache.insert(CacheKey::Item(other.id), CachedView::Single(other.clone()));
        cache.insert(CacheKey::Item(target.id), CachedView::Single(target.clone()));

        let snapshot = cache.snapshot(target.id);
        let mut keys: Vec<_> = snapshot.keys().cloned().collect();
        keys.sort_by_key(|k| format!("{k:?}"));
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&CacheKey::Item(target.id)));
        assert!(keys.contains(&CacheKey::Feed("home".into())));
    }

    #[test]
    fn test_update_touches_every_copy() {
        let target = feed_item(4, false);
        let mut cache = QueryCache::new();
        cache.insert(
            CacheKey::Feed("home".into()),
            CachedView::Paged(vec![
                Page::new(vec![target.clone()], None, false),
                Page::new(vec![target.clone()], None, false),
            ]),
        );
        cache.insert(CacheKey::Item(target.id), CachedView::Single(target.clone()));

        let touched = cache.update_entity(target.id, |i| i.like_count += 1);
        assert_eq!(touched, 3);
        assert_eq!(cache.find(target.id).map(|i| i.like_count), Some(5));
    }

    #[test]
    fn test_restore_is_verbatim() {
        let target = feed_item(4, false);
        let mut cache = QueryCache::new();
        let key = CacheKey::Item(target.id);
        cache.insert(key.clone(), CachedView::Single(target.clone()));
        let before = cache.get(&key).cloned();

        let snapshot = cache.snapshot(target.id);
        cache.update_entity(target.id, |i| {
            i.like_count = 99;
            i.liked_by_viewer = true;
        });
        cache.restore(&snapshot);

        assert_eq!(cache.get(&key).cloned(), before);
    }
}
