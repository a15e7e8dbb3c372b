//! In-memory [`SyncBackend`].
//!
//! Behaves like the real backing store closely enough to drive the engine
//! end to end: server-assigned monotonic timestamps, cursor pagination,
//! live snapshot pushes to every subscriber, per-viewer read markers and
//! like counters. A slow subscriber skips intermediate snapshots but always
//! receives the newest one. Failure injection (offline mode, one-shot errors,
//! latency) makes rollback and race paths reachable from tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tracing::debug;

use threadline_shared::cursor::CursorPosition;
use threadline_shared::{
    ConversationId, Cursor, Entry, EntryBody, EntryId, FeedItem, HeadSnapshot, Page, Result,
    SyncError, UserId,
};

use crate::backend::SyncBackend;

const SUBSCRIBER_BUFFER: usize = 64;

struct Subscriber {
    page_size: usize,
    /// Latest snapshot, drained into the subscriber's channel by
    /// [`forward_latest`].
    latest: watch::Sender<HeadSnapshot>,
}

#[derive(Default)]
struct ConversationStore {
    /// Sorted by `(created_at, id)` ascending.
    entries: Vec<Entry>,
    last_read: HashMap<UserId, DateTime<Utc>>,
    subscribers: Vec<Subscriber>,
}

impl ConversationStore {
    fn head_snapshot(&self, viewer: UserId, page_size: usize) -> HeadSnapshot {
        let start = self.entries.len().saturating_sub(page_size);
        let page_entries = self.entries[start..].to_vec();
        let has_more = start > 0;
        let next_cursor = if has_more {
            page_entries
                .first()
                .and_then(|e| CursorPosition::new(e.created_at, e.id).encode().ok())
        } else {
            None
        };

        HeadSnapshot {
            page: Page::new(page_entries, next_cursor, has_more),
            last_read_at: self.last_read.get(&viewer).copied(),
        }
    }

    fn older_than(&self, position: &CursorPosition, page_size: usize) -> Result<Page<Entry>> {
        let boundary = (position.created_at_micros, position.id);
        let end = self
            .entries
            .partition_point(|e| (e.created_at.timestamp_micros(), e.id.0) < boundary);
        let start = end.saturating_sub(page_size);
        let page_entries = self.entries[start..end].to_vec();
        let has_more = start > 0;
        let next_cursor = match page_entries.first() {
            Some(e) if has_more => Some(CursorPosition::new(e.created_at, e.id).encode()?),
            _ => None,
        };
        Ok(Page::new(page_entries, next_cursor, has_more))
    }

    fn broadcast(&mut self, viewer: UserId) {
        let snapshots: Vec<HeadSnapshot> = self
            .subscribers
            .iter()
            .map(|sub| self.head_snapshot(viewer, sub.page_size))
            .collect();

        let mut kept = Vec::with_capacity(self.subscribers.len());
        for (sub, snapshot) in self.subscribers.drain(..).zip(snapshots) {
            if sub.latest.send(snapshot).is_ok() {
                kept.push(sub);
            }
        }
        self.subscribers = kept;
    }
}

/// Deliver the newest snapshot whenever the subscriber has room. Snapshots
/// replace each other, so ones published while the channel is full collapse
/// into the latest.
async fn forward_latest(
    mut latest: watch::Receiver<HeadSnapshot>,
    tx: mpsc::Sender<HeadSnapshot>,
) {
    loop {
        tokio::select! {
            changed = latest.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = latest.borrow_and_update().clone();
                if tx.send(snapshot).await.is_err() {
                    break;
                }
            }
            _ = tx.closed() => break,
        }
    }
}

struct LikeState {
    item: FeedItem,
    liked_by: HashSet<UserId>,
    /// Likes from accounts this backend does not model individually.
    external_likes: u32,
}

impl LikeState {
    fn view_for(&self, viewer: UserId) -> FeedItem {
        FeedItem {
            like_count: self.external_likes + self.liked_by.len() as u32,
            liked_by_viewer: self.liked_by.contains(&viewer),
            ..self.item.clone()
        }
    }
}

struct Inner {
    viewer: UserId,
    conversations: HashMap<ConversationId, ConversationStore>,
    items: HashMap<EntryId, LikeState>,
    last_timestamp: Option<DateTime<Utc>>,
    offline: bool,
    latency: Duration,
    injected: VecDeque<SyncError>,
    requests: usize,
}

impl Inner {
    /// Server clock: wall time, nudged forward so it never repeats.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let ts = match self.last_timestamp {
            Some(last) if now <= last => last + chrono::Duration::microseconds(1),
            _ => now,
        };
        self.last_timestamp = Some(ts);
        ts
    }

    fn admit(&mut self) -> Result<()> {
        self.requests += 1;
        if let Some(err) = self.injected.pop_front() {
            return Err(err);
        }
        if self.offline {
            return Err(SyncError::Transport("network unreachable".into()));
        }
        Ok(())
    }

    fn conversation(&mut self, id: ConversationId) -> &mut ConversationStore {
        self.conversations.entry(id).or_default()
    }

    fn append(&mut self, conversation: ConversationId, author: UserId, body: EntryBody) -> Entry {
        let entry = Entry {
            id: EntryId::new(),
            author_id: author,
            body,
            created_at: self.next_timestamp(),
            read_by_counterpart_at: None,
        };
        let viewer = self.viewer;
        let store = self.conversation(conversation);
        store.entries.push(entry.clone());
        store.broadcast(viewer);
        entry
    }
}

/// Shared handle; clones observe the same store.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBackend {
    /// Create a store whose requests are issued on behalf of `viewer`.
    pub fn new(viewer: UserId) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                viewer,
                conversations: HashMap::new(),
                items: HashMap::new(),
                last_timestamp: None,
                offline: false,
                latency: Duration::ZERO,
                injected: VecDeque::new(),
                requests: 0,
            })),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|e| SyncError::Transport(format!("Lock poisoned: {e}")))
    }

    /// Append an entry as if `author` had sent it, pushing a new head
    /// snapshot to subscribers.
    pub fn push_entry(
        &self,
        conversation: ConversationId,
        author: UserId,
        body: EntryBody,
    ) -> Result<Entry> {
        Ok(self.lock()?.append(conversation, author, body))
    }

    /// Seed `count` text entries from `author`, oldest first.
    pub fn seed_entries(
        &self,
        conversation: ConversationId,
        author: UserId,
        count: usize,
    ) -> Result<Vec<Entry>> {
        let mut inner = self.lock()?;
        Ok((0..count)
            .map(|i| inner.append(conversation, author, EntryBody::text(format!("message {i}"))))
            .collect())
    }

    /// Set the viewer's server-side read marker without a request.
    pub fn set_last_read(&self, conversation: ConversationId, at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.lock()?;
        let viewer = inner.viewer;
        inner.conversation(conversation).last_read.insert(viewer, at);
        Ok(())
    }

    pub fn last_read(&self, conversation: ConversationId) -> Result<Option<DateTime<Utc>>> {
        let mut inner = self.lock()?;
        let viewer = inner.viewer;
        Ok(inner.conversation(conversation).last_read.get(&viewer).copied())
    }

    /// Record that the counterpart read everything the viewer sent.
    pub fn counterpart_reads(&self, conversation: ConversationId) -> Result<()> {
        let mut inner = self.lock()?;
        let viewer = inner.viewer;
        let now = inner.next_timestamp();
        let store = inner.conversation(conversation);
        for entry in store.entries.iter_mut().filter(|e| e.author_id == viewer) {
            entry.read_by_counterpart_at.get_or_insert(now);
        }
        store.broadcast(viewer);
        Ok(())
    }

    pub fn seed_item(&self, item: FeedItem) -> Result<()> {
        let mut inner = self.lock()?;
        let viewer = inner.viewer;
        let mut liked_by = HashSet::new();
        let mut external_likes = item.like_count;
        if item.liked_by_viewer {
            liked_by.insert(viewer);
            external_likes = external_likes.saturating_sub(1);
        }
        inner.items.insert(
            item.id,
            LikeState {
                item,
                liked_by,
                external_likes,
            },
        );
        Ok(())
    }

    /// Another account likes `id` behind the viewer's back.
    pub fn like_from_elsewhere(&self, id: EntryId) -> Result<()> {
        let mut inner = self.lock()?;
        let state = inner
            .items
            .get_mut(&id)
            .ok_or_else(|| SyncError::Transport(format!("unknown entity {id}")))?;
        state.external_likes += 1;
        Ok(())
    }

    pub fn item(&self, id: EntryId) -> Result<Option<FeedItem>> {
        let inner = self.lock()?;
        Ok(inner.items.get(&id).map(|s| s.view_for(inner.viewer)))
    }

    pub fn set_offline(&self, offline: bool) -> Result<()> {
        self.lock()?.offline = offline;
        Ok(())
    }

    pub fn set_latency(&self, latency: Duration) -> Result<()> {
        self.lock()?.latency = latency;
        Ok(())
    }

    /// Fail the next request with `err`, regardless of its kind.
    pub fn inject_failure(&self, err: SyncError) -> Result<()> {
        self.lock()?.injected.push_back(err);
        Ok(())
    }

    /// Requests that reached this backend so far.
    pub fn request_count(&self) -> usize {
        self.lock().map(|inner| inner.requests).unwrap_or(0)
    }

    pub fn entry_count(&self, conversation: ConversationId) -> usize {
        self.lock()
            .map(|mut inner| inner.conversation(conversation).entries.len())
            .unwrap_or(0)
    }

    async fn simulate_latency(&self) -> Result<()> {
        let latency = self.lock()?.latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        Ok(())
    }
}

impl SyncBackend for MemoryBackend {
    async fn subscribe_head(
        &self,
        conversation: ConversationId,
        page_size: usize,
    ) -> Result<mpsc::Receiver<HeadSnapshot>> {
        self.simulate_latency().await?;
        let mut inner = self.lock()?;
        inner.admit()?;

        let viewer = inner.viewer;
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let store = inner.conversation(conversation);
        let initial = store.head_snapshot(viewer, page_size);
        let (latest, latest_rx) = watch::channel(initial.clone());
        tx.try_send(initial)
            .map_err(|e| SyncError::Transport(format!("subscription closed: {e}")))?;
        store.subscribers.push(Subscriber { page_size, latest });
        drop(inner);

        tokio::spawn(forward_latest(latest_rx, tx));
        debug!(%conversation, page_size, "Head subscription opened");
        Ok(rx)
    }

    async fn fetch_older(
        &self,
        conversation: ConversationId,
        cursor: Cursor,
        page_size: usize,
    ) -> Result<Page<Entry>> {
        self.simulate_latency().await?;
        let mut inner = self.lock()?;
        inner.admit()?;

        let position = CursorPosition::decode(&cursor)?;
        inner.conversation(conversation).older_than(&position, page_size)
    }

    async fn send_entry(&self, conversation: ConversationId, body: EntryBody) -> Result<Entry> {
        self.simulate_latency().await?;
        let mut inner = self.lock()?;
        inner.admit()?;

        let viewer = inner.viewer;
        Ok(inner.append(conversation, viewer, body))
    }

    async fn mark_read(&self, conversation: ConversationId) -> Result<()> {
        self.simulate_latency().await?;
        let mut inner = self.lock()?;
        inner.admit()?;

        let viewer = inner.viewer;
        let now = inner.next_timestamp();
        let store = inner.conversation(conversation);
        store.last_read.insert(viewer, now);
        store.broadcast(viewer);
        Ok(())
    }

    async fn toggle_like(&self, entity_id: EntryId) -> Result<FeedItem> {
        self.simulate_latency().await?;
        let mut inner = self.lock()?;
        inner.admit()?;

        let viewer = inner.viewer;
        let state = inner
            .items
            .get_mut(&entity_id)
            .ok_or_else(|| SyncError::Transport(format!("unknown entity {entity_id}")))?;
        if !state.liked_by.remove(&viewer) {
            state.liked_by.insert(viewer);
        }
        Ok(state.view_for(viewer))
    }
}
