//! The network seam the engine talks through.
//!
//! Implementations wrap whatever transport actually reaches the backing
//! store. Errors are reported through [`SyncError::Transport`] or, for
//! server-side throttling, [`SyncError::RateLimitExceeded`] with
//! [`RateLimitOrigin::Server`](threadline_shared::RateLimitOrigin::Server).

use std::future::Future;

use tokio::sync::mpsc;

use threadline_shared::{
    ConversationId, Cursor, Entry, EntryBody, EntryId, FeedItem, HeadSnapshot, Page, Result,
};

/// Operations the engine consumes from the backing store.
pub trait SyncBackend: Send + Sync + 'static {
    /// Open a live subscription to the newest `page_size` entries.
    ///
    /// Every message on the returned channel is a complete snapshot that
    /// replaces the previous one.
    fn subscribe_head(
        &self,
        conversation: ConversationId,
        page_size: usize,
    ) -> impl Future<Output = Result<mpsc::Receiver<HeadSnapshot>>> + Send;

    /// One-shot fetch of the page strictly older than `cursor`.
    fn fetch_older(
        &self,
        conversation: ConversationId,
        cursor: Cursor,
        page_size: usize,
    ) -> impl Future<Output = Result<Page<Entry>>> + Send;

    fn send_entry(
        &self,
        conversation: ConversationId,
        body: EntryBody,
    ) -> impl Future<Output = Result<Entry>> + Send;

    /// Idempotent on the server side.
    fn mark_read(&self, conversation: ConversationId) -> impl Future<Output = Result<()>> + Send;

    /// Flip the viewer's like and return the authoritative entity.
    fn toggle_like(&self, entity_id: EntryId) -> impl Future<Output = Result<FeedItem>> + Send;
}
