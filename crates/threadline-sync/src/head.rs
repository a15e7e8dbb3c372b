//! Live view of the newest page of a timeline.

use threadline_shared::{Cursor, Page, TimelineItem};
use tracing::trace;

/// Holds the latest snapshot pushed by a head subscription.
///
/// Snapshots replace the held page wholesale, so a reader always sees a page
/// that was valid at some point in server time.
#[derive(Debug, Clone)]
pub struct SubscriptionHead<T> {
    page: Page<T>,
    version: u64,
}

impl<T: TimelineItem> SubscriptionHead<T> {
    pub fn new() -> Self {
        Self {
            page: Page::empty(),
            version: 0,
        }
    }

    /// Replace the held page with `page`.
    pub fn apply(&mut self, page: Page<T>) {
        self.version += 1;
        trace!(
            version = self.version,
            len = page.entries.len(),
            has_more = page.has_more,
            "Head snapshot applied"
        );
        self.page = page;
    }

    pub fn entries(&self) -> &[T] {
        &self.page.entries
    }

    pub fn next_cursor(&self) -> Option<&Cursor> {
        self.page.next_cursor.as_ref()
    }

    pub fn has_more(&self) -> bool {
        self.page.has_more
    }

    pub fn page(&self) -> &Page<T> {
        &self.page
    }

    /// Number of snapshots applied so far; 0 until the first push.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn has_snapshot(&self) -> bool {
        self.version > 0
    }

    pub fn last(&self) -> Option<&T> {
        self.page.entries.last()
    }
}

impl<T: TimelineItem> Default for SubscriptionHead<T> {
    fn default() -> Self {
        Self::new()
    }
}
