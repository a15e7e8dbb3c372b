//! On-demand accumulation of pages older than the live head.

use tracing::{debug, info};

use threadline_shared::{ConversationId, Cursor, Page, Result, SyncError, TimelineItem};

use crate::head::SubscriptionHead;
use crate::merge::merge_view;

/// A "load older" fetch that has been issued but not yet applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OlderRequest {
    pub conversation: ConversationId,
    pub cursor: Cursor,
    ticket: u64,
}

/// Grows a list of entries older than the head, one page per request.
///
/// At most one fetch is in flight at a time. Cursors are always taken from
/// the latest response (or, before the first response, from the head).
#[derive(Debug, Clone)]
pub struct HistoryAccumulator<T> {
    conversation: ConversationId,
    older: Vec<T>,
    cursor: Option<Cursor>,
    has_more: bool,
    loaded_any: bool,
    /// Set once the first fetch is issued; from then on every head snapshot
    /// is folded into `older`.
    tracking_head: bool,
    in_flight: Option<u64>,
    next_ticket: u64,
}

impl<T: TimelineItem> HistoryAccumulator<T> {
    pub fn new(conversation: ConversationId) -> Self {
        Self {
            conversation,
            older: Vec::new(),
            cursor: None,
            has_more: false,
            loaded_any: false,
            tracking_head: false,
            in_flight: None,
            next_ticket: 0,
        }
    }

    pub fn conversation(&self) -> ConversationId {
        self.conversation
    }

    /// Entries accumulated so far, deduplicated and oldest first.
    pub fn older(&self) -> &[T] {
        &self.older
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Whether another page can be requested right now.
    pub fn can_load_more(&self, head: &SubscriptionHead<T>) -> bool {
        self.cursor_for(head).is_some()
    }

    fn cursor_for<'a>(&'a self, head: &'a SubscriptionHead<T>) -> Option<&'a Cursor> {
        if self.loaded_any {
            self.cursor.as_ref().filter(|_| self.has_more)
        } else {
            head.next_cursor().filter(|_| head.has_more())
        }
    }

    /// Start a fetch. Returns `None` when one is already in flight or when
    /// there is nothing older to fetch.
    pub fn begin(&mut self, head: &SubscriptionHead<T>) -> Option<OlderRequest> {
        if self.in_flight.is_some() {
            debug!(conversation = %self.conversation, "Load older ignored: fetch in flight");
            return None;
        }
        let Some(cursor) = self.cursor_for(head).cloned() else {
            debug!(conversation = %self.conversation, "Load older ignored: no more history");
            return None;
        };

        if !self.tracking_head {
            self.tracking_head = true;
            self.absorb_head(head.entries());
        }

        self.next_ticket += 1;
        self.in_flight = Some(self.next_ticket);
        Some(OlderRequest {
            conversation: self.conversation,
            cursor,
            ticket: self.next_ticket,
        })
    }

    /// Apply the outcome of `request`.
    ///
    /// `head_now` must be the head's entries at the moment the fetch
    /// resolved; they are folded into the accumulated list so entries that
    /// slid out of the head while the fetch was pending are not lost.
    ///
    /// Returns the number of entries the accumulated list grew by.
    pub fn complete(
        &mut self,
        request: OlderRequest,
        result: Result<Page<T>>,
        head_now: &[T],
    ) -> Result<usize> {
        if request.conversation != self.conversation || self.in_flight != Some(request.ticket) {
            debug!(
                issued_for = %request.conversation,
                current = %self.conversation,
                "Discarding stale history fetch"
            );
            return Err(SyncError::ConversationClosedRace {
                issued_for: request.conversation,
                current: Some(self.conversation),
            });
        }
        self.in_flight = None;

        let page = result?;
        let before = self.older.len();

        let mut combined = std::mem::take(&mut self.older);
        combined.extend(page.entries);
        self.older = merge_view(&combined, head_now);

        self.cursor = page.next_cursor;
        self.has_more = page.has_more;
        self.loaded_any = true;

        let added = self.older.len().saturating_sub(before);
        info!(
            conversation = %self.conversation,
            added,
            total = self.older.len(),
            has_more = self.has_more,
            "Older page applied"
        );
        Ok(added)
    }

    /// Fold the current head into the accumulated list once paging has
    /// started, so the merged view stays contiguous while the head slides.
    pub fn absorb_head(&mut self, head: &[T]) {
        if !self.tracking_head || head.is_empty() {
            return;
        }
        let mut combined = std::mem::take(&mut self.older);
        combined.extend(head.iter().cloned());
        self.older = merge_view(&combined, head);
    }

    /// Forget everything and start over for `conversation`. Any fetch still
    /// in flight will be discarded when it resolves.
    pub fn reset(&mut self, conversation: ConversationId) {
        let next_ticket = self.next_ticket;
        *self = Self::new(conversation);
        self.next_ticket = next_ticket;
    }
}
