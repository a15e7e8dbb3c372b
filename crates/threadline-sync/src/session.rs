//! Everything the engine tracks for one open conversation.
//!
//! A session is created when a conversation opens and dropped when the
//! partner changes, which resets pages, merged view and read state together.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

use threadline_shared::{ConversationId, Entry, EntryId, HeadSnapshot, Page, Result, Viewer};

use crate::backend::SyncBackend;
use crate::config::SyncConfig;
use crate::head::SubscriptionHead;
use crate::history::{HistoryAccumulator, OlderRequest};
use crate::merge::merge_view;
use crate::read_state::{
    divider_markers, DividerMarkers, ReadCommand, ReadObservation, ReadState, ReadStateTracker,
};

/// What the UI renders for the open conversation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedView {
    pub conversation: ConversationId,
    pub entries: Vec<Entry>,
    pub dividers: DividerMarkers,
    pub has_older: bool,
    pub loading_older: bool,
    /// Entries shown locally while their send is in flight.
    pub pending: Vec<EntryId>,
}

pub struct ConversationSession {
    conversation: ConversationId,
    viewer: Viewer,
    page_size: usize,
    head: SubscriptionHead<Entry>,
    history: HistoryAccumulator<Entry>,
    read_state: ReadState,
    tracker: ReadStateTracker,
    /// The viewer's read marker as of the latest snapshot (not frozen).
    server_last_read: Option<DateTime<Utc>>,
    at_bottom: bool,
    merged: Vec<Entry>,
    /// Local placeholders for sends awaiting the server, in issue order.
    pending_sends: Vec<Entry>,
    /// Server copies of sent entries the head has not delivered yet.
    confirmed_sends: Vec<Entry>,
}

impl ConversationSession {
    pub fn new(
        conversation: ConversationId,
        viewer: Viewer,
        config: &SyncConfig,
        opened_at: DateTime<Utc>,
    ) -> Self {
        Self {
            conversation,
            viewer,
            page_size: config.page_size,
            head: SubscriptionHead::new(),
            history: HistoryAccumulator::new(conversation),
            read_state: ReadState::new(opened_at),
            tracker: ReadStateTracker::new(config.read_arm_delay, config.read_commit_delay),
            server_last_read: None,
            at_bottom: true,
            merged: Vec::new(),
            pending_sends: Vec::new(),
            confirmed_sends: Vec::new(),
        }
    }

    /// Create a session and open its head subscription.
    pub async fn open<B: SyncBackend>(
        backend: &B,
        conversation: ConversationId,
        viewer: Viewer,
        config: &SyncConfig,
    ) -> Result<(Self, mpsc::Receiver<HeadSnapshot>)> {
        let rx = backend
            .subscribe_head(conversation, config.page_size)
            .await?;
        info!(%conversation, viewer = %viewer.user_id.short(), "Conversation opened");
        Ok((Self::new(conversation, viewer, config, Utc::now()), rx))
    }

    pub fn conversation(&self) -> ConversationId {
        self.conversation
    }

    pub fn viewer(&self) -> Viewer {
        self.viewer
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn read_state(&self) -> &ReadState {
        &self.read_state
    }

    pub fn tracker(&self) -> &ReadStateTracker {
        &self.tracker
    }

    pub fn head(&self) -> &SubscriptionHead<Entry> {
        &self.head
    }

    /// The deduplicated, time-ordered sequence.
    pub fn merged(&self) -> &[Entry] {
        &self.merged
    }

    /// Apply a head push.
    pub fn apply_snapshot(&mut self, snapshot: HeadSnapshot, now: Instant) {
        let HeadSnapshot { page, last_read_at } = snapshot;

        if !page.is_empty() && self.read_state.capture_last_read(last_read_at) {
            debug!(
                conversation = %self.conversation,
                last_read_at = ?last_read_at,
                "Read boundary captured"
            );
        }
        self.server_last_read = last_read_at;

        self.head.apply(page);
        self.history.absorb_head(self.head.entries());
        self.remerge();
        self.tracker.observe(self.observation(), now);
    }

    fn remerge(&mut self) {
        let head = self.head.entries();
        let older = self.history.older();
        self.confirmed_sends
            .retain(|sent| !head.iter().chain(older).any(|e| e.id == sent.id));

        self.merged = if self.confirmed_sends.is_empty() {
            merge_view(older, head)
        } else {
            let mut live = head.to_vec();
            live.extend(self.confirmed_sends.iter().cloned());
            merge_view(older, &live)
        };
    }

    /// Show `placeholder` below everything else until its send settles.
    pub fn add_pending_send(&mut self, placeholder: Entry) {
        debug!(conversation = %self.conversation, local = %placeholder.id, "Send pending");
        self.pending_sends.push(placeholder);
    }

    /// Swap the placeholder for the server's copy. The copy stays merged
    /// until the head delivers it.
    pub fn confirm_send(&mut self, local_id: EntryId, sent: Entry) {
        self.pending_sends.retain(|e| e.id != local_id);
        if !self.confirmed_sends.iter().any(|e| e.id == sent.id) {
            self.confirmed_sends.push(sent);
        }
        self.remerge();
    }

    /// Drop the placeholder of a failed send.
    pub fn discard_send(&mut self, local_id: EntryId) -> bool {
        let before = self.pending_sends.len();
        self.pending_sends.retain(|e| e.id != local_id);
        before != self.pending_sends.len()
    }

    fn observation(&self) -> ReadObservation {
        let viewer = self.viewer.user_id;
        let unread_boundary = self
            .merged
            .iter()
            .find(|e| {
                e.author_id != viewer
                    && self.server_last_read.map_or(true, |read| e.created_at > read)
            })
            .map(|e| e.id);

        ReadObservation {
            unread_boundary,
            last_entry: self.merged.last().map(|e| e.id),
            scrolled_away: !self.at_bottom,
        }
    }

    /// Start a "load older" fetch, unless one is running or history is
    /// exhausted.
    pub fn begin_load_older(&mut self) -> Option<OlderRequest> {
        self.history.begin(&self.head)
    }

    /// Apply a finished "load older" fetch against the head as it is now.
    pub fn complete_load_older(
        &mut self,
        request: OlderRequest,
        result: Result<Page<Entry>>,
    ) -> Result<usize> {
        let added = self.history.complete(request, result, self.head.entries())?;
        self.remerge();
        Ok(added)
    }

    /// Fetch and apply one older page. Returns 0 when the request was
    /// ignored.
    pub async fn load_older<B: SyncBackend>(&mut self, backend: &B) -> Result<usize> {
        let Some(request) = self.begin_load_older() else {
            return Ok(0);
        };
        let result = backend
            .fetch_older(request.conversation, request.cursor.clone(), self.page_size)
            .await;
        self.complete_load_older(request, result)
    }

    pub fn can_load_older(&self) -> bool {
        self.history.can_load_more(&self.head)
    }

    /// The user moved to or away from the bottom of the list.
    pub fn set_at_bottom(&mut self, at_bottom: bool, now: Instant) {
        if at_bottom == self.at_bottom {
            return;
        }
        self.at_bottom = at_bottom;
        let anchor = if at_bottom {
            None
        } else {
            self.merged.last().map(|e| e.id)
        };
        self.read_state.set_scroll_away_anchor(anchor);
        self.tracker.observe(self.observation(), now);
    }

    pub fn is_at_bottom(&self) -> bool {
        self.at_bottom
    }

    pub fn next_read_deadline(&self) -> Option<Instant> {
        self.tracker.next_deadline()
    }

    pub fn on_read_tick(&mut self, now: Instant) -> Option<ReadCommand> {
        self.tracker.on_tick(now)
    }

    /// Explicit mark-as-read; `None` if the current batch is already marked.
    pub fn request_mark_read(&mut self) -> Option<ReadCommand> {
        self.tracker.mark_now()
    }

    /// Tear the session down; returns the exit commit, if one is due.
    pub fn close(&mut self, now: Instant) -> Option<ReadCommand> {
        info!(conversation = %self.conversation, "Conversation closed");
        self.tracker.close(now)
    }

    pub fn view(&self) -> RenderedView {
        let mut entries = self.merged.clone();
        entries.extend(self.pending_sends.iter().cloned());
        RenderedView {
            conversation: self.conversation,
            entries,
            dividers: divider_markers(&self.merged, &self.read_state, self.viewer.user_id),
            has_older: self.can_load_older(),
            loading_older: self.history.is_loading(),
            pending: self.pending_sends.iter().map(|e| e.id).collect(),
        }
    }
}
