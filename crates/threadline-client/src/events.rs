use serde::Serialize;
use tokio::sync::mpsc;

use threadline_sync::{Notice, RenderedView};

use crate::commands::{EntryDto, FeedItemDto};

pub const EVENT_VIEW_CHANGED: &str = "view-changed";
pub const EVENT_NOTICES_CHANGED: &str = "notices-changed";
pub const EVENT_MARKED_READ: &str = "marked-read";
pub const EVENT_ENTITY_CHANGED: &str = "entity-changed";
pub const EVENT_CONVERSATION_CLOSED: &str = "conversation-closed";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewPayload {
    pub conversation_id: String,
    pub entries: Vec<EntryDto>,
    /// Ids of entries that render with a "new messages" divider above them.
    pub dividers_before: Vec<String>,
    pub has_older: bool,
    pub loading_older: bool,
    /// Entries still waiting on the server; render them as sending.
    pub pending_ids: Vec<String>,
    /// Older entries were inserted above; restore the scroll offset.
    pub prepended: bool,
    /// Scroll to the bottom to reveal newly appended entries.
    pub follow_bottom: bool,
}

impl ViewPayload {
    pub fn new(view: &RenderedView, prepended: bool, follow_bottom: bool) -> Self {
        Self {
            conversation_id: view.conversation.to_string(),
            entries: view.entries.iter().cloned().map(EntryDto::from).collect(),
            dividers_before: view
                .entries
                .iter()
                .filter(|e| view.dividers.before(e.id))
                .map(|e| e.id.to_string())
                .collect(),
            has_older: view.has_older,
            loading_older: view.loading_older,
            pending_ids: view.pending.iter().map(|id| id.to_string()).collect(),
            prepended,
            follow_bottom,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoticesPayload {
    pub notices: Vec<Notice>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPayload {
    pub conversation_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityPayload {
    pub item: FeedItemDto,
}

/// Where UI events go. Implemented by whatever hosts the client.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &str, payload: serde_json::Value) -> anyhow::Result<()>;
}

/// Sink that forwards every event into a channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<(String, serde_json::Value)>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(String, serde_json::Value)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &str, payload: serde_json::Value) -> anyhow::Result<()> {
        self.tx
            .send((event.to_string(), payload))
            .map_err(|_| anyhow::anyhow!("event receiver dropped"))
    }
}

pub fn emit_event<S: Serialize>(sink: &dyn EventSink, event: &str, payload: S) {
    let result = serde_json::to_value(payload)
        .map_err(anyhow::Error::from)
        .and_then(|value| sink.emit(event, value));
    if let Err(e) = result {
        tracing::error!(event, error = %e, "Failed to emit event");
    }
}
