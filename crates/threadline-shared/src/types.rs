use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cursor::Page;

// A participant, as issued by the backing store
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ConversationId(pub Uuid);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a message or feed item. Stable across pages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(pub Uuid);

impl EntryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The signed-in user on whose behalf the engine runs.
///
/// Passed explicitly into every session instead of being read from ambient
/// state, so "ready to subscribe" is a precondition the caller must satisfy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Viewer {
    pub user_id: UserId,
}

impl Viewer {
    pub fn new(user_id: UserId) -> Self {
        Self { user_id }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EntryBody {
    Text { text: String },
    /// Reference to an already uploaded audio clip
    Audio { url: String, duration_ms: u32 },
}

impl EntryBody {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// A single direct message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub id: EntryId,
    pub author_id: UserId,
    pub body: EntryBody,
    /// Server-assigned creation time; monotonic within a conversation.
    pub created_at: DateTime<Utc>,
    /// When the other participant read this entry, if they have.
    pub read_by_counterpart_at: Option<DateTime<Utc>>,
}

/// A likeable feed item (post, comment, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FeedItem {
    pub id: EntryId,
    pub author_id: UserId,
    pub body: EntryBody,
    pub created_at: DateTime<Utc>,
    pub like_count: u32,
    pub liked_by_viewer: bool,
}

/// One push from a live head subscription.
///
/// Carries the newest page plus the viewer's read marker as the server held
/// it when the snapshot was taken.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HeadSnapshot {
    pub page: Page<Entry>,
    pub last_read_at: Option<DateTime<Utc>>,
}

/// Anything that can be laid out on a time-ordered timeline.
pub trait TimelineItem: Clone {
    fn id(&self) -> EntryId;
    fn created_at(&self) -> DateTime<Utc>;
}

impl TimelineItem for Entry {
    fn id(&self) -> EntryId {
        self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl TimelineItem for FeedItem {
    fn id(&self) -> EntryId {
        self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// A rate-limited class of mutation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MutationKind {
    CreatePost,
    CreateComment,
    ToggleLike,
    FriendRequest,
    SendMessage,
    MarkRead,
    Other(String),
}

impl MutationKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::CreatePost => "createPost",
            Self::CreateComment => "createComment",
            Self::ToggleLike => "toggleLike",
            Self::FriendRequest => "friendRequest",
            Self::SendMessage => "sendMessage",
            Self::MarkRead => "markRead",
            Self::Other(name) => name,
        }
    }

    /// Inverse of [`MutationKind::as_str`]; unknown names map to `Other`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "createPost" => Self::CreatePost,
            "createComment" => Self::CreateComment,
            "toggleLike" => Self::ToggleLike,
            "friendRequest" => Self::FriendRequest,
            "sendMessage" => Self::SendMessage,
            "markRead" => Self::MarkRead,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
