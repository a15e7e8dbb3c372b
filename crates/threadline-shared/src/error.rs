use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ConversationId, EntryId, MutationKind};

/// Where a rate limit rejection came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RateLimitOrigin {
    /// The client-side sliding window refused the call before any request.
    Local,
    /// The server rejected the request.
    Server,
}

impl fmt::Display for RateLimitOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Server => f.write_str("server"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Network or connectivity failure. Retries are left to the caller.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Rate limit exceeded for {kind} ({origin}), retry in {retry_after_ms} ms")]
    RateLimitExceeded {
        kind: MutationKind,
        origin: RateLimitOrigin,
        retry_after_ms: u64,
    },

    /// An optimistic mutation was rolled back after its round trip failed.
    #[error("Mutation on {entity_id} rolled back: {reason}")]
    StaleMutation { entity_id: EntryId, reason: String },

    /// A history fetch resolved after its conversation was closed.
    #[error("History fetch for {issued_for} resolved after switching away")]
    ConversationClosedRace {
        issued_for: ConversationId,
        current: Option<ConversationId>,
    },

    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("No conversation is open")]
    NoConversation,

    #[error("Sync engine has shut down")]
    EngineClosed,
}

impl SyncError {
    /// Whether the UI should surface this error as a notice.
    ///
    /// Rolled-back mutations and closed-conversation races degrade silently to
    /// the previous state.
    pub fn is_user_visible(&self) -> bool {
        match self {
            Self::Transport(_) | Self::RateLimitExceeded { .. } | Self::NoConversation => true,
            Self::StaleMutation { .. }
            | Self::ConversationClosedRace { .. }
            | Self::InvalidCursor(_)
            | Self::EngineClosed => false,
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimitExceeded { .. })
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, SyncError>;
