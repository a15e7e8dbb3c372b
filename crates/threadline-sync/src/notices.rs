//! User-visible, dismissible error notices.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use threadline_shared::constants::NOTICE_TTL;
use threadline_shared::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NoticeKind {
    RateLimit,
    Transport,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub id: u64,
    pub kind: NoticeKind,
    pub message: String,
    #[serde(skip)]
    pub expires_at: Option<Instant>,
}

/// Rate limit notices clear themselves after a short TTL; everything else
/// stays until dismissed.
#[derive(Debug, Clone)]
pub struct NoticeBoard {
    notices: Vec<Notice>,
    ttl: Duration,
    next_id: u64,
}

impl NoticeBoard {
    pub fn new(ttl: Duration) -> Self {
        Self {
            notices: Vec::new(),
            ttl,
            next_id: 0,
        }
    }

    /// Post a notice for `err` if it is meant for the user. Returns its id.
    pub fn push_error(&mut self, err: &SyncError, now: Instant) -> Option<u64> {
        if !err.is_user_visible() {
            return None;
        }
        let kind = match err {
            SyncError::RateLimitExceeded { .. } => NoticeKind::RateLimit,
            SyncError::Transport(_) => NoticeKind::Transport,
            _ => NoticeKind::Other,
        };
        let expires_at = (kind == NoticeKind::RateLimit).then(|| now + self.ttl);

        self.next_id += 1;
        self.notices.push(Notice {
            id: self.next_id,
            kind,
            message: err.to_string(),
            expires_at,
        });
        debug!(id = self.next_id, ?kind, "Notice posted");
        Some(self.next_id)
    }

    pub fn dismiss(&mut self, id: u64) -> bool {
        let before = self.notices.len();
        self.notices.retain(|n| n.id != id);
        self.notices.len() != before
    }

    /// Drop expired notices; returns how many were removed.
    pub fn expire(&mut self, now: Instant) -> usize {
        let before = self.notices.len();
        self.notices
            .retain(|n| n.expires_at.map_or(true, |at| at > now));
        before - self.notices.len()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.notices.iter().filter_map(|n| n.expires_at).min()
    }

    pub fn active(&self) -> &[Notice] {
        &self.notices
    }
}

impl Default for NoticeBoard {
    fn default() -> Self {
        Self::new(NOTICE_TTL)
    }
}
