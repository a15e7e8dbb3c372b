//! Pagination primitives.
//!
//! A [`Cursor`] is an opaque token handed out by the backing store. Clients
//! only ever store it and hand it back; they never inspect or build one. The
//! [`CursorPosition`] codec exists for backend implementations.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::types::EntryId;

/// Opaque position marker: "entries strictly older than this".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap a token received over the wire.
    pub fn from_token(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

/// One page of a timeline, ordered oldest to newest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub entries: Vec<T>,
    pub next_cursor: Option<Cursor>,
    pub has_more: bool,
}

impl<T> Page<T> {
    /// Build a page. A page without more data never carries a cursor.
    pub fn new(entries: Vec<T>, next_cursor: Option<Cursor>, has_more: bool) -> Self {
        let next_cursor = if has_more { next_cursor } else { None };
        Self {
            entries,
            has_more: next_cursor.is_some(),
            next_cursor,
        }
    }

    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            next_cursor: None,
            has_more: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self::empty()
    }
}

/// Decoded form of a cursor, for use by backend implementations only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub created_at_micros: i64,
    pub id: Uuid,
}

impl CursorPosition {
    pub fn new(created_at: DateTime<Utc>, id: EntryId) -> Self {
        Self {
            created_at_micros: created_at.timestamp_micros(),
            id: id.0,
        }
    }

    pub fn encode(&self) -> Result<Cursor> {
        let bytes =
            bincode::serialize(self).map_err(|e| SyncError::InvalidCursor(e.to_string()))?;
        Ok(Cursor(URL_SAFE_NO_PAD.encode(bytes)))
    }

    pub fn decode(cursor: &Cursor) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(cursor.as_str())
            .map_err(|e| SyncError::InvalidCursor(e.to_string()))?;
        bincode::deserialize(&bytes).map_err(|e| SyncError::InvalidCursor(e.to_string()))
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_micros(self.created_at_micros)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_without_more_drops_cursor() {
        let cursor = CursorPosition::new(Utc::now(), EntryId::new())
            .encode()
            .unwrap();
        let page: Page<u32> = Page::new(vec![1, 2], Some(cursor), false);
        assert!(!page.has_more);
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn test_page_more_without_cursor_is_exhausted() {
        let page: Page<u32> = Page::new(vec![1], None, true);
        assert!(!page.has_more);
    }

    #[test]
    fn test_cursor_position_decode() {
        let id = EntryId::new();
        let at = DateTime::from_timestamp_micros(1_700_000_000_123_456).unwrap();
        let cursor = CursorPosition::new(at, id).encode().unwrap();

        let decoded = CursorPosition::decode(&cursor).unwrap();
        assert_eq!(decoded.id, id.0);
        assert_eq!(decoded.created_at(), Some(at));
    }

    #[test]
    fn test_garbage_cursor_rejected() {
        let err = CursorPosition::decode(&Cursor::from_token("not a cursor!")).unwrap_err();
        assert!(matches!(err, SyncError::InvalidCursor(_)));
    }
}
