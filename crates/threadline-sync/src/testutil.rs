use chrono::{DateTime, Duration, TimeZone, Utc};

use threadline_shared::{Entry, EntryBody, EntryId, FeedItem, UserId};

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

pub fn at(secs: i64) -> DateTime<Utc> {
    base_time() + Duration::seconds(secs)
}

pub fn entry_at(secs: i64, author: UserId) -> Entry {
    Entry {
        id: EntryId::new(),
        author_id: author,
        body: EntryBody::text(format!("at {secs}")),
        created_at: at(secs),
        read_by_counterpart_at: None,
    }
}

/// `count` entries one second apart from a single stranger, oldest first.
pub fn entries(count: usize) -> Vec<Entry> {
    let author = UserId::new();
    (0..count as i64).map(|i| entry_at(i, author)).collect()
}

pub fn feed_item(like_count: u32, liked_by_viewer: bool) -> FeedItem {
    FeedItem {
        id: EntryId::new(),
        author_id: UserId::new(),
        body: EntryBody::text("post"),
        created_at: base_time(),
        like_count,
        liked_by_viewer,
    }
}
