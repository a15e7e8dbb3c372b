use std::time::Duration;

/// Application name
pub const APP_NAME: &str = "Threadline";

/// Number of entries held by a live head subscription and fetched per older page
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Delay after unread entries become visible before mark-on-exit is armed
pub const READ_ARM_DELAY: Duration = Duration::from_millis(500);

/// Delay after unread entries become visible before mark-as-read is committed
pub const READ_COMMIT_DELAY: Duration = Duration::from_millis(1000);

/// Lifetime of an auto-dismissing rate limit notice
pub const NOTICE_TTL: Duration = Duration::from_secs(5);

/// Sliding window shared by every default rate limit
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// Per-kind call limits inside `RATE_LIMIT_WINDOW`
pub const LIMIT_CREATE_POST: usize = 5;
pub const LIMIT_CREATE_COMMENT: usize = 10;
pub const LIMIT_TOGGLE_LIKE: usize = 30;
pub const LIMIT_FRIEND_REQUEST: usize = 10;
pub const LIMIT_SEND_MESSAGE: usize = 30;
pub const LIMIT_DEFAULT: usize = 20;
