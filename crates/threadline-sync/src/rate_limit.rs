//! Client-side sliding-window rate limiting.
//!
//! Purely advisory: it spares obviously wasted round trips and gives the user
//! immediate feedback. The server enforces the authoritative limit.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

use threadline_shared::constants::{
    LIMIT_CREATE_COMMENT, LIMIT_CREATE_POST, LIMIT_DEFAULT, LIMIT_FRIEND_REQUEST,
    LIMIT_SEND_MESSAGE, LIMIT_TOGGLE_LIKE, RATE_LIMIT_WINDOW,
};
use threadline_shared::{MutationKind, RateLimitOrigin, Result, SyncError};

/// Limit and window for one mutation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRule {
    pub limit: usize,
    pub window: Duration,
}

impl RateLimitRule {
    pub const fn new(limit: usize, window: Duration) -> Self {
        Self { limit, window }
    }
}

/// Per-kind rules plus the fallback applied to any unlisted kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitTable {
    rules: HashMap<MutationKind, RateLimitRule>,
    fallback: RateLimitRule,
}

impl RateLimitTable {
    pub fn new(fallback: RateLimitRule) -> Self {
        Self {
            rules: HashMap::new(),
            fallback,
        }
    }

    pub fn with_rule(mut self, kind: MutationKind, rule: RateLimitRule) -> Self {
        self.set(kind, rule);
        self
    }

    pub fn set(&mut self, kind: MutationKind, rule: RateLimitRule) {
        self.rules.insert(kind, rule);
    }

    pub fn set_fallback(&mut self, rule: RateLimitRule) {
        self.fallback = rule;
    }

    pub fn rule_for(&self, kind: &MutationKind) -> RateLimitRule {
        self.rules.get(kind).copied().unwrap_or(self.fallback)
    }
}

impl Default for RateLimitTable {
    fn default() -> Self {
        Self::new(RateLimitRule::new(LIMIT_DEFAULT, RATE_LIMIT_WINDOW))
            .with_rule(
                MutationKind::CreatePost,
                RateLimitRule::new(LIMIT_CREATE_POST, RATE_LIMIT_WINDOW),
            )
            .with_rule(
                MutationKind::CreateComment,
                RateLimitRule::new(LIMIT_CREATE_COMMENT, RATE_LIMIT_WINDOW),
            )
            .with_rule(
                MutationKind::ToggleLike,
                RateLimitRule::new(LIMIT_TOGGLE_LIKE, RATE_LIMIT_WINDOW),
            )
            .with_rule(
                MutationKind::FriendRequest,
                RateLimitRule::new(LIMIT_FRIEND_REQUEST, RATE_LIMIT_WINDOW),
            )
            .with_rule(
                MutationKind::SendMessage,
                RateLimitRule::new(LIMIT_SEND_MESSAGE, RATE_LIMIT_WINDOW),
            )
    }
}

#[derive(Debug, Clone, Default)]
struct SlidingWindow {
    timestamps: VecDeque<Instant>,
}

impl SlidingWindow {
    fn evict_before(&mut self, cutoff: Option<Instant>) {
        let Some(cutoff) = cutoff else {
            return;
        };
        while self.timestamps.front().is_some_and(|t| *t < cutoff) {
            self.timestamps.pop_front();
        }
    }

    fn try_record(&mut self, now: Instant, rule: RateLimitRule) -> std::result::Result<(), Duration> {
        self.evict_before(now.checked_sub(rule.window));

        if self.timestamps.len() >= rule.limit {
            let retry_after = self
                .timestamps
                .front()
                .map(|oldest| (*oldest + rule.window).saturating_duration_since(now))
                .unwrap_or(rule.window);
            return Err(retry_after);
        }

        self.timestamps.push_back(now);
        Ok(())
    }
}

/// Sliding-window limiter keyed by mutation kind. Windows are never shared
/// across kinds and live as long as the limiter.
#[derive(Debug, Clone, Default)]
pub struct RateLimiter {
    table: RateLimitTable,
    windows: HashMap<MutationKind, SlidingWindow>,
}

impl RateLimiter {
    pub fn new(table: RateLimitTable) -> Self {
        Self {
            table,
            windows: HashMap::new(),
        }
    }

    /// Record an attempt of `kind` now, or reject it with
    /// [`SyncError::RateLimitExceeded`] if the window is full.
    pub fn check(&mut self, kind: &MutationKind) -> Result<()> {
        self.check_at(kind, Instant::now())
    }

    pub fn check_at(&mut self, kind: &MutationKind, now: Instant) -> Result<()> {
        let rule = self.table.rule_for(kind);
        let window = self.windows.entry(kind.clone()).or_default();

        window.try_record(now, rule).map_err(|retry_after| {
            warn!(kind = %kind, limit = rule.limit, "Local rate limit exceeded");
            SyncError::RateLimitExceeded {
                kind: kind.clone(),
                origin: RateLimitOrigin::Local,
                retry_after_ms: retry_after.as_millis() as u64,
            }
        })
    }

    /// Number of attempts of `kind` still inside the window.
    pub fn in_window(&mut self, kind: &MutationKind) -> usize {
        let rule = self.table.rule_for(kind);
        let now = Instant::now();
        match self.windows.get_mut(kind) {
            Some(window) => {
                window.evict_before(now.checked_sub(rule.window));
                window.timestamps.len()
            }
            None => 0,
        }
    }

    /// Drop windows whose every timestamp has aged out.
    pub fn purge_stale(&mut self) {
        let now = Instant::now();
        let table = &self.table;
        self.windows.retain(|kind, window| {
            window.evict_before(now.checked_sub(table.rule_for(kind).window));
            !window.timestamps.is_empty()
        });
    }

    pub fn table(&self) -> &RateLimitTable {
        &self.table
    }
}
