//! Engine configuration loaded from environment variables.
//!
//! Every setting has a default, so an embedder can start the engine with
//! zero configuration.

use std::time::Duration;

use threadline_shared::constants::{
    DEFAULT_PAGE_SIZE, NOTICE_TTL, READ_ARM_DELAY, READ_COMMIT_DELAY,
};
use threadline_shared::MutationKind;

use crate::rate_limit::{RateLimitRule, RateLimitTable};

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Entries per head subscription and per older page.
    /// Env: `THREADLINE_PAGE_SIZE`
    /// Default: `50`
    pub page_size: usize,

    /// Delay before mark-on-exit is armed once unread entries are visible.
    /// Env: `THREADLINE_READ_ARM_MS`
    /// Default: `500`
    pub read_arm_delay: Duration,

    /// Delay before mark-as-read is committed while the user stays.
    /// Env: `THREADLINE_READ_COMMIT_MS`
    /// Default: `1000`
    pub read_commit_delay: Duration,

    /// Lifetime of rate limit notices.
    /// Env: `THREADLINE_NOTICE_TTL_MS`
    /// Default: `5000`
    pub notice_ttl: Duration,

    /// Per-kind sliding window limits.
    /// Env: `THREADLINE_RATE_LIMITS`, e.g. `sendMessage=10/30,default=40/60`
    /// (`kind=limit/window_secs`, comma separated).
    pub rate_limits: RateLimitTable,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            read_arm_delay: READ_ARM_DELAY,
            read_commit_delay: READ_COMMIT_DELAY,
            notice_ttl: NOTICE_TTL,
            rate_limits: RateLimitTable::default(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from the process environment, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(val) = lookup("THREADLINE_PAGE_SIZE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.page_size = n,
                _ => tracing::warn!(value = %val, "Invalid THREADLINE_PAGE_SIZE, using default"),
            }
        }

        if let Some(delay) = parse_millis(&lookup, "THREADLINE_READ_ARM_MS") {
            config.read_arm_delay = delay;
        }
        if let Some(delay) = parse_millis(&lookup, "THREADLINE_READ_COMMIT_MS") {
            config.read_commit_delay = delay;
        }
        if let Some(ttl) = parse_millis(&lookup, "THREADLINE_NOTICE_TTL_MS") {
            config.notice_ttl = ttl;
        }

        if let Some(val) = lookup("THREADLINE_RATE_LIMITS") {
            match parse_rate_limits(&val) {
                Ok(rules) => {
                    for (kind, rule) in rules {
                        match kind {
                            None => config.rate_limits.set_fallback(rule),
                            Some(kind) => config.rate_limits.set(kind, rule),
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Invalid THREADLINE_RATE_LIMITS, using defaults");
                }
            }
        }

        if config.read_arm_delay > config.read_commit_delay {
            tracing::warn!(
                arm_ms = config.read_arm_delay.as_millis() as u64,
                commit_ms = config.read_commit_delay.as_millis() as u64,
                "Read arm delay exceeds commit delay; exit arming will coincide with commit"
            );
        }

        config
    }
}

fn parse_millis(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    let val = lookup(key)?;
    match val.parse::<u64>() {
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(_) => {
            tracing::warn!(key, value = %val, "Invalid duration, using default");
            None
        }
    }
}

/// Parse `kind=limit/window_secs` pairs. `default` names the fallback rule
/// and comes back with no kind.
fn parse_rate_limits(raw: &str) -> Result<Vec<(Option<MutationKind>, RateLimitRule)>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (name, rule) = part
                .split_once('=')
                .ok_or_else(|| format!("expected kind=limit/secs, got {part:?}"))?;
            let (limit, secs) = rule
                .split_once('/')
                .ok_or_else(|| format!("expected limit/secs, got {rule:?}"))?;
            let limit = limit
                .trim()
                .parse::<usize>()
                .map_err(|e| format!("bad limit in {part:?}: {e}"))?;
            let secs = secs
                .trim()
                .parse::<u64>()
                .map_err(|e| format!("bad window in {part:?}: {e}"))?;
            if secs == 0 {
                return Err(format!("window must be positive in {part:?}"));
            }

            let name = name.trim();
            let kind = (name != "default").then(|| MutationKind::from_name(name));
            Ok((kind, RateLimitRule::new(limit, Duration::from_secs(secs))))
        })
        .collect()
}
