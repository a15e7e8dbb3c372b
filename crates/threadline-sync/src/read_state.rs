//! Unread boundaries and debounced mark-as-read.
//!
//! [`ReadState`] holds the per-open boundaries, [`divider_markers`] derives
//! where "new messages" dividers go for one render pass, and
//! [`ReadStateTracker`] is the single state machine that decides when a
//! mark-as-read commit is issued.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use threadline_shared::constants::{READ_ARM_DELAY, READ_COMMIT_DELAY};
use threadline_shared::{Entry, EntryId, UserId};

/// Read boundaries for one open conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadState {
    last_read_at: Option<DateTime<Utc>>,
    conversation_opened_at: DateTime<Utc>,
    scroll_away_anchor: Option<EntryId>,
    captured: bool,
}

impl ReadState {
    pub fn new(conversation_opened_at: DateTime<Utc>) -> Self {
        Self {
            last_read_at: None,
            conversation_opened_at,
            scroll_away_anchor: None,
            captured: false,
        }
    }

    /// Freeze `last_read_at`. Only the first call has any effect; returns
    /// whether this call captured it.
    pub fn capture_last_read(&mut self, last_read_at: Option<DateTime<Utc>>) -> bool {
        if self.captured {
            return false;
        }
        self.last_read_at = last_read_at;
        self.captured = true;
        true
    }

    pub fn is_captured(&self) -> bool {
        self.captured
    }

    pub fn last_read_at(&self) -> Option<DateTime<Utc>> {
        self.last_read_at
    }

    pub fn conversation_opened_at(&self) -> DateTime<Utc> {
        self.conversation_opened_at
    }

    pub fn scroll_away_anchor(&self) -> Option<EntryId> {
        self.scroll_away_anchor
    }

    /// Remember `anchor` as the last entry seen before leaving the bottom.
    pub fn set_scroll_away_anchor(&mut self, anchor: Option<EntryId>) {
        self.scroll_away_anchor = anchor;
    }
}

/// Where dividers render for one pass over the merged sequence.
///
/// Both markers may be set at once and may sit on adjacent entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DividerMarkers {
    /// First entry that was already unread when the conversation opened.
    pub first_unread: Option<EntryId>,
    /// Entry right after the one the user scrolled away from.
    pub after_scroll_away: Option<EntryId>,
}

impl DividerMarkers {
    /// Whether a divider renders immediately before `id`.
    pub fn before(&self, id: EntryId) -> bool {
        self.first_unread == Some(id) || self.after_scroll_away == Some(id)
    }
}

/// Compute divider placement for `entries` (oldest first).
pub fn divider_markers(entries: &[Entry], state: &ReadState, viewer: UserId) -> DividerMarkers {
    let first_unread = entries
        .iter()
        .find(|e| {
            e.author_id != viewer
                && state.last_read_at.map_or(true, |read| e.created_at > read)
                && e.created_at < state.conversation_opened_at
        })
        .map(|e| e.id);

    let after_scroll_away = state.scroll_away_anchor.and_then(|anchor| {
        entries
            .iter()
            .position(|e| e.id == anchor)
            .and_then(|i| entries.get(i + 1))
            .map(|e| e.id)
    });

    DividerMarkers {
        first_unread,
        after_scroll_away,
    }
}

/// What the tracker sees of the conversation on one update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadObservation {
    /// First counterpart entry the server still considers unread.
    pub unread_boundary: Option<EntryId>,
    pub last_entry: Option<EntryId>,
    pub scrolled_away: bool,
}

impl ReadObservation {
    pub fn has_unread(&self) -> bool {
        self.unread_boundary.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPhase {
    Idle,
    HasUnread {
        entered_at: Instant,
        exit_armed: bool,
        batch: Option<EntryId>,
        last_entry: Option<EntryId>,
    },
    Marked {
        batch: Option<EntryId>,
        last_entry: Option<EntryId>,
    },
    /// The conversation was closed; nothing further is committed.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadCommand {
    CommitMarkRead,
}

/// Debounces mark-as-read for one open conversation.
#[derive(Debug, Clone)]
pub struct ReadStateTracker {
    phase: ReadPhase,
    arm_delay: Duration,
    commit_delay: Duration,
}

impl ReadStateTracker {
    pub fn new(arm_delay: Duration, commit_delay: Duration) -> Self {
        Self {
            phase: ReadPhase::Idle,
            arm_delay,
            commit_delay,
        }
    }

    pub fn phase(&self) -> ReadPhase {
        self.phase
    }

    /// Feed the latest view of the conversation.
    pub fn observe(&mut self, obs: ReadObservation, now: Instant) {
        match self.phase {
            ReadPhase::Idle if obs.has_unread() => {
                debug!("Unread entries visible, starting read timers");
                self.enter_unread(obs, now);
            }
            ReadPhase::HasUnread {
                entered_at,
                exit_armed,
                batch,
                ..
            } => {
                self.phase = ReadPhase::HasUnread {
                    entered_at,
                    exit_armed,
                    batch,
                    last_entry: obs.last_entry,
                };
            }
            ReadPhase::Marked { batch, last_entry } => {
                let arrived_while_away =
                    obs.scrolled_away && obs.last_entry.is_some() && obs.last_entry != last_entry;
                let fresh_boundary = obs.has_unread() && obs.unread_boundary != batch;

                if arrived_while_away || fresh_boundary {
                    debug!(arrived_while_away, fresh_boundary, "New unread after mark");
                    self.enter_unread(obs, now);
                } else {
                    self.phase = ReadPhase::Marked {
                        batch,
                        last_entry: obs.last_entry,
                    };
                }
            }
            ReadPhase::Idle | ReadPhase::Closed => {}
        }
    }

    fn enter_unread(&mut self, obs: ReadObservation, now: Instant) {
        self.phase = ReadPhase::HasUnread {
            entered_at: now,
            exit_armed: false,
            batch: obs.unread_boundary,
            last_entry: obs.last_entry,
        };
    }

    /// When the next timer fires, if one is running.
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.phase {
            ReadPhase::HasUnread {
                entered_at,
                exit_armed: false,
                ..
            } => Some(entered_at + self.arm_delay.min(self.commit_delay)),
            ReadPhase::HasUnread { entered_at, .. } => Some(entered_at + self.commit_delay),
            _ => None,
        }
    }

    /// Advance timers to `now`.
    pub fn on_tick(&mut self, now: Instant) -> Option<ReadCommand> {
        let ReadPhase::HasUnread {
            entered_at,
            exit_armed,
            batch,
            last_entry,
        } = self.phase
        else {
            return None;
        };

        if now >= entered_at + self.commit_delay {
            debug!("Read commit timer elapsed");
            self.phase = ReadPhase::Marked { batch, last_entry };
            return Some(ReadCommand::CommitMarkRead);
        }

        if !exit_armed && now >= entered_at + self.arm_delay {
            debug!("Mark-on-exit armed");
            self.phase = ReadPhase::HasUnread {
                entered_at,
                exit_armed: true,
                batch,
                last_entry,
            };
        }
        None
    }

    /// Explicit mark-as-read. A no-op once the current batch is marked.
    pub fn mark_now(&mut self) -> Option<ReadCommand> {
        match self.phase {
            ReadPhase::Marked { .. } | ReadPhase::Closed => None,
            ReadPhase::Idle => {
                self.phase = ReadPhase::Marked {
                    batch: None,
                    last_entry: None,
                };
                Some(ReadCommand::CommitMarkRead)
            }
            ReadPhase::HasUnread {
                batch, last_entry, ..
            } => {
                self.phase = ReadPhase::Marked { batch, last_entry };
                Some(ReadCommand::CommitMarkRead)
            }
        }
    }

    /// The conversation is closing. Commits once if mark-on-exit was armed.
    pub fn close(&mut self, now: Instant) -> Option<ReadCommand> {
        if let Some(command) = self.on_tick(now) {
            self.phase = ReadPhase::Closed;
            return Some(command);
        }

        let armed = matches!(
            self.phase,
            ReadPhase::HasUnread {
                exit_armed: true,
                ..
            }
        );
        self.phase = ReadPhase::Closed;
        if armed {
            debug!("Committing mark-as-read on close");
            Some(ReadCommand::CommitMarkRead)
        } else {
            None
        }
    }
}

impl Default for ReadStateTracker {
    fn default() -> Self {
        Self::new(READ_ARM_DELAY, READ_COMMIT_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{at, entry_at};

    const ARM: Duration = Duration::from_millis(500);
    const COMMIT: Duration = Duration::from_millis(1000);

    fn unread(boundary: EntryId, last: EntryId) -> ReadObservation {
        ReadObservation {
            unread_boundary: Some(boundary),
            last_entry: Some(last),
            scrolled_away: false,
        }
    }

    #[test]
    fn test_capture_is_frozen() {
        let mut state = ReadState::new(at(100));
        assert!(state.capture_last_read(Some(at(10))));
        assert!(!state.capture_last_read(Some(at(90))));
        assert!(!state.capture_last_read(None));
        assert_eq!(state.last_read_at(), Some(at(10)));
    }

    #[test]
    fn test_single_divider_before_oldest_unread() {
        let viewer = UserId::new();
        let friend = UserId::new();
        let entries = vec![
            entry_at(1, friend),
            entry_at(2, viewer),
            entry_at(3, friend),
            entry_at(4, friend),
            entry_at(5, friend),
        ];
        let mut state = ReadState::new(at(10));
        state.capture_last_read(Some(at(2)));

        let markers = divider_markers(&entries, &state, viewer);
        assert_eq!(markers.first_unread, Some(entries[2].id));
        assert_eq!(markers.after_scroll_away, None);
        assert_eq!(entries.iter().filter(|e| markers.before(e.id)).count(), 1);
    }

    #[test]
    fn test_entries_after_open_get_no_unread_divider() {
        let viewer = UserId::new();
        let friend = UserId::new();
        let entries = vec![entry_at(1, friend), entry_at(20, friend)];
        let mut state = ReadState::new(at(10));
        state.capture_last_read(Some(at(1)));

        assert_eq!(divider_markers(&entries, &state, viewer).first_unread, None);
    }

    #[test]
    fn test_own_entries_never_unread() {
        let viewer = UserId::new();
        let entries = vec![entry_at(3, viewer), entry_at(4, viewer)];
        let mut state = ReadState::new(at(10));
        state.capture_last_read(Some(at(1)));

        assert_eq!(divider_markers(&entries, &state, viewer).first_unread, None);
    }

    #[test]
    fn test_never_read_marks_first_counterpart_entry() {
        let viewer = UserId::new();
        let friend = UserId::new();
        let entries = vec![entry_at(1, viewer), entry_at(2, friend)];
        let mut state = ReadState::new(at(10));
        state.capture_last_read(None);

        assert_eq!(
            divider_markers(&entries, &state, viewer).first_unread,
            Some(entries[1].id)
        );
    }

    #[test]
    fn test_scroll_away_divider_follows_anchor() {
        let viewer = UserId::new();
        let friend = UserId::new();
        let entries = vec![entry_at(1, friend), entry_at(2, friend), entry_at(30, friend)];
        let mut state = ReadState::new(at(10));
        state.capture_last_read(Some(at(5)));
        state.set_scroll_away_anchor(Some(entries[1].id));

        let markers = divider_markers(&entries, &state, viewer);
        assert_eq!(markers.after_scroll_away, Some(entries[2].id));

        state.set_scroll_away_anchor(Some(entries[2].id));
        assert_eq!(divider_markers(&entries, &state, viewer).after_scroll_away, None);
    }

    #[test]
    fn test_both_dividers_can_be_adjacent() {
        let viewer = UserId::new();
        let friend = UserId::new();
        let entries = vec![entry_at(1, friend), entry_at(2, friend), entry_at(30, friend)];
        let mut state = ReadState::new(at(10));
        state.capture_last_read(Some(at(1)));
        state.set_scroll_away_anchor(Some(entries[1].id));

        let markers = divider_markers(&entries, &state, viewer);
        assert_eq!(markers.first_unread, Some(entries[1].id));
        assert_eq!(markers.after_scroll_away, Some(entries[2].id));
    }

    #[test]
    fn test_idle_without_unread() {
        let mut tracker = ReadStateTracker::new(ARM, COMMIT);
        tracker.observe(ReadObservation::default(), Instant::now());
        assert_eq!(tracker.phase(), ReadPhase::Idle);
        assert_eq!(tracker.next_deadline(), None);
    }

    #[test]
    fn test_commit_after_delay() {
        let mut tracker = ReadStateTracker::new(ARM, COMMIT);
        let t0 = Instant::now();
        let (b, last) = (EntryId::new(), EntryId::new());

        tracker.observe(unread(b, last), t0);
        assert_eq!(tracker.next_deadline(), Some(t0 + ARM));

        assert_eq!(tracker.on_tick(t0 + ARM), None);
        assert_eq!(tracker.next_deadline(), Some(t0 + COMMIT));

        assert_eq!(tracker.on_tick(t0 + COMMIT), Some(ReadCommand::CommitMarkRead));
        assert!(matches!(tracker.phase(), ReadPhase::Marked { .. }));
        assert_eq!(tracker.next_deadline(), None);
    }

    #[test]
    fn test_same_batch_not_marked_twice() {
        let mut tracker = ReadStateTracker::new(ARM, COMMIT);
        let t0 = Instant::now();
        let (b, last) = (EntryId::new(), EntryId::new());

        tracker.observe(unread(b, last), t0);
        tracker.on_tick(t0 + COMMIT);

        // The server has not caught up yet; the same boundary is still unread.
        tracker.observe(unread(b, last), t0 + COMMIT * 2);
        assert!(matches!(tracker.phase(), ReadPhase::Marked { .. }));
        assert_eq!(tracker.on_tick(t0 + COMMIT * 5), None);
    }

    #[test]
    fn test_fresh_boundary_reenters() {
        let mut tracker = ReadStateTracker::new(ARM, COMMIT);
        let t0 = Instant::now();
        tracker.observe(unread(EntryId::new(), EntryId::new()), t0);
        tracker.on_tick(t0 + COMMIT);

        let t1 = t0 + COMMIT * 3;
        tracker.observe(unread(EntryId::new(), EntryId::new()), t1);
        assert!(matches!(tracker.phase(), ReadPhase::HasUnread { .. }));
        assert_eq!(tracker.on_tick(t1 + COMMIT), Some(ReadCommand::CommitMarkRead));
    }

    #[test]
    fn test_arrival_while_scrolled_away_reenters() {
        let mut tracker = ReadStateTracker::new(ARM, COMMIT);
        let t0 = Instant::now();
        let last = EntryId::new();
        tracker.observe(unread(EntryId::new(), last), t0);
        tracker.on_tick(t0 + COMMIT);

        let away = ReadObservation {
            unread_boundary: None,
            last_entry: Some(last),
            scrolled_away: true,
        };
        tracker.observe(away, t0 + COMMIT * 2);
        assert!(matches!(tracker.phase(), ReadPhase::Marked { .. }));

        let arrived = ReadObservation {
            last_entry: Some(EntryId::new()),
            ..away
        };
        tracker.observe(arrived, t0 + COMMIT * 3);
        assert!(matches!(tracker.phase(), ReadPhase::HasUnread { .. }));
    }

    #[test]
    fn test_close_before_arm_commits_nothing() {
        let mut tracker = ReadStateTracker::new(ARM, COMMIT);
        let t0 = Instant::now();
        tracker.observe(unread(EntryId::new(), EntryId::new()), t0);

        assert_eq!(tracker.close(t0 + ARM / 2), None);
        assert_eq!(tracker.phase(), ReadPhase::Closed);
    }

    #[test]
    fn test_close_after_arm_commits_once() {
        let mut tracker = ReadStateTracker::new(ARM, COMMIT);
        let t0 = Instant::now();
        tracker.observe(unread(EntryId::new(), EntryId::new()), t0);
        tracker.on_tick(t0 + ARM);

        assert_eq!(tracker.close(t0 + ARM), Some(ReadCommand::CommitMarkRead));
        assert_eq!(tracker.close(t0 + ARM), None);
        assert_eq!(tracker.on_tick(t0 + COMMIT), None);
    }

    #[test]
    fn test_close_after_arm_elapsed_without_tick() {
        let mut tracker = ReadStateTracker::new(ARM, COMMIT);
        let t0 = Instant::now();
        tracker.observe(unread(EntryId::new(), EntryId::new()), t0);

        assert_eq!(
            tracker.close(t0 + Duration::from_millis(700)),
            Some(ReadCommand::CommitMarkRead)
        );
    }

    #[test]
    fn test_close_after_marked_is_noop() {
        let mut tracker = ReadStateTracker::new(ARM, COMMIT);
        let t0 = Instant::now();
        tracker.observe(unread(EntryId::new(), EntryId::new()), t0);
        tracker.on_tick(t0 + COMMIT);

        assert_eq!(tracker.close(t0 + COMMIT * 2), None);
    }

    #[test]
    fn test_mark_now_is_idempotent() {
        let mut tracker = ReadStateTracker::new(ARM, COMMIT);
        assert_eq!(tracker.mark_now(), Some(ReadCommand::CommitMarkRead));
        assert_eq!(tracker.mark_now(), None);
    }
}
