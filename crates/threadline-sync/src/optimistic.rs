//! Optimistic mutations with snapshot rollback.
//!
//! A toggle is applied to every cached view immediately, then reconciled
//! with the server. Success overwrites every copy with the server's entity;
//! failure restores the snapshot taken before the optimistic write, unless a
//! server copy has landed since. An entity no view holds still round-trips;
//! its server copy lands wherever it is cached by then.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use threadline_shared::{EntryId, FeedItem, MutationKind, Result, SyncError};

use crate::backend::SyncBackend;
use crate::cache::{MutationSnapshot, QueryCache};
use crate::rate_limit::RateLimiter;

/// An optimistic write that is waiting on its server round trip.
#[derive(Debug, Clone)]
pub struct PendingMutation {
    seq: u64,
    entity_id: EntryId,
    snapshot: MutationSnapshot,
}

impl PendingMutation {
    pub fn entity_id(&self) -> EntryId {
        self.entity_id
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn snapshot(&self) -> &MutationSnapshot {
        &self.snapshot
    }
}

#[derive(Debug, Clone)]
struct EntityTrack {
    in_flight: usize,
    /// Last server copy settled while other mutations were still pending,
    /// stamped with the newest sequence number issued when it landed.
    authoritative: Option<(u64, FeedItem)>,
}

/// Flip the like flag and move the count by one in the matching direction.
pub fn toggle_like_locally(item: &mut FeedItem) {
    item.liked_by_viewer = !item.liked_by_viewer;
    item.like_count = if item.liked_by_viewer {
        item.like_count.saturating_add(1)
    } else {
        item.like_count.saturating_sub(1)
    };
}

#[derive(Debug, Default)]
pub struct OptimisticCoordinator {
    next_seq: u64,
    entities: HashMap<EntryId, EntityTrack>,
}

impl OptimisticCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot every view holding `entity_id`, then toggle the like in all
    /// of them. The snapshot is empty when nothing caches the entity.
    pub fn begin_toggle_like(
        &mut self,
        cache: &mut QueryCache,
        entity_id: EntryId,
    ) -> PendingMutation {
        let snapshot = cache.snapshot(entity_id);
        let touched = cache.update_entity(entity_id, toggle_like_locally);
        self.next_seq += 1;
        self.entities
            .entry(entity_id)
            .or_insert(EntityTrack {
                in_flight: 0,
                authoritative: None,
            })
            .in_flight += 1;

        debug!(entity = %entity_id, seq = self.next_seq, touched, "Optimistic like applied");
        PendingMutation {
            seq: self.next_seq,
            entity_id,
            snapshot,
        }
    }

    /// Reconcile `pending` with its server outcome.
    ///
    /// Every settle trusts the last server response to resolve. On failure
    /// the snapshot is restored verbatim, unless a server copy for the same
    /// entity settled after `pending` was issued, in which case that copy is
    /// written instead. Server rate limits come back unchanged so they can be
    /// surfaced; other failures become [`SyncError::StaleMutation`].
    pub fn settle(
        &mut self,
        cache: &mut QueryCache,
        pending: PendingMutation,
        outcome: Result<FeedItem>,
    ) -> Result<FeedItem> {
        let entity_id = pending.entity_id;
        let issued = self.next_seq;
        let track = self.entities.get_mut(&entity_id);

        let result = match outcome {
            Ok(server) => {
                let touched = cache.replace_entity(&server);
                info!(
                    entity = %entity_id,
                    likes = server.like_count,
                    liked = server.liked_by_viewer,
                    touched,
                    "Like confirmed"
                );
                if let Some(track) = track {
                    track.authoritative = Some((issued, server.clone()));
                }
                Ok(server)
            }
            Err(err) => {
                let landed_since = track
                    .and_then(|t| t.authoritative.as_ref())
                    .filter(|(stamp, _)| *stamp >= pending.seq)
                    .map(|(_, item)| item.clone());
                match landed_since {
                    Some(item) => {
                        cache.replace_entity(&item);
                    }
                    None => cache.restore(&pending.snapshot),
                }
                warn!(entity = %entity_id, error = %err, "Like rolled back");
                if err.is_rate_limit() {
                    Err(err)
                } else {
                    Err(SyncError::StaleMutation {
                        entity_id,
                        reason: err.to_string(),
                    })
                }
            }
        };

        self.release(entity_id);
        result
    }

    fn release(&mut self, entity_id: EntryId) {
        if let Some(track) = self.entities.get_mut(&entity_id) {
            track.in_flight = track.in_flight.saturating_sub(1);
            if track.in_flight == 0 {
                self.entities.remove(&entity_id);
            }
        }
    }

    /// Mutations on `entity_id` still awaiting the server.
    pub fn in_flight(&self, entity_id: EntryId) -> usize {
        self.entities.get(&entity_id).map_or(0, |t| t.in_flight)
    }

    /// Rate-limit, apply, round-trip and settle a like toggle in one call.
    pub async fn toggle_like<B: SyncBackend>(
        &mut self,
        cache: &mut QueryCache,
        limiter: &mut RateLimiter,
        backend: &B,
        entity_id: EntryId,
    ) -> Result<FeedItem> {
        limiter.check(&MutationKind::ToggleLike)?;
        let pending = self.begin_toggle_like(cache, entity_id);
        let outcome = backend.toggle_like(entity_id).await;
        self.settle(cache, pending, outcome)
    }
}
