// Client-side sync engine: live head, paged history, read state and
// optimistic mutations over a pluggable backend.

pub mod backend;
pub mod cache;
pub mod config;
pub mod engine;
pub mod head;
pub mod history;
pub mod memory;
pub mod merge;
pub mod notices;
pub mod optimistic;
pub mod rate_limit;
pub mod read_state;
pub mod scroll;
pub mod session;

#[cfg(test)]
mod testutil;

pub use backend::SyncBackend;
pub use cache::{CacheKey, CachedView, MutationSnapshot, QueryCache};
pub use config::SyncConfig;
pub use engine::{spawn_engine, EngineCommand, EngineHandle, EngineNotification};
pub use head::SubscriptionHead;
pub use history::{HistoryAccumulator, OlderRequest};
pub use memory::MemoryBackend;
pub use merge::merge_view;
pub use notices::{Notice, NoticeBoard, NoticeKind};
pub use optimistic::{toggle_like_locally, OptimisticCoordinator, PendingMutation};
pub use rate_limit::{RateLimitRule, RateLimitTable, RateLimiter};
pub use read_state::{
    divider_markers, DividerMarkers, ReadCommand, ReadObservation, ReadPhase, ReadState,
    ReadStateTracker,
};
pub use scroll::ScrollKeeper;
pub use session::{ConversationSession, RenderedView};
