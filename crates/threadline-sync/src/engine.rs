//! The sync engine task.
//!
//! All engine state lives in one tokio task. The embedding application talks
//! to it through an [`EngineHandle`] (commands in) and an
//! [`EngineNotification`] receiver (state changes out). Network calls run in
//! spawned tasks and report back over an internal channel, so the loop never
//! blocks on the backend.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use threadline_shared::{
    ConversationId, Entry, EntryBody, EntryId, FeedItem, HeadSnapshot, MutationKind, Page,
    RateLimitOrigin, Result, SyncError, Viewer,
};

use crate::backend::SyncBackend;
use crate::cache::{CacheKey, CachedView, QueryCache};
use crate::config::SyncConfig;
use crate::history::OlderRequest;
use crate::notices::{Notice, NoticeBoard};
use crate::optimistic::{OptimisticCoordinator, PendingMutation};
use crate::rate_limit::RateLimiter;
use crate::read_state::ReadCommand;
use crate::session::{ConversationSession, RenderedView};

const CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Command / notification types
// ---------------------------------------------------------------------------

/// Commands sent *into* the engine task.
#[derive(Debug)]
pub enum EngineCommand {
    /// Open a conversation, closing the current one first.
    Open(ConversationId),
    /// Close the current conversation.
    Close,
    /// Fetch the next older page of the open conversation.
    LoadOlder,
    Send {
        body: EntryBody,
        reply: oneshot::Sender<Result<Entry>>,
    },
    /// Explicit mark-as-read of the open conversation.
    MarkRead,
    /// The user scrolled to (`true`) or away from (`false`) the bottom.
    SetAtBottom(bool),
    ToggleLike {
        entity_id: EntryId,
        reply: oneshot::Sender<Result<FeedItem>>,
    },
    /// Store a view in the query cache.
    CacheView { key: CacheKey, view: CachedView },
    GetCachedView {
        key: CacheKey,
        reply: oneshot::Sender<Option<CachedView>>,
    },
    DismissNotice(u64),
    /// Request the current rendered view, if a conversation is open.
    GetView(oneshot::Sender<Option<RenderedView>>),
    GetNotices(oneshot::Sender<Vec<Notice>>),
    /// Gracefully shut down the engine.
    Shutdown,
}

/// Notifications sent *from* the engine task to the application.
#[derive(Debug, Clone)]
pub enum EngineNotification {
    /// The open conversation's rendered view changed.
    ViewChanged(RenderedView),
    /// The set of active notices changed.
    NoticesChanged(Vec<Notice>),
    /// Mark-as-read was accepted by the server.
    MarkedRead(ConversationId),
    /// A cached entity changed, optimistically or from the server.
    EntityChanged(FeedItem),
    Closed(ConversationId),
}

/// Results of spawned backend calls, fed back into the loop.
enum Completion {
    Subscribed {
        generation: u64,
        result: Result<mpsc::Receiver<HeadSnapshot>>,
    },
    Older {
        generation: u64,
        request: OlderRequest,
        result: Result<Page<Entry>>,
    },
    Sent {
        generation: u64,
        local_id: EntryId,
        result: Result<Entry>,
        reply: oneshot::Sender<Result<Entry>>,
    },
    MarkedRead {
        conversation: ConversationId,
        result: Result<()>,
    },
    Liked {
        pending: PendingMutation,
        result: Result<FeedItem>,
        reply: oneshot::Sender<Result<FeedItem>>,
    },
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cloneable front end to a running engine.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    pub fn sender(&self) -> mpsc::Sender<EngineCommand> {
        self.tx.clone()
    }

    async fn send(&self, command: EngineCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| SyncError::EngineClosed)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> EngineCommand,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply)).await?;
        rx.await.map_err(|_| SyncError::EngineClosed)
    }

    pub async fn open(&self, conversation: ConversationId) -> Result<()> {
        self.send(EngineCommand::Open(conversation)).await
    }

    pub async fn close(&self) -> Result<()> {
        self.send(EngineCommand::Close).await
    }

    pub async fn load_older(&self) -> Result<()> {
        self.send(EngineCommand::LoadOlder).await
    }

    pub async fn send_entry(&self, body: EntryBody) -> Result<Entry> {
        self.request(|reply| EngineCommand::Send { body, reply })
            .await?
    }

    pub async fn mark_read(&self) -> Result<()> {
        self.send(EngineCommand::MarkRead).await
    }

    pub async fn set_at_bottom(&self, at_bottom: bool) -> Result<()> {
        self.send(EngineCommand::SetAtBottom(at_bottom)).await
    }

    pub async fn toggle_like(&self, entity_id: EntryId) -> Result<FeedItem> {
        self.request(|reply| EngineCommand::ToggleLike { entity_id, reply })
            .await?
    }

    pub async fn cache_view(&self, key: CacheKey, view: CachedView) -> Result<()> {
        self.send(EngineCommand::CacheView { key, view }).await
    }

    pub async fn cached_view(&self, key: CacheKey) -> Result<Option<CachedView>> {
        self.request(|reply| EngineCommand::GetCachedView { key, reply })
            .await
    }

    pub async fn dismiss_notice(&self, id: u64) -> Result<()> {
        self.send(EngineCommand::DismissNotice(id)).await
    }

    pub async fn view(&self) -> Result<Option<RenderedView>> {
        self.request(EngineCommand::GetView).await
    }

    pub async fn notices(&self) -> Result<Vec<Notice>> {
        self.request(EngineCommand::GetNotices).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(EngineCommand::Shutdown).await
    }
}

// ---------------------------------------------------------------------------
// Engine task
// ---------------------------------------------------------------------------

/// Spawn the engine in a background tokio task.
///
/// Returns the command handle and the notification receiver.
pub fn spawn_engine<B: SyncBackend>(
    backend: Arc<B>,
    viewer: Viewer,
    config: SyncConfig,
) -> (EngineHandle, mpsc::Receiver<EngineNotification>) {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<EngineCommand>(CHANNEL_CAPACITY);
    let (notif_tx, notif_rx) = mpsc::channel::<EngineNotification>(CHANNEL_CAPACITY);
    let (done_tx, mut done_rx) = mpsc::channel::<Completion>(CHANNEL_CAPACITY);

    info!(viewer = %viewer.user_id.short(), page_size = config.page_size, "Sync engine starting");

    tokio::spawn(async move {
        let mut engine = Engine::new(backend, viewer, config, notif_tx, done_tx);

        loop {
            let read_deadline = engine.session.as_ref().and_then(|s| s.next_read_deadline());
            let notice_deadline = engine.notices.next_deadline();

            tokio::select! {
                // --- Incoming commands ---
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(EngineCommand::Shutdown) => {
                            info!("Sync engine shutdown requested");
                            engine.shutdown().await;
                            break;
                        }
                        Some(cmd) => engine.handle_command(cmd).await,
                        None => {
                            info!("Command channel closed, shutting down sync engine");
                            engine.shutdown().await;
                            break;
                        }
                    }
                }

                // --- Head snapshots ---
                snapshot = recv_head(&mut engine.head_rx) => {
                    match snapshot {
                        Some(snapshot) => engine.on_snapshot(snapshot).await,
                        None => {
                            warn!("Head subscription ended");
                            engine.head_rx = None;
                        }
                    }
                }

                // --- Backend call results ---
                Some(done) = done_rx.recv() => {
                    engine.on_completion(done).await;
                }

                // --- Timers ---
                _ = sleep_until(read_deadline) => {
                    engine.on_read_timer().await;
                }
                _ = sleep_until(notice_deadline) => {
                    if engine.notices.expire(Instant::now()) > 0 {
                        engine.publish_notices().await;
                    }
                }
            }
        }

        info!("Sync engine stopped");
    });

    (EngineHandle { tx: cmd_tx }, notif_rx)
}

async fn recv_head(rx: &mut Option<mpsc::Receiver<HeadSnapshot>>) -> Option<HeadSnapshot> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

struct Engine<B> {
    backend: Arc<B>,
    viewer: Viewer,
    config: SyncConfig,
    notif_tx: mpsc::Sender<EngineNotification>,
    done_tx: mpsc::Sender<Completion>,

    session: Option<ConversationSession>,
    head_rx: Option<mpsc::Receiver<HeadSnapshot>>,
    /// Bumped on every open so results for an earlier open are recognised.
    generation: u64,

    cache: QueryCache,
    coordinator: OptimisticCoordinator,
    limiter: RateLimiter,
    notices: NoticeBoard,
}

impl<B: SyncBackend> Engine<B> {
    fn new(
        backend: Arc<B>,
        viewer: Viewer,
        config: SyncConfig,
        notif_tx: mpsc::Sender<EngineNotification>,
        done_tx: mpsc::Sender<Completion>,
    ) -> Self {
        Self {
            limiter: RateLimiter::new(config.rate_limits.clone()),
            notices: NoticeBoard::new(config.notice_ttl),
            backend,
            viewer,
            config,
            notif_tx,
            done_tx,
            session: None,
            head_rx: None,
            generation: 0,
            cache: QueryCache::new(),
            coordinator: OptimisticCoordinator::new(),
        }
    }

    async fn notify(&self, notification: EngineNotification) {
        if self.notif_tx.send(notification).await.is_err() {
            debug!("Notification receiver dropped");
        }
    }

    async fn publish_view(&self) {
        if let Some(session) = &self.session {
            self.notify(EngineNotification::ViewChanged(session.view()))
                .await;
        }
    }

    async fn publish_notices(&self) {
        self.notify(EngineNotification::NoticesChanged(
            self.notices.active().to_vec(),
        ))
        .await;
    }

    /// Log `err` and surface it as a notice if it is meant for the user.
    async fn report(&mut self, err: &SyncError) {
        if self.notices.push_error(err, Instant::now()).is_some() {
            self.publish_notices().await;
        }
    }

    /// A rolled-back optimistic write only reverts the UI. The exception is
    /// a server-side throttle, which the user should hear about.
    async fn report_rollback(&mut self, err: &SyncError) {
        if matches!(
            err,
            SyncError::RateLimitExceeded {
                origin: RateLimitOrigin::Server,
                ..
            }
        ) {
            self.report(err).await;
        }
    }

    /// Run `fut` on its own task and feed its result back into the loop.
    fn spawn_call<F>(&self, fut: F)
    where
        F: std::future::Future<Output = Completion> + Send + 'static,
    {
        let done_tx = self.done_tx.clone();
        tokio::spawn(async move {
            if done_tx.send(fut.await).await.is_err() {
                debug!("Engine gone before backend call finished");
            }
        });
    }

    async fn handle_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::Open(conversation) => self.open(conversation).await,
            EngineCommand::Close => self.close().await,
            EngineCommand::LoadOlder => self.load_older().await,
            EngineCommand::Send { body, reply } => self.send_entry(body, reply).await,
            EngineCommand::MarkRead => {
                let command = self.session.as_mut().and_then(|s| s.request_mark_read());
                if let Some(command) = command {
                    self.run_read_command(command).await;
                }
            }
            EngineCommand::SetAtBottom(at_bottom) => {
                if let Some(session) = self.session.as_mut() {
                    session.set_at_bottom(at_bottom, Instant::now());
                    self.publish_view().await;
                }
            }
            EngineCommand::ToggleLike { entity_id, reply } => {
                self.toggle_like(entity_id, reply).await
            }
            EngineCommand::CacheView { key, view } => self.cache.insert(key, view),
            EngineCommand::GetCachedView { key, reply } => {
                let _ = reply.send(self.cache.get(&key).cloned());
            }
            EngineCommand::DismissNotice(id) => {
                if self.notices.dismiss(id) {
                    self.publish_notices().await;
                }
            }
            EngineCommand::GetView(reply) => {
                let _ = reply.send(self.session.as_ref().map(|s| s.view()));
            }
            EngineCommand::GetNotices(reply) => {
                let _ = reply.send(self.notices.active().to_vec());
            }
            // Handled by the loop.
            EngineCommand::Shutdown => {}
        }
    }

    async fn open(&mut self, conversation: ConversationId) {
        self.close().await;

        self.generation += 1;
        self.session = Some(ConversationSession::new(
            conversation,
            self.viewer,
            &self.config,
            Utc::now(),
        ));
        info!(%conversation, generation = self.generation, "Opening conversation");

        let backend = Arc::clone(&self.backend);
        let generation = self.generation;
        let page_size = self.config.page_size;
        self.spawn_call(async move {
            let result = backend.subscribe_head(conversation, page_size).await;
            Completion::Subscribed { generation, result }
        });
    }

    async fn close(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        self.head_rx = None;

        let conversation = session.conversation();
        if let Some(ReadCommand::CommitMarkRead) = session.close(Instant::now()) {
            self.commit_mark_read(conversation).await;
        }
        self.notify(EngineNotification::Closed(conversation)).await;
    }

    async fn shutdown(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        self.head_rx = None;

        let conversation = session.conversation();
        if session.close(Instant::now()).is_some() {
            // No loop left to receive a spawned result; commit inline.
            if let Err(e) = self.limiter.check(&MutationKind::MarkRead) {
                warn!(error = %e, "Skipping mark-as-read on shutdown");
                return;
            }
            if let Err(e) = self.backend.mark_read(conversation).await {
                error!(%conversation, error = %e, "Mark-as-read on shutdown failed");
            }
        }
    }

    async fn load_older(&mut self) {
        let generation = self.generation;
        let Some(session) = self.session.as_mut() else {
            debug!("Load older ignored: no conversation open");
            return;
        };
        let Some(request) = session.begin_load_older() else {
            return;
        };
        let page_size = session.page_size();
        self.publish_view().await;

        let backend = Arc::clone(&self.backend);
        debug!(conversation = %request.conversation, "Fetching older page");
        self.spawn_call(async move {
            let result = backend
                .fetch_older(request.conversation, request.cursor.clone(), page_size)
                .await;
            Completion::Older {
                generation,
                request,
                result,
            }
        });
    }

    async fn send_entry(&mut self, body: EntryBody, reply: oneshot::Sender<Result<Entry>>) {
        let Some(conversation) = self.session.as_ref().map(|s| s.conversation()) else {
            let _ = reply.send(Err(SyncError::NoConversation));
            return;
        };
        if let Err(e) = self.limiter.check(&MutationKind::SendMessage) {
            self.report(&e).await;
            let _ = reply.send(Err(e));
            return;
        }

        let placeholder = Entry {
            id: EntryId::new(),
            author_id: self.viewer.user_id,
            body: body.clone(),
            created_at: Utc::now(),
            read_by_counterpart_at: None,
        };
        let local_id = placeholder.id;
        if let Some(session) = self.session.as_mut() {
            session.add_pending_send(placeholder);
        }
        self.publish_view().await;

        let backend = Arc::clone(&self.backend);
        let generation = self.generation;
        self.spawn_call(async move {
            let result = backend.send_entry(conversation, body).await;
            Completion::Sent {
                generation,
                local_id,
                result,
                reply,
            }
        });
    }

    async fn toggle_like(&mut self, entity_id: EntryId, reply: oneshot::Sender<Result<FeedItem>>) {
        if let Err(e) = self.limiter.check(&MutationKind::ToggleLike) {
            self.report(&e).await;
            let _ = reply.send(Err(e));
            return;
        }
        let pending = self.coordinator.begin_toggle_like(&mut self.cache, entity_id);
        if let Some(item) = self.cache.find(entity_id).cloned() {
            self.notify(EngineNotification::EntityChanged(item)).await;
        }

        let backend = Arc::clone(&self.backend);
        self.spawn_call(async move {
            let result = backend.toggle_like(entity_id).await;
            Completion::Liked {
                pending,
                result,
                reply,
            }
        });
    }

    async fn commit_mark_read(&mut self, conversation: ConversationId) {
        if let Err(e) = self.limiter.check(&MutationKind::MarkRead) {
            self.report(&e).await;
            return;
        }
        debug!(%conversation, "Committing mark-as-read");

        let backend = Arc::clone(&self.backend);
        self.spawn_call(async move {
            let result = backend.mark_read(conversation).await;
            Completion::MarkedRead {
                conversation,
                result,
            }
        });
    }

    async fn run_read_command(&mut self, command: ReadCommand) {
        let Some(conversation) = self.session.as_ref().map(|s| s.conversation()) else {
            return;
        };
        match command {
            ReadCommand::CommitMarkRead => self.commit_mark_read(conversation).await,
        }
    }

    async fn on_read_timer(&mut self) {
        let command = self
            .session
            .as_mut()
            .and_then(|s| s.on_read_tick(Instant::now()));
        if let Some(command) = command {
            self.run_read_command(command).await;
        }
    }

    async fn on_snapshot(&mut self, snapshot: HeadSnapshot) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.apply_snapshot(snapshot, Instant::now());
        self.publish_view().await;
    }

    async fn on_completion(&mut self, done: Completion) {
        match done {
            Completion::Subscribed { generation, result } => {
                if generation != self.generation || self.session.is_none() {
                    debug!(generation, "Dropping subscription for a closed conversation");
                    return;
                }
                match result {
                    Ok(rx) => self.head_rx = Some(rx),
                    Err(e) => {
                        error!(error = %e, "Head subscription failed");
                        self.report(&e).await;
                    }
                }
            }

            Completion::Older {
                generation,
                request,
                result,
            } => {
                let current = self.session.as_ref().map(|s| s.conversation());
                if generation != self.generation || current.is_none() {
                    let race = SyncError::ConversationClosedRace {
                        issued_for: request.conversation,
                        current,
                    };
                    debug!(error = %race, "Discarding older page");
                    return;
                }
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                match session.complete_load_older(request, result) {
                    Ok(_) => self.publish_view().await,
                    Err(e @ SyncError::ConversationClosedRace { .. }) => {
                        debug!(error = %e, "Discarding older page");
                    }
                    Err(e) => {
                        warn!(error = %e, "Load older failed");
                        self.publish_view().await;
                        self.report(&e).await;
                    }
                }
            }

            Completion::Sent {
                generation,
                local_id,
                result,
                reply,
            } => {
                let shown = match self.session.as_mut() {
                    Some(session) if generation == self.generation => {
                        match &result {
                            Ok(entry) => session.confirm_send(local_id, entry.clone()),
                            Err(_) => {
                                session.discard_send(local_id);
                            }
                        }
                        true
                    }
                    _ => false,
                };
                match &result {
                    Ok(entry) => debug!(entry = %entry.id, local = %local_id, "Entry sent"),
                    Err(e) => {
                        warn!(local = %local_id, error = %e, "Send failed, placeholder removed");
                        self.report_rollback(e).await;
                    }
                }
                if shown {
                    self.publish_view().await;
                }
                let _ = reply.send(result);
            }

            Completion::MarkedRead {
                conversation,
                result,
            } => match result {
                Ok(()) => {
                    info!(%conversation, "Marked as read");
                    self.notify(EngineNotification::MarkedRead(conversation))
                        .await;
                }
                Err(e) => {
                    warn!(%conversation, error = %e, "Mark-as-read failed");
                    self.report(&e).await;
                }
            },

            Completion::Liked {
                pending,
                result,
                reply,
            } => {
                let entity_id = pending.entity_id();
                let settled = self.coordinator.settle(&mut self.cache, pending, result);
                let changed = self
                    .cache
                    .find(entity_id)
                    .cloned()
                    .or_else(|| settled.as_ref().ok().cloned());
                if let Some(item) = changed {
                    self.notify(EngineNotification::EntityChanged(item)).await;
                }
                if let Err(err) = &settled {
                    self.report_rollback(err).await;
                }
                let _ = reply.send(settled);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::memory::MemoryBackend;
    use crate::testutil::feed_item;
    use threadline_shared::{RateLimitOrigin, UserId};

    struct Harness {
        backend: Arc<MemoryBackend>,
        handle: EngineHandle,
        notifications: mpsc::Receiver<EngineNotification>,
        friend: UserId,
        conversation: ConversationId,
    }

    fn harness() -> Harness {
        let viewer = Viewer::new(UserId::new());
        let backend = Arc::new(MemoryBackend::new(viewer.user_id));
        let (handle, notifications) =
            spawn_engine(Arc::clone(&backend), viewer, SyncConfig::default());
        Harness {
            backend,
            handle,
            notifications,
            friend: UserId::new(),
            conversation: ConversationId::new(),
        }
    }

    impl Harness {
        /// Wait for the next notification matching `pick`.
        async fn wait_for<T>(&mut self, pick: impl Fn(&EngineNotification) -> Option<T>) -> T {
            loop {
                let n = self.notifications.recv().await.expect("engine stopped");
                if let Some(found) = pick(&n) {
                    return found;
                }
            }
        }

        async fn wait_for_view(&mut self, len: usize) -> RenderedView {
            self.wait_for(|n| match n {
                EngineNotification::ViewChanged(view) if view.entries.len() == len => {
                    Some(view.clone())
                }
                _ => None,
            })
            .await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_renders_head() {
        let mut h = harness();
        h.backend.seed_entries(h.conversation, h.friend, 3).unwrap();

        h.handle.open(h.conversation).await.unwrap();
        let view = h.wait_for_view(3).await;
        assert_eq!(view.conversation, h.conversation);
        assert!(!view.has_older);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_older_through_engine() {
        let mut h = harness();
        h.backend.seed_entries(h.conversation, h.friend, 120).unwrap();
        h.handle.open(h.conversation).await.unwrap();
        h.wait_for_view(50).await;

        h.handle.load_older().await.unwrap();
        h.handle.load_older().await.unwrap();
        h.wait_for_view(100).await;
        h.handle.load_older().await.unwrap();
        let view = h.wait_for_view(120).await;
        assert!(!view.has_older);
        assert!(!view.loading_older);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unread_marked_after_commit_delay() {
        let mut h = harness();
        h.backend.seed_entries(h.conversation, h.friend, 2).unwrap();
        h.handle.open(h.conversation).await.unwrap();
        h.wait_for_view(2).await;

        let opened = Instant::now();
        let marked = h
            .wait_for(|n| match n {
                EngineNotification::MarkedRead(c) => Some(*c),
                _ => None,
            })
            .await;
        assert_eq!(marked, h.conversation);
        assert!(opened.elapsed() >= Duration::from_millis(1000));
        assert!(h.backend.last_read(h.conversation).unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_quick_close_marks_nothing() {
        let mut h = harness();
        h.backend.seed_entries(h.conversation, h.friend, 2).unwrap();
        h.handle.open(h.conversation).await.unwrap();
        h.wait_for_view(2).await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        h.handle.close().await.unwrap();
        h.wait_for(|n| matches!(n, EngineNotification::Closed(_)).then_some(()))
            .await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(h.backend.last_read(h.conversation).unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_after_arm_marks_once() {
        let mut h = harness();
        h.backend.seed_entries(h.conversation, h.friend, 2).unwrap();
        h.handle.open(h.conversation).await.unwrap();
        h.wait_for_view(2).await;

        tokio::time::sleep(Duration::from_millis(600)).await;
        h.handle.close().await.unwrap();
        h.wait_for(|n| matches!(n, EngineNotification::MarkedRead(_)).then_some(()))
            .await;
        let requests = h.backend.request_count();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(h.backend.last_read(h.conversation).unwrap().is_some());
        assert_eq!(h.backend.request_count(), requests);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_rate_limited_locally() {
        let mut h = harness();
        h.handle.open(h.conversation).await.unwrap();
        h.wait_for_view(0).await;

        for i in 0..30 {
            h.handle
                .send_entry(EntryBody::text(format!("burst {i}")))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        let requests = h.backend.request_count();

        let err = h
            .handle
            .send_entry(EntryBody::text("one too many"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::RateLimitExceeded {
                kind: MutationKind::SendMessage,
                origin: RateLimitOrigin::Local,
                ..
            }
        ));
        assert_eq!(h.backend.request_count(), requests);
        assert_eq!(h.backend.entry_count(h.conversation), 30);

        let notices = h.handle.notices().await.unwrap();
        assert_eq!(notices.len(), 1);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(h.handle.notices().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_shows_placeholder_then_server_copy() {
        let mut h = harness();
        h.backend.seed_entries(h.conversation, h.friend, 2).unwrap();
        h.handle.open(h.conversation).await.unwrap();
        h.wait_for_view(2).await;
        h.backend.set_latency(Duration::from_secs(1)).unwrap();

        let send = {
            let handle = h.handle.clone();
            tokio::spawn(async move { handle.send_entry(EntryBody::text("hey")).await })
        };
        let optimistic = h.wait_for_view(3).await;
        assert_eq!(optimistic.pending.len(), 1);
        assert_eq!(optimistic.entries.last().map(|e| e.id), Some(optimistic.pending[0]));

        let sent = send.await.unwrap().unwrap();
        let confirmed = h
            .wait_for(|n| match n {
                EngineNotification::ViewChanged(v) if v.pending.is_empty() => Some(v.clone()),
                _ => None,
            })
            .await;
        assert_eq!(confirmed.entries.len(), 3);
        assert_eq!(confirmed.entries.last().map(|e| e.id), Some(sent.id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_send_rolls_back_quietly() {
        let mut h = harness();
        h.handle.open(h.conversation).await.unwrap();
        h.wait_for_view(0).await;
        h.backend.set_offline(true).unwrap();
        h.backend.set_latency(Duration::from_secs(1)).unwrap();

        let send = {
            let handle = h.handle.clone();
            tokio::spawn(async move { handle.send_entry(EntryBody::text("void")).await })
        };
        h.wait_for_view(1).await;

        let err = send.await.unwrap().unwrap_err();
        assert!(matches!(err, SyncError::Transport(_)));
        let view = h.wait_for_view(0).await;
        assert!(view.pending.is_empty());
        assert!(h.handle.notices().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_older_publishes_loading_state() {
        let mut h = harness();
        h.backend.seed_entries(h.conversation, h.friend, 60).unwrap();
        h.handle.open(h.conversation).await.unwrap();
        h.wait_for_view(50).await;
        h.backend.set_latency(Duration::from_secs(1)).unwrap();

        h.handle.load_older().await.unwrap();
        let loading = h
            .wait_for(|n| match n {
                EngineNotification::ViewChanged(v) if v.loading_older => Some(v.clone()),
                _ => None,
            })
            .await;
        assert_eq!(loading.entries.len(), 50);

        let done = h.wait_for_view(60).await;
        assert!(!done.loading_older);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_without_conversation() {
        let h = harness();
        let err = h
            .handle
            .send_entry(EntryBody::text("hello?"))
            .await
            .unwrap_err();
        assert_eq!(err, SyncError::NoConversation);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_like_rolls_back() {
        let mut h = harness();
        let item = feed_item(4, false);
        h.backend.seed_item(item.clone()).unwrap();
        let key = CacheKey::Item(item.id);
        h.handle
            .cache_view(key.clone(), CachedView::Single(item.clone()))
            .await
            .unwrap();

        h.backend.set_offline(true).unwrap();
        h.backend.set_latency(Duration::from_secs(2)).unwrap();

        let like = {
            let handle = h.handle.clone();
            let id = item.id;
            tokio::spawn(async move { handle.toggle_like(id).await })
        };

        let optimistic = h
            .wait_for(|n| match n {
                EngineNotification::EntityChanged(i) => Some(i.clone()),
                _ => None,
            })
            .await;
        assert_eq!((optimistic.like_count, optimistic.liked_by_viewer), (5, true));

        let err = like.await.unwrap().unwrap_err();
        assert!(matches!(err, SyncError::StaleMutation { .. }));
        assert_eq!(
            h.handle.cached_view(key).await.unwrap(),
            Some(CachedView::Single(item))
        );
        assert!(h.handle.notices().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_throttled_like_posts_notice() {
        let h = harness();
        let item = feed_item(4, false);
        h.backend.seed_item(item.clone()).unwrap();
        h.handle
            .cache_view(CacheKey::Item(item.id), CachedView::Single(item.clone()))
            .await
            .unwrap();
        h.backend
            .inject_failure(SyncError::RateLimitExceeded {
                kind: MutationKind::ToggleLike,
                origin: RateLimitOrigin::Server,
                retry_after_ms: 1_000,
            })
            .unwrap();

        let err = h.handle.toggle_like(item.id).await.unwrap_err();
        assert!(err.is_rate_limit());
        let notices = h.handle.notices().await.unwrap();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].kind, crate::notices::NoticeKind::RateLimit);
    }

    #[tokio::test(start_paused = true)]
    async fn test_like_on_uncached_entity_reaches_server() {
        let h = harness();
        let item = feed_item(4, false);
        h.backend.seed_item(item.clone()).unwrap();
        let requests = h.backend.request_count();

        let server = h.handle.toggle_like(item.id).await.unwrap();
        assert_eq!((server.like_count, server.liked_by_viewer), (5, true));
        assert_eq!(h.backend.request_count(), requests + 1);
        assert_eq!(h.handle.cached_view(CacheKey::Item(item.id)).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_like_confirmed_by_server() {
        let h = harness();
        let item = feed_item(4, false);
        h.backend.seed_item(item.clone()).unwrap();
        h.backend.like_from_elsewhere(item.id).unwrap();
        h.handle
            .cache_view(CacheKey::Item(item.id), CachedView::Single(item.clone()))
            .await
            .unwrap();

        let server = h.handle.toggle_like(item.id).await.unwrap();
        assert_eq!((server.like_count, server.liked_by_viewer), (6, true));
        let cached = h.handle.cached_view(CacheKey::Item(item.id)).await.unwrap();
        assert_eq!(cached, Some(CachedView::Single(server)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_discards_older_page() {
        let mut h = harness();
        let other = ConversationId::new();
        h.backend.seed_entries(h.conversation, h.friend, 80).unwrap();
        h.backend.seed_entries(other, h.friend, 5).unwrap();

        h.handle.open(h.conversation).await.unwrap();
        h.wait_for_view(50).await;

        h.backend.set_latency(Duration::from_secs(1)).unwrap();
        h.handle.load_older().await.unwrap();
        h.handle.open(other).await.unwrap();
        h.wait_for_view(5).await;
        tokio::time::sleep(Duration::from_secs(3)).await;

        let view = h.handle.view().await.unwrap().unwrap();
        assert_eq!(view.conversation, other);
        assert_eq!(view.entries.len(), 5);
    }
}
