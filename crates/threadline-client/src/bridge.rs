use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use threadline_shared::Viewer;
use threadline_sync::{spawn_engine, EngineNotification, SyncBackend, SyncConfig};

use crate::events::*;
use crate::state::ClientState;
use crate::Client;

/// Spawn the sync engine and the loop that forwards its notifications to
/// `sink`.
pub fn start_engine_and_bridge<B: SyncBackend>(
    backend: Arc<B>,
    viewer: Viewer,
    config: SyncConfig,
    sink: Arc<dyn EventSink>,
) -> Client {
    let (engine, notif_rx) = spawn_engine(backend, viewer, config);
    let state = Arc::new(Mutex::new(ClientState::new(viewer)));

    let state_clone = state.clone();
    tokio::spawn(async move {
        notification_loop(sink, state_clone, notif_rx).await;
    });

    Client { engine, state }
}

/// Receives engine notifications, updates [`ClientState`] and emits the
/// matching UI events.
async fn notification_loop(
    sink: Arc<dyn EventSink>,
    state: Arc<Mutex<ClientState>>,
    mut notif_rx: mpsc::Receiver<EngineNotification>,
) {
    info!("Engine notification bridge started");

    while let Some(notification) = notif_rx.recv().await {
        match notification {
            EngineNotification::ViewChanged(view) => {
                let payload = {
                    let mut guard = match state.lock() {
                        Ok(g) => g,
                        Err(_) => return,
                    };
                    let update = guard.apply_view(view.clone());
                    ViewPayload::new(&view, update.prepended, update.follow_bottom)
                };
                emit_event(sink.as_ref(), EVENT_VIEW_CHANGED, payload);
            }

            EngineNotification::NoticesChanged(notices) => {
                if let Ok(mut guard) = state.lock() {
                    guard.notices = notices.clone();
                }
                emit_event(sink.as_ref(), EVENT_NOTICES_CHANGED, NoticesPayload { notices });
            }

            EngineNotification::MarkedRead(conversation) => {
                emit_event(
                    sink.as_ref(),
                    EVENT_MARKED_READ,
                    ConversationPayload {
                        conversation_id: conversation.to_string(),
                    },
                );
            }

            EngineNotification::EntityChanged(item) => {
                debug!(entity = %item.id, likes = item.like_count, "Entity changed (bridge)");
                emit_event(
                    sink.as_ref(),
                    EVENT_ENTITY_CHANGED,
                    EntityPayload { item: item.into() },
                );
            }

            EngineNotification::Closed(conversation) => {
                if let Ok(mut guard) = state.lock() {
                    if guard.view.as_ref().map(|v| v.conversation) == Some(conversation) {
                        guard.view = None;
                    }
                }
                emit_event(
                    sink.as_ref(),
                    EVENT_CONVERSATION_CLOSED,
                    ConversationPayload {
                        conversation_id: conversation.to_string(),
                    },
                );
            }
        }
    }

    warn!("Engine notification loop ended");
}
