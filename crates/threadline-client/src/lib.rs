pub mod bridge;
pub mod commands;
pub mod events;
pub mod state;

use std::sync::{Arc, Mutex};

use tracing_subscriber::{fmt, EnvFilter};

use threadline_shared::constants::APP_NAME;
use threadline_shared::Viewer;
use threadline_sync::{EngineHandle, SyncBackend, SyncConfig};

use crate::events::EventSink;
use crate::state::ClientState;

/// A running engine plus the UI-side state its bridge maintains.
#[derive(Clone)]
pub struct Client {
    pub engine: EngineHandle,
    pub state: Arc<Mutex<ClientState>>,
}

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter. Safe to call more than once.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("threadline_client=debug,threadline_sync=debug,warn")
    });

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}

/// Start a client against `backend` with configuration from the
/// environment. Must be called inside a tokio runtime.
pub fn start<B: SyncBackend>(backend: Arc<B>, viewer: Viewer, sink: Arc<dyn EventSink>) -> Client {
    let config = SyncConfig::from_env();
    tracing::info!(viewer = %viewer.user_id.short(), "Starting {} client", APP_NAME);
    bridge::start_engine_and_bridge(backend, viewer, config, sink)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::Value;
    use tokio::sync::mpsc;

    use super::*;
    use crate::events::*;
    use threadline_shared::{ConversationId, UserId};
    use threadline_sync::MemoryBackend;

    struct Harness {
        backend: Arc<MemoryBackend>,
        client: Client,
        events: mpsc::UnboundedReceiver<(String, Value)>,
        friend: UserId,
        conversation: ConversationId,
    }

    fn harness() -> Harness {
        let viewer = Viewer::new(UserId::new());
        let backend = Arc::new(MemoryBackend::new(viewer.user_id));
        let (sink, events) = ChannelSink::new();
        let client = bridge::start_engine_and_bridge(
            Arc::clone(&backend),
            viewer,
            SyncConfig::default(),
            Arc::new(sink),
        );
        Harness {
            backend,
            client,
            events,
            friend: UserId::new(),
            conversation: ConversationId::new(),
        }
    }

    impl Harness {
        async fn next_event(&mut self, name: &str) -> Value {
            loop {
                let (event, payload) = self.events.recv().await.expect("bridge stopped");
                if event == name {
                    return payload;
                }
            }
        }

        async fn next_view_with(&mut self, len: usize) -> Value {
            loop {
                let payload = self.next_event(EVENT_VIEW_CHANGED).await;
                if payload["entries"].as_array().map(Vec::len) == Some(len) {
                    return payload;
                }
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_emits_view_with_divider() {
        let mut h = harness();
        let read = h.backend.seed_entries(h.conversation, h.friend, 2).unwrap();
        h.backend
            .set_last_read(h.conversation, read[1].created_at)
            .unwrap();
        let unread = h.backend.seed_entries(h.conversation, h.friend, 2).unwrap();

        commands::open_conversation(&h.client, &h.conversation.to_string())
            .await
            .unwrap();
        let payload = h.next_view_with(4).await;

        assert_eq!(payload["conversationId"], h.conversation.to_string());
        assert_eq!(
            payload["dividersBefore"],
            serde_json::json!([unread[0].id.to_string()])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_message_appends_and_follows() {
        let mut h = harness();
        commands::open_conversation(&h.client, &h.conversation.to_string())
            .await
            .unwrap();
        h.next_view_with(0).await;

        let sent = commands::send_message(&h.client, "hello").await.unwrap();
        let placeholder = h.next_view_with(1).await;
        assert_eq!(placeholder["pendingIds"].as_array().map(Vec::len), Some(1));
        assert_eq!(placeholder["followBottom"], true);

        loop {
            let payload = h.next_view_with(1).await;
            if payload["pendingIds"] == serde_json::json!([]) {
                assert_eq!(payload["entries"][0]["id"], sent.id);
                break;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_older_marks_prepend() {
        let mut h = harness();
        h.backend.seed_entries(h.conversation, h.friend, 60).unwrap();
        commands::open_conversation(&h.client, &h.conversation.to_string())
            .await
            .unwrap();
        h.next_view_with(50).await;

        commands::load_older(&h.client, 2_000.0).await.unwrap();
        let payload = h.next_view_with(60).await;
        assert_eq!(payload["prepended"], true);
        assert_eq!(payload["hasOlder"], false);

        let offset = h.client.state.lock().unwrap().restore_offset(2_400.0, 0.0);
        assert_eq!(offset, 400.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_notice_round_trip() {
        let mut h = harness();
        commands::open_conversation(&h.client, &h.conversation.to_string())
            .await
            .unwrap();
        h.next_view_with(0).await;

        for i in 0..30 {
            commands::send_message(&h.client, &format!("m{i}"))
                .await
                .unwrap();
        }
        let err = commands::send_message(&h.client, "over").await.unwrap_err();
        assert!(err.to_string().contains("Failed to send message"));

        let payload = h.next_event(EVENT_NOTICES_CHANGED).await;
        assert_eq!(payload["notices"][0]["kind"], "rateLimit");

        tokio::time::sleep(Duration::from_secs(6)).await;
        let payload = h.next_event(EVENT_NOTICES_CHANGED).await;
        assert_eq!(payload["notices"], serde_json::json!([]));
        assert!(h.client.state.lock().unwrap().notices.is_empty());
    }

    #[tokio::test]
    async fn test_rejects_bad_input() {
        let h = harness();
        assert!(commands::open_conversation(&h.client, "not-a-uuid")
            .await
            .is_err());
        assert!(commands::toggle_like(&h.client, "").await.is_err());
        assert!(commands::send_message(&h.client, "   ").await.is_err());
    }
}
