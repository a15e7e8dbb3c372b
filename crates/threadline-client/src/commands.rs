//! Entry points the UI calls. Ids cross this boundary as strings.

use anyhow::{anyhow, ensure, Context};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use threadline_shared::{ConversationId, Entry, EntryBody, EntryId, FeedItem};
use threadline_sync::RenderedView;

use crate::Client;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryDto {
    pub id: String,
    pub author_id: String,
    pub body: EntryBody,
    pub created_at: String,
    pub read_by_counterpart_at: Option<String>,
}

impl From<Entry> for EntryDto {
    fn from(e: Entry) -> Self {
        Self {
            id: e.id.to_string(),
            author_id: e.author_id.to_string(),
            body: e.body,
            created_at: e.created_at.to_rfc3339(),
            read_by_counterpart_at: e.read_by_counterpart_at.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedItemDto {
    pub id: String,
    pub author_id: String,
    pub body: EntryBody,
    pub created_at: String,
    pub like_count: u32,
    pub liked_by_viewer: bool,
}

impl From<FeedItem> for FeedItemDto {
    fn from(i: FeedItem) -> Self {
        Self {
            id: i.id.to_string(),
            author_id: i.author_id.to_string(),
            body: i.body,
            created_at: i.created_at.to_rfc3339(),
            like_count: i.like_count,
            liked_by_viewer: i.liked_by_viewer,
        }
    }
}

fn parse_uuid(raw: &str, what: &str) -> anyhow::Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("Invalid {what}: {raw:?}"))
}

pub async fn open_conversation(client: &Client, conversation_id: &str) -> anyhow::Result<()> {
    let conversation = ConversationId(parse_uuid(conversation_id, "conversation_id")?);
    {
        let mut guard = client
            .state
            .lock()
            .map_err(|e| anyhow!("Lock poisoned: {e}"))?;
        guard.view = None;
        guard.at_bottom = true;
    }
    client.engine.open(conversation).await?;
    info!(%conversation, "Conversation requested");
    Ok(())
}

pub async fn close_conversation(client: &Client) -> anyhow::Result<()> {
    client.engine.close().await?;
    Ok(())
}

/// Request the next older page; `content_height` is the list height right
/// now, used to hold the viewport still once the page lands.
pub async fn load_older(client: &Client, content_height: f64) -> anyhow::Result<()> {
    {
        let mut guard = client
            .state
            .lock()
            .map_err(|e| anyhow!("Lock poisoned: {e}"))?;
        let Some(view) = guard.view.as_ref() else {
            return Ok(());
        };
        if !view.has_older || view.loading_older {
            return Ok(());
        }
        guard.begin_load_older(content_height);
    }
    client.engine.load_older().await?;
    Ok(())
}

pub async fn send_message(client: &Client, text: &str) -> anyhow::Result<EntryDto> {
    ensure!(!text.trim().is_empty(), "Message is empty");
    let entry = client
        .engine
        .send_entry(EntryBody::text(text))
        .await
        .context("Failed to send message")?;
    Ok(entry.into())
}

pub async fn send_audio(client: &Client, url: &str, duration_ms: u32) -> anyhow::Result<EntryDto> {
    ensure!(!url.is_empty(), "Audio URL is empty");
    let entry = client
        .engine
        .send_entry(EntryBody::Audio {
            url: url.to_string(),
            duration_ms,
        })
        .await
        .context("Failed to send audio message")?;
    Ok(entry.into())
}

pub async fn mark_read(client: &Client) -> anyhow::Result<()> {
    client.engine.mark_read().await?;
    Ok(())
}

pub async fn set_at_bottom(client: &Client, at_bottom: bool) -> anyhow::Result<()> {
    {
        let mut guard = client
            .state
            .lock()
            .map_err(|e| anyhow!("Lock poisoned: {e}"))?;
        if guard.at_bottom == at_bottom {
            return Ok(());
        }
        guard.at_bottom = at_bottom;
    }
    client.engine.set_at_bottom(at_bottom).await?;
    Ok(())
}

pub async fn toggle_like(client: &Client, entity_id: &str) -> anyhow::Result<FeedItemDto> {
    let entity_id = EntryId(parse_uuid(entity_id, "entity_id")?);
    let item = client
        .engine
        .toggle_like(entity_id)
        .await
        .context("Failed to toggle like")?;
    Ok(item.into())
}

pub async fn dismiss_notice(client: &Client, notice_id: u64) -> anyhow::Result<()> {
    client.engine.dismiss_notice(notice_id).await?;
    Ok(())
}

pub async fn get_view(client: &Client) -> anyhow::Result<Option<RenderedView>> {
    Ok(client.engine.view().await?)
}
