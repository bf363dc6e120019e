use crate::client::{ChatClient, HistoryQuery};
use crate::error::{CoreError, CoreResult};
use crate::model::Snowflake;
use async_trait::async_trait;
use dmcp_ipc::{Author, Envelope, EventBus, EventKind, Identity, RawMessage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

pub(crate) fn raw(id: u64, channel: u64, author_id: u64, author: &str, content: &str) -> RawMessage {
    RawMessage {
        id: id.to_string(),
        channel_id: channel.to_string(),
        guild_id: Some("1".to_string()),
        author: Author {
            id: author_id.to_string(),
            username: author.to_string(),
            discriminator: None,
            bot: false,
        },
        content: content.to_string(),
        timestamp: format!("2024-01-01T00:00:{:02}+00:00", id % 60),
        mentions: Vec::new(),
    }
}

/// In-memory client with Discord's history semantics: results are
/// newest-first regardless of `oldest_first`, `after` selects the oldest
/// `limit` messages past the cursor.
pub(crate) struct FakeClient {
    channel: Snowflake,
    bus: EventBus,
    identity: Mutex<Option<Identity>>,
    history: Mutex<Vec<RawMessage>>,
    fetches: AtomicUsize,
}

impl FakeClient {
    pub(crate) fn new(channel: u64) -> Arc<Self> {
        Arc::new(Self {
            channel: Snowflake::new(channel),
            bus: EventBus::new(),
            identity: Mutex::new(None),
            history: Mutex::new(Vec::new()),
            fetches: AtomicUsize::new(0),
        })
    }

    pub(crate) fn set_identity(&self, id: &str) {
        if let Ok(mut guard) = self.identity.lock() {
            *guard = Some(Identity {
                id: id.to_string(),
                username: "bot".to_string(),
                discriminator: None,
            });
        }
    }

    /// Stores a message in history without publishing it live.
    pub(crate) fn post(&self, message: RawMessage) {
        if let Ok(mut history) = self.history.lock() {
            history.push(message);
        }
    }

    pub(crate) fn publish(&self, message: RawMessage) {
        let _ = self
            .bus
            .publish(Envelope::new("fake", EventKind::MessageCreate { message }));
    }

    pub(crate) fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatClient for FakeClient {
    async fn fetch_history(
        &self,
        channel: Snowflake,
        query: HistoryQuery,
    ) -> CoreResult<Vec<RawMessage>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if channel != self.channel {
            return Err(CoreError::channel_not_found(channel));
        }

        let mut messages = self
            .history
            .lock()
            .map(|history| history.clone())
            .unwrap_or_default();
        messages.sort_by_key(|m| m.id.parse::<u64>().unwrap_or(0));

        let selected: Vec<RawMessage> = match query.after {
            Some(after) => messages
                .into_iter()
                .filter(|m| m.id.parse::<u64>().unwrap_or(0) > after.get())
                .take(query.limit)
                .collect(),
            None => {
                let skip = messages.len().saturating_sub(query.limit);
                messages.into_iter().skip(skip).collect()
            }
        };

        Ok(selected.into_iter().rev().collect())
    }

    fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.bus.subscribe()
    }

    fn current_identity(&self) -> Option<Identity> {
        self.identity.lock().ok().and_then(|guard| guard.clone())
    }
}
