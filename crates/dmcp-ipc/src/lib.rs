//! dmcp IPC
//!
//! In-process event bus carrying gateway events to the listener side

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;

static NEXT_TRACE_COUNTER: AtomicU64 = AtomicU64::new(1);

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn generate_trace_id() -> String {
    let ts = now_unix_secs();
    let n = NEXT_TRACE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("trace-{}-{}", ts, n)
}

fn default_schema_version() -> u16 {
    1
}

fn default_trace_id() -> String {
    generate_trace_id()
}

/// The bot account the gateway session is logged in as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub discriminator: Option<String>,
}

impl Identity {
    pub fn display_name(&self) -> String {
        display_name(&self.username, self.discriminator.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub discriminator: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

impl Author {
    /// `name#1234` for legacy accounts, plain `name` for migrated ones.
    pub fn display_name(&self) -> String {
        display_name(&self.username, self.discriminator.as_deref())
    }
}

fn display_name(username: &str, discriminator: Option<&str>) -> String {
    match discriminator {
        Some(disc) if !disc.is_empty() && disc != "0" => format!("{}#{}", username, disc),
        _ => username.to_string(),
    }
}

/// A chat message as delivered by the platform, before normalisation.
///
/// Ids stay in their wire form (decimal strings); consumers parse them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    pub id: String,
    pub channel_id: String,
    #[serde(default)]
    pub guild_id: Option<String>,
    pub author: Author,
    #[serde(default)]
    pub content: String,
    pub timestamp: String,
    /// User ids mentioned in the message.
    #[serde(default)]
    pub mentions: Vec<String>,
}

impl RawMessage {
    pub fn is_direct(&self) -> bool {
        self.guild_id.is_none()
    }

    pub fn mentions_user(&self, user_id: &str) -> bool {
        self.mentions.iter().any(|id| id == user_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventKind {
    #[serde(rename = "ready")]
    Ready { identity: Identity, guild_count: usize },

    #[serde(rename = "message_create")]
    MessageCreate { message: RawMessage },

    #[serde(rename = "disconnected")]
    Disconnected { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default = "default_schema_version")]
    pub schema_version: u16,
    #[serde(default = "default_trace_id")]
    pub trace_id: String,
    pub source: String,
    pub kind: EventKind,
    #[serde(default)]
    pub sequence: Option<u64>,
}

impl Envelope {
    pub fn new(source: &str, kind: EventKind) -> Self {
        Self {
            schema_version: default_schema_version(),
            trace_id: generate_trace_id(),
            source: source.to_string(),
            kind,
            sequence: None,
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    pub fn message(&self) -> Option<&RawMessage> {
        match &self.kind {
            EventKind::MessageCreate { message } => Some(message),
            _ => None,
        }
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

pub const EVENT_BUS_CAPACITY: usize = 1024;

/// Fan-out of gateway events. Publishing never waits on subscribers.
#[derive(Clone)]
pub struct EventBus {
    inbound: broadcast::Sender<Envelope>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (inbound_tx, _) = broadcast::channel(capacity);
        Self {
            inbound: inbound_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.inbound.subscribe()
    }

    /// Returns the number of subscribers the envelope reached.
    pub fn publish(&self, envelope: Envelope) -> anyhow::Result<usize> {
        Ok(self.inbound.send(envelope)?)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inbound.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
