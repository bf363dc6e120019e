//! Gateway v10 payloads.

use crate::model::WireUser;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const OP_DISPATCH: u8 = 0;
pub const OP_HEARTBEAT: u8 = 1;
pub const OP_IDENTIFY: u8 = 2;
pub const OP_PRESENCE_UPDATE: u8 = 3;
pub const OP_RESUME: u8 = 6;
pub const OP_RECONNECT: u8 = 7;
pub const OP_INVALID_SESSION: u8 = 9;
pub const OP_HELLO: u8 = 10;
pub const OP_HEARTBEAT_ACK: u8 = 11;

/// Used when HELLO never arrives or is malformed.
pub const FALLBACK_HEARTBEAT_MS: u64 = 41_250;

/// Every frame on the gateway socket, in both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayPayload {
    pub op: u8,
    #[serde(default)]
    pub d: Option<Value>,
    /// Dispatch sequence number, only on op 0.
    #[serde(default)]
    pub s: Option<u64>,
    /// Dispatch event name, only on op 0.
    #[serde(default)]
    pub t: Option<String>,
}

impl GatewayPayload {
    pub fn outgoing(op: u8, d: Value) -> Self {
        Self {
            op,
            d: Some(d),
            s: None,
            t: None,
        }
    }

    /// Heartbeats carry the last sequence seen, or null before the first
    /// dispatch.
    pub fn heartbeat(last_sequence: Option<u64>) -> Self {
        Self {
            op: OP_HEARTBEAT,
            d: last_sequence.map(Value::from),
            s: None,
            t: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HelloData {
    pub heartbeat_interval: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IdentifyData {
    pub token: String,
    pub intents: u64,
    pub properties: ConnectionProperties,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence: Option<PresenceUpdate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl ConnectionProperties {
    pub fn current() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: "dmcp".to_string(),
            device: "dmcp".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResumeData {
    pub token: String,
    pub session_id: String,
    pub seq: u64,
}

/// Op 3 body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    /// Unix millis when the client went idle, null when not idle.
    pub since: Option<u64>,
    pub activities: Vec<Activity>,
    /// `online`, `dnd`, `idle`, `invisible` or `offline`.
    pub status: String,
    pub afk: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub name: String,
    /// 0 is "Playing".
    #[serde(rename = "type")]
    pub kind: u8,
}

impl PresenceUpdate {
    pub fn playing(status: &str, activity: &str) -> Self {
        Self {
            since: None,
            activities: vec![Activity {
                name: activity.to_string(),
                kind: 0,
            }],
            status: status.to_string(),
            afk: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadyEvent {
    pub v: u32,
    pub user: WireUser,
    pub session_id: String,
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
    /// Unavailable guild stubs; only the count matters here.
    #[serde(default)]
    pub guilds: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuildCreateEvent {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuildDeleteEvent {
    pub id: String,
    /// Set when the guild went unavailable rather than the bot leaving it.
    #[serde(default)]
    pub unavailable: bool,
}

#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    pub remaining: Option<u32>,
    pub reset_after: Option<f64>,
    pub bucket: Option<String>,
}

impl RateLimitInfo {
    pub fn from_headers(headers: &reqwest::header::HeaderMap) -> Self {
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
        Self {
            remaining: header("x-ratelimit-remaining").and_then(|v| v.parse().ok()),
            reset_after: header("x-ratelimit-reset-after").and_then(|v| v.parse().ok()),
            bucket: header("x-ratelimit-bucket").map(String::from),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        self.reset_after.map(|secs| (secs * 1000.0) as u64)
    }
}
