//! Session state shared between the gateway task and tool handlers.

use crate::events::PresenceUpdate;
use dmcp_ipc::Identity;
use serde::Serialize;
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::watch;

/// What the agent says it is doing, mirrored into the bot's presence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentStatus {
    pub status: String,
    pub details: Option<String>,
}

impl Default for AgentStatus {
    fn default() -> Self {
        Self {
            status: "offline".to_string(),
            details: None,
        }
    }
}

impl AgentStatus {
    pub fn new(status: &str, details: Option<&str>) -> Self {
        Self {
            status: status.trim().to_lowercase(),
            details: details
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string),
        }
    }

    pub fn presence(&self) -> PresenceUpdate {
        let (status, default_activity) = match self.status.as_str() {
            "available" | "waiting" => ("online", "Ready for tasks".to_string()),
            "working" => ("online", "Working".to_string()),
            "offline" => ("invisible", "Offline".to_string()),
            other => ("online", capitalize(other)),
        };
        let activity = self.details.clone().unwrap_or(default_activity);
        PresenceUpdate::playing(status, &activity)
    }
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSnapshot {
    pub ready: bool,
    pub identity: Option<Identity>,
    pub guild_count: usize,
    pub agent_status: AgentStatus,
}

#[derive(Debug, Default)]
struct Inner {
    identity: Option<Identity>,
    guild_count: usize,
    agent_status: AgentStatus,
}

pub struct ConnectionState {
    inner: RwLock<Inner>,
    ready: watch::Sender<bool>,
}

impl ConnectionState {
    pub fn new() -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            inner: RwLock::new(Inner::default()),
            ready,
        }
    }

    pub fn mark_ready(&self, identity: Identity, guild_count: usize) {
        {
            let mut inner = self.inner.write().unwrap_or_else(|p| p.into_inner());
            inner.identity = Some(identity);
            inner.guild_count = guild_count;
        }
        self.ready.send_replace(true);
    }

    /// The identity is kept: it is still the best answer for mention checks
    /// while a resume is in flight.
    pub fn mark_disconnected(&self) {
        self.ready.send_replace(false);
    }

    /// A resumed session keeps the identity and guilds from its READY.
    pub fn mark_resumed(&self) {
        self.ready.send_replace(true);
    }

    pub fn set_guild_count(&self, guild_count: usize) {
        let mut inner = self.inner.write().unwrap_or_else(|p| p.into_inner());
        inner.guild_count = guild_count;
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.inner
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .identity
            .clone()
    }

    pub fn set_agent_status(&self, status: AgentStatus) {
        let mut inner = self.inner.write().unwrap_or_else(|p| p.into_inner());
        inner.agent_status = status;
    }

    pub fn agent_status(&self) -> AgentStatus {
        self.inner
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .agent_status
            .clone()
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        let inner = self.inner.read().unwrap_or_else(|p| p.into_inner());
        ConnectionSnapshot {
            ready: self.is_ready(),
            identity: inner.identity.clone(),
            guild_count: inner.guild_count,
            agent_status: inner.agent_status.clone(),
        }
    }

    /// Resolves `true` once READY has been seen, `false` on timeout.
    pub async fn wait_until_ready(&self, timeout: Duration) -> bool {
        let mut rx = self.ready.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|ready| *ready))
            .await
            .map(|res| res.is_ok())
            .unwrap_or(false)
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}
