use dmcp_core::CoreError;
use thiserror::Error;

pub type DiscordResult<T> = Result<T, DiscordError>;

#[derive(Debug, Error)]
pub enum DiscordError {
    #[error("not found: {route}")]
    NotFound { route: String },

    #[error("missing permissions for {route}")]
    Forbidden { route: String },

    #[error("rate limited on {route}, retry after {retry_after_ms}ms")]
    RateLimited { route: String, retry_after_ms: u64 },

    #[error("discord returned {status} for {route}: {body}")]
    Api {
        route: String,
        status: u16,
        body: String,
    },

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to decode {context}: {source}")]
    Decode {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("gateway websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Close codes that make reconnecting pointless (bad token, intents).
    #[error("gateway closed the session with code {code}: {reason}")]
    GatewayRejected { code: u16, reason: String },

    #[error("gateway is not connected")]
    NotConnected,
}

impl DiscordError {
    #[must_use]
    pub fn decode(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Decode {
            context: context.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden { .. })
    }

    /// Maps a failure on a channel-scoped route: a 404 means the channel
    /// itself could not be resolved.
    pub fn into_channel_error(self, channel_id: impl std::fmt::Display) -> CoreError {
        match self {
            Self::NotFound { .. } => CoreError::channel_not_found(channel_id),
            other => other.into(),
        }
    }
}

impl From<DiscordError> for CoreError {
    fn from(err: DiscordError) -> Self {
        CoreError::transport("discord", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_404_becomes_channel_not_found() {
        let err = DiscordError::NotFound {
            route: "/channels/10".into(),
        };
        let core = err.into_channel_error(10);
        assert!(matches!(core, CoreError::ChannelNotFound { .. }));
    }

    #[test]
    fn other_failures_become_transport() {
        let err = DiscordError::Api {
            route: "/channels/10/messages".into(),
            status: 500,
            body: "boom".into(),
        };
        let core = err.into_channel_error(10);
        assert!(matches!(core, CoreError::Transport { .. }));
        assert!(core.to_string().contains("discord"));
    }
}
