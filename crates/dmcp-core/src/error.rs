use std::error::Error as StdError;
use std::time::Duration;

pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// Failures surfaced by the backlog fetch and the live wait.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// No matching message arrived before the deadline. The caller retries.
    #[error("no matching message within {}s", .0.as_secs_f64())]
    Timeout(Duration),

    /// The wait was cancelled from outside (shutdown, client disconnect).
    #[error("wait cancelled")]
    Cancelled,

    #[error("channel {channel_id} not found")]
    ChannelNotFound { channel_id: String },

    /// Rejected before any network call.
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Lower-level connectivity failure from the chat client.
    #[error("transport failure: {context}: {source}")]
    Transport {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl CoreError {
    #[must_use]
    pub fn invalid_argument(message: impl std::fmt::Display) -> Self {
        Self::InvalidArgument {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn channel_not_found(channel_id: impl std::fmt::Display) -> Self {
        Self::ChannelNotFound {
            channel_id: channel_id.to_string(),
        }
    }

    #[must_use]
    pub fn transport(
        context: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self::Transport {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_reports_seconds() {
        let err = CoreError::Timeout(Duration::from_millis(500));
        assert_eq!(err.to_string(), "no matching message within 0.5s");
        assert!(err.is_timeout());
    }

    #[test]
    fn transport_keeps_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = CoreError::transport("fetch history", io);
        assert!(!err.is_timeout());
        assert!(err.source().is_some());
        assert!(err.to_string().contains("fetch history"));
    }
}
