use crate::error::CoreResult;
use crate::model::Snowflake;
use async_trait::async_trait;
use dmcp_ipc::{Envelope, Identity, RawMessage};
use tokio::sync::broadcast;

/// Parameters of a single history request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryQuery {
    /// Only messages with an id strictly greater than this.
    pub after: Option<Snowflake>,
    pub limit: usize,
    pub oldest_first: bool,
}

/// The connected chat client the core runs against.
///
/// Connection lifecycle (login, heartbeats, reconnects) belongs to the
/// implementor; the core only needs history, the live event stream and the
/// bot identity.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Fails with `ChannelNotFound` when the channel cannot be resolved and
    /// with `Transport` for anything else the platform or network rejects.
    async fn fetch_history(
        &self,
        channel: Snowflake,
        query: HistoryQuery,
    ) -> CoreResult<Vec<RawMessage>>;

    /// A fresh receiver on the live event stream.
    fn subscribe(&self) -> broadcast::Receiver<Envelope>;

    /// `None` until the session is ready.
    fn current_identity(&self) -> Option<Identity>;
}
