//! Backlog-then-live protocol.
//!
//! `fetch_backlog` returns what was posted after the caller's cursor (or the
//! most recent messages on a cold start); `wait_for_next` blocks for the next
//! live match in the same channel. The cursor itself is owned by the caller.

use crate::client::{ChatClient, HistoryQuery};
use crate::error::{CoreError, CoreResult};
use crate::filter::FilterSpec;
use crate::listener::{EventListener, PendingWait};
use crate::model::{Message, Snowflake};
use dmcp_ipc::RawMessage;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Upper bound on a single backlog fetch.
pub const MAX_BACKLOG_LIMIT: usize = 100;

/// One backlog window after filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BacklogPage {
    pub messages: Vec<Message>,
    /// Highest id fetched, matched or not. `None` when the window was empty.
    pub scanned_to: Option<Snowflake>,
}

pub struct UnreadReconciler {
    client: Arc<dyn ChatClient>,
    listener: Arc<EventListener>,
}

impl UnreadReconciler {
    pub fn new(client: Arc<dyn ChatClient>, listener: Arc<EventListener>) -> Self {
        Self { client, listener }
    }

    pub fn listener(&self) -> &Arc<EventListener> {
        &self.listener
    }

    /// With `since` set: messages with `id > since`, oldest first, at most
    /// `limit`. Without: the `limit` most recent messages, newest first.
    ///
    /// Filters never change relative order. The channel predicate of
    /// `filters` is ignored; `channel` decides.
    pub async fn fetch_backlog(
        &self,
        channel: Snowflake,
        since: Option<Snowflake>,
        limit: usize,
        filters: &FilterSpec,
    ) -> CoreResult<Vec<Message>> {
        Ok(self
            .scan_backlog(channel, since, limit, filters)
            .await?
            .messages)
    }

    /// Like `fetch_backlog`, but also reports the highest id in the fetched
    /// window before filtering. A cursor moved there skips only messages
    /// the filters rejected.
    pub async fn scan_backlog(
        &self,
        channel: Snowflake,
        since: Option<Snowflake>,
        limit: usize,
        filters: &FilterSpec,
    ) -> CoreResult<BacklogPage> {
        validate_limit(limit)?;

        let query = HistoryQuery {
            after: since,
            limit,
            oldest_first: since.is_some(),
        };
        let fetched = self.client.fetch_history(channel, query).await?;
        let fetched_count = fetched.len();

        let mut candidates: Vec<(Message, RawMessage)> = fetched
            .into_iter()
            .filter_map(|raw| match Message::from_raw(&raw) {
                Ok(message) => Some((message, raw)),
                Err(e) => {
                    warn!(channel_id = %channel, message_id = %raw.id, "skipping malformed history record: {}", e);
                    None
                }
            })
            .filter(|(message, _)| since.map_or(true, |cursor| message.id > cursor))
            .collect();

        match since {
            Some(_) => candidates.sort_by(|a, b| a.0.id.cmp(&b.0.id)),
            None => candidates.sort_by(|a, b| b.0.id.cmp(&a.0.id)),
        }
        candidates.dedup_by(|a, b| a.0.id == b.0.id);
        candidates.truncate(limit);
        let scanned_to = candidates.iter().map(|(message, _)| message.id).max();

        let me = self.client.current_identity();
        let batch: Vec<Message> = candidates
            .into_iter()
            .filter(|(_, raw)| filters.matches_backlog(raw, me.as_ref()))
            .map(|(message, _)| message)
            .collect();

        debug!(
            channel_id = %channel,
            since = ?since.map(Snowflake::get),
            fetched = fetched_count,
            delivered = batch.len(),
            "backlog fetched"
        );
        Ok(BacklogPage {
            messages: batch,
            scanned_to,
        })
    }

    /// Registers the live wait for `channel` without suspending, so a caller
    /// can arm it before checking the backlog.
    pub fn prepare_wait(&self, channel: Snowflake, filters: FilterSpec) -> PendingWait {
        self.listener.register(filters.with_channel(channel))
    }

    pub async fn wait_for_next(
        &self,
        channel: Snowflake,
        filters: FilterSpec,
        timeout: Option<Duration>,
    ) -> CoreResult<Message> {
        self.wait_for_next_until(channel, filters, timeout, &CancellationToken::new())
            .await
    }

    pub async fn wait_for_next_until(
        &self,
        channel: Snowflake,
        filters: FilterSpec,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> CoreResult<Message> {
        self.prepare_wait(channel, filters)
            .wait(timeout, cancel)
            .await
    }
}

fn validate_limit(limit: usize) -> CoreResult<()> {
    if limit == 0 || limit > MAX_BACKLOG_LIMIT {
        return Err(CoreError::invalid_argument(format!(
            "limit must be between 1 and {}, got {}",
            MAX_BACKLOG_LIMIT, limit
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{raw, FakeClient};

    const CHANNEL: u64 = 10;

    fn reconciler(client: &Arc<FakeClient>) -> UnreadReconciler {
        let client = Arc::clone(client) as Arc<dyn ChatClient>;
        let listener = Arc::new(EventListener::start(Arc::clone(&client)));
        UnreadReconciler::new(client, listener)
    }

    fn ids(batch: &[Message]) -> Vec<u64> {
        batch.iter().map(|m| m.id.get()).collect()
    }

    fn seeded(count: u64) -> Arc<FakeClient> {
        let client = FakeClient::new(CHANNEL);
        for id in 1..=count {
            client.post(raw(1000 + id, CHANNEL, id % 3, "user", "hello"));
        }
        client
    }

    #[tokio::test]
    async fn since_cursor_returns_the_tail_in_ascending_order() {
        let client = seeded(8);
        let reconciler = reconciler(&client);
        let all: Vec<u64> = (1001..=1008).collect();

        for k in 0..all.len() {
            let batch = reconciler
                .fetch_backlog(
                    Snowflake::new(CHANNEL),
                    Some(Snowflake::new(all[k])),
                    100,
                    &FilterSpec::new(),
                )
                .await
                .expect("fetch");
            assert_eq!(ids(&batch), all[k + 1..].to_vec());
        }
    }

    #[tokio::test]
    async fn repeated_fetch_with_same_cursor_is_idempotent() {
        let client = seeded(5);
        let reconciler = reconciler(&client);
        let since = Some(Snowflake::new(1002));

        let first = reconciler
            .fetch_backlog(Snowflake::new(CHANNEL), since, 50, &FilterSpec::new())
            .await
            .expect("first");
        let second = reconciler
            .fetch_backlog(Snowflake::new(CHANNEL), since, 50, &FilterSpec::new())
            .await
            .expect("second");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn cold_start_returns_most_recent_newest_first() {
        let client = seeded(6);
        let reconciler = reconciler(&client);

        let batch = reconciler
            .fetch_backlog(Snowflake::new(CHANNEL), None, 4, &FilterSpec::new())
            .await
            .expect("fetch");
        assert_eq!(ids(&batch), vec![1006, 1005, 1004, 1003]);
    }

    #[tokio::test]
    async fn since_cursor_caps_at_limit_keeping_the_oldest() {
        let client = seeded(6);
        let reconciler = reconciler(&client);

        let batch = reconciler
            .fetch_backlog(
                Snowflake::new(CHANNEL),
                Some(Snowflake::new(1001)),
                2,
                &FilterSpec::new(),
            )
            .await
            .expect("fetch");
        assert_eq!(ids(&batch), vec![1002, 1003]);
    }

    #[tokio::test]
    async fn sender_filter_and_cursor_combine() {
        let client = FakeClient::new(CHANNEL);
        client.post(raw(101, CHANNEL, 1, "alice", "one"));
        client.post(raw(102, CHANNEL, 2, "bob", "two"));
        client.post(raw(103, CHANNEL, 1, "alice", "three"));
        let reconciler = reconciler(&client);

        let batch = reconciler
            .fetch_backlog(
                Snowflake::new(CHANNEL),
                Some(Snowflake::new(101)),
                100,
                &FilterSpec::new().with_sender(Snowflake::new(1)),
            )
            .await
            .expect("fetch");

        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, Snowflake::new(103));
        assert_eq!(batch[0].author, "alice");
        assert_eq!(batch[0].content, "three");
    }

    #[tokio::test]
    async fn scan_reports_the_window_end_even_when_all_filtered() {
        let client = FakeClient::new(CHANNEL);
        for id in 101..=105 {
            client.post(raw(id, CHANNEL, 2, "bob", "noise"));
        }
        client.post(raw(106, CHANNEL, 1, "alice", "signal"));
        let reconciler = reconciler(&client);
        let alice = FilterSpec::new().with_sender(Snowflake::new(1));

        let page = reconciler
            .scan_backlog(Snowflake::new(CHANNEL), Some(Snowflake::new(100)), 3, &alice)
            .await
            .expect("first window");
        assert!(page.messages.is_empty());
        assert_eq!(page.scanned_to, Some(Snowflake::new(103)));

        let page = reconciler
            .scan_backlog(Snowflake::new(CHANNEL), page.scanned_to, 3, &alice)
            .await
            .expect("second window");
        assert_eq!(ids(&page.messages), vec![106]);
        assert_eq!(page.scanned_to, Some(Snowflake::new(106)));

        let page = reconciler
            .scan_backlog(Snowflake::new(CHANNEL), page.scanned_to, 3, &alice)
            .await
            .expect("caught up");
        assert_eq!(page.scanned_to, None);
    }

    #[tokio::test]
    async fn nothing_new_is_an_empty_batch() {
        let client = seeded(3);
        let reconciler = reconciler(&client);

        let batch = reconciler
            .fetch_backlog(
                Snowflake::new(CHANNEL),
                Some(Snowflake::new(1003)),
                10,
                &FilterSpec::new(),
            )
            .await
            .expect("fetch");
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn limit_out_of_range_fails_before_any_fetch() {
        let client = seeded(3);
        let reconciler = reconciler(&client);

        for limit in [0, MAX_BACKLOG_LIMIT + 1] {
            let err = reconciler
                .fetch_backlog(Snowflake::new(CHANNEL), None, limit, &FilterSpec::new())
                .await
                .expect_err("out of range");
            assert!(matches!(err, CoreError::InvalidArgument { .. }));
        }
        assert_eq!(client.fetches(), 0);
    }

    #[tokio::test]
    async fn unknown_channel_is_reported() {
        let client = seeded(1);
        let reconciler = reconciler(&client);

        let err = reconciler
            .fetch_backlog(Snowflake::new(99), None, 10, &FilterSpec::new())
            .await
            .expect_err("unknown channel");
        assert!(matches!(err, CoreError::ChannelNotFound { .. }));
    }

    #[tokio::test]
    async fn wait_for_next_only_matches_its_channel() {
        let client = FakeClient::new(CHANNEL);
        let reconciler = reconciler(&client);

        let pending = reconciler.prepare_wait(Snowflake::new(CHANNEL), FilterSpec::new());
        client.publish(raw(500, 11, 1, "alice", "elsewhere"));
        client.publish(raw(501, CHANNEL, 1, "alice", "here"));

        let message = pending
            .wait(Some(Duration::from_secs(5)), &CancellationToken::new())
            .await
            .expect("match");
        assert_eq!(message.id, Snowflake::new(501));
        assert_eq!(message.channel_id, Snowflake::new(CHANNEL));
        assert_eq!(reconciler.listener().registrations(), 0);
    }
}
