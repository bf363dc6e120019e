//! Live event waits.
//!
//! The chat client pushes every gateway event onto a broadcast stream; a
//! single dispatch task drains that stream and evaluates each message
//! against the currently registered waits. A wait settles at most once,
//! on the first matching message or on its deadline, and its registration
//! is removed on every exit path (including when the waiting future is
//! dropped).

use crate::client::ChatClient;
use crate::error::{CoreError, CoreResult};
use crate::filter::FilterSpec;
use crate::model::Message;
use dmcp_ipc::{Envelope, EventKind, Identity, RawMessage};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct Registration {
    filter: FilterSpec,
    settled: Arc<AtomicBool>,
    slot: Option<oneshot::Sender<Message>>,
}

/// Token-keyed set of pending waits. Safe to register, deregister and
/// dispatch from different tasks concurrently.
#[derive(Default)]
pub struct ListenerRegistry {
    next_token: AtomicU64,
    entries: Mutex<HashMap<u64, Registration>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<u64, Registration>> {
        // Nothing panics while holding the lock; recover rather than propagate.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register(self: &Arc<Self>, filter: FilterSpec) -> PendingWait {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let settled = Arc::new(AtomicBool::new(false));
        let (tx, rx) = oneshot::channel();

        self.entries().insert(
            token,
            Registration {
                filter,
                settled: Arc::clone(&settled),
                slot: Some(tx),
            },
        );
        debug!(token, "listener registered");

        PendingWait {
            token,
            settled,
            slot: rx,
            registry: Arc::clone(self),
        }
    }

    fn deregister(&self, token: u64) -> bool {
        let removed = self.entries().remove(&token);
        if let Some(registration) = &removed {
            registration.settled.store(true, Ordering::Release);
            debug!(token, "listener deregistered");
        }
        removed.is_some()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Offers one live message to every pending wait. Returns how many waits
    /// it settled; settled waits are removed immediately.
    pub fn dispatch(&self, raw: &RawMessage, me: Option<&Identity>) -> usize {
        let mut entries = self.entries();
        if entries.is_empty() {
            return 0;
        }

        let message = match Message::from_raw(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!(message_id = %raw.id, "dropping malformed live message: {}", e);
                return 0;
            }
        };

        let mut resolved = Vec::new();
        for (token, registration) in entries.iter_mut() {
            if registration.settled.load(Ordering::Acquire) || !registration.filter.matches(raw, me)
            {
                continue;
            }
            if registration.settled.swap(true, Ordering::AcqRel) {
                continue;
            }
            if let Some(slot) = registration.slot.take() {
                let _ = slot.send(message.clone());
            }
            resolved.push(*token);
        }

        for token in &resolved {
            entries.remove(token);
        }
        resolved.len()
    }

    /// Fails every pending wait; used when the event stream ends.
    pub fn close_all(&self) -> usize {
        let mut entries = self.entries();
        let count = entries.len();
        for (_, registration) in entries.drain() {
            registration.settled.store(true, Ordering::Release);
        }
        count
    }
}

/// One registered wait. Dropping it deregisters it.
pub struct PendingWait {
    token: u64,
    settled: Arc<AtomicBool>,
    slot: oneshot::Receiver<Message>,
    registry: Arc<ListenerRegistry>,
}

impl PendingWait {
    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }

    /// Suspends until a match, the deadline (`None` waits forever) or
    /// cancellation, whichever comes first.
    pub async fn wait(
        mut self,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> CoreResult<Message> {
        let deadline = async move {
            match timeout {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        let interrupted = tokio::select! {
            biased;
            received = &mut self.slot => {
                return received.map_err(|_| {
                    CoreError::transport("live wait", "event stream closed before a match")
                });
            }
            _ = cancel.cancelled() => CoreError::Cancelled,
            _ = &mut deadline => CoreError::Timeout(timeout.unwrap_or_default()),
        };

        // Deregistering takes the registry lock: a dispatch in flight has
        // either filled the slot already or will never see this wait.
        self.registry.deregister(self.token);
        match self.slot.try_recv() {
            Ok(message) => Ok(message),
            Err(_) => Err(interrupted),
        }
    }
}

impl Drop for PendingWait {
    fn drop(&mut self) {
        self.registry.deregister(self.token);
    }
}

/// Bridges the client's push stream to single-shot waits.
pub struct EventListener {
    registry: Arc<ListenerRegistry>,
    pump: JoinHandle<()>,
}

impl EventListener {
    /// Subscribes to `client` and spawns the dispatch task. Must be called
    /// from within a Tokio runtime.
    pub fn start(client: Arc<dyn ChatClient>) -> Self {
        let registry = Arc::new(ListenerRegistry::new());
        let receiver = client.subscribe();
        let pump = tokio::spawn(run_dispatch(receiver, Arc::clone(&registry), client));
        Self { registry, pump }
    }

    /// Registers a wait without suspending. Events published after this
    /// call are guaranteed to be evaluated against `filter`.
    pub fn register(&self, filter: FilterSpec) -> PendingWait {
        self.registry.register(filter)
    }

    pub async fn await_match(
        &self,
        filter: FilterSpec,
        timeout: Option<Duration>,
    ) -> CoreResult<Message> {
        self.await_match_until(filter, timeout, &CancellationToken::new())
            .await
    }

    pub async fn await_match_until(
        &self,
        filter: FilterSpec,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> CoreResult<Message> {
        self.register(filter).wait(timeout, cancel).await
    }

    /// Number of waits currently registered.
    pub fn registrations(&self) -> usize {
        self.registry.len()
    }

    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        &self.registry
    }
}

impl Drop for EventListener {
    fn drop(&mut self) {
        self.pump.abort();
        self.registry.close_all();
    }
}

async fn run_dispatch(
    mut receiver: broadcast::Receiver<Envelope>,
    registry: Arc<ListenerRegistry>,
    client: Arc<dyn ChatClient>,
) {
    info!("Event listener started");

    loop {
        match receiver.recv().await {
            Ok(envelope) => match &envelope.kind {
                EventKind::MessageCreate { message } => {
                    let me = client.current_identity();
                    let resolved = registry.dispatch(message, me.as_ref());
                    if resolved > 0 {
                        debug!(
                            message_id = %message.id,
                            channel_id = %message.channel_id,
                            resolved,
                            "live message settled pending waits"
                        );
                    }
                }
                EventKind::Ready { identity, .. } => {
                    debug!(bot = %identity.display_name(), "gateway ready");
                }
                EventKind::Disconnected { reason } => {
                    debug!(reason = %reason, "gateway disconnected");
                }
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Event listener lagged; skipped {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => {
                let failed = registry.close_all();
                info!(failed, "Event listener stopped: stream closed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Snowflake;
    use crate::testing::{raw, FakeClient};

    fn listener(client: &Arc<FakeClient>) -> EventListener {
        EventListener::start(Arc::clone(client) as Arc<dyn ChatClient>)
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_and_leaves_no_registration() {
        let client = FakeClient::new(10);
        let listener = listener(&client);

        let err = listener
            .await_match(FilterSpec::new(), Some(Duration::from_millis(500)))
            .await
            .expect_err("no event was published");

        assert!(err.is_timeout());
        assert_eq!(listener.registrations(), 0);
    }

    #[tokio::test]
    async fn first_match_settles_the_wait() {
        let client = FakeClient::new(10);
        let listener = listener(&client);

        let pending = listener.register(FilterSpec::new().with_sender(Snowflake::new(1)));
        client.publish(raw(101, 10, 2, "bob", "not me"));
        client.publish(raw(102, 10, 1, "alice", "first"));
        client.publish(raw(103, 10, 1, "alice", "second"));

        let message = pending
            .wait(Some(Duration::from_secs(5)), &CancellationToken::new())
            .await
            .expect("match");
        assert_eq!(message.id, Snowflake::new(102));
        assert_eq!(message.content, "first");
        assert_eq!(listener.registrations(), 0);
    }

    #[tokio::test]
    async fn disjoint_waits_each_receive_their_own_match() {
        let client = FakeClient::new(10);
        let listener = listener(&client);

        let alice = listener.register(FilterSpec::new().with_sender(Snowflake::new(1)));
        let bob = listener.register(FilterSpec::new().with_sender(Snowflake::new(2)));
        assert_eq!(listener.registrations(), 2);

        client.publish(raw(201, 10, 2, "bob", "from bob"));
        client.publish(raw(202, 10, 1, "alice", "from alice"));

        let cancel = CancellationToken::new();
        let timeout = Some(Duration::from_secs(5));
        let (alice, bob) = tokio::join!(alice.wait(timeout, &cancel), bob.wait(timeout, &cancel));

        assert_eq!(alice.expect("alice").author, "alice");
        assert_eq!(bob.expect("bob").author, "bob");
        assert_eq!(listener.registrations(), 0);
    }

    #[tokio::test]
    async fn one_event_can_settle_many_waits() {
        let client = FakeClient::new(10);
        let listener = listener(&client);

        let by_channel = listener.register(FilterSpec::new().with_channel(Snowflake::new(10)));
        let by_pattern = listener.register(
            FilterSpec::new()
                .with_content_pattern("ship")
                .expect("regex"),
        );
        client.publish(raw(300, 10, 1, "alice", "ship it"));

        let cancel = CancellationToken::new();
        let timeout = Some(Duration::from_secs(5));
        let (a, b) = tokio::join!(
            by_channel.wait(timeout, &cancel),
            by_pattern.wait(timeout, &cancel)
        );
        assert_eq!(a.expect("channel wait").id, Snowflake::new(300));
        assert_eq!(b.expect("pattern wait").id, Snowflake::new(300));
    }

    #[tokio::test]
    async fn mention_filter_uses_client_identity() {
        let client = FakeClient::new(10);
        client.set_identity("777");
        let listener = listener(&client);

        let pending = listener.register(FilterSpec::new().with_mention_only(true));
        client.publish(raw(400, 10, 1, "alice", "no mention"));
        let mut mentioned = raw(401, 10, 1, "alice", "<@777> ping");
        mentioned.mentions.push("777".to_string());
        client.publish(mentioned);

        let message = pending
            .wait(Some(Duration::from_secs(5)), &CancellationToken::new())
            .await
            .expect("mention");
        assert_eq!(message.id, Snowflake::new(401));
    }

    #[tokio::test]
    async fn cancellation_cleans_up_like_timeout() {
        let client = FakeClient::new(10);
        let listener = listener(&client);
        let cancel = CancellationToken::new();

        let pending = listener.register(FilterSpec::new());
        cancel.cancel();
        let err = pending.wait(None, &cancel).await.expect_err("cancelled");

        assert!(matches!(err, CoreError::Cancelled));
        assert_eq!(listener.registrations(), 0);
    }

    #[tokio::test]
    async fn dropping_an_unfinished_wait_deregisters_it() {
        let client = FakeClient::new(10);
        let listener = listener(&client);

        {
            let fut = listener.await_match(FilterSpec::new(), None);
            let _ = tokio::time::timeout(Duration::from_millis(10), fut).await;
        }
        assert_eq!(listener.registrations(), 0);
    }

    #[tokio::test]
    async fn closing_the_registry_fails_pending_waits() {
        let client = FakeClient::new(10);
        let listener = listener(&client);

        let pending = listener.register(FilterSpec::new());
        assert_eq!(listener.registry().close_all(), 1);
        let err = pending
            .wait(Some(Duration::from_secs(5)), &CancellationToken::new())
            .await
            .expect_err("closed");
        assert!(matches!(err, CoreError::Transport { .. }));
    }

    #[test]
    fn settled_wait_ignores_later_events() {
        let registry = Arc::new(ListenerRegistry::new());
        let pending = registry.register(FilterSpec::new());

        assert_eq!(registry.dispatch(&raw(1, 10, 1, "alice", "a"), None), 1);
        assert!(pending.is_settled());
        assert_eq!(registry.dispatch(&raw(2, 10, 1, "alice", "b"), None), 0);
        assert!(registry.is_empty());
    }
}
