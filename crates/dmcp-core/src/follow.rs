//! Caller-side loop on top of the reconciler: drain the backlog past a
//! persisted cursor, then block for the next live match.

use crate::error::CoreError;
use crate::filter::FilterSpec;
use crate::model::{Message, Snowflake};
use crate::reconciler::UnreadReconciler;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Durable per-channel cursor: the id of the last message handled.
pub trait CursorStore: Send + Sync {
    fn load(&self, channel: Snowflake) -> Result<Option<Snowflake>>;

    /// Implementations must never move a cursor backwards.
    fn save(&self, channel: Snowflake, last_seen: Snowflake) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    cursors: Mutex<HashMap<Snowflake, Snowflake>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CursorStore for MemoryCursorStore {
    fn load(&self, channel: Snowflake) -> Result<Option<Snowflake>> {
        let cursors = self
            .cursors
            .lock()
            .map_err(|_| anyhow::anyhow!("cursor map poisoned"))?;
        Ok(cursors.get(&channel).copied())
    }

    fn save(&self, channel: Snowflake, last_seen: Snowflake) -> Result<()> {
        let mut cursors = self
            .cursors
            .lock()
            .map_err(|_| anyhow::anyhow!("cursor map poisoned"))?;
        let entry = cursors.entry(channel).or_insert(last_seen);
        if last_seen > *entry {
            *entry = last_seen;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FollowOptions {
    pub batch_limit: usize,
    /// `None` blocks until a match or cancellation.
    pub wait_timeout: Option<Duration>,
}

impl Default for FollowOptions {
    fn default() -> Self {
        Self {
            batch_limit: 20,
            wait_timeout: Some(Duration::from_secs(300)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowStep {
    Backlog { delivered: usize },
    Live { id: Snowflake },
    /// The live wait timed out with nothing to deliver.
    Idle,
}

pub struct ChannelFollower {
    reconciler: Arc<UnreadReconciler>,
    store: Arc<dyn CursorStore>,
    channel: Snowflake,
    filters: FilterSpec,
    options: FollowOptions,
}

impl ChannelFollower {
    pub fn new(
        reconciler: Arc<UnreadReconciler>,
        store: Arc<dyn CursorStore>,
        channel: Snowflake,
        filters: FilterSpec,
        options: FollowOptions,
    ) -> Self {
        Self {
            reconciler,
            store,
            channel,
            filters,
            options,
        }
    }

    pub fn channel(&self) -> Snowflake {
        self.channel
    }

    /// One round of the protocol. Each message is handed to `handle` in
    /// ascending id order and the cursor is saved right after it returns
    /// `Ok`, so a failing handler leaves the cursor on the last message that
    /// was fully handled. Once the whole window is handled the cursor moves
    /// to the end of the window, past messages the filters rejected.
    ///
    /// The live wait is armed before the backlog is read; a message posted
    /// between the two is either in the backlog or caught by the wait. The
    /// wait only runs once the fetched window is empty.
    pub async fn step<F>(&self, cancel: &CancellationToken, mut handle: F) -> Result<FollowStep>
    where
        F: FnMut(&Message) -> Result<()>,
    {
        let pending = self
            .reconciler
            .prepare_wait(self.channel, self.filters.clone());

        let cursor = self.store.load(self.channel)?;
        let page = self
            .reconciler
            .scan_backlog(self.channel, cursor, self.options.batch_limit, &self.filters)
            .await?;

        if let Some(scanned_to) = page.scanned_to {
            drop(pending);
            let mut batch = page.messages;
            // Cold-start batches arrive newest first.
            if cursor.is_none() {
                batch.reverse();
            }
            for message in &batch {
                handle(message)?;
                self.store.save(self.channel, message.id)?;
            }
            self.store.save(self.channel, scanned_to)?;
            debug!(
                channel_id = %self.channel,
                delivered = batch.len(),
                scanned_to = %scanned_to,
                "backlog drained"
            );
            return Ok(FollowStep::Backlog {
                delivered: batch.len(),
            });
        }

        match pending.wait(self.options.wait_timeout, cancel).await {
            Ok(message) => {
                handle(&message)?;
                self.store.save(self.channel, message.id)?;
                Ok(FollowStep::Live { id: message.id })
            }
            Err(CoreError::Timeout(_)) => Ok(FollowStep::Idle),
            Err(e) => Err(e.into()),
        }
    }

    /// Runs `step` until cancelled. Handler and transport errors end the loop.
    pub async fn run<F>(&self, cancel: &CancellationToken, mut handle: F) -> Result<()>
    where
        F: FnMut(&Message) -> Result<()>,
    {
        info!(channel_id = %self.channel, "Following channel");
        loop {
            match self.step(cancel, &mut handle).await {
                Ok(_) => {}
                Err(e) if is_cancelled(&e) => break,
                Err(e) => return Err(e),
            }
            if cancel.is_cancelled() {
                break;
            }
        }
        info!(channel_id = %self.channel, "Stopped following channel");
        Ok(())
    }
}

fn is_cancelled(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<CoreError>(), Some(CoreError::Cancelled))
}
