//! `get_unread_messages` and `wait_for_message`.

use crate::args::Args;
use crate::format;
use crate::protocol::{ToolError, ToolOutcome, ToolResult};
use dmcp_core::{CoreError, FilterSpec, UnreadReconciler, MAX_BACKLOG_LIMIT};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const TIMEOUT_TEXT: &str = "Timeout: No matching message received.";

pub struct UnreadTools {
    reconciler: Arc<UnreadReconciler>,
    default_limit: usize,
}

impl UnreadTools {
    pub fn new(reconciler: Arc<UnreadReconciler>, default_limit: usize) -> Self {
        Self {
            reconciler,
            default_limit,
        }
    }

    /// Limits above the cap are clamped; zero is rejected by the reconciler.
    pub async fn get_unread_messages(&self, args: &Args) -> ToolOutcome {
        let channel = args.snowflake("channel_id")?;
        let since = args.opt_snowflake("since_message_id")?;
        let limit = args
            .opt_u64("limit")?
            .map(|l| usize::try_from(l).unwrap_or(usize::MAX))
            .unwrap_or(self.default_limit)
            .min(MAX_BACKLOG_LIMIT);
        let filters = filter_spec(args)?;

        let messages = self
            .reconciler
            .fetch_backlog(channel, since, limit, &filters)
            .await?;
        Ok(ToolResult::text(format::unread_messages(&messages)))
    }

    pub async fn wait_for_message(&self, args: &Args, cancel: &CancellationToken) -> ToolOutcome {
        let channel = args.opt_snowflake("channel_id")?;
        let filters = filter_spec(args)?;
        let timeout = wait_timeout(args)?;
        debug!(channel = ?channel, timeout = ?timeout, "waiting for message");

        let outcome = match channel {
            Some(channel) => {
                self.reconciler
                    .wait_for_next_until(channel, filters, timeout, cancel)
                    .await
            }
            None => {
                self.reconciler
                    .listener()
                    .await_match_until(filters, timeout, cancel)
                    .await
            }
        };

        match outcome {
            Ok(message) => {
                let rendered =
                    serde_json::to_string(&message).unwrap_or_else(|_| message.to_string());
                Ok(ToolResult::text(format!("Received message: {}", rendered)))
            }
            Err(CoreError::Timeout(_)) => Ok(ToolResult::text(TIMEOUT_TEXT)),
            Err(e) => Err(e.into()),
        }
    }
}

fn filter_spec(args: &Args) -> Result<FilterSpec, ToolError> {
    let mut filters = FilterSpec::new()
        .with_dm_only(args.bool_or("dm_only", false))
        .with_mention_only(args.bool_or("mention_only", false));
    if let Some(sender) = args.opt_snowflake("sender_id")? {
        filters = filters.with_sender(sender);
    }
    if let Some(pattern) = args.opt_string("content_regex") {
        filters = filters.with_content_pattern(&pattern)?;
    }
    Ok(filters)
}

/// Absent or zero waits indefinitely.
fn wait_timeout(args: &Args) -> Result<Option<Duration>, ToolError> {
    match args.opt_f64("timeout")? {
        None => Ok(None),
        Some(secs) if secs < 0.0 => Err(ToolError::invalid("'timeout' must not be negative")),
        Some(secs) if secs == 0.0 => Ok(None),
        Some(secs) => Duration::try_from_secs_f64(secs)
            .map(Some)
            .map_err(|_| ToolError::invalid(format!("'timeout' {} is out of range", secs))),
    }
}
