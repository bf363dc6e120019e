//! Conjunctive message filters shared by the backlog fetch and the live wait.

use crate::error::{CoreError, CoreResult};
use crate::model::Snowflake;
use dmcp_ipc::{Identity, RawMessage};
use regex::Regex;

/// A message matches when every predicate that is set holds. Unset
/// predicates are vacuously true.
#[derive(Debug, Clone, Default)]
pub struct FilterSpec {
    channel: Option<Snowflake>,
    dm_only: bool,
    mention_only: bool,
    sender: Option<Snowflake>,
    content_pattern: Option<Regex>,
}

impl FilterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(mut self, channel: Snowflake) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn with_dm_only(mut self, dm_only: bool) -> Self {
        self.dm_only = dm_only;
        self
    }

    pub fn with_mention_only(mut self, mention_only: bool) -> Self {
        self.mention_only = mention_only;
        self
    }

    pub fn with_sender(mut self, sender: Snowflake) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Compiles `pattern`; a malformed expression is rejected here rather
    /// than at match time.
    pub fn with_content_pattern(mut self, pattern: &str) -> CoreResult<Self> {
        let regex = Regex::new(pattern).map_err(|e| {
            CoreError::invalid_argument(format!("content_regex '{}' is invalid: {}", pattern, e))
        })?;
        self.content_pattern = Some(regex);
        Ok(self)
    }

    pub fn channel(&self) -> Option<Snowflake> {
        self.channel
    }

    pub fn dm_only(&self) -> bool {
        self.dm_only
    }

    pub fn mention_only(&self) -> bool {
        self.mention_only
    }

    pub fn sender(&self) -> Option<Snowflake> {
        self.sender
    }

    pub fn content_pattern(&self) -> Option<&str> {
        self.content_pattern.as_ref().map(Regex::as_str)
    }

    /// Full predicate, used for live events.
    pub fn matches(&self, message: &RawMessage, me: Option<&Identity>) -> bool {
        if let Some(channel) = self.channel {
            if !id_equals(&message.channel_id, channel) {
                return false;
            }
        }
        self.matches_content_predicates(message, me)
    }

    /// Predicate for history results: the channel is fixed by the fetch
    /// itself, so only the per-message predicates apply.
    pub fn matches_backlog(&self, message: &RawMessage, me: Option<&Identity>) -> bool {
        self.matches_content_predicates(message, me)
    }

    fn matches_content_predicates(&self, message: &RawMessage, me: Option<&Identity>) -> bool {
        if self.dm_only && !message.is_direct() {
            return false;
        }
        if self.mention_only {
            // Without a known identity nothing can mention us.
            match me {
                Some(identity) if message.mentions_user(&identity.id) => {}
                _ => return false,
            }
        }
        if let Some(sender) = self.sender {
            if !id_equals(&message.author.id, sender) {
                return false;
            }
        }
        if let Some(pattern) = &self.content_pattern {
            if !pattern.is_match(&message.content) {
                return false;
            }
        }
        true
    }
}

fn id_equals(wire: &str, expected: Snowflake) -> bool {
    wire.trim().parse::<u64>().ok() == Some(expected.get())
}
