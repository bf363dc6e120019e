//! dmcp Core
//!
//! Unread reconciliation and live waits over a connected chat client

pub mod client;
pub mod error;
pub mod filter;
pub mod follow;
pub mod listener;
pub mod model;
pub mod reconciler;

#[cfg(test)]
mod testing;

pub use client::{ChatClient, HistoryQuery};
pub use error::{CoreError, CoreResult};
pub use filter::FilterSpec;
pub use follow::{ChannelFollower, CursorStore, FollowOptions, FollowStep, MemoryCursorStore};
pub use listener::{EventListener, ListenerRegistry, PendingWait};
pub use model::{Message, Snowflake};
pub use reconciler::{BacklogPage, UnreadReconciler, MAX_BACKLOG_LIMIT};
