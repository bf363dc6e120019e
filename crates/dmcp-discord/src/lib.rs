//! dmcp Discord adapter
//!
//! REST client, gateway session and the `ChatClient` implementation the
//! core runs against.

pub mod api;
pub mod client;
pub mod error;
pub mod events;
pub mod gateway;
pub mod model;
pub mod state;

pub use api::{
    DiscordApiClient, NewChannel, NewFile, NewRole, NewThread, PermissionOverwrite, DEFAULT_API_BASE,
};
pub use client::{DiscordClient, DiscordSettings, DEFAULT_GATEWAY_URL, DEFAULT_INTENTS};
pub use error::{DiscordError, DiscordResult};
pub use gateway::{GatewayCommand, GatewaySession};
pub use state::{AgentStatus, ConnectionSnapshot, ConnectionState};
