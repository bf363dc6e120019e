//! dmcp Configuration
//!
//! TOML configuration loading with environment variable support

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const TOKEN_ENV: &str = "DISCORD_TOKEN";
pub const DEFAULT_SERVER_ENV: &str = "DEFAULT_SERVER_ID";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub core: CoreConfig,
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub unread: UnreadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CoreConfig {
    pub data_dir: Option<String>,
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    pub token: Option<String>,
    pub default_server_id: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
    #[serde(default = "default_intents")]
    pub intents: u64,
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            token: None,
            default_server_id: None,
            api_base: default_api_base(),
            gateway_url: default_gateway_url(),
            intents: default_intents(),
            ready_timeout_secs: default_ready_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnreadConfig {
    #[serde(default = "default_unread_limit")]
    pub default_limit: usize,
}

impl Default for UnreadConfig {
    fn default() -> Self {
        Self {
            default_limit: default_unread_limit(),
        }
    }
}

fn default_api_base() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_gateway_url() -> String {
    "wss://gateway.discord.gg/?v=10&encoding=json".to_string()
}

// GUILDS | GUILD_MEMBERS | GUILD_MESSAGES | DIRECT_MESSAGES | MESSAGE_CONTENT
fn default_intents() -> u64 {
    (1 << 0) | (1 << 1) | (1 << 9) | (1 << 12) | (1 << 15)
}

fn default_ready_timeout_secs() -> u64 {
    30
}

fn default_unread_limit() -> usize {
    20
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` when given, else the default location when it exists,
    /// else built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(default) if default.exists() => Self::load(default),
            _ => Ok(Self::default()),
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("dmcp").join("config.toml"))
    }

    /// Reads a `.env` file from the working directory if there is one.
    /// Variables already set in the environment are left alone.
    pub fn load_dotenv() -> Option<PathBuf> {
        dotenvy::dotenv().ok()
    }

    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = non_empty(lookup(TOKEN_ENV)) {
            self.discord.token = Some(token);
        }
        if let Some(server) = non_empty(lookup(DEFAULT_SERVER_ENV)) {
            self.discord.default_server_id = Some(server);
        }
    }

    /// Command-line values win over file and environment.
    pub fn apply_overrides(&mut self, token: Option<String>, server_id: Option<String>) {
        if let Some(token) = non_empty(token) {
            self.discord.token = Some(token);
        }
        if let Some(server) = non_empty(server_id) {
            self.discord.default_server_id = Some(server);
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(server) = self.discord.default_server_id.as_deref() {
            let server = server.trim();
            if !server.is_empty() && server.parse::<u64>().is_err() {
                anyhow::bail!(
                    "discord.default_server_id must be a numeric id, got '{}'",
                    server
                );
            }
        }

        if self.discord.api_base.trim().is_empty() {
            anyhow::bail!("discord.api_base cannot be empty");
        }
        if self.discord.gateway_url.trim().is_empty() {
            anyhow::bail!("discord.gateway_url cannot be empty");
        }

        let limit = self.unread.default_limit;
        if limit == 0 || limit > 100 {
            anyhow::bail!(
                "unread.default_limit must be between 1 and 100, got {}",
                limit
            );
        }

        Ok(())
    }

    pub fn require_token(&self) -> anyhow::Result<&str> {
        self.discord
            .token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "No Discord token configured. Set {} or discord.token in the config file",
                    TOKEN_ENV
                )
            })
    }

    pub fn default_server_id(&self) -> Option<&str> {
        self.discord
            .default_server_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    pub fn data_dir(&self) -> PathBuf {
        match self.core.data_dir.as_deref() {
            Some(dir) => expand_home(dir),
            None => dirs::home_dir()
                .map(|home| home.join(".dmcp"))
                .unwrap_or_else(|| PathBuf::from(".dmcp")),
        }
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.discord.ready_timeout_secs)
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
