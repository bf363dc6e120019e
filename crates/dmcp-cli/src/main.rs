//! dmcp CLI
//!
//! Discord bridge for MCP agents: serves the tool catalog on stdio and
//! follows channels from the command line.

mod logging;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dmcp_config::Config;
use dmcp_core::{
    ChannelFollower, ChatClient, EventListener, FilterSpec, FollowOptions, Snowflake,
    UnreadReconciler, MAX_BACKLOG_LIMIT,
};
use dmcp_discord::{DiscordApiClient, DiscordClient, DiscordSettings};
use dmcp_mcp::{DiscordTools, McpServer, UnreadTools};
use dmcp_storage::Storage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const CURSOR_DB: &str = "cursors.db";

#[derive(Parser)]
#[command(name = "dmcp")]
#[command(about = "Discord bridge for MCP agents", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Log level (RUST_LOG wins when set)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Discord bot token, overrides DISCORD_TOKEN
    #[arg(long, global = true)]
    token: Option<String>,

    /// Server used when a tool call names none, overrides DEFAULT_SERVER_ID
    #[arg(long, global = true)]
    server_id: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the MCP tool catalog on stdin/stdout
    Serve {
        /// Directory for download_attachment when no save_path is given
        #[arg(long)]
        download_dir: Option<PathBuf>,
    },

    /// Print unread messages of a channel, then each new one, as JSON lines
    Watch {
        /// Channel to follow
        #[arg(long)]
        channel: Snowflake,

        /// Only messages from this user id
        #[arg(long)]
        sender: Option<Snowflake>,

        /// Only messages mentioning the bot
        #[arg(long)]
        mention_only: bool,

        /// Only direct messages
        #[arg(long)]
        dm_only: bool,

        /// Only messages whose content matches this regex
        #[arg(long)]
        content_regex: Option<String>,

        /// Backlog batch size (1-100)
        #[arg(long, default_value_t = 20)]
        batch: usize,

        /// Seconds to wait for a live message before re-checking the
        /// backlog; 0 waits forever
        #[arg(long, default_value_t = 300)]
        timeout: u64,
    },

    /// Stored read cursors
    Cursor {
        #[command(subcommand)]
        action: CursorCommands,
    },

    /// Validate configuration and Discord connectivity
    Check,
}

#[derive(Subcommand)]
enum CursorCommands {
    /// Show one channel's cursor, or all of them
    Show {
        #[arg(long)]
        channel: Option<Snowflake>,
    },
    /// Set a channel's cursor, backwards moves included
    Set {
        channel: Snowflake,
        message_id: Snowflake,
    },
    /// Forget a channel's cursor; the next watch starts cold
    Clear { channel: Snowflake },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Serve { download_dir } => {
            let _logging_guard = init_logging(&config, cli.log_level.as_deref())?;
            serve(&config, download_dir).await?;
        }

        Commands::Watch {
            channel,
            sender,
            mention_only,
            dm_only,
            content_regex,
            batch,
            timeout,
        } => {
            let _logging_guard = init_logging(&config, cli.log_level.as_deref())?;

            let mut filters = FilterSpec::new()
                .with_mention_only(mention_only)
                .with_dm_only(dm_only);
            if let Some(sender) = sender {
                filters = filters.with_sender(sender);
            }
            if let Some(pattern) = content_regex.as_deref() {
                filters = filters.with_content_pattern(pattern)?;
            }
            let options = FollowOptions {
                batch_limit: batch.clamp(1, MAX_BACKLOG_LIMIT),
                wait_timeout: (timeout > 0).then(|| Duration::from_secs(timeout)),
            };

            watch(&config, channel, filters, options).await?;
        }

        Commands::Cursor { action } => {
            let storage = open_storage(&config)?;
            cursor(&storage, action)?;
        }

        Commands::Check => check(&config).await?,
    }

    Ok(())
}

/// `.env`, then the config file, then environment, then flags.
fn load_config(cli: &Cli) -> Result<Config> {
    Config::load_dotenv();
    let path = cli.config.as_deref().map(Path::new);
    let mut config = Config::load_or_default(path).with_context(|| match path {
        Some(path) => format!("loading config {}", path.display()),
        None => "loading default config".to_string(),
    })?;
    config.apply_env();
    config.apply_overrides(cli.token.clone(), cli.server_id.clone());
    config.validate()?;
    Ok(config)
}

fn init_logging(config: &Config, flag: Option<&str>) -> Result<logging::LoggingGuard> {
    let level = flag
        .or(config.core.log_level.as_deref())
        .unwrap_or("info");
    logging::init_logging(&config.data_dir().join("logs"), level)
}

fn open_storage(config: &Config) -> Result<Storage> {
    let db_path = config.data_dir().join(CURSOR_DB);
    Storage::new(&db_path)
}

fn settings(config: &Config) -> Result<DiscordSettings> {
    let mut settings = DiscordSettings::new(config.require_token()?);
    settings.api_base = config.discord.api_base.clone();
    settings.gateway_url = config.discord.gateway_url.clone();
    settings.intents = config.discord.intents;
    Ok(settings)
}

/// A connected client with its gateway task and the unread stack on top.
struct Bridge {
    client: Arc<DiscordClient>,
    reconciler: Arc<UnreadReconciler>,
    cancel: CancellationToken,
    gateway: JoinHandle<()>,
}

impl Bridge {
    fn start(config: &Config) -> Result<Self> {
        let (client, session) =
            DiscordClient::connect(&settings(config)?).context("building Discord client")?;
        let client = Arc::new(client);
        let cancel = CancellationToken::new();

        let gateway_cancel = cancel.clone();
        let gateway = tokio::spawn(async move {
            if let Err(e) = session.run(gateway_cancel.clone()).await {
                error!(error = %e, "Discord gateway stopped for good");
                gateway_cancel.cancel();
            }
        });

        let signal_cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, shutting down");
                signal_cancel.cancel();
            }
        });

        let chat: Arc<dyn ChatClient> = client.clone();
        let listener = Arc::new(EventListener::start(Arc::clone(&chat)));
        let reconciler = Arc::new(UnreadReconciler::new(chat, listener));

        Ok(Self {
            client,
            reconciler,
            cancel,
            gateway,
        })
    }

    /// Tools work over REST before READY, so a slow gateway only costs
    /// live events.
    async fn wait_ready(&self, timeout: Duration) {
        if self.client.state().wait_until_ready(timeout).await {
            let name = self
                .client
                .state()
                .identity()
                .map(|me| me.username)
                .unwrap_or_default();
            info!(bot = %name, "Discord client ready");
        } else {
            warn!(
                timeout_secs = timeout.as_secs(),
                "Discord client not ready yet, continuing anyway"
            );
        }
    }

    async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.gateway.await {
            warn!(error = %e, "gateway task did not stop cleanly");
        }
    }
}

async fn serve(config: &Config, download_dir: Option<PathBuf>) -> Result<()> {
    let bridge = Bridge::start(config)?;
    bridge.wait_ready(config.ready_timeout()).await;

    let unread = UnreadTools::new(Arc::clone(&bridge.reconciler), config.unread.default_limit);
    let mut tools = DiscordTools::new(
        Arc::clone(&bridge.client),
        unread,
        config.default_server_id().map(str::to_string),
    );
    if let Some(dir) = download_dir {
        tools = tools.with_download_dir(dir);
    }

    let mut server = McpServer::new(Arc::new(tools)).with_shutdown(bridge.cancel.clone());
    let result = server.serve_stdio().await;

    bridge.shutdown().await;
    info!("dmcp stopped");
    result.context("MCP server failed")
}

async fn watch(
    config: &Config,
    channel: Snowflake,
    filters: FilterSpec,
    options: FollowOptions,
) -> Result<()> {
    let storage = Arc::new(open_storage(config)?);
    let bridge = Bridge::start(config)?;
    bridge.wait_ready(config.ready_timeout()).await;

    let follower = ChannelFollower::new(
        Arc::clone(&bridge.reconciler),
        storage,
        channel,
        filters,
        options,
    );
    let result = follower
        .run(&bridge.cancel, |message| {
            println!("{}", serde_json::to_string(message)?);
            Ok(())
        })
        .await;

    bridge.shutdown().await;
    result
}

fn cursor(storage: &Storage, action: CursorCommands) -> Result<()> {
    match action {
        CursorCommands::Show { channel: Some(channel) } => match storage.load_cursor(channel)? {
            Some(id) => println!("{}: {}", channel, id),
            None => println!("No cursor stored for channel {}", channel),
        },
        CursorCommands::Show { channel: None } => {
            let records = storage.list_cursors()?;
            if records.is_empty() {
                println!("No cursors stored.");
            }
            for record in records {
                println!(
                    "{}: {} (updated {})",
                    record.channel_id, record.last_seen_id, record.updated_at
                );
            }
        }
        CursorCommands::Set {
            channel,
            message_id,
        } => {
            storage.set_cursor(channel, message_id)?;
            println!("Cursor for channel {} set to {}", channel, message_id);
        }
        CursorCommands::Clear { channel } => {
            if storage.clear_cursor(channel)? {
                println!("Cursor for channel {} cleared", channel);
            } else {
                println!("No cursor stored for channel {}", channel);
            }
        }
    }
    Ok(())
}

async fn check(config: &Config) -> Result<()> {
    println!("Config: OK");
    println!("Data dir: {}", config.data_dir().display());

    let log_manager = logging::LogManager::new(config.data_dir().join("logs"));
    match log_manager.total_size() {
        Ok(size) => println!(
            "Logs: {} ({})",
            log_manager.current_log_path().display(),
            logging::LogManager::format_size(size)
        ),
        Err(_) => println!("Logs: none yet"),
    }

    let api = DiscordApiClient::new(config.require_token()?, &config.discord.api_base)?;
    let me = api
        .current_user()
        .await
        .context("Discord rejected the token or is unreachable")?;
    println!("Discord: OK, logged in as {} ({})", me.username, me.id);

    if let Some(server_id) = config.default_server_id() {
        let guild = api
            .get_guild(server_id)
            .await
            .with_context(|| format!("default server {} is not reachable", server_id))?;
        println!("Default server: {} ({})", guild.name, guild.id);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_watch_filters() {
        let cli = Cli::try_parse_from([
            "dmcp",
            "watch",
            "--channel",
            "123",
            "--sender",
            "7",
            "--mention-only",
            "--timeout",
            "0",
        ])
        .unwrap();
        match cli.command {
            Commands::Watch {
                channel,
                sender,
                mention_only,
                dm_only,
                batch,
                timeout,
                ..
            } => {
                assert_eq!(channel, Snowflake::new(123));
                assert_eq!(sender, Some(Snowflake::new(7)));
                assert!(mention_only);
                assert!(!dm_only);
                assert_eq!(batch, 20);
                assert_eq!(timeout, 0);
            }
            _ => panic!("expected watch"),
        }
    }

    #[test]
    fn rejects_non_numeric_channel() {
        assert!(Cli::try_parse_from(["dmcp", "watch", "--channel", "general"]).is_err());
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::try_parse_from([
            "dmcp",
            "serve",
            "--token",
            "abc",
            "--server-id",
            "42",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.token.as_deref(), Some("abc"));
        assert_eq!(cli.server_id.as_deref(), Some("42"));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(matches!(cli.command, Commands::Serve { download_dir: None }));
    }

    #[test]
    fn cursor_commands_round_trip_through_storage() {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path = std::env::temp_dir().join(format!("dmcp-cli-cursor-{}.db", nanos));
        let storage = Storage::new(&path).unwrap();

        cursor(
            &storage,
            CursorCommands::Set {
                channel: Snowflake::new(10),
                message_id: Snowflake::new(500),
            },
        )
        .unwrap();
        assert_eq!(
            storage.load_cursor(Snowflake::new(10)).unwrap(),
            Some(Snowflake::new(500))
        );

        cursor(
            &storage,
            CursorCommands::Clear {
                channel: Snowflake::new(10),
            },
        )
        .unwrap();
        assert_eq!(storage.load_cursor(Snowflake::new(10)).unwrap(), None);

        let _ = std::fs::remove_file(path);
    }
}
