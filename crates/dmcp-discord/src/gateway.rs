//! Gateway session.
//!
//! One long-lived task owns the websocket: it answers HELLO, identifies or
//! resumes, keeps the heartbeat going and turns dispatches into bus events.
//! Consumers never talk to the socket directly; presence changes arrive as
//! [`GatewayCommand`]s.

use crate::error::{DiscordError, DiscordResult};
use crate::events::{
    ConnectionProperties, GatewayPayload, GuildCreateEvent, GuildDeleteEvent, HelloData,
    IdentifyData, PresenceUpdate, ReadyEvent, ResumeData, FALLBACK_HEARTBEAT_MS, OP_DISPATCH,
    OP_HEARTBEAT, OP_HEARTBEAT_ACK, OP_HELLO, OP_IDENTIFY, OP_INVALID_SESSION,
    OP_PRESENCE_UPDATE, OP_RECONNECT, OP_RESUME,
};
use crate::model::WireMessage;
use crate::state::ConnectionState;
use dmcp_ipc::{Envelope, EventBus, EventKind};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);
pub const COMMAND_QUEUE_CAPACITY: usize = 32;

const EVENT_SOURCE: &str = "discord";

/// Authentication failed, invalid shard, sharding required, invalid API
/// version, invalid or disallowed intents.
const FATAL_CLOSE_CODES: [u16; 6] = [4004, 4010, 4011, 4012, 4013, 4014];
/// Invalid sequence and session timeout: the session cannot be resumed.
const RESET_CLOSE_CODES: [u16; 2] = [4007, 4009];

#[derive(Debug, Clone)]
pub enum GatewayCommand {
    UpdatePresence(PresenceUpdate),
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub token: String,
    pub gateway_url: String,
    pub intents: u64,
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    HeartbeatNow,
    Reconnect(String),
}

#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Cancelled,
    Reconnect(String),
}

pub struct GatewaySession {
    config: GatewayConfig,
    bus: EventBus,
    state: Arc<ConnectionState>,
    commands: mpsc::Receiver<GatewayCommand>,
    sequence: Option<u64>,
    session_id: Option<String>,
    resume_url: Option<String>,
    guilds: HashSet<String>,
    presence: Option<PresenceUpdate>,
    awaiting_ack: bool,
}

impl GatewaySession {
    pub fn new(
        config: GatewayConfig,
        bus: EventBus,
        state: Arc<ConnectionState>,
        commands: mpsc::Receiver<GatewayCommand>,
    ) -> Self {
        Self {
            config,
            bus,
            state,
            commands,
            sequence: None,
            session_id: None,
            resume_url: None,
            guilds: HashSet::new(),
            presence: None,
            awaiting_ack: false,
        }
    }

    /// Runs until `cancel` fires. Dropped connections are retried after
    /// [`RECONNECT_DELAY`]; only a close code that rules out any retry ends
    /// the loop with an error.
    pub async fn run(mut self, cancel: CancellationToken) -> DiscordResult<()> {
        info!("Discord gateway starting");

        let result = loop {
            match self.connect_once(&cancel).await {
                Ok(SessionEnd::Cancelled) => break Ok(()),
                Ok(SessionEnd::Reconnect(reason)) => {
                    info!(reason = %reason, "Discord gateway connection ended");
                }
                Err(e @ DiscordError::GatewayRejected { .. }) => {
                    error!(error = %e, "Discord gateway rejected the session");
                    break Err(e);
                }
                Err(e) => {
                    warn!(error = %e, "Discord gateway connection failed");
                }
            }

            self.note_disconnect("connection lost");

            tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                _ = tokio::time::sleep(RECONNECT_DELAY) => {
                    info!("Reconnecting Discord gateway");
                }
            }
        };

        self.note_disconnect("gateway stopped");
        info!("Discord gateway stopped");
        result
    }

    async fn connect_once(&mut self, cancel: &CancellationToken) -> DiscordResult<SessionEnd> {
        let url = match &self.resume_url {
            Some(resume) => resume_endpoint(resume),
            None => self.config.gateway_url.clone(),
        };

        let (stream, _) = tokio::select! {
            _ = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
            connected = tokio_tungstenite::connect_async(url.as_str()) => connected?,
        };
        info!("Discord gateway connected");

        let (mut sink, mut source) = stream.split();

        let interval_ms = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.close().await;
                return Ok(SessionEnd::Cancelled);
            }
            interval = read_hello(&mut source) => interval,
        };
        debug!(interval_ms, "received HELLO");

        send_payload(&mut sink, &self.handshake_payload()?).await?;
        self.awaiting_ack = false;

        let mut heartbeat = tokio::time::interval(Duration::from_millis(interval_ms));
        // The first tick completes immediately.
        heartbeat.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = sink.close().await;
                    return Ok(SessionEnd::Cancelled);
                }
                _ = heartbeat.tick() => {
                    if self.awaiting_ack {
                        return Ok(SessionEnd::Reconnect("heartbeat not acknowledged".to_string()));
                    }
                    send_payload(&mut sink, &GatewayPayload::heartbeat(self.sequence)).await?;
                    self.awaiting_ack = true;
                }
                Some(command) = self.commands.recv() => {
                    match command {
                        GatewayCommand::UpdatePresence(presence) => {
                            send_payload(&mut sink, &presence_payload(&presence)?).await?;
                            debug!(status = %presence.status, "presence updated");
                            self.presence = Some(presence);
                        }
                    }
                }
                frame = source.next() => {
                    match frame {
                        Some(Ok(WsMessage::Text(text))) => match self.handle_text(&text) {
                            Flow::Continue => {}
                            Flow::HeartbeatNow => {
                                send_payload(&mut sink, &GatewayPayload::heartbeat(self.sequence)).await?;
                            }
                            Flow::Reconnect(reason) => {
                                let _ = sink.close().await;
                                return Ok(SessionEnd::Reconnect(reason));
                            }
                        },
                        Some(Ok(WsMessage::Close(frame))) => return self.handle_close(frame),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => return Ok(SessionEnd::Reconnect("stream ended".to_string())),
                    }
                }
            }
        }
    }

    fn handshake_payload(&self) -> DiscordResult<GatewayPayload> {
        if let (Some(session_id), Some(seq)) = (&self.session_id, self.sequence) {
            info!(session_id = %session_id, seq, "Resuming Discord session");
            let resume = ResumeData {
                token: self.config.token.clone(),
                session_id: session_id.clone(),
                seq,
            };
            let d = serde_json::to_value(resume)
                .map_err(|e| DiscordError::decode("resume payload", e))?;
            return Ok(GatewayPayload::outgoing(OP_RESUME, d));
        }

        debug!("Identifying new Discord session");
        let identify = IdentifyData {
            token: self.config.token.clone(),
            intents: self.config.intents,
            properties: ConnectionProperties::current(),
            presence: self.presence.clone(),
        };
        let d = serde_json::to_value(identify)
            .map_err(|e| DiscordError::decode("identify payload", e))?;
        Ok(GatewayPayload::outgoing(OP_IDENTIFY, d))
    }

    fn handle_text(&mut self, text: &str) -> Flow {
        let payload: GatewayPayload = match serde_json::from_str(text) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "failed to parse gateway payload");
                return Flow::Continue;
            }
        };

        if let Some(seq) = payload.s {
            self.sequence = Some(seq);
        }

        match payload.op {
            OP_DISPATCH => {
                if let Some(event) = payload.t.as_deref() {
                    self.handle_dispatch(event, payload.d.unwrap_or(Value::Null), payload.s);
                }
                Flow::Continue
            }
            OP_HEARTBEAT => Flow::HeartbeatNow,
            OP_HEARTBEAT_ACK => {
                self.awaiting_ack = false;
                Flow::Continue
            }
            OP_RECONNECT => Flow::Reconnect("server requested reconnect".to_string()),
            OP_INVALID_SESSION => {
                let resumable = payload.d.as_ref().and_then(Value::as_bool).unwrap_or(false);
                if !resumable {
                    warn!("Discord session invalidated, identifying afresh");
                    self.reset_session();
                }
                Flow::Reconnect("invalid session".to_string())
            }
            OP_HELLO => Flow::Continue,
            other => {
                debug!(op = other, "unhandled gateway opcode");
                Flow::Continue
            }
        }
    }

    fn handle_dispatch(&mut self, event: &str, data: Value, sequence: Option<u64>) {
        match event {
            "READY" => match serde_json::from_value::<ReadyEvent>(data) {
                Ok(ready) => {
                    let identity = ready.user.to_identity();
                    self.session_id = Some(ready.session_id);
                    self.resume_url = ready.resume_gateway_url;
                    self.guilds = ready
                        .guilds
                        .iter()
                        .filter_map(|g| g.get("id").and_then(Value::as_str))
                        .map(str::to_string)
                        .collect();
                    let guild_count = self.guilds.len();
                    info!(
                        bot_id = %identity.id,
                        bot_name = %identity.display_name(),
                        guilds = guild_count,
                        "Discord bot authenticated"
                    );
                    self.state.mark_ready(identity.clone(), guild_count);
                    self.publish(
                        EventKind::Ready {
                            identity,
                            guild_count,
                        },
                        sequence,
                    );
                }
                Err(e) => warn!(error = %e, "failed to parse READY"),
            },
            "RESUMED" => {
                info!("Discord session resumed");
                self.state.mark_resumed();
            }
            "GUILD_CREATE" => {
                if let Ok(guild) = serde_json::from_value::<GuildCreateEvent>(data) {
                    if self.guilds.insert(guild.id) {
                        self.state.set_guild_count(self.guilds.len());
                    }
                }
            }
            "GUILD_DELETE" => {
                if let Ok(guild) = serde_json::from_value::<GuildDeleteEvent>(data) {
                    if !guild.unavailable && self.guilds.remove(&guild.id) {
                        self.state.set_guild_count(self.guilds.len());
                    }
                }
            }
            "MESSAGE_CREATE" => match serde_json::from_value::<WireMessage>(data) {
                Ok(message) => {
                    self.publish(
                        EventKind::MessageCreate {
                            message: message.to_raw(),
                        },
                        sequence,
                    );
                }
                Err(e) => warn!(error = %e, "failed to parse MESSAGE_CREATE"),
            },
            other => debug!(event = other, "unhandled dispatch event"),
        }
    }

    fn handle_close(&mut self, frame: Option<CloseFrame<'static>>) -> DiscordResult<SessionEnd> {
        let (code, reason) = frame
            .map(|f| (u16::from(f.code), f.reason.to_string()))
            .unwrap_or((1000, String::new()));

        if FATAL_CLOSE_CODES.contains(&code) {
            return Err(DiscordError::GatewayRejected { code, reason });
        }
        if RESET_CLOSE_CODES.contains(&code) {
            self.reset_session();
        }
        Ok(SessionEnd::Reconnect(format!(
            "closed by server ({}): {}",
            code, reason
        )))
    }

    fn reset_session(&mut self) {
        self.session_id = None;
        self.resume_url = None;
        self.sequence = None;
    }

    fn note_disconnect(&self, reason: &str) {
        if self.state.is_ready() {
            self.state.mark_disconnected();
            self.publish(
                EventKind::Disconnected {
                    reason: reason.to_string(),
                },
                None,
            );
        }
    }

    fn publish(&self, kind: EventKind, sequence: Option<u64>) {
        let envelope = Envelope::new(EVENT_SOURCE, kind);
        let envelope = match sequence {
            Some(seq) => envelope.with_sequence(seq),
            None => envelope,
        };
        // Sending never blocks; with nobody listening the event is dropped.
        if self.bus.publish(envelope).is_err() {
            debug!("gateway event dropped, no subscribers");
        }
    }
}

/// The resume url from READY comes without the version query.
fn resume_endpoint(url: &str) -> String {
    if url.contains('?') {
        url.to_string()
    } else {
        format!("{}/?v=10&encoding=json", url.trim_end_matches('/'))
    }
}

fn presence_payload(presence: &PresenceUpdate) -> DiscordResult<GatewayPayload> {
    let d = serde_json::to_value(presence).map_err(|e| DiscordError::decode("presence", e))?;
    Ok(GatewayPayload::outgoing(OP_PRESENCE_UPDATE, d))
}

async fn read_hello<S>(source: &mut S) -> u64
where
    S: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    while let Some(frame) = source.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => {
                let Ok(payload) = serde_json::from_str::<GatewayPayload>(&text) else {
                    continue;
                };
                if payload.op != OP_HELLO {
                    continue;
                }
                if let Some(hello) = payload
                    .d
                    .and_then(|d| serde_json::from_value::<HelloData>(d).ok())
                {
                    return hello.heartbeat_interval;
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "websocket error waiting for HELLO");
                break;
            }
        }
    }
    FALLBACK_HEARTBEAT_MS
}

async fn send_payload<S>(sink: &mut S, payload: &GatewayPayload) -> DiscordResult<()>
where
    S: Sink<WsMessage, Error = WsError> + Unpin,
{
    let text =
        serde_json::to_string(payload).map_err(|e| DiscordError::decode("gateway payload", e))?;
    sink.send(WsMessage::Text(text)).await?;
    Ok(())
}
