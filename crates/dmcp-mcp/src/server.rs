//! Newline-delimited JSON-RPC 2.0 MCP server.
//!
//! [`McpServer`] is generic over `AsyncBufRead + AsyncWrite`, so the same
//! loop serves stdio in production and in-memory buffers in tests. Tool
//! calls run as separate tasks: a long `wait_for_message` never holds up
//! `ping` or other calls, and `notifications/cancelled` aborts it.

use crate::protocol::{ToolError, ToolHandler, ToolResult};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const PROTOCOL_VERSION: &str = "2024-11-05";
const SERVER_NAME: &str = "dmcp";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// JSON-RPC error codes.
const PARSE_ERROR: i32 = -32700;
const INVALID_REQUEST: i32 = -32600;
const METHOD_NOT_FOUND: i32 = -32601;
const INVALID_PARAMS: i32 = -32602;
const NOT_INITIALIZED: i32 = -32002;

/// Output of one finished tool task: the in-flight key and the response.
type Finished = (String, Value);

pub struct McpServer {
    handler: Arc<dyn ToolHandler>,
    shutdown: CancellationToken,
    initialized: bool,
}

impl McpServer {
    pub fn new(handler: Arc<dyn ToolHandler>) -> Self {
        Self {
            handler,
            shutdown: CancellationToken::new(),
            initialized: false,
        }
    }

    /// Cancelling `token` stops the loop and every running tool call.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub async fn serve_stdio(&mut self) -> std::io::Result<()> {
        info!("MCP server listening on stdio");
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        self.run(stdin, tokio::io::stdout()).await
    }

    /// Serves until EOF on `reader` (after in-flight calls finish) or
    /// shutdown.
    pub async fn run<R, W>(&mut self, reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        let mut tasks: JoinSet<Finished> = JoinSet::new();
        let mut in_flight: HashMap<String, CancellationToken> = HashMap::new();
        let mut eof = false;
        let shutdown = self.shutdown.clone();

        loop {
            if eof && tasks.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!(in_flight = in_flight.len(), "MCP server shutting down");
                    tasks.shutdown().await;
                    break;
                }
                Some(joined) = tasks.join_next() => match joined {
                    Ok((key, response)) => {
                        // Requests cancelled by the client get no response.
                        if in_flight.remove(&key).is_some() {
                            write_response(&mut writer, &response).await?;
                        }
                    }
                    Err(e) => warn!(error = %e, "tool task failed"),
                },
                line = lines.next_line(), if !eof => match line? {
                    Some(line) => {
                        self.handle_line(&line, &mut writer, &mut tasks, &mut in_flight)
                            .await?;
                    }
                    None => {
                        debug!("MCP input closed");
                        eof = true;
                    }
                },
            }
        }

        writer.flush().await?;
        Ok(())
    }

    async fn handle_line<W>(
        &mut self,
        line: &str,
        writer: &mut W,
        tasks: &mut JoinSet<Finished>,
        in_flight: &mut HashMap<String, CancellationToken>,
    ) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }

        let msg: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "unparseable MCP input");
                let resp = error_response(Value::Null, PARSE_ERROR, "Parse error");
                return write_response(writer, &resp).await;
            }
        };
        if !msg.is_object() {
            let resp = error_response(Value::Null, INVALID_REQUEST, "Invalid request");
            return write_response(writer, &resp).await;
        }

        let method = msg.get("method").and_then(Value::as_str).unwrap_or("");
        let id = msg.get("id").cloned();
        let params = msg.get("params").cloned().unwrap_or_else(|| json!({}));

        match method {
            "initialize" => {
                self.initialized = true;
                let client = params
                    .pointer("/clientInfo/name")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                info!(client = %client, "MCP client initialized");
                if let Some(id) = id {
                    let result = json!({
                        "protocolVersion": PROTOCOL_VERSION,
                        "capabilities": { "tools": { "listChanged": false } },
                        "serverInfo": { "name": SERVER_NAME, "version": SERVER_VERSION },
                    });
                    write_response(writer, &success_response(id, result)).await?;
                }
            }

            "notifications/initialized" => {}

            "notifications/cancelled" => {
                let key = params.get("requestId").map(Value::to_string);
                if let Some(token) = key.and_then(|k| in_flight.remove(&k)) {
                    debug!("tool call cancelled by client");
                    token.cancel();
                }
            }

            "ping" => {
                if let Some(id) = id {
                    write_response(writer, &success_response(id, json!({}))).await?;
                }
            }

            _ if !self.initialized => {
                if let Some(id) = id {
                    let resp = error_response(id, NOT_INITIALIZED, "Server not initialized");
                    write_response(writer, &resp).await?;
                }
            }

            "tools/list" => {
                if let Some(id) = id {
                    let tools = serde_json::to_value(self.handler.tools())
                        .unwrap_or_else(|_| Value::Array(Vec::new()));
                    write_response(writer, &success_response(id, json!({ "tools": tools })))
                        .await?;
                }
            }

            "tools/call" => {
                let Some(id) = id else {
                    return Ok(());
                };
                let name = params
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();
                let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

                let key = id.to_string();
                let cancel = self.shutdown.child_token();
                in_flight.insert(key.clone(), cancel.clone());

                let handler = Arc::clone(&self.handler);
                tasks.spawn(async move {
                    let response = call_tool(handler.as_ref(), id, &name, arguments, cancel).await;
                    (key, response)
                });
            }

            other => {
                if let Some(id) = id {
                    let resp =
                        error_response(id, METHOD_NOT_FOUND, &format!("Method not found: {}", other));
                    write_response(writer, &resp).await?;
                }
            }
        }

        Ok(())
    }
}

async fn call_tool(
    handler: &dyn ToolHandler,
    id: Value,
    name: &str,
    arguments: Value,
    cancel: CancellationToken,
) -> Value {
    debug!(tool = %name, "tools/call");
    let result = match handler.call(name, arguments, cancel).await {
        Ok(result) => result,
        Err(ToolError::UnknownTool(tool)) => {
            return error_response(id, INVALID_PARAMS, &format!("Unknown tool: {}", tool));
        }
        Err(e) => {
            warn!(tool = %name, error = %e, "tool call failed");
            ToolResult::error(e.to_string())
        }
    };
    let result = serde_json::to_value(&result).unwrap_or(Value::Null);
    success_response(id, result)
}

fn success_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    })
}

fn error_response(id: Value, code: i32, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message },
    })
}

async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    response: &Value,
) -> std::io::Result<()> {
    let mut line = serde_json::to_string(response).map_err(std::io::Error::other)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Tool, ToolOutcome};
    use async_trait::async_trait;
    use dmcp_core::CoreError;
    use std::io::Cursor;
    use std::time::Duration;

    fn request_line(id: u64, method: &str, params: Value) -> String {
        let req = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        format!("{}\n", serde_json::to_string(&req).unwrap())
    }

    fn notification_line(method: &str, params: Value) -> String {
        let req = json!({ "jsonrpc": "2.0", "method": method, "params": params });
        format!("{}\n", serde_json::to_string(&req).unwrap())
    }

    fn init_line(id: u64) -> String {
        request_line(
            id,
            "initialize",
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": { "name": "test", "version": "0.1" }
            }),
        )
    }

    fn call_line(id: u64, name: &str, arguments: Value) -> String {
        request_line(id, "tools/call", json!({ "name": name, "arguments": arguments }))
    }

    fn parse_responses(output: &[u8]) -> Vec<Value> {
        String::from_utf8_lossy(output)
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).expect("invalid JSON response"))
            .collect()
    }

    struct StubTools;

    #[async_trait]
    impl ToolHandler for StubTools {
        fn tools(&self) -> Vec<Tool> {
            vec![
                Tool::new(
                    "echo",
                    "Echoes text",
                    json!({ "type": "object", "properties": { "text": { "type": "string" } } }),
                ),
                Tool::new("sleep", "Sleeps briefly", json!({ "type": "object" })),
                Tool::new("block", "Waits for cancellation", json!({ "type": "object" })),
                Tool::new("fail", "Always fails", json!({ "type": "object" })),
            ]
        }

        async fn call(&self, name: &str, args: Value, cancel: CancellationToken) -> ToolOutcome {
            match name {
                "echo" => Ok(ToolResult::text(
                    args.get("text").and_then(Value::as_str).unwrap_or("(empty)"),
                )),
                "sleep" => {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(ToolResult::text("slept"))
                }
                "block" => {
                    cancel.cancelled().await;
                    Err(CoreError::Cancelled.into())
                }
                "fail" => Err(ToolError::invalid("bad input")),
                other => Err(ToolError::UnknownTool(other.to_string())),
            }
        }
    }

    async fn run(input: String) -> Vec<Value> {
        let mut server = McpServer::new(Arc::new(StubTools));
        let mut output = Vec::new();
        server
            .run(Cursor::new(input.into_bytes()), &mut output)
            .await
            .unwrap();
        parse_responses(&output)
    }

    #[tokio::test]
    async fn initialize_handshake() {
        let responses = run(init_line(1)).await;
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["id"], 1);
        assert_eq!(responses[0]["result"]["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(responses[0]["result"]["serverInfo"]["name"], SERVER_NAME);
    }

    #[tokio::test]
    async fn requests_before_initialize_are_rejected() {
        let responses = run(request_line(1, "tools/list", json!({}))).await;
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["error"]["code"], NOT_INITIALIZED);
    }

    #[tokio::test]
    async fn ping_works_before_initialize() {
        let responses = run(request_line(4, "ping", json!({}))).await;
        assert_eq!(responses[0]["id"], 4);
        assert_eq!(responses[0]["result"], json!({}));
    }

    #[tokio::test]
    async fn tools_list_returns_catalog() {
        let mut input = init_line(1);
        input.push_str(&notification_line("notifications/initialized", json!({})));
        input.push_str(&request_line(2, "tools/list", json!({})));

        let responses = run(input).await;
        assert_eq!(responses.len(), 2);
        let tools = responses[1]["result"]["tools"].as_array().expect("tools");
        assert_eq!(tools.len(), 4);
        assert_eq!(tools[0]["name"], "echo");
        assert!(tools[0]["inputSchema"].is_object());
    }

    #[tokio::test]
    async fn tools_call_returns_text_content() {
        let mut input = init_line(1);
        input.push_str(&call_line(2, "echo", json!({ "text": "hello" })));

        let responses = run(input).await;
        assert_eq!(responses.len(), 2);
        let result = &responses[1]["result"];
        assert_eq!(result["content"][0]["type"], "text");
        assert_eq!(result["content"][0]["text"], "hello");
        assert_eq!(result["isError"], false);
    }

    #[tokio::test]
    async fn tool_failure_is_an_error_result() {
        let mut input = init_line(1);
        input.push_str(&call_line(2, "fail", json!({})));

        let responses = run(input).await;
        let result = &responses[1]["result"];
        assert_eq!(result["isError"], true);
        assert_eq!(result["content"][0]["text"], "Invalid arguments: bad input");
    }

    #[tokio::test]
    async fn unknown_tool_is_a_protocol_error() {
        let mut input = init_line(1);
        input.push_str(&call_line(2, "nope", json!({})));

        let responses = run(input).await;
        assert_eq!(responses[1]["error"]["code"], INVALID_PARAMS);
        assert_eq!(responses[1]["error"]["message"], "Unknown tool: nope");
    }

    #[tokio::test]
    async fn unknown_method_and_garbage() {
        let mut input = init_line(1);
        input.push_str(&request_line(2, "resources/list", json!({})));
        input.push_str("{not json\n");
        input.push_str("[1,2]\n");
        input.push_str(&notification_line("notifications/unknown", json!({})));

        let responses = run(input).await;
        assert_eq!(responses.len(), 4);
        assert_eq!(responses[1]["error"]["code"], METHOD_NOT_FOUND);
        assert_eq!(responses[2]["error"]["code"], PARSE_ERROR);
        assert_eq!(responses[3]["error"]["code"], INVALID_REQUEST);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_calls_do_not_block_later_requests() {
        let mut input = init_line(1);
        input.push_str(&call_line(2, "sleep", json!({})));
        input.push_str(&call_line(3, "echo", json!({ "text": "fast" })));

        let responses = run(input).await;
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[1]["id"], 3);
        assert_eq!(responses[2]["id"], 2);
        assert_eq!(responses[2]["result"]["content"][0]["text"], "slept");
    }

    #[tokio::test]
    async fn cancelled_request_gets_no_response() {
        let mut input = init_line(1);
        input.push_str(&call_line(2, "block", json!({})));
        input.push_str(&notification_line(
            "notifications/cancelled",
            json!({ "requestId": 2, "reason": "user aborted" }),
        ));
        input.push_str(&request_line(3, "ping", json!({})));

        let responses = run(input).await;
        let ids: Vec<&Value> = responses.iter().map(|r| &r["id"]).collect();
        assert_eq!(ids, vec![&json!(1), &json!(3)]);
    }

    #[tokio::test]
    async fn shutdown_stops_blocked_calls() {
        let shutdown = CancellationToken::new();
        let mut server = McpServer::new(Arc::new(StubTools)).with_shutdown(shutdown.clone());

        let (client, server_side) = tokio::io::duplex(1024);
        let (server_read, server_write) = tokio::io::split(server_side);
        let (_client_read, mut client_write) = tokio::io::split(client);

        let mut input = init_line(1);
        input.push_str(&call_line(2, "block", json!({})));
        client_write.write_all(input.as_bytes()).await.unwrap();

        let serve = tokio::spawn(async move {
            server
                .run(tokio::io::BufReader::new(server_read), server_write)
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(5), serve)
            .await
            .expect("server stopped")
            .expect("join")
            .expect("io");
    }
}
