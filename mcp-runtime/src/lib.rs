use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use buildlog_core::error::codes;
use buildlog_core::{AgentFeedFile, RecordingConfig, RecordingManager};
use clap::Subcommand;
use serde_json::{Map, Value, json};
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

mod args;
pub mod client;
pub mod suggest;
mod tools;
mod util;

pub use client::{BuildlogApiClient, DEFAULT_API_URL, WorkflowRemote};
pub use util::default_feed_dir;

use tools::tool_definitions;
use util::to_pretty_json;

const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
const MCP_SERVER_NAME: &str = "buildlog-mcp";

#[derive(Subcommand, Clone, Debug, Default)]
pub enum McpCommands {
    /// Run the buildlog MCP server over stdio
    #[default]
    Serve,
    /// Print the tool catalogue as JSON and exit
    Tools,
}

#[derive(Clone, Debug)]
pub struct McpRuntimeConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub auto_record: bool,
    pub client_tag: Option<String>,
    /// Directory gating the agent feed. `None` disables the feed.
    pub feed_dir: Option<PathBuf>,
}

impl Default for McpRuntimeConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_key: None,
            auto_record: true,
            client_tag: None,
            feed_dir: None,
        }
    }
}

impl McpRuntimeConfig {
    fn recording_config(&self) -> RecordingConfig {
        RecordingConfig {
            auto_record: self.auto_record,
            tool_name: MCP_SERVER_NAME.to_string(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            client_tag: self.client_tag.clone(),
        }
    }
}

pub async fn run(config: McpRuntimeConfig, command: McpCommands) -> i32 {
    match command {
        McpCommands::Serve => {
            let remote = BuildlogApiClient::new(config.api_url.clone(), config.api_key.clone());
            let server = McpServer::new(config, remote);
            server.initialize();
            match server.serve_stdio().await {
                Ok(()) => 0,
                Err(err) => {
                    tracing::error!(error = %err, "mcp server stopped");
                    let payload = json!({
                        "error": "mcp_server_error",
                        "message": err,
                    });
                    eprintln!("{}", to_pretty_json(&payload));
                    1
                }
            }
        }
        McpCommands::Tools => {
            println!("{}", to_pretty_json(&tools_list_payload()));
            0
        }
    }
}

/// One server per process: owns the remote client and the single recording
/// session, which handlers lock for exactly one manager operation.
pub struct McpServer<R = BuildlogApiClient> {
    config: McpRuntimeConfig,
    remote: R,
    recording: Mutex<RecordingManager>,
}

impl<R: WorkflowRemote> McpServer<R> {
    pub fn new(config: McpRuntimeConfig, remote: R) -> Self {
        let recording = match &config.feed_dir {
            Some(dir) => RecordingManager::with_feed(
                config.recording_config(),
                Box::new(AgentFeedFile::new(dir.clone())),
            ),
            None => RecordingManager::new(config.recording_config()),
        };
        Self::with_recording(config, remote, recording)
    }

    pub fn with_recording(config: McpRuntimeConfig, remote: R, recording: RecordingManager) -> Self {
        Self {
            config,
            remote,
            recording: Mutex::new(recording),
        }
    }

    /// Host bootstrap step; starts the auto-session if configured.
    pub fn initialize(&self) -> bool {
        self.recording().initialize()
    }

    fn recording(&self) -> MutexGuard<'_, RecordingManager> {
        self.recording.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn serve_stdio(&self) -> Result<(), String> {
        tracing::info!(
            server = MCP_SERVER_NAME,
            version = env!("CARGO_PKG_VERSION"),
            api_url = %self.config.api_url,
            auth = self.config.api_key.is_some(),
            auto_record = self.config.auto_record,
            "serving MCP over stdio"
        );
        let mut reader = BufReader::new(io::stdin());
        let mut stdout = io::stdout();
        self.serve(&mut reader, &mut stdout).await
    }

    /// Reads messages until EOF, answering each in the framing it arrived in.
    pub async fn serve<In, Out>(&self, reader: &mut In, writer: &mut Out) -> Result<(), String>
    where
        In: AsyncBufRead + Unpin,
        Out: AsyncWrite + Unpin,
    {
        loop {
            let incoming = read_message(reader)
                .await
                .map_err(|e| format!("Failed to read MCP message: {e}"))?;
            let Some((incoming, framing)) = incoming else {
                break;
            };

            let responses = self.handle_incoming_message(incoming).await;
            for response in responses {
                write_message(writer, &response, framing)
                    .await
                    .map_err(|e| format!("Failed to write MCP response: {e}"))?;
            }
        }
        tracing::info!("stdin closed, shutting down");
        Ok(())
    }

    pub async fn handle_incoming_message(&self, incoming: Value) -> Vec<Value> {
        match incoming {
            Value::Array(batch) if batch.is_empty() => vec![error_response(
                Value::Null,
                RpcError::invalid_request("Batch request must not be empty"),
            )],
            Value::Array(batch) => {
                let mut responses = Vec::with_capacity(batch.len());
                for message in batch {
                    responses.extend(self.dispatch(message).await);
                }
                responses
            }
            message => self.dispatch(message).await.into_iter().collect(),
        }
    }

    /// Answers one request. Notifications and client responses yield `None`.
    async fn dispatch(&self, message: Value) -> Option<Value> {
        let Value::Object(mut message) = message else {
            return Some(error_response(
                Value::Null,
                RpcError::invalid_request("Request must be a JSON object"),
            ));
        };
        let id = message.remove("id");

        if message.get("jsonrpc").and_then(|v| v.as_str()) != Some("2.0") {
            return Some(error_response(
                id.unwrap_or(Value::Null),
                RpcError::invalid_request("jsonrpc must be '2.0'"),
            ));
        }
        let method = match message.remove("method") {
            Some(Value::String(method)) => method,
            // A response to a request this server never sends.
            None => return None,
            Some(_) => {
                return id.map(|id| {
                    error_response(id, RpcError::invalid_request("method must be a string"))
                });
            }
        };
        let Some(id) = id else {
            tracing::debug!(method = %method, "notification ignored");
            return None;
        };

        let params = message.remove("params").unwrap_or(Value::Null);
        Some(match self.handle_request(&method, params).await {
            Ok(payload) => success_response(id, payload),
            Err(err) => error_response(id, err),
        })
    }

    async fn handle_request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            "initialize" => Ok(self.initialize_payload()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(tools_list_payload()),
            "tools/call" => self.handle_tools_call(params).await,
            "resources/list" => Ok(json!({ "resources": [] })),
            "prompts/list" => Ok(json!({ "prompts": [] })),
            _ => Err(RpcError::method_not_found(method)),
        }
    }

    fn initialize_payload(&self) -> Value {
        let recording = if self.config.auto_record {
            "An auto-recording session is already running; call buildlog_record_start with a real title to name it."
        } else {
            "Call buildlog_record_start before working to capture the session."
        };
        let instructions = format!(
            "Before a complex task call buildlog_suggest (or buildlog_search) to find proven workflows, and buildlog_follow to replay their prompts. {recording} Log every user prompt verbatim with buildlog_record_step type=prompt (never summarize it), plus actions, terminal commands and notes. Finish with buildlog_record_stop, then buildlog_upload to share."
        );
        json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {
                "tools": {
                    "listChanged": false
                }
            },
            "serverInfo": {
                "name": MCP_SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION")
            },
            "instructions": instructions
        })
    }

    async fn handle_tools_call(&self, params: Value) -> Result<Value, RpcError> {
        let params = params
            .as_object()
            .ok_or_else(|| RpcError::invalid_params("tools/call params must be an object"))?;

        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("tools/call requires string field 'name'"))?;

        let args = match params.get("arguments") {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::Null) | None => Map::new(),
            Some(_) => {
                return Err(RpcError::invalid_params(
                    "tools/call 'arguments' must be an object",
                ));
            }
        };

        Ok(match self.execute_tool(name, &args).await {
            Ok(envelope) => {
                let success = envelope
                    .get("success")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                tracing::info!(tool = name, success, "tool call finished");
                build_tool_call_response(envelope, false)
            }
            Err(err) => {
                tracing::warn!(tool = name, code = %err.code, message = %err.message, "tool call rejected");
                build_tool_call_response(err.to_value(), true)
            }
        })
    }
}

#[derive(Debug)]
struct RpcError {
    code: i64,
    message: String,
}

impl RpcError {
    fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: -32600,
            message: message.into(),
        }
    }

    fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {method}"),
        }
    }

    fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
        }
    }
}

/// Error that escapes a tool handler: bad arguments or an internal failure.
/// Domain failures never take this path; handlers fold them into the
/// `{"success": false}` envelope themselves.
#[derive(Debug, Clone)]
struct ToolError {
    code: String,
    message: String,
    field: Option<String>,
    docs_hint: Option<String>,
}

impl ToolError {
    fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            field: None,
            docs_hint: None,
        }
    }

    fn validation(message: impl Into<String>) -> Self {
        Self::new(codes::VALIDATION_FAILED, message)
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL_ERROR, message)
    }

    fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    fn with_docs_hint(mut self, docs_hint: impl Into<String>) -> Self {
        self.docs_hint = Some(docs_hint.into());
        self
    }

    fn to_value(&self) -> Value {
        let mut payload = json!({
            "success": false,
            "error": self.message,
            "code": self.code
        });
        if let Some(field) = &self.field {
            payload["field"] = Value::String(field.clone());
        }
        if let Some(docs_hint) = &self.docs_hint {
            payload["docs_hint"] = Value::String(docs_hint.clone());
        }
        payload
    }
}

fn tools_list_payload() -> Value {
    let tools: Vec<Value> = tool_definitions()
        .into_iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "inputSchema": tool.input_schema,
            })
        })
        .collect();
    json!({ "tools": tools })
}

fn build_tool_call_response(envelope: Value, is_error: bool) -> Value {
    // Agents read the text block, so the whole envelope is inlined there.
    let text = to_pretty_json(&envelope);
    if is_error {
        json!({
            "isError": true,
            "content": [{ "type": "text", "text": text }],
            "structuredContent": envelope
        })
    } else {
        json!({
            "content": [{ "type": "text", "text": text }],
            "structuredContent": envelope
        })
    }
}

fn success_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

fn error_response(id: Value, error: RpcError) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": error.code,
            "message": error.message
        }
    })
}

/// How a message was framed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    /// `Content-Length:` headers followed by the body.
    ContentLength,
    /// One JSON value per line.
    Line,
}

async fn read_message<R>(reader: &mut R) -> Result<Option<(Value, Framing)>, std::io::Error>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut saw_header = false;

    loop {
        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            if !saw_header {
                return Ok(None);
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Unexpected EOF while reading MCP headers",
            ));
        }

        let trimmed = line.trim();
        if !saw_header && (trimmed.starts_with('{') || trimmed.starts_with('[')) {
            return match serde_json::from_str(trimmed) {
                Ok(value) => Ok(Some((value, Framing::Line))),
                Err(e) => Ok(Some((parse_error_value(&e), Framing::Line))),
            };
        }
        if trimmed.is_empty() {
            if saw_header {
                break;
            }
            continue;
        }

        saw_header = true;
        if trimmed.to_ascii_lowercase().starts_with("content-length:") {
            let raw_len = trimmed
                .split_once(':')
                .map(|(_, right)| right.trim())
                .unwrap_or_default();
            let parsed = raw_len.parse::<usize>().map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "Invalid Content-Length header",
                )
            })?;
            content_length = Some(parsed);
        }
    }

    let content_length = content_length.ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "Missing Content-Length header",
        )
    })?;
    let mut payload = vec![0_u8; content_length];
    reader.read_exact(&mut payload).await?;

    let json = serde_json::from_slice(&payload).unwrap_or_else(|e| parse_error_value(&e));
    Ok(Some((json, Framing::ContentLength)))
}

/// Marker message for unparseable input. It is not a JSON-RPC request, so
/// dispatch answers it with an invalid-request error instead of dying.
fn parse_error_value(err: &serde_json::Error) -> Value {
    tracing::warn!(error = %err, "invalid JSON message");
    Value::String(format!("Invalid JSON payload: {err}"))
}

async fn write_message<W>(writer: &mut W, value: &Value, framing: Framing) -> Result<(), std::io::Error>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(value).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Failed to serialize JSON: {e}"),
        )
    })?;
    match framing {
        Framing::ContentLength => {
            let header = format!(
                "Content-Length: {}\r\nContent-Type: application/json\r\n\r\n",
                body.len()
            );
            writer.write_all(header.as_bytes()).await?;
            writer.write_all(&body).await?;
        }
        Framing::Line => {
            writer.write_all(&body).await?;
            writer.write_all(b"\n").await?;
        }
    }
    writer.flush().await?;
    Ok(())
}
