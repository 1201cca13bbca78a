/// MCP Server Implementation
///
/// This module contains the transport side of the server:
/// - JSON-RPC 2.0 request/response structures
/// - Method routing shared by both transports
/// - HTTP server setup with Actix Web
/// - STDIO server implementation for line-based communication
///
/// Tool execution itself lives in the dispatcher; this module only frames its
/// results as MCP responses.

use actix_web::{
    App, HttpRequest, HttpResponse, HttpServer, Result,
    error::InternalError,
    middleware::{Compress, DefaultHeaders, Logger},
    web,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::config::{ServerConfig, ToolDefaults};
use crate::core::dispatch::{Dispatcher, ToolOutput};
use crate::core::error::ToolError;
use crate::core::registry::{ReturnKind, ToolContext, ToolRegistry};
use crate::storage::StorageBackend;
use crate::tools;

const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC error codes used by the server.
const PARSE_ERROR: i32 = -32700;
const METHOD_NOT_FOUND: i32 = -32601;
const INVALID_PARAMS: i32 = -32602;

/// Request bodies larger than this are rejected before parsing.
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Application state shared across all worker threads in HTTP mode and by the
/// STDIO loop.
#[derive(Clone)]
pub struct AppState {
    /// Server name as reported in MCP initialize responses
    pub server_name: String,
    /// Server version string as reported in MCP initialize responses
    pub server_version: String,
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(name: String, version: String, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            server_name: name,
            server_version: version,
            dispatcher,
        }
    }
}

/// JSON-RPC 2.0 request structure for MCP protocol.
///
/// `id` is absent for notifications, which never receive a response.
#[derive(Deserialize, Debug)]
pub struct MCPRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

/// JSON-RPC 2.0 response structure for MCP protocol.
#[derive(Serialize, Debug)]
pub struct MCPResponse {
    jsonrpc: String,
    id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<MCPError>,
}

/// JSON-RPC 2.0 error structure.
#[derive(Serialize, Debug)]
pub struct MCPError {
    code: i32,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl MCPResponse {
    fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    fn failure(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(MCPError {
                code,
                message,
                data: None,
            }),
        }
    }
}

/// Route a JSON-RPC request to its method handler.
///
/// Returns `None` for notifications.
pub async fn handle_request(state: &AppState, req: MCPRequest) -> Option<MCPResponse> {
    if req.id.is_none() {
        tracing::debug!(method = %req.method, "notification received");
        return None;
    }

    let response = match req.method.as_str() {
        "initialize" => handle_initialize(state, req.id),
        "ping" => MCPResponse::success(req.id, json!({})),
        "tools/list" => handle_tools_list(state.dispatcher.registry(), req.id),
        "tools/call" => handle_tools_call(&state.dispatcher, req.id, req.params).await,
        _ => MCPResponse::failure(req.id, METHOD_NOT_FOUND, format!("Method not found: {}", req.method)),
    };
    Some(response)
}

/// Handle MCP initialize method.
///
/// Returns the protocol version, server capabilities, and server information.
fn handle_initialize(state: &AppState, id: Option<Value>) -> MCPResponse {
    MCPResponse::success(
        id,
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": {}
            },
            "serverInfo": {
                "name": state.server_name,
                "version": state.server_version
            }
        }),
    )
}

/// Handle MCP tools/list method.
fn handle_tools_list(registry: &ToolRegistry, id: Option<Value>) -> MCPResponse {
    let tools: Vec<Value> = registry.list().map(|tool| tool.to_mcp_json()).collect();
    MCPResponse::success(id, json!({ "tools": tools }))
}

/// Handle MCP tools/call method.
///
/// Unknown tools and malformed call envelopes are JSON-RPC errors; everything
/// the tool itself reports (including argument validation) is returned as a
/// tool result with `isError` set.
async fn handle_tools_call(dispatcher: &Dispatcher, id: Option<Value>, params: Option<Value>) -> MCPResponse {
    let Some(params) = params else {
        return MCPResponse::failure(id, INVALID_PARAMS, "Invalid params".to_string());
    };

    let Some(tool_name) = params.get("name").and_then(|v| v.as_str()) else {
        return MCPResponse::failure(id, INVALID_PARAMS, "Invalid params: missing tool name".to_string());
    };

    let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

    match dispatcher.dispatch(tool_name, arguments).await {
        Ok(output) => MCPResponse::success(id, tool_success(output)),
        Err(e @ ToolError::UnknownTool(_)) => MCPResponse::failure(id, INVALID_PARAMS, e.to_string()),
        Err(e) => MCPResponse::success(id, tool_failure(&e)),
    }
}

fn tool_success(output: ToolOutput) -> Value {
    let text = match &output.value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_default(),
    };
    let mut result = json!({
        "content": [{ "type": "text", "text": text }],
        "isError": false
    });
    match output.returns {
        ReturnKind::Mapping => result["structuredContent"] = output.value,
        ReturnKind::TextList => result["structuredContent"] = json!({ "items": output.value }),
        ReturnKind::Text => {}
    }
    result
}

fn tool_failure(error: &ToolError) -> Value {
    json!({
        "content": [{ "type": "text", "text": error.to_string() }],
        "structuredContent": error.to_payload(),
        "isError": true
    })
}

/// Health check endpoint handler.
async fn health() -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME")
    })))
}

/// MCP JSON-RPC request handler for HTTP mode.
///
/// Increments the request counter and routes the request. Notifications are
/// acknowledged with 202 and an empty body.
async fn mcp_handler(
    state: web::Data<AppState>,
    counter: web::Data<AtomicU64>,
    req: web::Json<MCPRequest>,
) -> Result<HttpResponse> {
    counter.fetch_add(1, Ordering::Relaxed);

    match handle_request(&state, req.into_inner()).await {
        Some(response) => Ok(HttpResponse::Ok().json(response)),
        None => Ok(HttpResponse::Accepted().finish()),
    }
}

/// Metrics endpoint handler.
///
/// Returns the total number of MCP requests processed since server start.
async fn metrics_handler(counter: web::Data<AtomicU64>) -> Result<HttpResponse> {
    let count = counter.load(Ordering::Relaxed);
    Ok(HttpResponse::Ok().json(json!({
        "requests_total": count,
        "status": "ok"
    })))
}

/// Server-Sent Events endpoint for tools discovery.
///
/// Emits a single SSE event carrying every registered tool in the same shape
/// as the tools/list response.
async fn sse_tools_discovery(state: web::Data<AppState>) -> Result<HttpResponse> {
    use actix_web::http::header;

    let tools_json: Vec<Value> = state
        .dispatcher
        .registry()
        .list()
        .map(|tool| tool.to_mcp_json())
        .collect();

    let tools_data = json!({
        "tools": tools_json,
        "count": tools_json.len()
    });

    let sse_data = format!(
        "data: {}\n\n",
        serde_json::to_string(&tools_data).unwrap_or_else(|_| "{}".to_string())
    );

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(header::CacheControl(vec![
            header::CacheDirective::NoCache,
            header::CacheDirective::NoStore,
            header::CacheDirective::MustRevalidate,
        ]))
        // Disable nginx buffering
        .insert_header(("x-accel-buffering", "no"))
        .body(sse_data))
}

/// Malformed JSON bodies get a JSON-RPC parse error instead of a bare 400.
fn json_error_handler(err: actix_web::error::JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    tracing::warn!(error = %err, "rejected malformed request body");
    let response = HttpResponse::BadRequest().json(MCPResponse::failure(None, PARSE_ERROR, format!("Parse error: {err}")));
    InternalError::from_response(err, response).into()
}

/// Register the MCP routes on an Actix app.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .limit(MAX_BODY_BYTES)
            .error_handler(json_error_handler),
    )
    .route("/health", web::get().to(health))
    .route("/metrics", web::get().to(metrics_handler))
    .route("/sse", web::get().to(sse_tools_discovery))
    .route("/mcp", web::post().to(mcp_handler))
    .route("/", web::post().to(mcp_handler))
    .route("/", web::get().to(health));
}

/// Build the tool registry with every tool registered.
pub fn initialize_tools(defaults: &ToolDefaults) -> Result<Arc<ToolRegistry>, ToolError> {
    let mut registry = ToolRegistry::new();
    tools::register_all(&mut registry, defaults)?;
    tracing::debug!(count = registry.len(), "tools registered");
    Ok(Arc::new(registry))
}

/// Assemble shared state from configuration and a storage backend.
pub fn build_state(config: &ServerConfig, storage: Arc<dyn StorageBackend>) -> Result<AppState, ToolError> {
    let registry = initialize_tools(&config.tools)?;
    let dispatcher = Dispatcher::new(registry, ToolContext::new(storage));
    Ok(AppState::new(
        config.name.clone(),
        config.version.clone(),
        Arc::new(dispatcher),
    ))
}

/// Run the MCP server in HTTP mode.
///
/// # Configuration
/// - Worker threads: from config (CPU count capped at 16 by default)
/// - Max connections: 10,000 concurrent connections
/// - Connection rate limit: 1,000 connections per second
/// - Keep-alive: 30 seconds
/// - Request timeout: 30 seconds
/// - Shutdown timeout: 10 seconds
pub async fn run_server_http(state: AppState, config: &ServerConfig) -> std::io::Result<()> {
    use std::time::Duration;

    let bind_addr = config.bind_addr();
    let workers = config.workers;

    let app_state = web::Data::new(state);
    let request_count = web::Data::new(AtomicU64::new(0));

    tracing::info!(
        name = %app_state.server_name,
        version = %app_state.server_version,
        bind = %bind_addr,
        workers,
        tools = app_state.dispatcher.registry().len(),
        "MCP server starting (HTTP mode)"
    );

    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .app_data(request_count.clone())
            .wrap(Compress::default())
            .wrap(
                DefaultHeaders::new()
                    .add(("X-Content-Type-Options", "nosniff"))
                    .add(("X-Frame-Options", "DENY"))
                    .add(("X-XSS-Protection", "1; mode=block")),
            )
            // %r = request line, %s = status, %Dms = duration in milliseconds
            .wrap(Logger::new("%r %s %Dms"))
            .configure(configure_routes)
    })
    .workers(workers)
    .max_connections(10000)
    .max_connection_rate(1000)
    .keep_alive(Duration::from_secs(30))
    .client_request_timeout(Duration::from_secs(30))
    .client_disconnect_timeout(Duration::from_secs(2))
    .shutdown_timeout(10)
    .bind(&bind_addr)?
    .run()
    .await
}

/// Run the MCP server in STDIO mode.
///
/// Reads JSON-RPC requests line-by-line from stdin and writes responses to
/// stdout. All logging goes to stderr so the protocol stream stays clean.
/// Requests are processed one at a time.
pub async fn run_server_stdio(state: AppState) -> std::io::Result<()> {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};

    tracing::info!(
        name = %state.server_name,
        version = %state.server_version,
        "MCP server starting (STDIO mode)"
    );

    let stdin = tokio::io::stdin();
    let mut stdin = BufReader::with_capacity(8192, stdin).lines();
    let stdout = tokio::io::stdout();
    let mut stdout = BufWriter::with_capacity(8192, stdout);

    while let Some(line) = stdin.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<MCPRequest>(&line) {
            Ok(req) => match handle_request(&state, req).await {
                Some(response) => response,
                None => continue,
            },
            Err(e) => {
                tracing::warn!(error = %e, "parse error on stdin");
                // Answer only when an id can be recovered from the line.
                let id = serde_json::from_str::<Value>(&line)
                    .ok()
                    .and_then(|partial| partial.get("id").cloned());
                match id {
                    Some(id) => MCPResponse::failure(Some(id), PARSE_ERROR, format!("Parse error: {e}")),
                    None => continue,
                }
            }
        };

        let response_json = match serde_json::to_string(&response) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "cannot serialize response");
                continue;
            }
        };

        // One response per line, flushed immediately.
        stdout.write_all(response_json.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    tracing::info!("stdin closed, STDIO server exiting");
    Ok(())
}
