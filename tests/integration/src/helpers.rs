//! Test helpers for integration tests
//!
//! Spawns mock servers on ephemeral ports and records what the client
//! sends them.

use crate::fixtures;
use anyhow::{anyhow, Result};
use axum::body::Body;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use flate2::{Compress, Compression, FlushCompress};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use shardline_gateway::protocol::{GatewayMessage, OpCode};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};

/// Poll `check` every 10ms until it holds or `limit` passes
pub async fn wait_until<F: Fn() -> bool>(limit: Duration, check: F) -> bool {
    let deadline = Instant::now() + limit;
    loop {
        if check() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(10)).await;
    }
}

async fn bind() -> Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
    let addr = listener.local_addr()?;
    Ok((listener, addr))
}

// =============================================================================
// Mock gateway
// =============================================================================

/// How the mock gateway behaves
#[derive(Debug, Clone)]
pub struct MockGatewayOptions {
    /// Sent in Hello, milliseconds
    pub heartbeat_interval: u64,
    /// Answer heartbeats with op 11
    pub ack_heartbeats: bool,
    /// Send every compressed message as two websocket frames
    pub split_frames: bool,
}

impl Default for MockGatewayOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: 1_000,
            ack_heartbeats: true,
            split_frames: false,
        }
    }
}

/// Something the mock gateway observed
#[derive(Debug, Clone)]
pub enum GatewayRecord {
    Connected {
        connection: usize,
        compressed: bool,
    },
    Received {
        connection: usize,
        message: GatewayMessage,
        at: Instant,
    },
    Disconnected {
        connection: usize,
    },
}

/// Pushed to every open connection
#[derive(Debug, Clone)]
pub enum ServerCommand {
    Send(Value),
    Close(u16),
}

struct GatewayState {
    options: MockGatewayOptions,
    url: String,
    next_connection: AtomicUsize,
    records: mpsc::UnboundedSender<GatewayRecord>,
    commands: broadcast::Sender<ServerCommand>,
}

/// In-process gateway speaking just enough of the protocol for a shard to
/// identify, resume and heartbeat
pub struct MockGateway {
    pub addr: SocketAddr,
    state: Arc<GatewayState>,
    records: mpsc::UnboundedReceiver<GatewayRecord>,
    _handle: JoinHandle<()>,
}

impl MockGateway {
    pub async fn start() -> Result<Self> {
        Self::start_with(MockGatewayOptions::default()).await
    }

    pub async fn start_with(options: MockGatewayOptions) -> Result<Self> {
        let (listener, addr) = bind().await?;
        let (records_tx, records) = mpsc::unbounded_channel();
        let (commands, _) = broadcast::channel(16);

        let state = Arc::new(GatewayState {
            options,
            url: format!("ws://{addr}"),
            next_connection: AtomicUsize::new(0),
            records: records_tx,
            commands,
        });

        let app = Router::new()
            .route("/", get(gateway_handler))
            .with_state(Arc::clone(&state));

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Ok(Self {
            addr,
            state,
            records,
            _handle: handle,
        })
    }

    /// Base URL to put in the gateway config
    pub fn url(&self) -> String {
        self.state.url.clone()
    }

    /// Push a command to every open connection
    pub fn command(&self, command: ServerCommand) {
        let _ = self.state.commands.send(command);
    }

    /// Next record, waiting at most `limit`
    pub async fn next_record(&mut self, limit: Duration) -> Result<GatewayRecord> {
        timeout(limit, self.records.recv())
            .await
            .map_err(|_| anyhow!("no gateway activity within {limit:?}"))?
            .ok_or_else(|| anyhow!("mock gateway stopped"))
    }

    /// Skip records until the client sends `op`
    pub async fn expect_op(
        &mut self,
        op: OpCode,
        limit: Duration,
    ) -> Result<(usize, GatewayMessage, Instant)> {
        let deadline = Instant::now() + limit;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.next_record(remaining).await {
                Ok(GatewayRecord::Received {
                    connection,
                    message,
                    at,
                }) if message.op == op => return Ok((connection, message, at)),
                Ok(_) => {}
                Err(e) => return Err(anyhow!("waiting for {op}: {e}")),
            }
        }
    }

    /// Skip records until a connection opens
    pub async fn expect_connection(&mut self, limit: Duration) -> Result<(usize, bool)> {
        let deadline = Instant::now() + limit;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if let GatewayRecord::Connected {
                connection,
                compressed,
            } = self.next_record(remaining).await?
            {
                return Ok((connection, compressed));
            }
        }
    }

    /// Skip records until a connection closes
    pub async fn expect_disconnect(&mut self, limit: Duration) -> Result<usize> {
        let deadline = Instant::now() + limit;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if let GatewayRecord::Disconnected { connection } = self.next_record(remaining).await? {
                return Ok(connection);
            }
        }
    }

    /// Connections accepted so far
    pub fn connections(&self) -> usize {
        self.state.next_connection.load(Ordering::SeqCst)
    }
}

async fn gateway_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<HashMap<String, String>>,
    State(state): State<Arc<GatewayState>>,
) -> Response {
    let compressed = query.get("compress").is_some_and(|c| c == "zlib-stream");
    ws.on_upgrade(move |socket| serve_connection(socket, state, compressed))
}

/// Writes JSON payloads as text, or as zlib-stream binary frames sharing
/// one deflate context
struct FrameWriter {
    deflater: Option<Compress>,
    split: bool,
}

impl FrameWriter {
    fn encode(&mut self, payload: &Value) -> Vec<Message> {
        let json = payload.to_string();
        let Some(deflater) = &mut self.deflater else {
            return vec![Message::Text(json)];
        };

        let mut out = Vec::with_capacity(json.len() * 2 + 128);
        if deflater
            .compress_vec(json.as_bytes(), &mut out, FlushCompress::Sync)
            .is_err()
        {
            return Vec::new();
        }

        if self.split && out.len() > 4 {
            let tail = out.split_off(out.len() / 2);
            vec![Message::Binary(out), Message::Binary(tail)]
        } else {
            vec![Message::Binary(out)]
        }
    }

    async fn send(&mut self, sink: &mut SplitSink<WebSocket, Message>, payload: &Value) -> bool {
        for frame in self.encode(payload) {
            if sink.send(frame).await.is_err() {
                return false;
            }
        }
        true
    }
}

async fn serve_connection(socket: WebSocket, state: Arc<GatewayState>, compressed: bool) {
    let connection = state.next_connection.fetch_add(1, Ordering::SeqCst);
    let _ = state.records.send(GatewayRecord::Connected {
        connection,
        compressed,
    });

    let (mut sink, mut stream) = socket.split();
    let mut commands = state.commands.subscribe();
    let mut writer = FrameWriter {
        deflater: compressed.then(|| Compress::new(Compression::default(), true)),
        split: state.options.split_frames,
    };
    let mut sequence = 0u64;

    if writer
        .send(&mut sink, &fixtures::hello(state.options.heartbeat_interval))
        .await
    {
        loop {
            tokio::select! {
                frame = stream.next() => {
                    let text = match frame {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                        Some(Ok(_)) => continue,
                    };
                    let Ok(message) = GatewayMessage::from_json(&text) else {
                        continue;
                    };
                    let _ = state.records.send(GatewayRecord::Received {
                        connection,
                        message: message.clone(),
                        at: Instant::now(),
                    });

                    let reply = respond(&state, &message, &mut sequence);
                    if let Some(reply) = reply {
                        if !writer.send(&mut sink, &reply).await {
                            break;
                        }
                    }
                }
                command = commands.recv() => match command {
                    Ok(ServerCommand::Send(payload)) => {
                        if !writer.send(&mut sink, &payload).await {
                            break;
                        }
                    }
                    Ok(ServerCommand::Close(code)) => {
                        let frame = CloseFrame {
                            code,
                            reason: "".into(),
                        };
                        let _ = sink.send(Message::Close(Some(frame))).await;
                        break;
                    }
                    Err(_) => {}
                },
            }
        }
    }

    let _ = state.records.send(GatewayRecord::Disconnected { connection });
}

fn respond(state: &GatewayState, message: &GatewayMessage, sequence: &mut u64) -> Option<Value> {
    match message.op {
        OpCode::Identify => {
            *sequence += 1;
            let shard = message.d.get("shard").cloned().unwrap_or(Value::Null);
            Some(fixtures::dispatch(
                "READY",
                *sequence,
                fixtures::ready(&state.url, &shard),
            ))
        }
        OpCode::Resume => {
            *sequence = message.d.get("seq").and_then(Value::as_u64).unwrap_or(0) + 1;
            Some(fixtures::dispatch("RESUMED", *sequence, Value::Null))
        }
        OpCode::Heartbeat if state.options.ack_heartbeats => Some(fixtures::heartbeat_ack()),
        _ => None,
    }
}

// =============================================================================
// Mock REST API
// =============================================================================

/// Path prefix the mock REST server strips, mirroring the real API base
pub const API_PREFIX: &str = "/api/v10";

/// Scripted response
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

impl MockResponse {
    pub fn ok(body: Value) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Value::Null,
        }
    }

    #[must_use]
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }
}

/// A request the mock REST server received
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
    pub user_agent: Option<String>,
    pub content_type: Option<String>,
    pub at: Instant,
}

#[derive(Default)]
struct RestState {
    scripted: Mutex<HashMap<String, VecDeque<MockResponse>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

/// In-process REST API; unscripted paths answer `200 {}`
pub struct MockRest {
    pub addr: SocketAddr,
    state: Arc<RestState>,
    _handle: JoinHandle<()>,
}

impl MockRest {
    pub async fn start() -> Result<Self> {
        let (listener, addr) = bind().await?;
        let state = Arc::new(RestState::default());

        let app = Router::new()
            .fallback(rest_handler)
            .with_state(Arc::clone(&state));

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Ok(Self {
            addr,
            state,
            _handle: handle,
        })
    }

    /// API base URL to put in the REST config
    pub fn base_url(&self) -> String {
        format!("http://{}{API_PREFIX}", self.addr)
    }

    /// Queue a response for `path` (relative to the API base)
    pub fn script(&self, path: &str, response: MockResponse) {
        self.state
            .scripted
            .lock()
            .entry(path.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.calls.lock().clone()
    }

    pub fn calls_to(&self, path: &str) -> Vec<RecordedCall> {
        self.calls().into_iter().filter(|c| c.path == path).collect()
    }
}

async fn rest_handler(
    State(state): State<Arc<RestState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let path = uri
        .path()
        .strip_prefix(API_PREFIX)
        .unwrap_or(uri.path())
        .to_string();
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    state.calls.lock().push(RecordedCall {
        method: method.to_string(),
        path: path.clone(),
        authorization: header("authorization"),
        user_agent: header("user-agent"),
        content_type: header("content-type"),
        at: Instant::now(),
    });

    let scripted = state
        .scripted
        .lock()
        .get_mut(&path)
        .and_then(VecDeque::pop_front)
        .unwrap_or_else(|| MockResponse::ok(serde_json::json!({})));

    let body = if scripted.body.is_null() {
        String::new()
    } else {
        scripted.body.to_string()
    };

    let mut builder = Response::builder()
        .status(scripted.status)
        .header("content-type", "application/json");
    for (name, value) in &scripted.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
