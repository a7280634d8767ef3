//! Shared test support
//!
//! REST behaviour is mocked with wiremock. Exec needs real websockets, so a
//! small axum daemon serves the exec endpoint, the operation and its
//! channel websockets.

#![allow(dead_code)]

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use lxdc::{Client, Config};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Sync envelope around `metadata`
pub fn sync_envelope(metadata: Value) -> Value {
    json!({
        "type": "sync",
        "status": "Success",
        "status_code": 200,
        "metadata": metadata
    })
}

/// Async envelope for operation `id`
pub fn async_envelope(id: &str, metadata: Value) -> Value {
    json!({
        "type": "async",
        "status": "Operation created",
        "status_code": 100,
        "operation": format!("/1.0/operations/{id}"),
        "metadata": metadata
    })
}

/// Operation representation
pub fn operation(id: &str, status: &str, status_code: i64, metadata: Value) -> Value {
    json!({
        "id": id,
        "class": "task",
        "description": "test operation",
        "created_at": "2024-05-01T10:00:00Z",
        "updated_at": "2024-05-01T10:00:01Z",
        "status": status,
        "status_code": status_code,
        "resources": {"instances": ["/1.0/instances/c1"]},
        "metadata": metadata,
        "may_cancel": false,
        "err": ""
    })
}

fn host_info(extensions: &[&str]) -> Value {
    json!({
        "api_extensions": extensions,
        "api_status": "stable",
        "api_version": "1.0",
        "auth": "trusted",
        "auth_methods": ["tls"],
        "environment": {"server": "lxd", "server_version": "5.21"}
    })
}

/// Mount `GET /1.0` on a wiremock server.
pub async fn mount_host_info(server: &MockServer, extensions: &[&str]) {
    Mock::given(method("GET"))
        .and(path("/1.0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(sync_envelope(host_info(extensions))))
        .mount(server)
        .await;
}

/// Config pointed at `endpoint` with a fast poll interval.
pub fn test_config(endpoint: &str) -> Config {
    Config::default()
        .with_endpoint(endpoint)
        .with_poll_interval(Duration::from_millis(20))
}

/// Client connected to a wiremock server advertising `extensions`.
pub async fn wiremock_client(server: &MockServer, extensions: &[&str]) -> Client {
    mount_host_info(server, extensions).await;
    Client::new(test_config(&server.uri()))
        .await
        .expect("client should connect")
}

/// What the fake daemon does for one exec
#[derive(Debug, Clone, Default)]
pub struct ExecScript {
    pub stdout: Vec<Vec<u8>>,
    pub stderr: Vec<Vec<u8>>,
    pub exit_code: i32,
    /// Send output as text frames instead of binary
    pub text_frames: bool,
    /// Write whatever arrives on stdin back to stdout
    pub echo_stdin: bool,
    /// Fail the operation with this error instead of exiting
    pub failure: Option<String>,
    /// Publish the exit code before any output is flushed, and keep the
    /// output sockets open after the empty frame until the client closes
    pub early_exit: bool,
}

impl ExecScript {
    pub fn stdout(chunks: &[&str]) -> Self {
        Self {
            stdout: chunks.iter().map(|c| c.as_bytes().to_vec()).collect(),
            ..Self::default()
        }
    }
}

struct DaemonState {
    operation_id: String,
    script: ExecScript,
    exec_requests: Mutex<Vec<Value>>,
    stdin_received: Mutex<Vec<u8>>,
    stdin_done: watch::Sender<bool>,
    outputs_sent: AtomicUsize,
    websockets: AtomicUsize,
}

/// Fake daemon serving one instance (`c1`) over plain HTTP
pub struct FakeDaemon {
    pub endpoint: String,
    state: Arc<DaemonState>,
}

impl FakeDaemon {
    pub async fn start(script: ExecScript) -> Self {
        let (stdin_done, _) = watch::channel(false);
        let state = Arc::new(DaemonState {
            operation_id: Uuid::new_v4().to_string(),
            script,
            exec_requests: Mutex::new(Vec::new()),
            stdin_received: Mutex::new(Vec::new()),
            stdin_done,
            outputs_sent: AtomicUsize::new(0),
            websockets: AtomicUsize::new(0),
        });

        let app = Router::new()
            .route("/1.0", get(root))
            .route("/1.0/instances/:name", get(instance))
            .route("/1.0/instances/:name/exec", post(exec))
            .route("/1.0/operations/:id", get(operation_status))
            .route("/1.0/operations/:id/websocket", get(websocket))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake daemon");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("fake daemon");
        });

        Self {
            endpoint: format!("http://{addr}"),
            state,
        }
    }

    pub async fn client(&self) -> Client {
        Client::new(test_config(&self.endpoint))
            .await
            .expect("client should connect")
    }

    pub fn operation_id(&self) -> &str {
        &self.state.operation_id
    }

    pub fn exec_requests(&self) -> Vec<Value> {
        self.state.exec_requests.lock().unwrap().clone()
    }

    pub fn stdin_received(&self) -> Vec<u8> {
        self.state.stdin_received.lock().unwrap().clone()
    }

    pub fn websockets_opened(&self) -> usize {
        self.state.websockets.load(Ordering::SeqCst)
    }
}

async fn root() -> Json<Value> {
    Json(sync_envelope(host_info(&["container_exec_recording"])))
}

async fn instance(Path(name): Path<String>) -> Json<Value> {
    Json(sync_envelope(json!({
        "name": name,
        "architecture": "x86_64",
        "config": {},
        "devices": {},
        "ephemeral": false,
        "profiles": ["default"],
        "status": "Running",
        "status_code": 103,
        "created_at": "2024-05-01T10:00:00Z"
    })))
}

fn fds() -> Value {
    json!({"fds": {"0": "secret-0", "1": "secret-1", "2": "secret-2", "control": "secret-control"}})
}

async fn exec(
    State(state): State<Arc<DaemonState>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.exec_requests.lock().unwrap().push(body);
    let metadata = operation(&state.operation_id, "Running", 103, fds());
    (
        StatusCode::ACCEPTED,
        Json(async_envelope(&state.operation_id, metadata)),
    )
}

async fn operation_status(
    State(state): State<Arc<DaemonState>>,
    Path(id): Path<String>,
) -> Json<Value> {
    let finished = state.script.early_exit || state.outputs_sent.load(Ordering::SeqCst) >= 2;
    let body = match (&state.script.failure, finished) {
        (Some(err), true) => {
            let mut op = operation(&id, "Failure", 400, json!({}));
            op["err"] = json!(err);
            op
        }
        (None, true) => operation(
            &id,
            "Success",
            200,
            json!({"return": state.script.exit_code}),
        ),
        (_, false) => operation(&id, "Running", 103, fds()),
    };
    Json(sync_envelope(body))
}

async fn websocket(
    State(state): State<Arc<DaemonState>>,
    Query(query): Query<HashMap<String, String>>,
    upgrade: WebSocketUpgrade,
) -> Response {
    let secret = query.get("secret").cloned().unwrap_or_default();
    state.websockets.fetch_add(1, Ordering::SeqCst);
    upgrade.on_upgrade(move |socket| async move {
        match secret.as_str() {
            "secret-0" => read_stdin(socket, state).await,
            "secret-1" => write_output(socket, state, Channel::Stdout).await,
            "secret-2" => write_output(socket, state, Channel::Stderr).await,
            _ => {}
        }
    })
}

#[derive(Clone, Copy)]
enum Channel {
    Stdout,
    Stderr,
}

async fn read_stdin(mut socket: WebSocket, state: Arc<DaemonState>) {
    while let Some(Ok(message)) = socket.recv().await {
        match message {
            Message::Binary(bytes) if bytes.is_empty() => break,
            Message::Binary(bytes) => state.stdin_received.lock().unwrap().extend(bytes),
            Message::Text(text) => state.stdin_received.lock().unwrap().extend(text.into_bytes()),
            Message::Close(_) => break,
            _ => {}
        }
    }
    state.stdin_done.send_replace(true);
}

async fn write_output(mut socket: WebSocket, state: Arc<DaemonState>, channel: Channel) {
    let mut stdin_done = state.stdin_done.subscribe();
    let _ = stdin_done.wait_for(|done| *done).await;

    let mut chunks = match channel {
        Channel::Stdout => state.script.stdout.clone(),
        Channel::Stderr => state.script.stderr.clone(),
    };
    if matches!(channel, Channel::Stdout) && state.script.echo_stdin {
        chunks.push(state.stdin_received.lock().unwrap().clone());
    }

    for chunk in chunks {
        let message = if state.script.text_frames {
            Message::Text(String::from_utf8_lossy(&chunk).into_owned())
        } else {
            Message::Binary(chunk)
        };
        if socket.send(message).await.is_err() {
            break;
        }
    }
    let _ = socket.send(Message::Binary(Vec::new())).await;
    if state.script.early_exit {
        // Leave closing to the client
        while let Some(Ok(message)) = socket.recv().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
        }
    } else {
        let _ = socket.send(Message::Close(None)).await;
    }
    state.outputs_sent.fetch_add(1, Ordering::SeqCst);
}

