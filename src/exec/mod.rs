//! Remote command execution
//!
//! `POST /1.0/instances/<name>/exec` starts the command and answers with an
//! async operation whose metadata carries one secret per channel. Each
//! channel is a separate websocket; stdin, stdout and stderr are opened and
//! torn down together, while the operation is polled for the exit code.

pub mod channel;
pub mod decode;

pub use channel::{OutputHandler, StdinPayload, Stream};
pub use decode::{ChannelDecoder, Decode, ExecOutput, TextEncoding};

use crate::error::{Error, Result};
use crate::lxd::client::Client;
use crate::lxd::envelope::Envelope;
use crate::lxd::websocket::WsStream;
use crate::model::{Instance, InstanceKind, Kind};
use crate::operation::{Operation, OperationStatus};
use channel::{ChannelManager, OutputSink};
use serde_json::{json, Value};
use std::collections::HashMap;

/// Options for one command invocation
#[derive(Default)]
pub struct ExecOptions {
    pub environment: HashMap<String, String>,
    pub user: Option<u32>,
    pub group: Option<u32>,
    pub cwd: Option<String>,
    pub stdin: Option<StdinPayload>,
    pub decode: Decode,
    pub stdout_handler: Option<OutputHandler>,
    pub stderr_handler: Option<OutputHandler>,
}

impl ExecOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn with_user(mut self, uid: u32) -> Self {
        self.user = Some(uid);
        self
    }

    pub fn with_group(mut self, gid: u32) -> Self {
        self.group = Some(gid);
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_stdin(mut self, payload: impl Into<StdinPayload>) -> Self {
        self.stdin = Some(payload.into());
        self
    }

    pub fn with_decode(mut self, decode: Decode) -> Self {
        self.decode = decode;
        self
    }

    /// Stream stdout chunks to `handler` instead of buffering them.
    pub fn on_stdout(mut self, handler: impl FnMut(ExecOutput) + Send + 'static) -> Self {
        self.stdout_handler = Some(Box::new(handler));
        self
    }

    /// Stream stderr chunks to `handler` instead of buffering them.
    pub fn on_stderr(mut self, handler: impl FnMut(ExecOutput) + Send + 'static) -> Self {
        self.stderr_handler = Some(Box::new(handler));
        self
    }

    fn request_body(&self, command: &[String], interactive: bool) -> Value {
        let mut body = json!({
            "command": command,
            "environment": self.environment,
            "wait-for-websocket": true,
            "interactive": interactive,
        });
        if let Value::Object(map) = &mut body {
            if let Some(user) = self.user {
                map.insert("user".into(), json!(user));
            }
            if let Some(group) = self.group {
                map.insert("group".into(), json!(group));
            }
            if let Some(cwd) = &self.cwd {
                map.insert("cwd".into(), json!(cwd));
            }
        }
        body
    }
}

impl std::fmt::Debug for ExecOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecOptions")
            .field("environment", &self.environment)
            .field("user", &self.user)
            .field("group", &self.group)
            .field("cwd", &self.cwd)
            .field("stdin", &self.stdin)
            .field("decode", &self.decode)
            .field("stdout_handler", &self.stdout_handler.is_some())
            .field("stderr_handler", &self.stderr_handler.is_some())
            .finish()
    }
}

/// Result of a finished command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    pub exit_code: i32,
    /// Empty when a stdout handler was supplied
    pub stdout: ExecOutput,
    /// Empty when a stderr handler was supplied
    pub stderr: ExecOutput,
}

impl ExecResult {
    /// Check if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Websocket endpoints of an interactive session, driven by the caller
#[derive(Debug, Clone)]
pub struct RawExecSession {
    pub operation_id: String,
    /// Combined pty channel
    pub ws: url::Url,
    /// Control channel (window size, signals)
    pub control: url::Url,
    secrets: ChannelSecrets,
}

impl RawExecSession {
    /// Open the pty and control websockets.
    pub async fn connect(&self, client: &Client) -> Result<(WsStream, WsStream)> {
        let pty = client.open_websocket(&self.operation_id, &self.secrets.stdin).await?;
        let control = client
            .open_websocket(&self.operation_id, &self.secrets.control)
            .await?;
        Ok((pty, control))
    }
}

/// Per-channel secrets from `metadata.metadata.fds`
#[derive(Debug, Clone, PartialEq, Eq)]
struct ChannelSecrets {
    stdin: String,
    stdout: Option<String>,
    stderr: Option<String>,
    control: String,
}

impl ChannelSecrets {
    fn from_envelope(envelope: &Envelope) -> Result<Self> {
        let fds = envelope
            .metadata
            .pointer("/metadata/fds")
            .and_then(Value::as_object)
            .ok_or_else(|| Error::UnexpectedResponse("exec response has no fds".into()))?;

        let secret = |fd: &str| fds.get(fd).and_then(Value::as_str).map(str::to_string);
        let required = |fd: &str| {
            secret(fd).ok_or_else(|| {
                Error::UnexpectedResponse(format!("exec response has no secret for fd {fd}"))
            })
        };

        Ok(Self {
            stdin: required("0")?,
            stdout: secret("1"),
            stderr: secret("2"),
            control: required("control")?,
        })
    }
}

fn collect_command<I, S>(command: I) -> Result<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let argv: Vec<String> = command.into_iter().map(Into::into).collect();
    if argv.is_empty() {
        return Err(Error::InvalidArgument(
            "exec command must contain at least one argument".into(),
        ));
    }
    Ok(argv)
}

/// Exit code from operation metadata, once the process is gone
fn exit_code(metadata: &Value) -> Option<i32> {
    metadata
        .get("return")
        .and_then(Value::as_i64)
        .map(|code| code as i32)
}

impl Instance {
    /// POST the exec request; returns the operation id and channel secrets.
    async fn start_exec(&self, body: Value) -> Result<(Client, String, ChannelSecrets)> {
        let client = self.client()?;
        let path = self.path()?.join("exec");
        let envelope = client.post(&path, Some(&body)).await?;

        let operation_id = envelope.operation_id().ok_or_else(|| {
            Error::UnexpectedResponse("exec response without an operation".into())
        })?;
        let secrets = ChannelSecrets::from_envelope(&envelope)?;
        Ok((client, operation_id, secrets))
    }

    /// Run a command and wait for it to exit.
    ///
    /// Output is buffered and returned in [`ExecResult`] unless a handler was
    /// registered for that stream, in which case chunks go to the handler in
    /// arrival order and the returned value is empty.
    pub async fn execute<I, S>(&self, command: I, options: ExecOptions) -> Result<ExecResult>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let argv = collect_command(command)?;
        let decode = options.decode;

        let (client, operation_id, secrets) = self
            .start_exec(options.request_body(&argv, false))
            .await?;
        tracing::info!(
            kind = InstanceKind::NAME,
            instance = ?self.key(),
            operation = %operation_id,
            command = %argv.join(" "),
            "Exec started"
        );

        let (Some(stdout_secret), Some(stderr_secret)) = (&secrets.stdout, &secrets.stderr) else {
            return Err(Error::UnexpectedResponse(
                "exec response has no output channels".into(),
            ));
        };

        let stdin_ws = client.open_websocket(&operation_id, &secrets.stdin).await?;
        let stdout_ws = client.open_websocket(&operation_id, stdout_secret).await?;
        let stderr_ws = client.open_websocket(&operation_id, stderr_secret).await?;

        let ExecOptions {
            stdin,
            stdout_handler,
            stderr_handler,
            ..
        } = options;

        let mut manager = ChannelManager::new();
        manager.spawn(channel::send_stdin(stdin_ws, stdin));
        manager.spawn(channel::drain_output(
            stdout_ws,
            Stream::Stdout,
            sink(stdout_handler),
            ChannelDecoder::new(decode),
            manager.finish_signal(),
        ));
        manager.spawn(channel::drain_output(
            stderr_ws,
            Stream::Stderr,
            sink(stderr_handler),
            ChannelDecoder::new(decode),
            manager.finish_signal(),
        ));

        let exit_code = wait_for_exit(&client, &operation_id).await?;

        manager.finish_soon();
        let mut result = ExecResult {
            exit_code,
            stdout: ChannelDecoder::new(decode).empty(),
            stderr: ChannelDecoder::new(decode).empty(),
        };
        for output in manager.join().await? {
            match output.stream {
                Stream::Stdout => result.stdout = output.output,
                Stream::Stderr => result.stderr = output.output,
            }
        }

        tracing::info!(operation = %operation_id, exit_code, "Exec finished");
        Ok(result)
    }

    /// Start an interactive command and hand its websockets to the caller.
    pub async fn raw_interactive_execute<I, S>(
        &self,
        command: I,
        options: &ExecOptions,
    ) -> Result<RawExecSession>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let argv = collect_command(command)?;
        let (client, operation_id, secrets) = self
            .start_exec(options.request_body(&argv, true))
            .await?;

        Ok(RawExecSession {
            ws: client.websocket_url(&operation_id, &secrets.stdin)?,
            control: client.websocket_url(&operation_id, &secrets.control)?,
            operation_id,
            secrets,
        })
    }
}

fn sink(handler: Option<OutputHandler>) -> OutputSink {
    match handler {
        Some(handler) => OutputSink::Callback(handler),
        None => OutputSink::Buffer(Vec::new()),
    }
}

/// Poll the exec operation until its metadata carries the exit code.
async fn wait_for_exit(client: &Client, operation_id: &str) -> Result<i32> {
    let interval = client.poll_interval();
    loop {
        let operation = Operation::get(client, operation_id).await?;
        if let Some(code) = exit_code(operation.metadata()) {
            return Ok(code);
        }
        match operation.status() {
            Some(OperationStatus::Failure | OperationStatus::Cancelled) => {
                return Err(Error::OperationFailed {
                    id: operation_id.to_string(),
                    message: operation.err().unwrap_or("exec failed").to_string(),
                });
            }
            Some(OperationStatus::Success) => {
                return Err(Error::UnexpectedResponse(format!(
                    "exec operation {operation_id} finished without an exit code"
                )));
            }
            _ => tokio::time::sleep(interval).await,
        }
    }
}

/// Headers for file push and pull
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileHeaders {
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub mode: Option<u32>,
    pub file_type: Option<FileType>,
}

/// `X-LXD-type`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    File,
    Directory,
    Symlink,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Directory => "directory",
            Self::Symlink => "symlink",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "file" => Some(Self::File),
            "directory" => Some(Self::Directory),
            "symlink" => Some(Self::Symlink),
            _ => None,
        }
    }
}

impl FileHeaders {
    pub fn to_headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::new();
        if let Some(uid) = self.uid {
            headers.push(("X-LXD-uid", uid.to_string()));
        }
        if let Some(gid) = self.gid {
            headers.push(("X-LXD-gid", gid.to_string()));
        }
        if let Some(mode) = self.mode {
            headers.push(("X-LXD-mode", format!("0{mode:o}")));
        }
        if let Some(file_type) = self.file_type {
            headers.push(("X-LXD-type", file_type.as_str().to_string()));
        }
        headers
    }

    /// Parse headers from a file pull response.
    pub fn from_headers<'a>(headers: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut parsed = Self::default();
        for (name, value) in headers {
            match name.to_ascii_lowercase().as_str() {
                "x-lxd-uid" => parsed.uid = value.parse().ok(),
                "x-lxd-gid" => parsed.gid = value.parse().ok(),
                "x-lxd-mode" => parsed.mode = u32::from_str_radix(value, 8).ok(),
                "x-lxd-type" => parsed.file_type = FileType::from_str(value),
                _ => {}
            }
        }
        parsed
    }
}
