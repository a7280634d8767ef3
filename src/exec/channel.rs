//! Exec channel tasks
//!
//! One task per websocket, owned by a [`ChannelManager`] that lives for a
//! single exec invocation. Dropping the manager aborts whatever is still
//! running.

use super::decode::{ChannelDecoder, ExecOutput};
use crate::error::{Error, Result};
use crate::lxd::websocket::{is_teardown_error, WsStream};
use futures::{SinkExt, StreamExt};
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::Message;

const STDIN_CHUNK: usize = 8192;
const CLOSE_DRAIN: Duration = Duration::from_secs(1);

/// Output stream of a remote process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// Data sent on the stdin channel
pub enum StdinPayload {
    Bytes(Vec<u8>),
    Text(String),
    Reader(Box<dyn AsyncRead + Send + Unpin>),
}

impl std::fmt::Debug for StdinPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            Self::Text(s) => write!(f, "Text({} chars)", s.chars().count()),
            Self::Reader(_) => f.write_str("Reader"),
        }
    }
}

impl From<Vec<u8>> for StdinPayload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<&[u8]> for StdinPayload {
    fn from(bytes: &[u8]) -> Self {
        Self::Bytes(bytes.to_vec())
    }
}

impl From<String> for StdinPayload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for StdinPayload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

/// Per-chunk output callback
pub type OutputHandler = Box<dyn FnMut(ExecOutput) + Send>;

/// Where an output channel's frames go
pub(crate) enum OutputSink {
    Buffer(Vec<u8>),
    Callback(OutputHandler),
}

/// Result of one output channel
#[derive(Debug)]
pub(crate) struct ChannelOutput {
    pub stream: Stream,
    pub output: ExecOutput,
}

/// Set of channel tasks plus the shared "finish soon" signal
pub(crate) struct ChannelManager {
    tasks: JoinSet<Result<Option<ChannelOutput>>>,
    finish: watch::Sender<bool>,
}

impl ChannelManager {
    pub fn new() -> Self {
        let (finish, _) = watch::channel(false);
        Self {
            tasks: JoinSet::new(),
            finish,
        }
    }

    pub fn finish_signal(&self) -> watch::Receiver<bool> {
        self.finish.subscribe()
    }

    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = Result<Option<ChannelOutput>>> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    /// Ask output channels to stop once their stream has ended.
    pub fn finish_soon(&self) {
        self.finish.send_replace(true);
    }

    /// Wait for every channel, returning the output ones.
    pub async fn join(mut self) -> Result<Vec<ChannelOutput>> {
        let mut outputs = Vec::new();
        while let Some(joined) = self.tasks.join_next().await {
            let result = joined.map_err(|e| Error::Io(std::io::Error::other(e)))?;
            if let Some(output) = result? {
                outputs.push(output);
            }
        }
        Ok(outputs)
    }
}

/// Send the stdin payload, then the empty terminating frame, then close.
pub(crate) async fn send_stdin(mut ws: WsStream, payload: Option<StdinPayload>) -> Result<Option<ChannelOutput>> {
    let sent = async {
        match payload {
            Some(StdinPayload::Bytes(bytes)) => ws.send(Message::Binary(bytes)).await?,
            Some(StdinPayload::Text(text)) => ws.send(Message::Binary(text.into_bytes())).await?,
            Some(StdinPayload::Reader(mut reader)) => {
                let mut buf = vec![0u8; STDIN_CHUNK];
                loop {
                    let n = reader.read(&mut buf).await?;
                    if n == 0 {
                        break;
                    }
                    ws.send(Message::Binary(buf[..n].to_vec())).await?;
                }
            }
            None => {}
        }
        ws.send(Message::Binary(Vec::new())).await?;
        ws.close(None).await?;
        Ok::<_, Error>(())
    }
    .await;

    match sent {
        Ok(()) => {
            tracing::trace!(channel = "stdin", "Stdin closed");
            Ok(None)
        }
        Err(Error::WebSocket(e)) if is_teardown_error(&e) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Drain one output channel into its sink.
///
/// Finishes when the peer closes, or once "finish soon" was signalled and
/// the last frame received was empty.
pub(crate) async fn drain_output(
    mut ws: WsStream,
    stream: Stream,
    mut sink: OutputSink,
    mut decoder: ChannelDecoder,
    mut finish: watch::Receiver<bool>,
) -> Result<Option<ChannelOutput>> {
    let mut finishing = *finish.borrow();
    let mut last_empty = false;
    let mut peer_closed = false;

    loop {
        if finishing && last_empty {
            break;
        }
        tokio::select! {
            frame = ws.next() => {
                let (bytes, text_frame) = match frame {
                    None | Some(Ok(Message::Close(_))) => {
                        peer_closed = true;
                        break;
                    }
                    Some(Ok(Message::Binary(bytes))) => (bytes, false),
                    Some(Ok(Message::Text(text))) => (text.into_bytes(), true),
                    Some(Ok(_)) => continue,
                    Some(Err(e)) if is_teardown_error(&e) => {
                        peer_closed = true;
                        break;
                    }
                    Some(Err(e)) => return Err(e.into()),
                };

                last_empty = bytes.is_empty();
                if last_empty {
                    continue;
                }
                decoder.observe(text_frame);
                tracing::trace!(channel = stream.as_str(), len = bytes.len(), "Output frame");
                match &mut sink {
                    OutputSink::Buffer(buffer) => buffer.extend_from_slice(&bytes),
                    OutputSink::Callback(handler) => {
                        let chunk = decoder.decode_chunk(bytes);
                        if !chunk.is_empty() {
                            handler(chunk);
                        }
                    }
                }
            }
            _ = finish.changed(), if !finishing => {
                finishing = true;
            }
        }
    }

    if !peer_closed {
        close_quietly(&mut ws).await;
    }

    let output = match sink {
        OutputSink::Buffer(buffer) => decoder.decode(buffer),
        OutputSink::Callback(mut handler) => {
            if let Some(rest) = decoder.flush() {
                handler(rest);
            }
            decoder.empty()
        }
    };
    Ok(Some(ChannelOutput { stream, output }))
}

/// Close and wait briefly for the peer's close frame, ignoring errors.
pub(crate) async fn close_quietly(ws: &mut WsStream) {
    if let Err(e) = ws.close(None).await {
        if !is_teardown_error(&e) {
            tracing::debug!(error = %e, "Error closing exec channel");
        }
        return;
    }
    let _ = tokio::time::timeout(CLOSE_DRAIN, async {
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;
}
