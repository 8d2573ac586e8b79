//! TCP transport server.
//!
//! Accepts stream connections, runs an independent read loop and write loop
//! per connection, and hands decoded command envelopes to a [`CommandSink`].
//! Replies flow back through a per-connection outbound channel, so a slow
//! client only ever stalls its own writer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use edl_protocol::{
    CommandEnvelope, ConnectionId, DecodedFrame, EditorError, FrameDecoder, ResponseEnvelope,
    encode,
};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::client::{ClientConnection, ConnectionState};
use crate::status;

/// Outbound queue of one connection. Unbounded so the editor thread never
/// blocks while delivering a result.
pub type ReplySender = mpsc::UnboundedSender<ResponseEnvelope>;

/// How long a closing connection may spend flushing queued replies.
const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Trait implemented by the command server to receive decoded traffic.
pub trait CommandSink: Send + Sync + 'static {
    /// A connection finished its handshake with the transport.
    fn connection_opened(&self, _connection: ConnectionId) {}

    /// Admit one command. Every outcome must eventually be sent on `reply`
    /// unless the connection closes first.
    fn submit(&self, connection: ConnectionId, envelope: CommandEnvelope, reply: &ReplySender);

    /// The connection is gone; cancel everything it owns.
    fn connection_closed(&self, connection: ConnectionId);

    /// Server-side fields for the status endpoint.
    fn status(&self) -> Value {
        json!({})
    }
}

/// Transport server configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Hostname to bind to
    pub hostname: String,
    /// Port to listen on (0 for OS-assigned)
    pub port: u16,
    /// Maximum concurrent connections
    pub max_connections: Option<usize>,
    /// Size of each socket read
    pub receive_buffer_size: usize,
    /// Largest accepted frame; larger frames close the connection
    pub max_frame_bytes: usize,
    /// Close connections that send nothing for this long
    pub idle_timeout: Option<Duration>,
    /// Port for the HTTP status endpoint (disabled when `None`)
    pub status_port: Option<u16>,
    /// Log every frame at debug level
    pub verbose_logging: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            hostname: "127.0.0.1".into(),
            port: 13377,
            max_connections: Some(32),
            receive_buffer_size: 64 * 1024,
            max_frame_bytes: 4 * 1024 * 1024,
            idle_timeout: None,
            status_port: None,
            verbose_logging: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid listen address '{addr}': {source}")]
    InvalidAddress {
        addr: String,
        source: std::net::AddrParseError,
    },
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
}

/// State shared by the accept loop, every connection task, and the status endpoint.
pub(crate) struct Shared<S: CommandSink> {
    pub(crate) sink: Arc<S>,
    pub(crate) config: TransportConfig,
    pub(crate) connections: DashMap<ConnectionId, ClientConnection>,
}

impl<S: CommandSink> Shared<S> {
    fn set_state(&self, id: &ConnectionId, state: ConnectionState) {
        if let Some(mut conn) = self.connections.get_mut(id) {
            conn.state = state;
        }
    }

    pub(crate) fn open_connections(&self) -> usize {
        self.connections.iter().filter(|c| c.is_open()).count()
    }
}

/// The transport server — owns the listener and all connection tasks.
pub struct TransportServer {
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
    status_handle: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
    status_addr: Option<SocketAddr>,
    connection_count: Arc<dyn Fn() -> usize + Send + Sync>,
}

impl TransportServer {
    /// Bind the listener and start accepting connections.
    pub async fn start<S: CommandSink>(
        config: TransportConfig,
        sink: Arc<S>,
    ) -> Result<Self, TransportError> {
        let addr = parse_addr(&config.hostname, config.port)?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| TransportError::Bind { addr, source })?;

        info!("Editor Link transport listening on tcp://{local_addr}");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            sink,
            config: config.clone(),
            connections: DashMap::new(),
        });

        let (status_handle, status_addr) = match config.status_port {
            Some(port) => {
                let status_addr = parse_addr(&config.hostname, port)?;
                let (handle, bound) =
                    status::serve(status_addr, shared.clone(), shutdown_rx.clone()).await?;
                (Some(handle), Some(bound))
            }
            None => (None, None),
        };

        let handle = tokio::spawn(accept_loop(listener, shared.clone(), shutdown_rx));

        let counter = shared.clone();
        Ok(Self {
            shutdown_tx,
            handle: Some(handle),
            status_handle,
            local_addr,
            status_addr,
            connection_count: Arc::new(move || counter.open_connections()),
        })
    }

    /// Get the actual bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get the actual bound port.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Bound address of the status endpoint, if enabled.
    pub fn status_addr(&self) -> Option<SocketAddr> {
        self.status_addr
    }

    /// Number of connections currently open.
    pub fn connection_count(&self) -> usize {
        (self.connection_count)()
    }

    /// Stop accepting, close every connection, and wait for the tasks to end.
    pub async fn stop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        if let Some(handle) = self.status_handle.take() {
            let _ = handle.await;
        }
        info!("Editor Link transport stopped");
    }
}

fn parse_addr(hostname: &str, port: u16) -> Result<SocketAddr, TransportError> {
    let addr = format!("{hostname}:{port}");
    addr.parse()
        .map_err(|source| TransportError::InvalidAddress { addr, source })
}

// ─────────────────────────────────────────────────────────────────────────────
// Accept loop
// ─────────────────────────────────────────────────────────────────────────────

async fn accept_loop<S: CommandSink>(
    listener: TcpListener,
    shared: Arc<Shared<S>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("Accept failed: {e}");
                        continue;
                    }
                };

                if let Some(max) = shared.config.max_connections {
                    if shared.connections.len() >= max {
                        warn!("Connection from {peer} rejected: max connections reached ({max})");
                        drop(stream);
                        continue;
                    }
                }

                if let Err(e) = stream.set_nodelay(true) {
                    debug!("set_nodelay failed for {peer}: {e}");
                }
                let (reader, writer) = stream.into_split();
                tasks.spawn(handle_connection(
                    reader,
                    writer,
                    peer,
                    shared.clone(),
                    shutdown_rx.clone(),
                ));
            }

            // Reap finished connection tasks so the set does not grow.
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}

            _ = shutdown_rx.changed() => break,
        }
    }

    info!("Closing {} connection(s)", tasks.len());
    while tasks.join_next().await.is_some() {}
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection handler
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
enum CloseReason {
    PeerClosed,
    Idle,
    Framing,
    ReadError(std::io::Error),
    ServerShutdown,
}

enum ReadEvent {
    Data(usize),
    Eof,
    Idle,
    Failed(std::io::Error),
}

async fn handle_connection<S: CommandSink>(
    mut reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    peer: SocketAddr,
    shared: Arc<Shared<S>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let id = ConnectionId::new();
    shared.connections.insert(id, ClientConnection::new(id, peer));

    let (reply_tx, reply_rx) = mpsc::unbounded_channel::<ResponseEnvelope>();
    let mut writer_task = tokio::spawn(write_loop(id, writer, reply_rx, shared.config.verbose_logging));

    shared.set_state(&id, ConnectionState::Open);
    shared.sink.connection_opened(id);
    info!("Client connected: {id} from {peer} (total: {})", shared.open_connections());

    let mut decoder = FrameDecoder::new(shared.config.max_frame_bytes);
    let mut buf = vec![0u8; shared.config.receive_buffer_size.max(1)];

    let reason = loop {
        tokio::select! {
            event = read_chunk(&mut reader, &mut buf, shared.config.idle_timeout) => {
                let n = match event {
                    ReadEvent::Data(n) => n,
                    ReadEvent::Eof => break CloseReason::PeerClosed,
                    ReadEvent::Idle => break CloseReason::Idle,
                    ReadEvent::Failed(e) => break CloseReason::ReadError(e),
                };
                if let Some(mut conn) = shared.connections.get_mut(&id) {
                    conn.touch();
                }
                decoder.extend(&buf[..n]);
                if !drain_frames(id, &mut decoder, &shared, &reply_tx) {
                    break CloseReason::Framing;
                }
            }

            _ = shutdown_rx.changed() => break CloseReason::ServerShutdown,
        }
    };

    match &reason {
        CloseReason::PeerClosed => debug!("Client {id} closed the connection"),
        CloseReason::Idle => warn!("Client {id} idle for too long, disconnecting"),
        CloseReason::Framing => warn!("Closing {id} after unrecoverable framing error"),
        CloseReason::ReadError(e) => warn!("Read error for {id}: {e}"),
        CloseReason::ServerShutdown => debug!("Closing {id} for server shutdown"),
    }

    shared.set_state(&id, ConnectionState::Closing);
    shared.sink.connection_closed(id);

    // The writer ends once every sender is gone; cancellation released the
    // clones held for pending requests.
    drop(reply_tx);
    if tokio::time::timeout(WRITER_FLUSH_TIMEOUT, &mut writer_task).await.is_err() {
        debug!("Writer for {id} did not flush in time, aborting");
        writer_task.abort();
    }

    shared.set_state(&id, ConnectionState::Closed);
    shared.connections.remove(&id);
    info!("Client disconnected: {id} (total: {})", shared.open_connections());
}

async fn read_chunk(
    reader: &mut OwnedReadHalf,
    buf: &mut [u8],
    idle_timeout: Option<Duration>,
) -> ReadEvent {
    let result = match idle_timeout {
        Some(limit) => match tokio::time::timeout(limit, reader.read(buf)).await {
            Ok(result) => result,
            Err(_) => return ReadEvent::Idle,
        },
        None => reader.read(buf).await,
    };
    match result {
        Ok(0) => ReadEvent::Eof,
        Ok(n) => ReadEvent::Data(n),
        Err(e) => ReadEvent::Failed(e),
    }
}

/// Dispatch every complete frame. Returns `false` when the stream is unrecoverable.
fn drain_frames<S: CommandSink>(
    id: ConnectionId,
    decoder: &mut FrameDecoder,
    shared: &Shared<S>,
    reply_tx: &ReplySender,
) -> bool {
    loop {
        match decoder.next_frame() {
            Ok(Some(DecodedFrame::Command(envelope))) => {
                if shared.config.verbose_logging {
                    debug!("{id} -> {} ({})", envelope.command, envelope.id);
                }
                if let Some(mut conn) = shared.connections.get_mut(&id) {
                    conn.commands_received += 1;
                }
                shared.sink.submit(id, envelope, reply_tx);
            }
            Ok(Some(DecodedFrame::Malformed(bad))) => {
                debug!("Malformed message from {id}: {}", bad.error.message);
                let _ = reply_tx.send(ResponseEnvelope::failure(bad.id, bad.error));
            }
            Ok(None) => return true,
            Err(e) => {
                let _ = reply_tx.send(ResponseEnvelope::failure(
                    None,
                    EditorError::framing(e.to_string()),
                ));
                return false;
            }
        }
    }
}

async fn write_loop(
    id: ConnectionId,
    mut writer: OwnedWriteHalf,
    mut reply_rx: mpsc::UnboundedReceiver<ResponseEnvelope>,
    verbose: bool,
) {
    while let Some(response) = reply_rx.recv().await {
        let bytes = match encode(&response) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to encode response for {id}: {e}");
                continue;
            }
        };
        if let Err(e) = writer.write_all(&bytes).await {
            warn!("Failed to send response to {id}: {e}");
            break;
        }
        if verbose {
            debug!("{id} <- {} bytes (ok: {})", bytes.len(), response.ok);
        }
    }
    let _ = writer.shutdown().await;
}
