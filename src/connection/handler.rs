//! Connection Handler Module
//!
//! This module drives a single client connection from its first frame to
//! teardown. Each client gets its own handler task.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects (TCP handshake)
//!        │
//!        ▼
//! 2. AwaitingRole: read first frame, negotiate role
//!        │
//!        ├── unknown ──> close, no reply
//!        │
//!        ├── reader ───> acquire_read
//!        │                 fetch all messages
//!        │                 send "[ts] text" lines
//!        │               release_read, close
//!        │
//!        └── writer ───> ┌──────────────────────────────┐
//!                        │      Command Loop            │
//!                        │  read frame                  │
//!                        │  execute start/stop/append   │
//!                        │  send OK:/ERROR: reply       │
//!                        │  [loop until exit / EOF]     │
//!                        └──────────────┬───────────────┘
//!                                       ▼
//!                        3. Teardown: release the writer gate if still held
//! ```
//!
//! ## Buffer Management
//!
//! Incoming bytes accumulate in a `BytesMut` and are cut into lines by the
//! [`FrameParser`]. TCP may deliver half a line or several lines at once;
//! the buffer never holds more than one frame limit of unparsed data.
//!
//! Some clients never send a newline and just wait for the answer. When a
//! fragment has been sitting in the buffer for [`FRAME_IDLE_GAP`] without
//! more bytes arriving, it is taken as a complete frame.

use crate::commands::{CommandHandler, Flow, Session};
use crate::protocol::{Command, FrameError, FrameParser, Handshake, Reply, Role};
use crate::storage::Message;
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, info, info_span, trace, warn, Instrument};

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Quiet period after which an unterminated fragment counts as a frame
pub const FRAME_IDLE_GAP: Duration = Duration::from_millis(50);

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Reader snapshots delivered
    pub readers_served: AtomicU64,
    /// Successful `start` commands
    pub writer_sessions: AtomicU64,
    /// Messages persisted through writers
    pub messages_appended: AtomicU64,
    /// Commands refused for session-state or framing reasons
    pub commands_rejected: AtomicU64,
    /// Writer gates released by teardown rather than `stop`
    pub locks_auto_released: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

/// Plain copy of [`ConnectionStats`] at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub connections_accepted: u64,
    pub active_connections: u64,
    pub readers_served: u64,
    pub writer_sessions: u64,
    pub messages_appended: u64,
    pub commands_rejected: u64,
    pub locks_auto_released: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn reader_served(&self) {
        self.readers_served.fetch_add(1, Ordering::Relaxed);
    }

    pub fn writer_session_started(&self) {
        self.writer_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_appended(&self) {
        self.messages_appended.fetch_add(1, Ordering::Relaxed);
    }

    pub fn command_rejected(&self) {
        self.commands_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn lock_auto_released(&self) {
        self.locks_auto_released.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            readers_served: self.readers_served.load(Ordering::Relaxed),
            writer_sessions: self.writer_sessions.load(Ordering::Relaxed),
            messages_appended: self.messages_appended.load(Ordering::Relaxed),
            commands_rejected: self.commands_rejected.load(Ordering::Relaxed),
            locks_auto_released: self.locks_auto_released.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }
}

/// Handles a single client connection.
pub struct ConnectionHandler {
    /// The TCP stream for this connection
    stream: BufWriter<TcpStream>,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Buffer for incoming data
    buffer: BytesMut,

    /// Line frame parser
    parser: FrameParser,

    /// The peer has closed its sending half
    eof: bool,

    /// Writer command execution, shared lock and store
    commands: CommandHandler,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,
}

impl ConnectionHandler {
    /// Creates a new connection handler.
    ///
    /// # Arguments
    ///
    /// * `stream` - The TCP stream for this connection
    /// * `addr` - The client's socket address
    /// * `commands` - Command handler holding the shared lock and store
    pub fn new(stream: TcpStream, addr: SocketAddr, commands: CommandHandler) -> Self {
        let stats = Arc::clone(commands.stats());
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            parser: FrameParser::new(),
            eof: false,
            commands,
            stats,
        }
    }

    /// Runs the connection to completion.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        debug!(client = %self.addr, "Client connected");

        let result = self.serve().await;

        match &result {
            Ok(()) => debug!("Client disconnected gracefully"),
            Err(e) => match e {
                ConnectionError::ClientDisconnected => debug!("Client disconnected"),
                ConnectionError::UnknownRole(frame) => {
                    info!(frame = %frame, "Unknown role received, closing")
                }
                ConnectionError::Io(io_err)
                    if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
                {
                    debug!("Connection reset by client")
                }
                _ => warn!(error = %e, "Connection error"),
            },
        }

        self.stats.connection_closed();
        result
    }

    /// Negotiates the role and hands off to the matching flow.
    async fn serve(&mut self) -> Result<(), ConnectionError> {
        let frame = match self.read_frame().await? {
            Some(frame) => frame,
            None => return Err(ConnectionError::ClientDisconnected),
        };

        let handshake = Handshake::negotiate(&frame);
        trace!(role = %handshake.role, "Role negotiated");

        match handshake.role {
            Role::Reader => {
                if handshake.payload.is_some() {
                    debug!("Ignoring payload after reader token");
                }
                self.reader_flow().await
            }
            Role::Writer => self.writer_flow(handshake.payload).await,
            Role::Unknown => Err(ConnectionError::UnknownRole(frame)),
        }
    }

    /// One-shot snapshot of the log under the read side of the lock.
    async fn reader_flow(&mut self) -> Result<(), ConnectionError> {
        info!("Reader connected");

        let lock = Arc::clone(self.commands.lock());
        let store = Arc::clone(self.commands.store());

        let sent = lock
            .with_read(async {
                debug!("Reader entered critical section");
                let payload = match store.fetch_all_ordered().await {
                    Ok(messages) => render_log(&messages),
                    Err(e) => {
                        warn!(store = store.name(), error = %e, "Fetch failed");
                        Reply::error(e.to_string()).serialize()
                    }
                };
                self.write_bytes(&payload).await
            })
            .await;

        self.stats.reader_served();
        sent?;
        self.stream.shutdown().await?;

        info!("Reader finished and disconnected");
        Ok(())
    }

    /// Persistent writer session. The gate is always given back on the way
    /// out, however the loop ended.
    async fn writer_flow(&mut self, first: Option<String>) -> Result<(), ConnectionError> {
        info!("Writer connected");

        let mut session = Session::new(Role::Writer);
        let result = self.writer_loop(&mut session, first).await;

        if self.commands.release_on_disconnect(&mut session) {
            info!("Writer lock auto-released");
        }
        info!(role = %session.role(), "Writer disconnected");

        result
    }

    async fn writer_loop(
        &mut self,
        session: &mut Session,
        first: Option<String>,
    ) -> Result<(), ConnectionError> {
        if let Some(command) = first {
            if !self.dispatch(session, &command).await? {
                return Ok(());
            }
        }

        loop {
            let frame = match self.read_frame().await {
                Ok(Some(frame)) => frame,
                Ok(None) => return Err(ConnectionError::ClientDisconnected),
                Err(ConnectionError::Frame(e)) => {
                    warn!(
                        error = %e,
                        max = self.parser.max_frame_size(),
                        "Dropped oversized frame"
                    );
                    self.stats.command_rejected();
                    self.send_reply(&Reply::error(e.to_string())).await?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            if !self.dispatch(session, &frame).await? {
                return Ok(());
            }
        }
    }

    /// Executes one writer frame. Returns false when the session should end.
    async fn dispatch(&mut self, session: &mut Session, frame: &str) -> Result<bool, ConnectionError> {
        let command = Command::parse(frame);

        match self.commands.execute(session, command).await {
            Flow::Reply(reply) => {
                self.send_reply(&reply).await?;
                Ok(true)
            }
            Flow::Silent => Ok(true),
            Flow::Exit => Ok(false),
        }
    }

    /// Reads the next complete frame, or `None` once the peer is done.
    async fn read_frame(&mut self) -> Result<Option<String>, ConnectionError> {
        loop {
            if let Some(frame) = self.parser.decode(&mut self.buffer)? {
                return Ok(Some(frame));
            }

            if self.eof {
                return Ok(self.parser.decode_eof(&mut self.buffer)?);
            }

            if self.buffer.is_empty() && !self.parser.is_discarding() {
                self.read_more_data().await?;
                continue;
            }

            // read_buf is cancel safe, so timing it out loses no bytes
            match tokio::time::timeout(FRAME_IDLE_GAP, self.read_more_data()).await {
                Ok(result) => result?,
                Err(_) => {
                    if let Some(frame) = self.parser.decode_idle(&mut self.buffer) {
                        trace!("Unterminated frame taken after idle gap");
                        return Ok(Some(frame));
                    }
                }
            }
        }
    }

    /// Reads more data from the socket into the buffer.
    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        // Ensure we have some capacity
        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(INITIAL_BUFFER_SIZE);
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;

        if n == 0 {
            self.eof = true;
        } else {
            self.stats.bytes_read(n);
            trace!(bytes = n, "Read data");
        }

        Ok(())
    }

    /// Sends a reply line to the client.
    async fn send_reply(&mut self, reply: &Reply) -> Result<(), ConnectionError> {
        self.write_bytes(&reply.serialize()).await
    }

    async fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), ConnectionError> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        self.stats.bytes_written(bytes.len());
        trace!(bytes = bytes.len(), "Sent response");
        Ok(())
    }
}

/// Renders the reader reply: one `[timestamp] text` line per message.
pub fn render_log(messages: &[Message]) -> Vec<u8> {
    let mut out = String::new();
    for message in messages {
        out.push_str(&message.to_string());
        out.push('\n');
    }
    out.into_bytes()
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing error
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Client disconnected normally
    #[error("Client disconnected")]
    ClientDisconnected,

    /// First frame named no known role
    #[error("Unknown role: {0:?}")]
    UnknownRole(String),
}

/// Handles a client connection.
///
/// This is a convenience function that creates a ConnectionHandler and runs
/// it to completion inside a span carrying the client address.
pub async fn handle_connection(stream: TcpStream, addr: SocketAddr, commands: CommandHandler) {
    let span = info_span!("connection", client = %addr);
    let handler = ConnectionHandler::new(stream, addr, commands);

    if let Err(e) = handler.run().instrument(span).await {
        match e {
            ConnectionError::ClientDisconnected | ConnectionError::UnknownRole(_) => {}
            ConnectionError::Io(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = %addr, error = %e, "Connection ended with error");
            }
        }
    }
}
