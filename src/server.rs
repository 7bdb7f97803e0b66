//! TCP Listener
//!
//! Accepts client connections and spawns one [`handle_connection`] task per
//! connection. All tasks share the same [`SessionLock`], store and
//! statistics.
//!
//! ## Shutdown
//!
//! The accept loop watches a `watch::Receiver<bool>`. The flag is checked
//! before every accept, and a pending accept is raced against the flag
//! changing, so a blocked `accept()` never delays shutdown. Connections that
//! are already running are left alone.

use crate::commands::CommandHandler;
use crate::connection::{handle_connection, ConnectionStats};
use crate::storage::MessageStore;
use crate::sync::SessionLock;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Pause after an accept failure, so fd exhaustion does not spin the loop
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// The listening server.
pub struct Server {
    listener: TcpListener,
    lock: Arc<SessionLock>,
    store: Arc<dyn MessageStore>,
    stats: Arc<ConnectionStats>,
}

impl Server {
    /// Wraps an already bound listener.
    pub fn new(listener: TcpListener, store: Arc<dyn MessageStore>) -> Self {
        Self {
            listener,
            lock: Arc::new(SessionLock::new()),
            store,
            stats: Arc::new(ConnectionStats::new()),
        }
    }

    /// Binds `addr` and creates the server. Bind failure is returned to the
    /// caller, which treats it as fatal.
    pub async fn bind(
        addr: impl ToSocketAddrs,
        store: Arc<dyn MessageStore>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::new(listener, store))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// The lock shared by every connection.
    pub fn lock(&self) -> &Arc<SessionLock> {
        &self.lock
    }

    pub fn stats(&self) -> &Arc<ConnectionStats> {
        &self.stats
    }

    /// Accepts connections until `shutdown` turns true or its sender is
    /// dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let commands = CommandHandler::new(
            Arc::clone(&self.lock),
            Arc::clone(&self.store),
            Arc::clone(&self.stats),
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        // Sender gone, nobody can ask us to keep running
                        break;
                    }
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        tokio::spawn(handle_connection(stream, addr, commands.clone()));
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                }
            }
        }

        let stats = self.stats.snapshot();
        if self.lock.writer_active() {
            warn!("Listener stopped while a writer session is still active");
        }
        info!(
            accepted = stats.connections_accepted,
            active = stats.active_connections,
            readers = stats.readers_served,
            appended = stats.messages_appended,
            "Listener stopped"
        );
    }
}
