//! # rwgate - A Readers-Writers Message Log Server
//!
//! rwgate exposes the classic readers–writers problem over TCP. Any number of
//! reader clients can take a snapshot of a shared message log at the same
//! time, while a writer client must hold an exclusive session before it may
//! append. The exclusion is shared by every connected client, not just by
//! threads inside one process.
//!
//! ## Features
//!
//! - **Shared Session Lock**: One reader/writer gate for all connections
//! - **Auto-release**: A writer that disconnects gives its session back
//! - **Line Protocol**: Plain text frames, usable with `nc`
//! - **Pluggable Store**: In-memory or append-only journal file
//! - **Async I/O**: Built on Tokio, one task per connection
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               rwgate                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │                  │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │                  │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘                  │
//! │                            │                  │                         │
//! │                            ▼                  ▼                         │
//! │  ┌─────────────┐    ┌─────────────────────────────────────────────┐    │
//! │  │   Frame     │    │                SessionLock                  │    │
//! │  │   Parser    │    │   reader count (Mutex) + writer gate (1)    │    │
//! │  └─────────────┘    └─────────────────────────────────────────────┘    │
//! │                                               │                         │
//! │                                               ▼                         │
//! │                     ┌─────────────────────────────────────────────────┐ │
//! │                     │        dyn MessageStore                         │ │
//! │                     │   MemoryStore  |  JournalStore                  │ │
//! │                     └─────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use rwgate::storage::MemoryStore;
//! use rwgate::Server;
//! use std::sync::Arc;
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let store = Arc::new(MemoryStore::new());
//!     let server = Server::bind("127.0.0.1:8080", store).await?;
//!
//!     let (shutdown_tx, shutdown_rx) = watch::channel(false);
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         let _ = shutdown_tx.send(true);
//!     });
//!
//!     server.run(shutdown_rx).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Protocol
//!
//! ```text
//! $ printf 'reader\n' | nc 127.0.0.1 8080
//! [2024-05-01 10:30:00] hello
//!
//! $ nc 127.0.0.1 8080
//! writer
//! start
//! OK: writer session started
//! hello
//! OK: message stored
//! stop
//! OK: writer session stopped
//! exit
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: Line framing, roles, commands and replies
//! - [`sync`]: The shared reader/writer session lock
//! - [`storage`]: Message store trait and implementations
//! - [`commands`]: Writer session state machine
//! - [`connection`]: Per-client connection handling
//! - [`server`]: Listener and shutdown
//!
//! ## Design Highlights
//!
//! ### No Fairness
//!
//! Waiting writers are not queued fairly against readers or each other.
//! Under sustained load either side can starve the other. This is part of
//! the protocol's observable behavior.
//!
//! ### No Timeouts
//!
//! `start` waits for the gate as long as it takes. A writer that never
//! stops holds the gate until it disconnects; teardown then releases it.

pub mod commands;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod storage;
pub mod sync;

// Re-export commonly used types for convenience
pub use commands::{CommandHandler, Session};
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{Command, FrameParser, Handshake, Reply, Role};
pub use server::Server;
pub use storage::{open_store, MemoryStore, MessageStore, StoreError};
pub use sync::SessionLock;

/// The default port rwgate listens on
pub const DEFAULT_PORT: u16 = 8080;

/// The default host rwgate binds to
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Store used when no connection string is configured
pub const DEFAULT_STORE_URI: &str = "memory://";

/// Environment variable holding the store connection string
pub const STORE_URI_ENV: &str = "RWGATE_STORE_URI";

/// Version of rwgate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
