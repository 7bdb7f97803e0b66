//! Connection Handler Module
//!
//! This module manages individual client connections. Each client
//! connection is handled by its own async task; all tasks share one
//! [`SessionLock`](crate::sync::SessionLock) and one message store.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TCP Listener                            │
//! │                    (server.rs)                              │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │
//!                        │ accept()
//!                        ▼
//!           ┌────────────────────────┐
//!           │   For each client...   │
//!           └────────────┬───────────┘
//!                        │
//!                        │ spawn task
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ConnectionHandler                           │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌──────────────────┐ │
//! │  │ Read frame  │───>│ Negotiate   │───>│ Reader: snapshot │ │
//! │  └─────────────┘    │ role        │    │ Writer: commands │ │
//! │                     └─────────────┘    └──────────────────┘ │
//! │                                               │             │
//! │                                               ▼             │
//! │                                      ┌──────────────┐       │
//! │                                      │  Teardown    │       │
//! │                                      └──────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Async I/O**: Uses Tokio for non-blocking network operations
//! - **Bounded Framing**: Newline frames with a hard size limit
//! - **Auto-release**: A writer that vanishes never keeps the gate
//! - **Statistics**: Tracks connection and session metrics

pub mod handler;

// Re-export commonly used types
pub use handler::{
    handle_connection, render_log, ConnectionError, ConnectionHandler, ConnectionStats,
    StatsSnapshot, FRAME_IDLE_GAP,
};
