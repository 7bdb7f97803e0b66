//! Command Handler Module
//!
//! This module implements the writer session state machine. It receives
//! parsed writer commands, applies them to the connection's [`Session`],
//! and returns the reply to send.
//!
//! ## Architecture
//!
//! ```text
//! Writer frame
//!       │
//!       ▼
//! ┌─────────────────┐
//! │ Command::parse  │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐        ┌─────────────────┐
//! │ CommandHandler  │───────>│  SessionLock    │  start / stop
//! │  + Session      │        └─────────────────┘
//! │                 │        ┌─────────────────┐
//! │                 │───────>│  MessageStore   │  append
//! └─────────────────┘        └─────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! - `start` - acquire the writer gate
//! - `stop` - release the writer gate
//! - `exit` - end the session
//! - anything else - append as a message (requires `start`)

pub mod handler;

// Re-export the main command handler
pub use handler::{CommandHandler, Flow, Session};
