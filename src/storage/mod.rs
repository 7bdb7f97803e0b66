//! Message Storage Module
//!
//! This module defines the contract between the connection handlers and
//! whatever persists the message log, plus two implementations of it.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐        ┌──────────────────────────────┐
//! │  ConnectionHandler   │───────>│   dyn MessageStore           │
//! │  (reader / writer)   │        │   append / fetch_all_ordered │
//! └──────────────────────┘        └──────────────┬───────────────┘
//!                                                │
//!                        ┌───────────────────────┴──────────┐
//!                        ▼                                  ▼
//!               ┌─────────────────┐               ┌──────────────────┐
//!               │  MemoryStore    │               │  JournalStore    │
//!               │  memory://      │               │  file://<path>   │
//!               └─────────────────┘               └──────────────────┘
//! ```
//!
//! ## Contract
//!
//! - Every call is individually safe under concurrency; calls are not
//!   globally ordered by the store.
//! - The store stamps messages itself. Fetches return ascending timestamps,
//!   ties broken by insertion order.
//! - An unavailable backend is an `Err`, never a panic.
//!
//! ## Example
//!
//! ```
//! use rwgate::storage::{MemoryStore, MessageStore};
//!
//! # tokio_test::block_on(async {
//! let store = MemoryStore::new();
//! let ack = store.append("hello").await.unwrap();
//! assert_eq!(ack.to_string(), "message stored");
//!
//! let messages = store.fetch_all_ordered().await.unwrap();
//! assert_eq!(messages[0].text, "hello");
//! # });
//! ```

pub mod journal;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

// Re-export commonly used types
pub use journal::JournalStore;
pub use memory::MemoryStore;

/// URI scheme selecting the in-process store
pub const MEMORY_SCHEME: &str = "memory://";

/// URI scheme selecting the append-only journal file store
pub const FILE_SCHEME: &str = "file://";

/// Timestamp layout used in reader output
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A stored message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Insertion sequence number, breaks timestamp ties
    pub seq: u64,
    /// The message body
    pub text: String,
    /// Server-assigned time of the append
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Creates a message stamped with the current time.
    pub fn new(seq: u64, text: impl Into<String>) -> Self {
        Self {
            seq,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    /// Ordering key: timestamp first, then insertion order.
    pub fn sort_key(&self) -> (DateTime<Utc>, u64) {
        (self.timestamp, self.seq)
    }
}

/// Formats as one reader line: `[2024-01-31 12:00:00] text` in local time.
impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let local = self.timestamp.with_timezone(&Local);
        write!(f, "[{}] {}", local.format(TIMESTAMP_FORMAT), self.text)
    }
}

/// Acknowledgement of a successful append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack(String);

impl Ack {
    pub fn new(detail: impl Into<String>) -> Self {
        Self(detail.into())
    }

    /// The human-readable success text.
    pub fn detail(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors reported by a message store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend cannot serve requests
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The backend did not answer in time
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    /// A persisted record could not be decoded
    #[error("corrupt record at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record encoding failure
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No store implementation for this connection string
    #[error("unsupported store URI: {0}")]
    UnsupportedUri(String),
}

/// The persistence collaborator used by readers and writers.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Persists one message with a store-assigned timestamp.
    async fn append(&self, text: &str) -> Result<Ack, StoreError>;

    /// Returns every message, ascending by timestamp.
    async fn fetch_all_ordered(&self) -> Result<Vec<Message>, StoreError>;
}

/// Opens the store named by a connection string.
///
/// - `memory://` - in-process, lost on exit
/// - `file://<path>` - append-only journal at `<path>`
///
/// `timeout` bounds each individual store operation where the backend can
/// block.
pub async fn open_store(uri: &str, timeout: Duration) -> Result<Arc<dyn MessageStore>, StoreError> {
    if uri == MEMORY_SCHEME {
        return Ok(Arc::new(MemoryStore::new()));
    }

    if let Some(path) = uri.strip_prefix(FILE_SCHEME) {
        if path.is_empty() {
            return Err(StoreError::UnsupportedUri(uri.to_string()));
        }
        let store = JournalStore::open(PathBuf::from(path), timeout).await?;
        return Ok(Arc::new(store));
    }

    Err(StoreError::UnsupportedUri(uri.to_string()))
}
