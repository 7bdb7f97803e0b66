//! In-Memory Message Store
//!
//! The default store. Messages live in a `Vec` behind an `RwLock`: fetches
//! from concurrent readers share the lock, appends take it exclusively.
//! Nothing survives a restart.

use crate::storage::{Ack, Message, MessageStore, StoreError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// A message store that keeps everything in process memory.
///
/// # Thread Safety
///
/// Designed to be wrapped in an `Arc` and shared across all connection
/// tasks.
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Messages in insertion order
    messages: RwLock<Vec<Message>>,

    /// Statistics: total appends
    append_count: AtomicU64,

    /// Statistics: total fetches
    fetch_count: AtomicU64,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored messages.
    pub fn len(&self) -> usize {
        self.messages.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of successful appends.
    pub fn append_count(&self) -> u64 {
        self.append_count.load(Ordering::Relaxed)
    }

    /// Total number of fetches served.
    pub fn fetch_count(&self) -> u64 {
        self.fetch_count.load(Ordering::Relaxed)
    }

    fn poisoned<T>(_: T) -> StoreError {
        StoreError::Unavailable("message log lock poisoned".to_string())
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn append(&self, text: &str) -> Result<Ack, StoreError> {
        let mut messages = self.messages.write().map_err(Self::poisoned)?;

        // Stamped under the write lock so seq and timestamp agree
        let seq = messages.len() as u64;
        messages.push(Message::new(seq, text));
        self.append_count.fetch_add(1, Ordering::Relaxed);

        Ok(Ack::new("message stored"))
    }

    async fn fetch_all_ordered(&self) -> Result<Vec<Message>, StoreError> {
        self.fetch_count.fetch_add(1, Ordering::Relaxed);

        let mut snapshot = self.messages.read().map_err(Self::poisoned)?.clone();
        snapshot.sort_by_key(Message::sort_key);
        Ok(snapshot)
    }
}
