//! Append-Only Journal Store
//!
//! Persists the message log as JSON lines, one record per message:
//!
//! ```text
//! {"seq":0,"text":"hello","timestamp":"2024-05-01T10:30:00.123456Z"}
//! {"seq":1,"text":"world","timestamp":"2024-05-01T10:30:02.654321Z"}
//! ```
//!
//! Appends are serialized through a single file handle. Fetches re-read the
//! whole file, so the log survives restarts and can be inspected with
//! ordinary tools. Every operation is bounded by the configured timeout.
//!
//! A final line without its newline is an append still in flight (or one
//! cut short by a crash or a timeout) and is skipped on read. Such a torn
//! tail is cut off when the journal is opened, and before the next append
//! after a write that did not finish, so new records always start on a line
//! of their own.

use crate::storage::{Ack, Message, MessageStore, StoreError};
use async_trait::async_trait;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// The open journal file and the next sequence number to hand out.
#[derive(Debug)]
struct JournalWriter {
    file: File,
    next_seq: u64,
    /// Length of the file up to the last complete record
    committed_len: u64,
    /// A write started but never finished; bytes past `committed_len` are junk
    torn: bool,
}

impl JournalWriter {
    /// Cuts the file back to its last complete record.
    async fn repair(&mut self) -> Result<(), StoreError> {
        warn!(len = self.committed_len, "Truncating torn journal tail");
        self.file.set_len(self.committed_len).await?;
        self.torn = false;
        Ok(())
    }
}

/// A message store backed by an append-only JSON-lines file.
#[derive(Debug)]
pub struct JournalStore {
    path: PathBuf,
    timeout: Duration,
    writer: Mutex<JournalWriter>,
}

impl JournalStore {
    /// Opens (or creates) the journal at `path`.
    ///
    /// Missing parent directories are created. Existing records are scanned
    /// once so sequence numbers keep increasing across restarts. A torn final
    /// line is truncated away.
    pub async fn open(path: impl Into<PathBuf>, timeout: Duration) -> Result<Self, StoreError> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        let raw = fs::read(&path).await?;
        let committed = committed_len(&raw);
        let existing = parse_records(&raw[..committed])?;
        let next_seq = existing.iter().map(|m| m.seq + 1).max().unwrap_or(0);

        let mut writer = JournalWriter {
            file,
            next_seq,
            committed_len: committed as u64,
            torn: committed < raw.len(),
        };
        if writer.torn {
            writer.repair().await?;
        }

        info!(
            path = %path.display(),
            records = existing.len(),
            "Message journal opened"
        );

        Ok(Self {
            path,
            timeout,
            writer: Mutex::new(writer),
        })
    }

    /// Location of the journal file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn bounded<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        tokio::time::timeout(self.timeout, op)
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
    }
}

#[async_trait]
impl MessageStore for JournalStore {
    fn name(&self) -> &str {
        "journal"
    }

    async fn append(&self, text: &str) -> Result<Ack, StoreError> {
        self.bounded(async {
            let mut writer = self.writer.lock().await;
            if writer.torn {
                writer.repair().await?;
            }

            let message = Message::new(writer.next_seq, text);
            let mut line = serde_json::to_vec(&message)?;
            line.push(b'\n');

            // Stays set if the write fails or the timeout cancels it
            writer.torn = true;
            writer.file.write_all(&line).await?;
            writer.file.flush().await?;
            writer.torn = false;

            writer.committed_len += line.len() as u64;
            writer.next_seq += 1;

            debug!(seq = message.seq, "Message appended to journal");
            Ok::<_, StoreError>(Ack::new("message stored"))
        })
        .await
    }

    async fn fetch_all_ordered(&self) -> Result<Vec<Message>, StoreError> {
        self.bounded(async {
            let mut records = read_records(&self.path).await?;
            records.sort_by_key(Message::sort_key);
            Ok::<_, StoreError>(records)
        })
        .await
    }
}

/// Reads every complete record in the journal.
async fn read_records(path: &Path) -> Result<Vec<Message>, StoreError> {
    let raw = fs::read(path).await?;
    parse_records(&raw)
}

/// Byte length of `raw` up to and including its last newline.
fn committed_len(raw: &[u8]) -> usize {
    raw.iter().rposition(|&b| b == b'\n').map_or(0, |pos| pos + 1)
}

fn parse_records(raw: &[u8]) -> Result<Vec<Message>, StoreError> {
    let content = String::from_utf8_lossy(raw);

    let mut lines: Vec<&str> = content.split('\n').collect();
    // Whatever follows the last newline is not a finished record
    lines.pop();

    lines
        .iter()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|e| StoreError::Corrupt {
                line: index + 1,
                reason: e.to_string(),
            })
        })
        .collect()
}
