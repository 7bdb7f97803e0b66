//! Synchronization Module
//!
//! This module holds the one place where mutual exclusion between clients is
//! actually enforced: the [`SessionLock`].
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      SessionLock                            │
//! │                                                             │
//! │  ┌────────────────────────┐     ┌────────────────────────┐  │
//! │  │  readers: Mutex<..>    │     │  gate: Semaphore(1)    │  │
//! │  │  count + readers'      │────>│  held by one writer    │  │
//! │  │  permit                │     │  OR by all readers     │  │
//! │  └────────────────────────┘     └────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//!          ▲                                   ▲
//!          │ acquire_read / release_read       │ acquire_write / release_write
//!     reader connections                 writer connections
//! ```
//!
//! Every connection task holds an `Arc<SessionLock>`; there is exactly one
//! instance per server process.

pub mod lock;

pub use lock::{LockState, ReadGuard, SessionLock, WriteGuard};
