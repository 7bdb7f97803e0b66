//! Reader/Writer Session Lock
//!
//! This module implements the exclusion primitive shared by every client
//! connection. It is the classic "first reader locks, last reader unlocks"
//! construction built from two independent pieces:
//!
//! 1. **Reader counter**: a mutex-protected count of active readers.
//! 2. **Writer gate**: a binary semaphore. It is held either by exactly one
//!    writer or, collectively, by all readers currently present.
//!
//! ## Reader Path
//!
//! ```text
//! acquire_read                              release_read
//! ────────────                              ────────────
//! lock(readers)                             lock(readers)
//!   count == 0 ? take gate (may block)        count -= 1
//!   count += 1                                count == 0 ? give gate back
//! unlock(readers)                           unlock(readers)
//! ```
//!
//! The counter mutex is held while the first reader waits for the gate, so
//! later readers queue behind it instead of racing the 0→1 transition.
//!
//! ## Fairness
//!
//! There is none. A steady stream of readers can keep the gate away from a
//! writer forever, and waiting writers are not served in arrival order. This
//! is an accepted property of the protocol and must not be "fixed" here.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{trace, warn};

/// Shared reader bookkeeping, only touched under the counter mutex.
#[derive(Debug, Default)]
struct ReaderState {
    /// Number of readers inside the critical section
    count: usize,
    /// The gate permit held on behalf of all readers (Some iff count > 0)
    permit: Option<OwnedSemaphorePermit>,
}

/// Proof that the caller is one of the active readers.
///
/// Must be handed back through [`SessionLock::release_read`].
#[must_use = "a read guard must be returned with SessionLock::release_read"]
#[derive(Debug)]
pub struct ReadGuard {
    _private: (),
}

/// Exclusive ownership of the writer gate.
///
/// Releasing happens through [`SessionLock::release_write`], or implicitly
/// when the guard is dropped.
#[must_use = "dropping a write guard releases the writer gate immediately"]
pub struct WriteGuard {
    writer_held: Arc<AtomicBool>,
    _permit: OwnedSemaphorePermit,
}

impl fmt::Debug for WriteGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteGuard").finish_non_exhaustive()
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        // Runs before the permit field is dropped, so the flag never claims a
        // writer that no longer owns the gate.
        self.writer_held.store(false, Ordering::Release);
        trace!("Writer gate released");
    }
}

/// A point-in-time view of the lock, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockState {
    /// Readers currently inside the critical section
    pub active_readers: usize,
    /// Whether a writer currently owns the gate
    pub writer_active: bool,
}

impl LockState {
    /// True when nobody holds the gate.
    pub fn is_idle(&self) -> bool {
        self.active_readers == 0 && !self.writer_active
    }
}

/// The reader/writer exclusion primitive shared by all connections.
///
/// Construct once at startup and share it as `Arc<SessionLock>`.
///
/// # Example
///
/// ```
/// use rwgate::sync::SessionLock;
///
/// # tokio_test::block_on(async {
/// let lock = SessionLock::new();
///
/// let reader = lock.acquire_read().await;
/// assert_eq!(lock.active_readers(), 1);
/// lock.release_read(reader).await;
///
/// let writer = lock.acquire_write().await;
/// assert!(lock.writer_active());
/// lock.release_write(writer);
/// assert!(lock.state().is_idle());
/// # });
/// ```
pub struct SessionLock {
    readers: Mutex<ReaderState>,
    gate: Arc<Semaphore>,
    /// Mirror of `readers.count`, written under the counter mutex
    active_readers: AtomicUsize,
    writer_held: Arc<AtomicBool>,
}

impl fmt::Debug for SessionLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLock")
            .field("active_readers", &self.active_readers())
            .field("writer_active", &self.writer_active())
            .finish()
    }
}

impl Default for SessionLock {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLock {
    /// Creates an idle lock.
    pub fn new() -> Self {
        Self {
            readers: Mutex::new(ReaderState::default()),
            gate: Arc::new(Semaphore::new(1)),
            active_readers: AtomicUsize::new(0),
            writer_held: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Enters the critical section as a reader.
    ///
    /// Never blocks on other readers. The first reader to arrive waits until
    /// no writer holds the gate, then takes it on behalf of everyone reading.
    pub async fn acquire_read(&self) -> ReadGuard {
        let mut readers = self.readers.lock().await;

        if readers.count == 0 {
            let permit = self.take_gate().await;
            readers.permit = Some(permit);
            trace!("First reader took the writer gate");
        }

        readers.count += 1;
        self.active_readers.store(readers.count, Ordering::Release);

        ReadGuard { _private: () }
    }

    /// Leaves the critical section as a reader.
    ///
    /// The last reader out hands the gate back.
    pub async fn release_read(&self, guard: ReadGuard) {
        let mut readers = self.readers.lock().await;

        debug_assert!(
            readers.count > 0,
            "release_read without a matching acquire_read"
        );
        if readers.count == 0 {
            warn!("release_read called with no active readers");
            return;
        }

        readers.count -= 1;
        self.active_readers.store(readers.count, Ordering::Release);

        if readers.count == 0 {
            readers.permit = None;
            trace!("Last reader released the writer gate");
        }

        drop(guard);
    }

    /// Runs `section` between [`acquire_read`](Self::acquire_read) and
    /// [`release_read`](Self::release_read).
    pub async fn with_read<F, T>(&self, section: F) -> T
    where
        F: Future<Output = T>,
    {
        let guard = self.acquire_read().await;
        let output = section.await;
        self.release_read(guard).await;
        output
    }

    /// Takes the writer gate exclusively, waiting as long as it takes.
    pub async fn acquire_write(&self) -> WriteGuard {
        let permit = self.take_gate().await;
        self.writer_guard(permit)
    }

    /// Takes the writer gate only if it is free right now.
    pub fn try_acquire_write(&self) -> Option<WriteGuard> {
        Arc::clone(&self.gate)
            .try_acquire_owned()
            .ok()
            .map(|permit| self.writer_guard(permit))
    }

    /// Gives the writer gate back.
    pub fn release_write(&self, guard: WriteGuard) {
        drop(guard);
    }

    /// Number of readers currently inside the critical section.
    pub fn active_readers(&self) -> usize {
        self.active_readers.load(Ordering::Acquire)
    }

    /// Whether a writer currently owns the gate.
    pub fn writer_active(&self) -> bool {
        self.writer_held.load(Ordering::Acquire)
    }

    /// Snapshot of both counters.
    pub fn state(&self) -> LockState {
        LockState {
            active_readers: self.active_readers(),
            writer_active: self.writer_active(),
        }
    }

    async fn take_gate(&self) -> OwnedSemaphorePermit {
        Arc::clone(&self.gate)
            .acquire_owned()
            .await
            .expect("writer gate semaphore is never closed")
    }

    fn writer_guard(&self, permit: OwnedSemaphorePermit) -> WriteGuard {
        self.writer_held.store(true, Ordering::Release);
        trace!("Writer took the gate");
        WriteGuard {
            writer_held: Arc::clone(&self.writer_held),
            _permit: permit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_test::{assert_pending, assert_ready, block_on, task};

    #[test]
    fn test_new_lock_is_idle() {
        let lock = SessionLock::new();
        assert!(lock.state().is_idle());
        assert_eq!(lock.active_readers(), 0);
        assert!(!lock.writer_active());
    }

    #[test]
    fn test_readers_do_not_block_each_other() {
        let lock = SessionLock::new();

        let mut first = task::spawn(lock.acquire_read());
        let first = assert_ready!(first.poll());

        let mut second = task::spawn(lock.acquire_read());
        let second = assert_ready!(second.poll());

        assert_eq!(lock.active_readers(), 2);
        assert!(!lock.writer_active());

        block_on(lock.release_read(first));
        assert_eq!(lock.active_readers(), 1);
        block_on(lock.release_read(second));
        assert!(lock.state().is_idle());
    }

    #[test]
    fn test_reader_waits_for_writer() {
        let lock = SessionLock::new();
        let writer = block_on(lock.acquire_write());

        let mut reader = task::spawn(lock.acquire_read());
        assert_pending!(reader.poll());
        assert_eq!(lock.active_readers(), 0);

        lock.release_write(writer);
        assert!(reader.is_woken());
        let guard = assert_ready!(reader.poll());

        assert_eq!(lock.active_readers(), 1);
        assert!(!lock.writer_active());
        block_on(lock.release_read(guard));
    }

    #[test]
    fn test_writer_waits_for_last_reader() {
        let lock = SessionLock::new();
        let first = block_on(lock.acquire_read());
        let second = block_on(lock.acquire_read());

        let mut writer = task::spawn(lock.acquire_write());
        assert_pending!(writer.poll());

        block_on(lock.release_read(first));
        assert_pending!(writer.poll());

        block_on(lock.release_read(second));
        assert!(writer.is_woken());
        let guard = assert_ready!(writer.poll());

        assert!(lock.writer_active());
        assert_eq!(lock.active_readers(), 0);
        lock.release_write(guard);
    }

    #[test]
    fn test_second_writer_waits_for_first() {
        let lock = SessionLock::new();
        let first = block_on(lock.acquire_write());

        let mut second = task::spawn(lock.acquire_write());
        assert_pending!(second.poll());
        assert!(lock.try_acquire_write().is_none());

        lock.release_write(first);
        let guard = assert_ready!(second.poll());
        assert!(lock.writer_active());

        drop(guard);
        assert!(lock.state().is_idle());
    }

    #[test]
    fn test_dropping_write_guard_releases_gate() {
        let lock = SessionLock::new();
        {
            let _guard = lock.try_acquire_write().unwrap();
            assert!(lock.writer_active());
        }
        assert!(!lock.writer_active());
        assert!(lock.try_acquire_write().is_some());
    }

    #[test]
    fn test_with_read_releases_after_section() {
        let lock = SessionLock::new();
        let value = block_on(lock.with_read(async {
            assert_eq!(lock.active_readers(), 1);
            42
        }));
        assert_eq!(value, 42);
        assert!(lock.state().is_idle());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_mutual_exclusion_under_contention() {
        let lock = Arc::new(SessionLock::new());
        let writers_inside = Arc::new(AtomicUsize::new(0));
        let violations = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();

        for i in 0..32 {
            let lock = Arc::clone(&lock);
            let writers_inside = Arc::clone(&writers_inside);
            let violations = Arc::clone(&violations);

            handles.push(tokio::spawn(async move {
                for _ in 0..20 {
                    if i % 4 == 0 {
                        let guard = lock.acquire_write().await;
                        if writers_inside.fetch_add(1, Ordering::SeqCst) != 0
                            || lock.active_readers() != 0
                        {
                            violations.fetch_add(1, Ordering::SeqCst);
                        }
                        tokio::task::yield_now().await;
                        writers_inside.fetch_sub(1, Ordering::SeqCst);
                        lock.release_write(guard);
                    } else {
                        let guard = lock.acquire_read().await;
                        if writers_inside.load(Ordering::SeqCst) != 0 || lock.writer_active() {
                            violations.fetch_add(1, Ordering::SeqCst);
                        }
                        tokio::task::yield_now().await;
                        lock.release_read(guard).await;
                    }
                }
            }));
        }

        for handle in handles {
            tokio::time::timeout(Duration::from_secs(10), handle)
                .await
                .expect("contention test timed out")
                .unwrap();
        }

        assert_eq!(violations.load(Ordering::SeqCst), 0);
        assert!(lock.state().is_idle());
    }
}
