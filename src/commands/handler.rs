//! Writer Command Handler
//!
//! This module maps a writer's command stream onto the shared
//! [`SessionLock`] and the [`MessageStore`].
//!
//! ## Commands
//!
//! | Command | Holding the gate              | Not holding the gate                    |
//! |---------|-------------------------------|-----------------------------------------|
//! | `start` | `OK: writer session started`  | wait for gate, `OK: writer session started` |
//! | `stop`  | release, `OK: writer session stopped` | `ERROR: no active writer session` |
//! | `exit`  | end the session               | end the session                         |
//! | blank   | ignored                       | ignored                                 |
//! | text    | append, relay `OK`/`ERROR`    | `ERROR: you must start writing first`   |
//!
//! A failed append never changes whether the session holds the gate.

use crate::connection::ConnectionStats;
use crate::protocol::{Command, Reply, Role};
use crate::storage::MessageStore;
use crate::sync::{SessionLock, WriteGuard};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-connection state.
///
/// Owned by exactly one connection handler and dropped with the connection.
/// Holding the write guard *is* holding the writer gate, so a session that
/// is dropped for any reason gives the gate back.
#[derive(Debug)]
pub struct Session {
    role: Role,
    write_guard: Option<WriteGuard>,
}

impl Session {
    /// Creates a session that does not hold the gate.
    pub fn new(role: Role) -> Self {
        Self {
            role,
            write_guard: None,
        }
    }

    /// The negotiated role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// True iff this connection currently owns the writer gate.
    pub fn holds_write_lock(&self) -> bool {
        self.write_guard.is_some()
    }
}

/// What the connection loop should do after a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    /// Send this reply and keep reading
    Reply(Reply),
    /// Keep reading, nothing to send
    Silent,
    /// Leave the command loop
    Exit,
}

/// Executes writer commands against the shared lock and store.
#[derive(Clone)]
pub struct CommandHandler {
    /// The one lock shared by every connection
    lock: Arc<SessionLock>,
    /// The persistence collaborator
    store: Arc<dyn MessageStore>,
    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,
}

impl CommandHandler {
    /// Creates a new command handler.
    pub fn new(
        lock: Arc<SessionLock>,
        store: Arc<dyn MessageStore>,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        Self { lock, store, stats }
    }

    pub fn lock(&self) -> &Arc<SessionLock> {
        &self.lock
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    pub fn stats(&self) -> &Arc<ConnectionStats> {
        &self.stats
    }

    /// Executes one command for `session`.
    ///
    /// `start` may wait indefinitely while another writer, or any reader,
    /// holds the gate.
    pub async fn execute(&self, session: &mut Session, command: Command) -> Flow {
        match command {
            Command::Start => self.cmd_start(session).await,
            Command::Stop => self.cmd_stop(session),
            Command::Exit => Flow::Exit,
            Command::Empty => Flow::Silent,
            Command::Append(text) => self.cmd_append(session, &text).await,
        }
    }

    /// Gives the gate back if the session still holds it.
    ///
    /// Called on every path out of a writer connection. Returns true when a
    /// gate was actually released.
    pub fn release_on_disconnect(&self, session: &mut Session) -> bool {
        match session.write_guard.take() {
            Some(guard) => {
                self.lock.release_write(guard);
                self.stats.lock_auto_released();
                true
            }
            None => false,
        }
    }

    async fn cmd_start(&self, session: &mut Session) -> Flow {
        if session.holds_write_lock() {
            debug!("Writer session already active");
            return Flow::Reply(Reply::session_started());
        }

        let guard = self.lock.acquire_write().await;
        session.write_guard = Some(guard);
        self.stats.writer_session_started();
        info!("Writer session started");

        Flow::Reply(Reply::session_started())
    }

    fn cmd_stop(&self, session: &mut Session) -> Flow {
        match session.write_guard.take() {
            Some(guard) => {
                self.lock.release_write(guard);
                info!("Writer session stopped");
                Flow::Reply(Reply::session_stopped())
            }
            None => {
                self.stats.command_rejected();
                Flow::Reply(Reply::no_active_session())
            }
        }
    }

    async fn cmd_append(&self, session: &mut Session, text: &str) -> Flow {
        if !session.holds_write_lock() {
            self.stats.command_rejected();
            info!("Rejected write, no active writer session");
            return Flow::Reply(Reply::start_first());
        }

        match self.store.append(text).await {
            Ok(ack) => {
                self.stats.message_appended();
                Flow::Reply(Reply::ok(ack.detail()))
            }
            Err(e) => {
                warn!(store = self.store.name(), error = %e, "Append failed");
                Flow::Reply(Reply::error(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Ack, MemoryStore, Message, StoreError};
    use async_trait::async_trait;
    use tokio_test::{assert_pending, assert_ready, block_on, task};

    /// A store whose appends always fail.
    struct FailingStore;

    #[async_trait]
    impl MessageStore for FailingStore {
        fn name(&self) -> &str {
            "failing"
        }

        async fn append(&self, _text: &str) -> Result<Ack, StoreError> {
            Err(StoreError::Unavailable("backend down".to_string()))
        }

        async fn fetch_all_ordered(&self) -> Result<Vec<Message>, StoreError> {
            Err(StoreError::Unavailable("backend down".to_string()))
        }
    }

    fn create_handler(store: Arc<dyn MessageStore>) -> CommandHandler {
        CommandHandler::new(
            Arc::new(SessionLock::new()),
            store,
            Arc::new(ConnectionStats::new()),
        )
    }

    #[tokio::test]
    async fn test_start_append_stop() {
        let store = Arc::new(MemoryStore::new());
        let handler = create_handler(store.clone());
        let mut session = Session::new(Role::Writer);
        assert_eq!(session.role(), Role::Writer);

        let flow = handler.execute(&mut session, Command::Start).await;
        assert_eq!(flow, Flow::Reply(Reply::session_started()));
        assert!(session.holds_write_lock());
        assert!(handler.lock().writer_active());

        let flow = handler
            .execute(&mut session, Command::Append("hello".to_string()))
            .await;
        assert_eq!(flow, Flow::Reply(Reply::ok("message stored")));
        assert_eq!(store.len(), 1);

        let flow = handler.execute(&mut session, Command::Stop).await;
        assert_eq!(flow, Flow::Reply(Reply::session_stopped()));
        assert!(!session.holds_write_lock());
        assert!(handler.lock().state().is_idle());
    }

    #[tokio::test]
    async fn test_append_without_start_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let handler = create_handler(store.clone());
        let mut session = Session::new(Role::Writer);

        let flow = handler
            .execute(&mut session, Command::Append("hello".to_string()))
            .await;
        assert_eq!(flow, Flow::Reply(Reply::start_first()));
        assert!(store.is_empty());
        assert_eq!(store.append_count(), 0);
        assert_eq!(handler.stats().snapshot().commands_rejected, 1);
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let handler = create_handler(Arc::new(MemoryStore::new()));
        let mut session = Session::new(Role::Writer);

        let flow = handler.execute(&mut session, Command::Stop).await;
        assert_eq!(flow, Flow::Reply(Reply::no_active_session()));
        assert!(!session.holds_write_lock());
    }

    #[tokio::test]
    async fn test_start_twice_keeps_single_hold() {
        let handler = create_handler(Arc::new(MemoryStore::new()));
        let mut session = Session::new(Role::Writer);

        handler.execute(&mut session, Command::Start).await;
        let flow = handler.execute(&mut session, Command::Start).await;
        assert_eq!(flow, Flow::Reply(Reply::session_started()));
        assert_eq!(handler.stats().snapshot().writer_sessions, 1);

        handler.execute(&mut session, Command::Stop).await;
        assert!(handler.lock().state().is_idle());
    }

    #[tokio::test]
    async fn test_exit_and_empty() {
        let handler = create_handler(Arc::new(MemoryStore::new()));
        let mut session = Session::new(Role::Writer);

        assert_eq!(handler.execute(&mut session, Command::Empty).await, Flow::Silent);
        assert_eq!(handler.execute(&mut session, Command::Exit).await, Flow::Exit);
    }

    #[tokio::test]
    async fn test_failed_append_keeps_gate() {
        let handler = create_handler(Arc::new(FailingStore));
        let mut session = Session::new(Role::Writer);

        handler.execute(&mut session, Command::Start).await;
        let flow = handler
            .execute(&mut session, Command::Append("hello".to_string()))
            .await;

        match flow {
            Flow::Reply(reply) => {
                assert!(!reply.is_ok());
                assert!(reply.to_string().contains("backend down"));
            }
            other => panic!("unexpected flow: {:?}", other),
        }
        assert!(session.holds_write_lock());
        assert!(handler.lock().writer_active());
    }

    #[test]
    fn test_second_writer_start_waits() {
        let handler = create_handler(Arc::new(MemoryStore::new()));
        let mut first = Session::new(Role::Writer);
        let mut second = Session::new(Role::Writer);

        block_on(handler.execute(&mut first, Command::Start));

        let mut pending = task::spawn(handler.execute(&mut second, Command::Start));
        assert_pending!(pending.poll());

        assert_eq!(
            handler.cmd_stop(&mut first),
            Flow::Reply(Reply::session_stopped())
        );
        assert!(pending.is_woken());
        assert_eq!(
            assert_ready!(pending.poll()),
            Flow::Reply(Reply::session_started())
        );
        drop(pending);
        assert!(second.holds_write_lock());
    }

    #[test]
    fn test_release_on_disconnect() {
        let handler = create_handler(Arc::new(MemoryStore::new()));
        let mut session = Session::new(Role::Writer);

        assert!(!handler.release_on_disconnect(&mut session));

        block_on(handler.execute(&mut session, Command::Start));
        assert!(handler.release_on_disconnect(&mut session));
        assert!(!session.holds_write_lock());
        assert!(handler.lock().try_acquire_write().is_some());
        assert_eq!(handler.stats().snapshot().locks_auto_released, 1);
    }
}
