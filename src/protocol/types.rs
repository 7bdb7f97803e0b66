//! Wire Protocol Types
//!
//! The protocol is plain text, one frame per line.
//!
//! ## Client → Server
//!
//! - First frame: the role token, `reader` or `writer`. A writer may put its
//!   first command on the same line: `writer start`.
//! - Writer frames afterwards: `start`, `stop`, `exit`, or any other text,
//!   which is a message to append.
//!
//! ## Server → Client
//!
//! - Writer replies: `OK: <detail>\n` or `ERROR: <detail>\n`.
//! - Reader reply: zero or more `[<timestamp>] <text>\n` lines, then the
//!   connection is closed.

use std::fmt;

/// Role token for read-only clients
pub const READER_TOKEN: &str = "reader";

/// Role token for appending clients
pub const WRITER_TOKEN: &str = "writer";

/// Line terminator for every reply
pub const LINE_END: &str = "\n";

/// The role a connection announced in its first frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Nothing recognizable was sent
    Unknown,
    /// One-shot snapshot of the message log
    Reader,
    /// Persistent session that may append messages
    Writer,
}

impl Role {
    fn token(self) -> Option<&'static str> {
        match self {
            Role::Unknown => None,
            Role::Reader => Some(READER_TOKEN),
            Role::Writer => Some(WRITER_TOKEN),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token().unwrap_or("unknown"))
    }
}

/// The outcome of role negotiation on the first frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// The negotiated role
    pub role: Role,
    /// Text following the role token on the same frame, if any
    pub payload: Option<String>,
}

impl Handshake {
    /// Determines the role from the first frame.
    ///
    /// A frame that starts with a role token wins outright. Otherwise the
    /// token is searched for anywhere in the frame, which accepts clients that
    /// glue the role onto other bytes. `writer` is checked before `reader` at
    /// each step.
    ///
    /// # Example
    ///
    /// ```
    /// use rwgate::protocol::{Handshake, Role};
    ///
    /// let hs = Handshake::negotiate("writer start");
    /// assert_eq!(hs.role, Role::Writer);
    /// assert_eq!(hs.payload.as_deref(), Some("start"));
    ///
    /// assert_eq!(Handshake::negotiate("spectator").role, Role::Unknown);
    /// ```
    pub fn negotiate(frame: &str) -> Self {
        for role in [Role::Writer, Role::Reader] {
            if let Some(rest) = role.token().and_then(|t| frame.strip_prefix(t)) {
                return Self::with_payload(role, rest);
            }
        }

        for role in [Role::Writer, Role::Reader] {
            if let Some(token) = role.token() {
                if let Some(pos) = frame.find(token) {
                    return Self::with_payload(role, &frame[pos + token.len()..]);
                }
            }
        }

        Self {
            role: Role::Unknown,
            payload: None,
        }
    }

    fn with_payload(role: Role, rest: &str) -> Self {
        let rest = rest.trim();
        Self {
            role,
            payload: (!rest.is_empty()).then(|| rest.to_string()),
        }
    }
}

/// A single writer command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Acquire the writer gate
    Start,
    /// Release the writer gate
    Stop,
    /// End the session
    Exit,
    /// Blank frame, ignored
    Empty,
    /// Anything else is a message to append
    Append(String),
}

impl Command {
    /// Interprets one writer frame. Keywords match exactly.
    pub fn parse(frame: &str) -> Self {
        match frame.trim() {
            "" => Command::Empty,
            "start" => Command::Start,
            "stop" => Command::Stop,
            "exit" => Command::Exit,
            text => Command::Append(text.to_string()),
        }
    }
}

/// A reply line sent to a writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `OK: <detail>`
    Ok(String),
    /// `ERROR: <detail>`
    Error(String),
}

impl Reply {
    /// Creates a success reply.
    pub fn ok(detail: impl Into<String>) -> Self {
        Reply::Ok(detail.into())
    }

    /// Creates an error reply.
    pub fn error(detail: impl Into<String>) -> Self {
        Reply::Error(detail.into())
    }

    pub fn session_started() -> Self {
        Reply::ok("writer session started")
    }

    pub fn session_stopped() -> Self {
        Reply::ok("writer session stopped")
    }

    pub fn no_active_session() -> Self {
        Reply::error("no active writer session")
    }

    pub fn start_first() -> Self {
        Reply::error("you must start writing first")
    }

    /// Returns true for `OK` replies.
    pub fn is_ok(&self) -> bool {
        matches!(self, Reply::Ok(_))
    }

    /// Serializes the reply to its wire form, newline included.
    pub fn serialize(&self) -> Vec<u8> {
        format!("{}{}", self, LINE_END).into_bytes()
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Ok(detail) => write!(f, "OK: {}", detail),
            Reply::Error(detail) => write!(f, "ERROR: {}", detail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiate_exact_roles() {
        assert_eq!(
            Handshake::negotiate("reader"),
            Handshake {
                role: Role::Reader,
                payload: None
            }
        );
        assert_eq!(
            Handshake::negotiate("writer"),
            Handshake {
                role: Role::Writer,
                payload: None
            }
        );
    }

    #[test]
    fn test_negotiate_writer_with_first_command() {
        let hs = Handshake::negotiate("writer start");
        assert_eq!(hs.role, Role::Writer);
        assert_eq!(hs.payload.as_deref(), Some("start"));

        // No separator at all still splits after the token
        let hs = Handshake::negotiate("writerstart");
        assert_eq!(hs.payload.as_deref(), Some("start"));
    }

    #[test]
    fn test_negotiate_substring_fallback() {
        let hs = Handshake::negotiate("role=writer hello");
        assert_eq!(hs.role, Role::Writer);
        assert_eq!(hs.payload.as_deref(), Some("hello"));

        let hs = Handshake::negotiate("i am a reader");
        assert_eq!(hs.role, Role::Reader);
        assert_eq!(hs.payload, None);
    }

    #[test]
    fn test_negotiate_prefix_beats_substring() {
        // Starts with reader, so the later "writer" is just payload
        let hs = Handshake::negotiate("reader writer");
        assert_eq!(hs.role, Role::Reader);
        assert_eq!(hs.payload.as_deref(), Some("writer"));
    }

    #[test]
    fn test_negotiate_unknown() {
        assert_eq!(Handshake::negotiate("spectator").role, Role::Unknown);
        assert_eq!(Handshake::negotiate("").role, Role::Unknown);
        assert_eq!(Handshake::negotiate("READER").role, Role::Unknown);
    }

    #[test]
    fn test_command_parse() {
        assert_eq!(Command::parse("start"), Command::Start);
        assert_eq!(Command::parse("stop"), Command::Stop);
        assert_eq!(Command::parse("exit"), Command::Exit);
        assert_eq!(Command::parse("   "), Command::Empty);
        assert_eq!(
            Command::parse("hello world"),
            Command::Append("hello world".to_string())
        );
        // Keywords are exact, not prefixes
        assert_eq!(
            Command::parse("starting now"),
            Command::Append("starting now".to_string())
        );
    }

    #[test]
    fn test_reply_wire_format() {
        assert_eq!(
            Reply::session_started().serialize(),
            b"OK: writer session started\n".to_vec()
        );
        assert_eq!(
            Reply::start_first().serialize(),
            b"ERROR: you must start writing first\n".to_vec()
        );
        assert!(Reply::session_stopped().is_ok());
        assert!(!Reply::no_active_session().is_ok());
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Reader.to_string(), "reader");
        assert_eq!(Role::Writer.to_string(), "writer");
        assert_eq!(Role::Unknown.to_string(), "unknown");
    }
}
