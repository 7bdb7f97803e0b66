//! Text Protocol Implementation
//!
//! This module implements the line-oriented wire protocol spoken between
//! clients and the server.
//!
//! ## Overview
//!
//! Every frame is one line of text. The first frame names the client's role;
//! writers then send commands or messages, one per line, and receive one
//! `OK:`/`ERROR:` reply line for each.
//!
//! ## Modules
//!
//! - `types`: `Role`, `Handshake`, `Command` and `Reply`
//! - `parser`: Bounded newline frame decoder
//!
//! ## Example
//!
//! ```
//! use rwgate::protocol::{Command, FrameParser, Handshake, Reply, Role};
//! use bytes::BytesMut;
//!
//! let mut parser = FrameParser::new();
//! let mut buffer = BytesMut::from(&b"writer\nhello\n"[..]);
//!
//! let first = parser.decode(&mut buffer).unwrap().unwrap();
//! assert_eq!(Handshake::negotiate(&first).role, Role::Writer);
//!
//! let next = parser.decode(&mut buffer).unwrap().unwrap();
//! assert_eq!(Command::parse(&next), Command::Append("hello".to_string()));
//!
//! assert_eq!(Reply::start_first().to_string(), "ERROR: you must start writing first");
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{FrameError, FrameParser, MAX_FRAME_SIZE};
pub use types::{Command, Handshake, Reply, Role, READER_TOKEN, WRITER_TOKEN};
