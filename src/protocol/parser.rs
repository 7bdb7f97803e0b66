//! Line Frame Parser
//!
//! This module splits the incoming byte stream into text frames.
//!
//! ## Framing Rules
//!
//! 1. A frame ends at `\n`. A trailing `\r`, NUL padding and surrounding
//!    whitespace are stripped. Invalid UTF-8 is replaced, never rejected.
//! 2. No frame may exceed [`MAX_FRAME_SIZE`] bytes. An oversized frame is
//!    reported once as [`FrameError::TooLong`]; everything up to its
//!    terminating newline is then thrown away and parsing resumes cleanly on
//!    the next line.
//! 3. When the peer half-closes, leftover unterminated bytes become one last
//!    frame ([`FrameParser::decode_eof`]).
//! 4. Clients that never send a newline are served by the connection noticing
//!    an idle gap after a read: the buffered fragment is then taken as a
//!    whole frame ([`FrameParser::decode_idle`]). An idle gap also ends the
//!    discarding of an oversized line.
//! 5. A frame ends at its first NUL byte. Anything after it is padding.
//!
//! ## How the Parser Works
//!
//! The parser works directly on the connection's `BytesMut` buffer:
//! - `Ok(Some(frame))` - A complete frame was removed from the buffer
//! - `Ok(None)` - Need more data
//! - `Err(FrameError)` - The current line was too long and has been dropped

use bytes::{Buf, BytesMut};
use thiserror::Error;

/// Maximum size of a single frame in bytes
pub const MAX_FRAME_SIZE: usize = 4096;

/// Errors that can occur while framing input.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// A line grew past the frame limit
    #[error("frame exceeds {max} bytes")]
    TooLong { size: usize, max: usize },
}

/// Incremental newline-delimited frame decoder.
///
/// # Example
///
/// ```
/// use rwgate::protocol::FrameParser;
/// use bytes::BytesMut;
///
/// let mut parser = FrameParser::new();
/// let mut buffer = BytesMut::from(&b"writer\r\nsta"[..]);
///
/// assert_eq!(parser.decode(&mut buffer).unwrap().as_deref(), Some("writer"));
/// assert_eq!(parser.decode(&mut buffer).unwrap(), None);
///
/// buffer.extend_from_slice(b"rt\n");
/// assert_eq!(parser.decode(&mut buffer).unwrap().as_deref(), Some("start"));
/// ```
#[derive(Debug)]
pub struct FrameParser {
    max_frame_size: usize,
    /// Dropping the tail of an oversized line until its newline shows up
    discarding: bool,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameParser {
    /// Creates a parser with the default [`MAX_FRAME_SIZE`].
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    /// Creates a parser with a custom frame limit.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            discarding: false,
        }
    }

    /// The frame limit in bytes.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Attempts to take one complete frame off the front of `buf`.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, FrameError> {
        if self.discarding {
            match find_newline(buf) {
                Some(pos) => {
                    buf.advance(pos + 1);
                    self.discarding = false;
                }
                None => {
                    buf.clear();
                    return Ok(None);
                }
            }
        }

        match find_newline(buf) {
            Some(pos) if pos > self.max_frame_size => {
                buf.advance(pos + 1);
                Err(FrameError::TooLong {
                    size: pos,
                    max: self.max_frame_size,
                })
            }
            Some(pos) => {
                let line = buf.split_to(pos + 1);
                Ok(Some(clean_frame(&line[..pos])))
            }
            None if buf.len() > self.max_frame_size => {
                let size = buf.len();
                buf.clear();
                self.discarding = true;
                Err(FrameError::TooLong {
                    size,
                    max: self.max_frame_size,
                })
            }
            None => Ok(None),
        }
    }

    /// Like [`decode`](Self::decode), but the stream has ended: whatever is
    /// left in the buffer is returned as a final frame.
    pub fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, FrameError> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }

        Ok(self.decode_idle(buf))
    }

    /// The peer went quiet without finishing its line: the unterminated
    /// fragment is taken as a complete frame.
    ///
    /// Call only after [`decode`](Self::decode) returned `Ok(None)`. While an
    /// oversized line is being discarded, the idle gap ends it instead and
    /// nothing is returned.
    pub fn decode_idle(&mut self, buf: &mut BytesMut) -> Option<String> {
        if self.discarding || buf.is_empty() {
            buf.clear();
            self.discarding = false;
            return None;
        }

        let rest = buf.split();
        Some(clean_frame(&rest))
    }

    /// True while the tail of an oversized line is being dropped.
    pub fn is_discarding(&self) -> bool {
        self.discarding
    }
}

#[inline]
fn find_newline(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n')
}

fn clean_frame(raw: &[u8]) -> String {
    let raw = match raw.iter().position(|&b| b == 0) {
        Some(nul) => &raw[..nul],
        None => raw,
    };
    String::from_utf8_lossy(raw)
        .trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(data: &[u8]) -> BytesMut {
        BytesMut::from(data)
    }

    #[test]
    fn test_decode_single_line() {
        let mut parser = FrameParser::new();
        let mut buf = buffer(b"reader\n");
        assert_eq!(parser.decode(&mut buf).unwrap().as_deref(), Some("reader"));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_incomplete() {
        let mut parser = FrameParser::new();
        let mut buf = buffer(b"writ");
        assert_eq!(parser.decode(&mut buf).unwrap(), None);
        assert_eq!(&buf[..], b"writ");
    }

    #[test]
    fn test_decode_pipelined_lines() {
        let mut parser = FrameParser::new();
        let mut buf = buffer(b"writer\nstart\nhello\n");
        assert_eq!(parser.decode(&mut buf).unwrap().as_deref(), Some("writer"));
        assert_eq!(parser.decode(&mut buf).unwrap().as_deref(), Some("start"));
        assert_eq!(parser.decode(&mut buf).unwrap().as_deref(), Some("hello"));
        assert_eq!(parser.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_decode_strips_crlf_and_nul_padding() {
        let mut parser = FrameParser::new();
        let mut buf = buffer(b"writer\0\0\0\0\r\n");
        assert_eq!(parser.decode(&mut buf).unwrap().as_deref(), Some("writer"));
    }

    #[test]
    fn test_frame_ends_at_first_nul() {
        let mut parser = FrameParser::new();
        let mut buf = buffer(b"writer\0\x07junk\xffstart\n");
        assert_eq!(parser.decode(&mut buf).unwrap().as_deref(), Some("writer"));

        // Fixed-size C buffers: the tail after the string is never payload
        let mut buf = buffer(b"start\0\0\0garbage");
        assert_eq!(parser.decode_idle(&mut buf).as_deref(), Some("start"));
    }

    #[test]
    fn test_decode_idle_takes_unterminated_fragment() {
        let mut parser = FrameParser::new();
        let mut buf = buffer(b"writer");
        assert_eq!(parser.decode(&mut buf).unwrap(), None);
        assert_eq!(parser.decode_idle(&mut buf).as_deref(), Some("writer"));
        assert!(buf.is_empty());

        assert_eq!(parser.decode_idle(&mut buf), None);
    }

    #[test]
    fn test_decode_idle_ends_discarding() {
        let mut parser = FrameParser::with_max_frame_size(8);
        let mut buf = buffer(b"0123456789");
        assert!(parser.decode(&mut buf).is_err());
        assert!(parser.is_discarding());

        assert_eq!(parser.decode_idle(&mut buf), None);
        assert!(!parser.is_discarding());

        // The next undelimited frame is no longer swallowed
        buf.extend_from_slice(b"start");
        assert_eq!(parser.decode(&mut buf).unwrap(), None);
        assert_eq!(parser.decode_idle(&mut buf).as_deref(), Some("start"));
    }

    #[test]
    fn test_decode_blank_line() {
        let mut parser = FrameParser::new();
        let mut buf = buffer(b"\r\n");
        assert_eq!(parser.decode(&mut buf).unwrap().as_deref(), Some(""));
    }

    #[test]
    fn test_decode_invalid_utf8_is_lossy() {
        let mut parser = FrameParser::new();
        let mut buf = buffer(b"caf\xff\n");
        assert_eq!(
            parser.decode(&mut buf).unwrap().as_deref(),
            Some("caf\u{fffd}")
        );
    }

    #[test]
    fn test_oversized_complete_line_is_rejected() {
        let mut parser = FrameParser::with_max_frame_size(8);
        assert_eq!(parser.max_frame_size(), 8);
        let mut buf = buffer(b"0123456789abc\nstop\n");
        assert_eq!(
            parser.decode(&mut buf),
            Err(FrameError::TooLong { size: 13, max: 8 })
        );
        assert_eq!(parser.decode(&mut buf).unwrap().as_deref(), Some("stop"));
    }

    #[test]
    fn test_oversized_partial_line_discards_until_newline() {
        let mut parser = FrameParser::with_max_frame_size(8);
        let mut buf = buffer(b"0123456789");
        assert!(matches!(
            parser.decode(&mut buf),
            Err(FrameError::TooLong { .. })
        ));
        assert!(buf.is_empty());

        // More of the same line arrives and is silently dropped
        buf.extend_from_slice(b"still the same line");
        assert_eq!(parser.decode(&mut buf).unwrap(), None);
        assert!(buf.is_empty());

        buf.extend_from_slice(b"tail\nexit\n");
        assert_eq!(parser.decode(&mut buf).unwrap().as_deref(), Some("exit"));
    }

    #[test]
    fn test_line_at_exact_limit_is_accepted() {
        let mut parser = FrameParser::with_max_frame_size(5);
        let mut buf = buffer(b"hello\n");
        assert_eq!(parser.decode(&mut buf).unwrap().as_deref(), Some("hello"));
    }

    #[test]
    fn test_decode_eof_returns_unterminated_tail() {
        let mut parser = FrameParser::new();
        let mut buf = buffer(b"reader");
        assert_eq!(parser.decode(&mut buf).unwrap(), None);
        assert_eq!(
            parser.decode_eof(&mut buf).unwrap().as_deref(),
            Some("reader")
        );
        assert_eq!(parser.decode_eof(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_decode_eof_drains_complete_lines_first() {
        let mut parser = FrameParser::new();
        let mut buf = buffer(b"start\nhello");
        assert_eq!(
            parser.decode_eof(&mut buf).unwrap().as_deref(),
            Some("start")
        );
        assert_eq!(
            parser.decode_eof(&mut buf).unwrap().as_deref(),
            Some("hello")
        );
        assert_eq!(parser.decode_eof(&mut buf).unwrap(), None);
    }
}
