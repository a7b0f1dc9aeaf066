//! Message framing on top of a TCP byte stream.
//!
//! TCP is a *stream* protocol: a single `read()` may return less than one
//! complete message, or the tail of one message followed by the head of the
//! next.  A framing rule tells the receiver where one message ends.
//!
//! Three rules are supported:
//!
//! ```text
//! Raw             [json...]                    one read == one message (no framing)
//! LengthPrefixed  [len:4 big-endian][json...]  len = payload size in bytes
//! Delimited       [json...][0x0A]              message ends at the delimiter byte
//! ```
//!
//! `Raw` reproduces the behaviour of the legacy backend, which writes each
//! JSON reply with a single `send()` and no boundary marker.  It only works
//! while the network happens to deliver each reply in exactly one read.  The
//! other two rules reassemble partial reads and split coalesced reads, and are
//! the ones to use with a server that supports them.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing::trace;

/// Upper bound on a single message, used when no explicit limit is configured.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Size of the length prefix in [`Framing::LengthPrefixed`].
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Delimiter used by [`Framing::json_lines`].
pub const NEWLINE: u8 = b'\n';

/// Errors produced while encoding or decoding frames.
///
/// Every decode error means the byte stream can no longer be trusted; the
/// owner of the connection is expected to drop it and reconnect.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FramingError {
    /// A frame (declared or accumulated) is larger than the configured limit.
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    /// The payload contains the delimiter byte, so it cannot be framed by it.
    #[error("payload contains the frame delimiter byte 0x{0:02X}")]
    DelimiterInPayload(u8),

    /// The framing name in a configuration value is not recognised.
    #[error("unknown framing '{0}' (expected raw, length_prefixed or lines)")]
    UnknownFraming(String),
}

/// How message boundaries are marked on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Each transport read is treated as one complete message.
    Raw,
    /// Each message is preceded by its length as a big-endian `u32`.
    LengthPrefixed { max_frame_len: usize },
    /// Each message is terminated by `delimiter`.
    Delimited { delimiter: u8, max_frame_len: usize },
}

impl Framing {
    /// Length-prefixed framing with the default size limit.
    pub fn length_prefixed() -> Self {
        Framing::LengthPrefixed {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    /// Newline-delimited framing (one JSON document per line).
    pub fn json_lines() -> Self {
        Framing::Delimited {
            delimiter: NEWLINE,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    /// Returns a copy with a different size limit.  `Raw` has no limit.
    pub fn with_max_frame_len(self, max: usize) -> Self {
        match self {
            Framing::Raw => Framing::Raw,
            Framing::LengthPrefixed { .. } => Framing::LengthPrefixed { max_frame_len: max },
            Framing::Delimited { delimiter, .. } => Framing::Delimited {
                delimiter,
                max_frame_len: max,
            },
        }
    }
}

impl Default for Framing {
    fn default() -> Self {
        Framing::length_prefixed()
    }
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Framing::Raw => f.write_str("raw"),
            Framing::LengthPrefixed { .. } => f.write_str("length_prefixed"),
            Framing::Delimited { .. } => f.write_str("lines"),
        }
    }
}

impl FromStr for Framing {
    type Err = FramingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" => Ok(Framing::Raw),
            "length_prefixed" | "length-prefixed" => Ok(Framing::length_prefixed()),
            "lines" | "json_lines" | "delimited" => Ok(Framing::json_lines()),
            other => Err(FramingError::UnknownFraming(other.to_string())),
        }
    }
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Wraps `payload` in the given framing, ready to be written to the socket.
///
/// # Errors
///
/// - [`FramingError::FrameTooLarge`] if the payload exceeds the frame limit.
/// - [`FramingError::DelimiterInPayload`] if delimited framing is used and the
///   payload contains the delimiter.
///
/// # Examples
///
/// ```rust
/// use qalink_core::protocol::framing::{encode_frame, Framing};
///
/// let bytes = encode_frame(&Framing::length_prefixed(), b"{}").unwrap();
/// assert_eq!(bytes, vec![0, 0, 0, 2, b'{', b'}']);
/// ```
pub fn encode_frame(framing: &Framing, payload: &[u8]) -> Result<Vec<u8>, FramingError> {
    match *framing {
        Framing::Raw => Ok(payload.to_vec()),
        Framing::LengthPrefixed { max_frame_len } => {
            let max = max_frame_len.min(u32::MAX as usize);
            if payload.len() > max {
                return Err(FramingError::FrameTooLarge {
                    len: payload.len(),
                    max,
                });
            }
            let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
            buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
            buf.extend_from_slice(payload);
            Ok(buf)
        }
        Framing::Delimited {
            delimiter,
            max_frame_len,
        } => {
            if payload.len() > max_frame_len {
                return Err(FramingError::FrameTooLarge {
                    len: payload.len(),
                    max: max_frame_len,
                });
            }
            if payload.contains(&delimiter) {
                return Err(FramingError::DelimiterInPayload(delimiter));
            }
            let mut buf = Vec::with_capacity(payload.len() + 1);
            buf.extend_from_slice(payload);
            buf.push(delimiter);
            Ok(buf)
        }
    }
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Reassembles messages from the chunks a connection delivers.
///
/// Bytes are accumulated in an internal buffer across calls to
/// [`FrameDecoder::push`]; every complete message found is returned in
/// arrival order and removed from the buffer.  An incomplete tail stays
/// buffered until more bytes arrive.
///
/// One decoder belongs to one connection.  Call [`FrameDecoder::reset`] when
/// the connection is replaced, since half a message from a dead stream must
/// never be glued to bytes from a new one.
#[derive(Debug)]
pub struct FrameDecoder {
    framing: Framing,
    buf: Vec<u8>,
    /// Leading bytes of `buf` already known to hold no delimiter.
    scanned: usize,
}

impl FrameDecoder {
    /// Creates an empty decoder for `framing`.
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            buf: Vec::with_capacity(4096),
            scanned: 0,
        }
    }

    /// Number of bytes held back waiting for the rest of a message.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Discards any partially received message.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.scanned = 0;
    }

    /// Feeds one chunk and returns every message it completes.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::FrameTooLarge`] when a declared length, or an
    /// undelimited run of bytes, exceeds the frame limit.  The buffer content
    /// is unspecified afterwards; the caller should drop the connection.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Vec<u8>>, FramingError> {
        match self.framing {
            Framing::Raw => {
                if chunk.is_empty() {
                    Ok(Vec::new())
                } else {
                    Ok(vec![chunk.to_vec()])
                }
            }
            Framing::LengthPrefixed { max_frame_len } => {
                self.buf.extend_from_slice(chunk);
                self.drain_length_prefixed(max_frame_len)
            }
            Framing::Delimited {
                delimiter,
                max_frame_len,
            } => {
                self.buf.extend_from_slice(chunk);
                self.drain_delimited(delimiter, max_frame_len)
            }
        }
    }

    fn drain_length_prefixed(&mut self, max: usize) -> Result<Vec<Vec<u8>>, FramingError> {
        let mut frames = Vec::new();
        loop {
            if self.buf.len() < LENGTH_PREFIX_SIZE {
                break;
            }
            let len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]])
                as usize;
            if len > max {
                return Err(FramingError::FrameTooLarge { len, max });
            }
            let total = LENGTH_PREFIX_SIZE + len;
            if self.buf.len() < total {
                trace!(have = self.buf.len(), need = total, "partial frame buffered");
                break;
            }
            frames.push(self.buf[LENGTH_PREFIX_SIZE..total].to_vec());
            // O(n) shift; messages here are small JSON documents.
            self.buf.drain(..total);
        }
        Ok(frames)
    }

    fn drain_delimited(
        &mut self,
        delimiter: u8,
        max: usize,
    ) -> Result<Vec<Vec<u8>>, FramingError> {
        let mut frames = Vec::new();
        let mut start = 0;
        let mut from = self.scanned;
        while let Some(offset) = self.buf[from..].iter().position(|b| *b == delimiter) {
            let end = from + offset;
            let len = end - start;
            if len > max {
                return Err(FramingError::FrameTooLarge { len, max });
            }
            // Blank lines carry no message.
            if len > 0 {
                frames.push(self.buf[start..end].to_vec());
            }
            start = end + 1;
            from = start;
        }
        self.buf.drain(..start);
        self.scanned = self.buf.len();
        if self.buf.len() > max {
            return Err(FramingError::FrameTooLarge {
                len: self.buf.len(),
                max,
            });
        }
        Ok(frames)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
