//! Incremental RESP Frame Parser
//!
//! This module turns buffered bytes into frames. It performs no I/O: the
//! caller appends whatever arrived from the network and asks for the next
//! frame. [`FrameStream`](super::stream::FrameStream) drives it over an async
//! reader; [`Frames`] drives it over an in-memory slice.
//!
//! ## How the Parser Works
//!
//! [`RespParser::parse`] looks at the front of the buffer and returns one of:
//! - `Decoded::Frame(value, consumed)` - a complete frame
//! - `Decoded::Invalid(error, consumed)` - malformed input; skip `consumed` bytes and go on
//! - `Decoded::Skipped(consumed)` - a line that carries no frame
//! - `Decoded::Incomplete` - wait for more bytes
//!
//! Parsing is line oriented. A header line must end in CRLF; lines that end in
//! a bare LF (or hold nothing but the terminator) are dropped. Bulk bodies are
//! taken by length, so CR and LF bytes inside a body never end it early.
//!
//! `parse` is stateless. `decode` remembers how far it got through an array
//! that has not fully arrived, so a large request trickling in is scanned
//! once rather than from its `*` header on every read.
//!
//! ## Error Recovery
//!
//! Malformed headers are never fatal. The offending line is consumed, an error
//! is reported, and parsing resumes at the next line of the same buffer. A
//! header line longer than [`MAX_LINE_LENGTH`] is reported as too large and
//! everything buffered so far is dropped.

use crate::protocol::types::{prefix, RespValue};
use bytes::{Buf, Bytes, BytesMut};
use std::io;
use thiserror::Error;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum length of a header line still waiting for its LF (64 KB)
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Malformed input. Parsing continues after reporting one of these.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// `:` line whose payload is not a 64-bit integer
    #[error("illegal number {0}")]
    InvalidInteger(String),

    /// `$` header with a non-numeric length or a length below -1
    #[error("illegal bulk number {0}")]
    InvalidBulkLength(String),

    /// `*` header with a non-numeric or negative count
    #[error("illegal array number {0}")]
    InvalidArrayLength(String),

    /// Array element header that is not a `$<length>` line
    #[error("illegal bulk string header {0}")]
    InvalidBulkHeader(String),

    /// Status or error line that is not valid UTF-8
    #[error("invalid UTF-8 in {0} line")]
    InvalidUtf8(&'static str),

    /// Bulk length above the configured limit, or an unterminated header
    /// line above [`MAX_LINE_LENGTH`]
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: u64, max: usize },
}

/// Why a frame could not be produced.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Malformed frame; the stream is still usable
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The source ended cleanly between frames
    #[error("connection closed")]
    Closed,

    /// The source failed, or ended in the middle of a frame
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FrameError {
    /// Transport failures end the frame sequence; protocol errors do not.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, FrameError::Protocol(_))
    }
}

/// One element of a frame sequence: a frame, or the reason there is none.
pub type Payload = Result<RespValue, FrameError>;

/// The outcome of examining the front of a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete frame spanning `consumed` bytes
    Frame(RespValue, usize),
    /// Malformed input; the first `consumed` bytes should be dropped
    Invalid(ProtocolError, usize),
    /// A line without a frame; the first `consumed` bytes should be dropped
    Skipped(usize),
    /// Not enough data yet
    Incomplete,
}

/// Progress through an array whose elements have not all arrived.
#[derive(Debug, Clone)]
struct PartialArray {
    /// Elements still to come
    remaining: u64,
    /// Offset of the next element header, counted from the frame start
    pos: usize,
    items: Vec<Bytes>,
}

enum Step {
    Done(Decoded),
    Pending(PartialArray),
}

/// A RESP frame parser.
///
/// Between `decode` calls the parser holds the elements of an array it has
/// only partly seen. The buffer is not advanced until the frame completes, so
/// it must only grow between calls; use [`reset`](Self::reset) before
/// handing `decode` a different buffer.
///
/// # Example
///
/// ```
/// use shardkv::protocol::{RespParser, RespValue};
/// use bytes::BytesMut;
///
/// let mut parser = RespParser::new();
/// let mut buffer = BytesMut::from(&b"+OK\r\n:1\r\n"[..]);
///
/// assert_eq!(parser.decode(&mut buffer), Some(Ok(RespValue::ok())));
/// assert_eq!(parser.decode(&mut buffer), Some(Ok(RespValue::Integer(1))));
/// assert_eq!(parser.decode(&mut buffer), None);
/// ```
#[derive(Debug, Clone)]
pub struct RespParser {
    /// Largest bulk body accepted
    max_bulk_size: usize,
    /// Array left unfinished by the last `decode`
    partial: Option<PartialArray>,
}

impl Default for RespParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RespParser {
    /// Creates a parser with the default bulk size limit.
    pub fn new() -> Self {
        Self::with_max_bulk_size(MAX_BULK_SIZE)
    }

    /// Creates a parser that rejects bulk bodies longer than `max_bulk_size`.
    pub fn with_max_bulk_size(max_bulk_size: usize) -> Self {
        Self {
            max_bulk_size,
            partial: None,
        }
    }

    /// Decodes the next frame from `buf`, consuming the bytes it spans.
    ///
    /// Skipped lines are consumed silently. Returns `None` once the buffer
    /// holds no complete frame; whatever remains is left for the next call.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Option<Result<RespValue, ProtocolError>> {
        loop {
            let step = match self.partial.take() {
                Some(partial) => self.resume_array(buf, partial),
                None => self.step(buf),
            };

            match step {
                Step::Pending(partial) => {
                    self.partial = Some(partial);
                    return None;
                }
                Step::Done(Decoded::Frame(value, consumed)) => {
                    buf.advance(consumed);
                    return Some(Ok(value));
                }
                Step::Done(Decoded::Invalid(err, consumed)) => {
                    buf.advance(consumed);
                    return Some(Err(err));
                }
                Step::Done(Decoded::Skipped(consumed)) => buf.advance(consumed),
                Step::Done(Decoded::Incomplete) => return None,
            }
        }
    }

    /// Examines the front of `buf` without consuming anything.
    pub fn parse(&self, buf: &[u8]) -> Decoded {
        match self.step(buf) {
            Step::Done(decoded) => decoded,
            Step::Pending(_) => Decoded::Incomplete,
        }
    }

    /// Returns true while `decode` is holding part of an array.
    pub fn has_partial(&self) -> bool {
        self.partial.is_some()
    }

    /// Forgets any partly decoded array.
    pub fn reset(&mut self) {
        self.partial = None;
    }

    fn step(&self, buf: &[u8]) -> Step {
        let line_end = match line_end(buf, 0) {
            Ok(Some(end)) => end,
            Ok(None) => return Step::Done(Decoded::Incomplete),
            Err(err) => return Step::Done(Decoded::Invalid(err, buf.len())),
        };
        let Some(line) = header(&buf[..line_end]) else {
            return Step::Done(Decoded::Skipped(line_end));
        };

        let decoded = match line[0] {
            prefix::SIMPLE_STRING => match std::str::from_utf8(&line[1..]) {
                Ok(s) => Decoded::Frame(RespValue::SimpleString(s.to_string()), line_end),
                Err(_) => Decoded::Invalid(ProtocolError::InvalidUtf8("status"), line_end),
            },
            prefix::ERROR => match std::str::from_utf8(&line[1..]) {
                Ok(s) => Decoded::Frame(RespValue::Error(s.to_string()), line_end),
                Err(_) => Decoded::Invalid(ProtocolError::InvalidUtf8("error"), line_end),
            },
            prefix::INTEGER => match parse_i64(&line[1..]) {
                Some(n) => Decoded::Frame(RespValue::Integer(n), line_end),
                None => Decoded::Invalid(ProtocolError::InvalidInteger(lossy(&line[1..])), line_end),
            },
            prefix::BULK_STRING => self.parse_bulk_string(buf, &line[1..], line_end),
            prefix::ARRAY => return self.parse_array(buf, &line[1..], line_end),
            _ => Decoded::Skipped(line_end),
        };
        Step::Done(decoded)
    }

    /// Parses a bulk string whose `$<length>` header spans `buf[..body_start]`.
    fn parse_bulk_string(&self, buf: &[u8], length: &[u8], body_start: usize) -> Decoded {
        let length = match parse_i64(length) {
            Some(n) if n >= -1 => n,
            _ => {
                return Decoded::Invalid(
                    ProtocolError::InvalidBulkLength(lossy(length)),
                    body_start,
                )
            }
        };

        if length == -1 {
            return Decoded::Frame(RespValue::Null, body_start);
        }

        let length = match self.check_size(length) {
            Ok(length) => length,
            Err(err) => return Decoded::Invalid(err, body_start),
        };

        match body(buf, body_start, length) {
            Some((data, consumed)) => Decoded::Frame(RespValue::BulkString(data), consumed),
            None => Decoded::Incomplete,
        }
    }

    /// Parses an array of bulk strings whose `*<count>` header spans
    /// `buf[..first_element]`.
    fn parse_array(&self, buf: &[u8], count: &[u8], first_element: usize) -> Step {
        let count = match parse_i64(count) {
            Some(n) if n >= 0 => n as u64,
            _ => {
                return Step::Done(Decoded::Invalid(
                    ProtocolError::InvalidArrayLength(lossy(count)),
                    first_element,
                ))
            }
        };

        if count == 0 {
            return Step::Done(Decoded::Frame(RespValue::Array(Vec::new()), first_element));
        }

        let partial = PartialArray {
            remaining: count,
            pos: first_element,
            items: Vec::with_capacity(count.min(1024) as usize),
        };
        self.resume_array(buf, partial)
    }

    /// Continues an array from the element header at `partial.pos`.
    fn resume_array(&self, buf: &[u8], mut partial: PartialArray) -> Step {
        while partial.remaining > 0 {
            let line_end = match line_end(buf, partial.pos) {
                Ok(Some(end)) => end,
                Ok(None) => return Step::Pending(partial),
                Err(err) => return Step::Done(Decoded::Invalid(err, buf.len())),
            };
            let line = &buf[partial.pos..line_end];

            if line.len() < 4 || line[line.len() - 2] != b'\r' || line[0] != prefix::BULK_STRING {
                return Step::Done(Decoded::Invalid(
                    ProtocolError::InvalidBulkHeader(lossy(line.trim_ascii_end())),
                    line_end,
                ));
            }

            let length = &line[1..line.len() - 2];
            let length = match parse_i64(length) {
                Some(n) if n >= -1 => n,
                _ => {
                    return Step::Done(Decoded::Invalid(
                        ProtocolError::InvalidBulkLength(lossy(length)),
                        line_end,
                    ))
                }
            };

            if length == -1 {
                partial.items.push(Bytes::new());
                partial.pos = line_end;
            } else {
                let length = match self.check_size(length) {
                    Ok(length) => length,
                    Err(err) => return Step::Done(Decoded::Invalid(err, line_end)),
                };

                // The header is read again once the body is complete
                let Some((data, next)) = body(buf, line_end, length) else {
                    return Step::Pending(partial);
                };
                partial.items.push(data);
                partial.pos = next;
            }
            partial.remaining -= 1;
        }

        Step::Done(Decoded::Frame(RespValue::Array(partial.items), partial.pos))
    }

    fn check_size(&self, length: i64) -> Result<usize, ProtocolError> {
        let size = length as u64;
        if size > self.max_bulk_size as u64 {
            return Err(ProtocolError::MessageTooLarge {
                size,
                max: self.max_bulk_size,
            });
        }
        Ok(size as usize)
    }
}

/// Returns the index just past the first LF at or after `from`.
///
/// Fails once more than [`MAX_LINE_LENGTH`] bytes follow `from` with no LF.
#[inline]
fn line_end(buf: &[u8], from: usize) -> Result<Option<usize>, ProtocolError> {
    let pending = &buf[from..];
    match pending.iter().position(|&b| b == b'\n') {
        Some(pos) => Ok(Some(from + pos + 1)),
        None if pending.len() > MAX_LINE_LENGTH => Err(ProtocolError::MessageTooLarge {
            size: pending.len() as u64,
            max: MAX_LINE_LENGTH,
        }),
        None => Ok(None),
    }
}

/// Strips the CRLF from a complete line, or returns `None` if the line is
/// too short or not CRLF-terminated.
#[inline]
fn header(line: &[u8]) -> Option<&[u8]> {
    let len = line.len();
    if len <= 2 || line[len - 2] != b'\r' {
        return None;
    }
    Some(&line[..len - 2])
}

/// Takes `length` body bytes at `start` plus a 2-byte terminator.
fn body(buf: &[u8], start: usize, length: usize) -> Option<(Bytes, usize)> {
    let end = start.checked_add(length)?.checked_add(2)?;
    if buf.len() < end {
        return None;
    }
    Some((Bytes::copy_from_slice(&buf[start..start + length]), end))
}

fn parse_i64(text: &[u8]) -> Option<i64> {
    std::str::from_utf8(text).ok()?.parse().ok()
}

fn lossy(text: &[u8]) -> String {
    String::from_utf8_lossy(text).into_owned()
}

/// A frame sequence over an in-memory byte slice.
///
/// Mirrors [`FrameStream`](super::stream::FrameStream): frames and protocol
/// errors are yielded in order, then one final transport error (`Closed`, or
/// `Io(UnexpectedEof)` if a partial frame is left over), then nothing.
#[derive(Debug)]
pub struct Frames {
    buffer: BytesMut,
    parser: RespParser,
    finished: bool,
}

impl Frames {
    /// Creates a frame sequence over a copy of `data`.
    pub fn new(data: &[u8]) -> Self {
        Self {
            buffer: BytesMut::from(data),
            parser: RespParser::new(),
            finished: false,
        }
    }
}

impl Iterator for Frames {
    type Item = Payload;

    fn next(&mut self) -> Option<Payload> {
        if self.finished {
            return None;
        }
        match self.parser.decode(&mut self.buffer) {
            Some(decoded) => Some(decoded.map_err(FrameError::from)),
            None => {
                self.finished = true;
                Some(Err(end_of_stream(&self.buffer)))
            }
        }
    }
}

/// The terminal error for a source that has no more bytes.
pub(crate) fn end_of_stream(leftover: &[u8]) -> FrameError {
    if leftover.is_empty() {
        FrameError::Closed
    } else {
        FrameError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("stream ended inside a frame ({} bytes pending)", leftover.len()),
        ))
    }
}

/// Decodes every frame in `data`.
///
/// Stops at the clean end of the data. The first protocol or transport error
/// is returned instead of the frames.
pub fn parse_bytes(data: &[u8]) -> Result<Vec<RespValue>, FrameError> {
    let mut values = Vec::new();
    for payload in Frames::new(data) {
        match payload {
            Ok(value) => values.push(value),
            Err(FrameError::Closed) => break,
            Err(err) => return Err(err),
        }
    }
    Ok(values)
}

/// Decodes the first payload in `data`.
pub fn parse_one(data: &[u8]) -> Payload {
    Frames::new(data).next().unwrap_or(Err(FrameError::Closed))
}
