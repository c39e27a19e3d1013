//! RESP (Redis Serialization Protocol) Data Types
//!
//! This module defines the frames exchanged on the wire and their encoding.
//! Requests and replies share one grammar.
//!
//! ## Protocol Format
//!
//! Each frame starts with a type prefix byte:
//! - `+` Status (simple string)
//! - `-` Error
//! - `:` Integer
//! - `$` Bulk String
//! - `*` Array of bulk strings
//!
//! Header lines are terminated with CRLF (`\r\n`).
//!
//! ## Examples
//!
//! Status: `+OK\r\n`
//! Error: `-ERR unknown command\r\n`
//! Integer: `:1000\r\n`
//! Bulk String: `$5\r\nhello\r\n`
//! Null Bulk String: `$-1\r\n`
//! Array: `*2\r\n$3\r\nGET\r\n$4\r\nname\r\n`
//! Empty Array: `*0\r\n`
//!
//! Arrays are flat: every element is a bulk string.

use bytes::Bytes;
use std::fmt;

/// The CRLF terminator used in RESP protocol
pub const CRLF: &[u8] = b"\r\n";

/// RESP protocol type prefixes
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A decoded request or an encodable reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Status reply. Cannot contain CRLF.
    /// Format: `+<string>\r\n`
    SimpleString(String),

    /// Error reply.
    /// Format: `-<error message>\r\n`
    Error(String),

    /// 64-bit signed integer.
    /// Format: `:<integer>\r\n`
    Integer(i64),

    /// Binary-safe string.
    /// Format: `$<length>\r\n<data>\r\n`
    BulkString(Bytes),

    /// Null bulk string.
    /// Format: `$-1\r\n`
    Null,

    /// Array of bulk strings; empty encodes as `*0\r\n`.
    /// Format: `*<count>\r\n$<len>\r\n<data>\r\n...`
    Array(Vec<Bytes>),
}

impl RespValue {
    /// Creates a new status reply.
    ///
    /// # Example
    /// ```
    /// use shardkv::protocol::types::RespValue;
    /// let ok = RespValue::simple_string("OK");
    /// ```
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    /// Creates a new error reply.
    ///
    /// # Example
    /// ```
    /// use shardkv::protocol::types::RespValue;
    /// let err = RespValue::error("ERR unknown command");
    /// ```
    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    /// Creates a new integer reply.
    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    /// Creates a new bulk string reply.
    ///
    /// # Example
    /// ```
    /// use shardkv::protocol::types::RespValue;
    /// use bytes::Bytes;
    /// let bulk = RespValue::bulk_string(Bytes::from("hello"));
    /// ```
    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    /// Creates a null bulk string reply.
    pub fn null() -> Self {
        RespValue::Null
    }

    /// Creates an array reply.
    pub fn array(values: Vec<Bytes>) -> Self {
        RespValue::Array(values)
    }

    /// Creates an empty array reply.
    pub fn empty_array() -> Self {
        RespValue::Array(Vec::new())
    }

    /// Common response for successful operations
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    /// Common response for PONG
    pub fn pong() -> Self {
        RespValue::SimpleString("PONG".to_string())
    }

    /// Serializes the value to its wire format.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes the value into an existing buffer.
    ///
    /// This is more efficient than `serialize()` when you want to reuse a buffer.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(s) => write_line(buf, prefix::SIMPLE_STRING, s.as_bytes()),
            RespValue::Error(s) => write_line(buf, prefix::ERROR, s.as_bytes()),
            RespValue::Integer(n) => write_line(buf, prefix::INTEGER, n.to_string().as_bytes()),
            RespValue::BulkString(data) => write_bulk(buf, data),
            RespValue::Null => write_line(buf, prefix::BULK_STRING, b"-1"),
            RespValue::Array(items) => {
                write_line(buf, prefix::ARRAY, items.len().to_string().as_bytes());
                for item in items {
                    write_bulk(buf, item);
                }
            }
        }
    }

    /// Returns true if this value is a null bulk string.
    pub fn is_null(&self) -> bool {
        matches!(self, RespValue::Null)
    }

    /// Returns true if this value is an error.
    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    /// Attempts to extract the inner string from SimpleString or BulkString.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RespValue::SimpleString(s) => Some(s),
            RespValue::BulkString(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Attempts to extract the inner bytes from BulkString.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RespValue::BulkString(b) => Some(b),
            _ => None,
        }
    }

    /// Attempts to extract the inner integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RespValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Attempts to extract the array elements.
    pub fn as_array(&self) -> Option<&[Bytes]> {
        match self {
            RespValue::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Consumes self and returns the array elements if this is an Array.
    pub fn into_array(self) -> Option<Vec<Bytes>> {
        match self {
            RespValue::Array(items) => Some(items),
            _ => None,
        }
    }
}

fn write_line(buf: &mut Vec<u8>, type_prefix: u8, content: &[u8]) {
    buf.push(type_prefix);
    buf.extend_from_slice(content);
    buf.extend_from_slice(CRLF);
}

fn write_bulk(buf: &mut Vec<u8>, data: &[u8]) {
    write_line(buf, prefix::BULK_STRING, data.len().to_string().as_bytes());
    buf.extend_from_slice(data);
    buf.extend_from_slice(CRLF);
}

fn fmt_bytes(f: &mut fmt::Formatter<'_>, data: &[u8]) -> fmt::Result {
    match std::str::from_utf8(data) {
        Ok(s) => write!(f, "\"{}\"", s),
        Err(_) => write!(f, "(binary data, {} bytes)", data.len()),
    }
}

impl fmt::Display for RespValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RespValue::SimpleString(s) => write!(f, "{}", s),
            RespValue::Error(s) => write!(f, "(error) {}", s),
            RespValue::Integer(n) => write!(f, "(integer) {}", n),
            RespValue::BulkString(data) => fmt_bytes(f, data),
            RespValue::Null => write!(f, "(nil)"),
            RespValue::Array(items) => {
                if items.is_empty() {
                    return write!(f, "(empty array)");
                }
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}) ", i + 1)?;
                    fmt_bytes(f, item)?;
                }
                Ok(())
            }
        }
    }
}
