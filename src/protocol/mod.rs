//! RESP Protocol Implementation
//!
//! This module implements the wire format spoken by shardkv clients.
//!
//! ## Overview
//!
//! RESP is a simple, binary-safe, line-oriented protocol. Requests and replies
//! use the same frames: status, error, integer, bulk string, null bulk string
//! and flat arrays of bulk strings.
//!
//! ## Modules
//!
//! - `types`: Defines the `RespValue` enum and serialization
//! - `parser`: Incremental, I/O-free frame parser and in-memory helpers
//! - `stream`: Async frame sequence over any `AsyncRead`
//!
//! ## Example
//!
//! ```
//! use shardkv::protocol::{parse_bytes, RespValue};
//! use bytes::Bytes;
//!
//! // Parsing incoming data
//! let frames = parse_bytes(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n").unwrap();
//! assert_eq!(frames[0], RespValue::array(vec![Bytes::from("GET"), Bytes::from("name")]));
//!
//! // Creating responses
//! let response = RespValue::bulk_string(Bytes::from("Ariz"));
//! assert_eq!(response.serialize(), b"$4\r\nAriz\r\n");
//! ```

pub mod parser;
pub mod stream;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{
    parse_bytes, parse_one, Decoded, FrameError, Frames, Payload, ProtocolError, RespParser,
};
pub use stream::FrameStream;
pub use types::RespValue;
