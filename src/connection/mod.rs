//! Connection Handling Module
//!
//! Every client connection is served by its own async task. The
//! [`ConnectionHandler`] owns the registry of live sessions; each
//! [`Session`] owns the write side of one connection and the count of replies
//! it is still writing.
//!
//! ## Architecture
//!
//! ```text
//!                    accept()  (server.rs)
//!                        │
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ConnectionHandler                           │
//! │   registry: SessionId -> Session      closing flag          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │ FrameStream │───>│ RequestHdlr │───>│ write_reply │      │
//! │  └─────────────┘    └─────────────┘    └─────────────┘      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use shardkv::connection::{ConnectionHandler, RequestHandler};
//! use shardkv::protocol::RespValue;
//! use std::time::Duration;
//! use tokio::io::{AsyncReadExt, AsyncWriteExt};
//!
//! struct Pong;
//!
//! impl RequestHandler for Pong {
//!     fn handle(&self, _request: RespValue) -> RespValue {
//!         RespValue::pong()
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let handler = ConnectionHandler::new(Pong, Duration::from_secs(1));
//! let (mut client, server) = tokio::io::duplex(64);
//!
//! client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
//! client.shutdown().await.unwrap();
//! handler.handle(server, "doc").await;
//!
//! let mut reply = Vec::new();
//! client.read_to_end(&mut reply).await.unwrap();
//! assert_eq!(reply, b"+PONG\r\n");
//! # });
//! ```

pub mod handler;
pub mod session;

// Re-export commonly used types
pub use handler::{ConnectionHandler, ConnectionStats, RequestHandler};
pub use session::{ConnectionError, PendingWrite, Session, SessionId, SessionState};
