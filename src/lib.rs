//! # shardkv - An In-Memory RESP Key-Value Core
//!
//! shardkv is the core of an in-memory key-value server speaking the Redis
//! serialization protocol (RESP). It is built from four pieces: a sharded
//! concurrent map, a streaming protocol decoder, per-connection sessions with
//! a bounded drain at shutdown, and a server lifecycle that waits for all of
//! its connection tasks before returning.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              shardkv                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │   server    │───>│ Connection  │───>│  Command    │                  │
//! │  │ accept loop │    │  Handler    │    │  Handler    │                  │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘                  │
//! │                            │                  │                         │
//! │                            ▼                  ▼                         │
//! │  ┌─────────────┐    ┌─────────────┐  ┌────────────────────────────────┐ │
//! │  │ FrameStream │<───│  Session    │  │         ShardedMap             │ │
//! │  │ RESP decode │    │ write half  │  │ ┌──────┐ ┌──────┐ ┌──────┐     │ │
//! │  └─────────────┘    │ pending cnt │  │ │Shard0│ │Shard1│ │...2^n│     │ │
//! │                     └─────────────┘  │ └──────┘ └──────┘ └──────┘     │ │
//! │                                      └────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use shardkv::commands::CommandHandler;
//! use shardkv::config::Config;
//! use shardkv::connection::ConnectionHandler;
//! use shardkv::storage::ShardedMap;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!
//!     let store = Arc::new(ShardedMap::new(config.shards)?);
//!     let handler = Arc::new(ConnectionHandler::new(
//!         CommandHandler::new(store),
//!         config.timeout,
//!     ));
//!
//!     // Serves until SIGINT/SIGTERM/SIGHUP/SIGQUIT, then drains
//!     shardkv::server::run(&config, handler).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`storage`]: Sharded concurrent map and the stored value type
//! - [`protocol`]: RESP types, incremental parser and async frame stream
//! - [`connection`]: Sessions, the session registry and the per-connection loop
//! - [`commands`]: Key/value commands executed against the map
//! - [`server`]: Accept loop and graceful shutdown
//! - [`config`]: Server configuration and command-line parsing
//!
//! ## Design Highlights
//!
//! ### Thread Safety
//!
//! The map is split into a power-of-two number of shards, each with its own
//! `RwLock`. Operations on different shards never contend, and multi-key
//! commands lock the shards they need in ascending order.
//!
//! ### Sans-IO Parsing
//!
//! The RESP parser never touches a socket. It examines whatever bytes are
//! buffered, so the same code backs the async `FrameStream` and the
//! in-memory `parse_bytes` helper.
//!
//! ### Bounded Shutdown
//!
//! A session being shut down gets a fixed bound to finish the replies it is
//! writing. After that its socket is closed regardless, which may cut off a
//! reply mid-write.

pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::CommandHandler;
pub use config::Config;
pub use connection::{ConnectionHandler, ConnectionStats, RequestHandler};
pub use protocol::{FrameStream, RespParser, RespValue};
pub use storage::{ShardedMap, Value};

/// The default port shardkv listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host shardkv binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of shardkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
