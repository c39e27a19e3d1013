//! Command Handler Module
//!
//! This module implements the command processing layer for shardkv.
//! It receives decoded RESP requests, executes them against the sharded store,
//! and returns the replies.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  FrameStream    │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! │                 │
//! │  - Dispatch     │
//! │  - Validate     │
//! │  - Execute      │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ ShardedMap      │  (storage module)
//! └─────────────────┘
//! ```
//!
//! Multi-key writes (`MSET`, `MSETNX`, `RENAME`, `RENAMENX`) hold every shard
//! they touch at once, so other clients see all of the change or none of it.

pub mod handler;

// Re-export the main command handler
pub use handler::{CommandError, CommandHandler};
