//! Storage Module
//!
//! This module provides the in-memory store for shardkv: a concurrent map
//! partitioned into a fixed number of independently locked shards, and the
//! tagged [`Value`] type it holds.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ShardedMap<Value>                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐            │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │...2^n   │            │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ shards  │            │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘            │
//! └─────────────────────────────────────────────────────────────┘
//!            key ──fnv32──> hash & (shards - 1) ──> shard
//! ```
//!
//! ## Features
//!
//! - **Sharded Storage**: power-of-two shard table, no global lock
//! - **RwLock**: Multiple concurrent readers, exclusive writers per shard
//! - **Atomic composites**: `lock_keys` holds several shards in ascending order
//! - **Sampling**: random and random-distinct key selection
//!
//! ## Example
//!
//! ```
//! use shardkv::storage::{ShardedMap, Value};
//!
//! let store: ShardedMap<Value> = ShardedMap::new(1024).unwrap();
//!
//! store.put("name", Value::from("Ariz"));
//! assert_eq!(store.get("name"), Some(Value::from("Ariz")));
//! assert_eq!(store.len(), 1);
//! ```

pub mod dict;
pub mod value;

// Re-export commonly used types
pub use dict::{compute_capacity, fnv32, LockedShards, Shard, ShardedMap, StorageError};
pub use value::{Value, ValueKind};
