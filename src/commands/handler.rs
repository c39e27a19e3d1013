//! Command Handler Module
//!
//! This module executes requests against the sharded store. A request is a
//! RESP array whose first element names the command.
//!
//! ## Supported Commands
//!
//! ### String Commands
//! - `GET key` - Get a key's value
//! - `SET key value [NX|XX]` - Set a key
//! - `SETNX key value` - Set if not exists
//! - `MSET key value [key value ...]` - Set multiple keys atomically
//! - `MSETNX key value [key value ...]` - Set multiple keys if none exist
//!
//! ### List Commands
//! - `LPUSH key value [value ...]` - Push values to the head of a list
//! - `RPUSH key value [value ...]` - Push values to the tail of a list
//! - `LPOP key` - Pop from the head
//! - `RPOP key` - Pop from the tail
//! - `LLEN key` - List length
//! - `LRANGE key start stop` - Elements in a range, negative indices from the tail
//!
//! ### Key Commands
//! - `DEL key [key ...]` - Delete keys
//! - `EXISTS key [key ...]` - Count existing keys
//! - `TYPE key` - Get a key's type
//! - `RENAME key newkey` - Rename a key
//! - `RENAMENX key newkey` - Rename if new key doesn't exist
//! - `KEYS *` - List every key
//! - `RANDOMKEY` - A key picked at random
//!
//! ### Server Commands
//! - `PING [message]` - Test connection
//! - `ECHO message` - Echo message
//! - `DBSIZE` - Number of keys
//! - `FLUSHDB` / `FLUSHALL` - Clear the store
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │  execute()  │───>│ dispatch()  │───>│  cmd_xxx()  │      │
//! │  └─────────────┘    └─────────────┘    └─────────────┘      │
//! │                                               │             │
//! │                                               ▼             │
//! │                                      ShardedMap<Value>      │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use crate::connection::RequestHandler;
use crate::protocol::RespValue;
use crate::storage::{ShardedMap, StorageError, Value};
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;

/// Reasons a command is refused. Each one becomes an error reply.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("ERR invalid command format")]
    InvalidFormat,

    #[error("ERR empty command")]
    EmptyCommand,

    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(&'static str),

    #[error("ERR syntax error")]
    Syntax,

    #[error("ERR value is not an integer or out of range")]
    NotInteger,

    #[error("ERR invalid key")]
    InvalidKey,

    #[error("ERR no such key")]
    NoSuchKey,

    #[error("ERR only the '*' pattern is supported")]
    UnsupportedPattern,

    #[error("{0}")]
    Storage(#[from] StorageError),
}

type CommandResult = Result<RespValue, CommandError>;

/// Which end of a list a push or pop works on.
#[derive(Debug, Clone, Copy)]
enum End {
    Head,
    Tail,
}

/// Executes commands against a shared [`ShardedMap`].
#[derive(Clone)]
pub struct CommandHandler {
    /// The shared store
    store: Arc<ShardedMap<Value>>,
}

impl CommandHandler {
    /// Creates a new command handler over the given store.
    pub fn new(store: Arc<ShardedMap<Value>>) -> Self {
        Self { store }
    }

    /// The store this handler executes against.
    pub fn store(&self) -> &Arc<ShardedMap<Value>> {
        &self.store
    }

    /// Executes a command and returns the response.
    ///
    /// Failures are turned into RESP error replies; this never fails.
    pub fn execute(&self, command: RespValue) -> RespValue {
        self.try_execute(command)
            .unwrap_or_else(|e| RespValue::error(e.to_string()))
    }

    fn try_execute(&self, command: RespValue) -> CommandResult {
        // Commands should be arrays
        let args = command.into_array().ok_or(CommandError::InvalidFormat)?;
        let (name, args) = args.split_first().ok_or(CommandError::EmptyCommand)?;

        let cmd_name = String::from_utf8_lossy(name).to_uppercase();
        self.dispatch(&cmd_name, args)
    }

    /// Dispatches a command to its handler.
    fn dispatch(&self, cmd: &str, args: &[Bytes]) -> CommandResult {
        match cmd {
            // String commands
            "GET" => self.cmd_get(args),
            "SET" => self.cmd_set(args),
            "SETNX" => self.cmd_setnx(args),
            "MSET" => self.cmd_mset(args),
            "MSETNX" => self.cmd_msetnx(args),

            // List commands
            "LPUSH" => self.cmd_push(args, "LPUSH", End::Head),
            "RPUSH" => self.cmd_push(args, "RPUSH", End::Tail),
            "LPOP" => self.cmd_pop(args, "LPOP", End::Head),
            "RPOP" => self.cmd_pop(args, "RPOP", End::Tail),
            "LLEN" => self.cmd_llen(args),
            "LRANGE" => self.cmd_lrange(args),

            // Key commands
            "DEL" => self.cmd_del(args),
            "EXISTS" => self.cmd_exists(args),
            "TYPE" => self.cmd_type(args),
            "RENAME" => self.cmd_rename(args),
            "RENAMENX" => self.cmd_renamenx(args),
            "KEYS" => self.cmd_keys(args),
            "RANDOMKEY" => self.cmd_randomkey(args),

            // Server commands
            "PING" => self.cmd_ping(args),
            "ECHO" => self.cmd_echo(args),
            "DBSIZE" => self.cmd_dbsize(args),
            "FLUSHDB" => self.cmd_flushdb(args, "FLUSHDB"),
            "FLUSHALL" => self.cmd_flushdb(args, "FLUSHALL"),

            // Unknown command
            _ => Err(CommandError::UnknownCommand(cmd.to_string())),
        }
    }

    // ========================================================================
    // String Commands
    // ========================================================================

    /// GET key
    fn cmd_get(&self, args: &[Bytes]) -> CommandResult {
        let [key] = args else {
            return Err(CommandError::WrongArity("GET"));
        };
        let key = key_str(key)?;

        match self.store.get_with(key, |v| v.as_bytes().cloned()) {
            Some(value) => Ok(RespValue::bulk_string(value?)),
            None => Ok(RespValue::null()),
        }
    }

    /// SET key value [NX|XX]
    fn cmd_set(&self, args: &[Bytes]) -> CommandResult {
        if args.len() < 2 {
            return Err(CommandError::WrongArity("SET"));
        }
        let key = key_str(&args[0])?;
        let value = Value::Str(args[1].clone());

        let mut nx = false; // Only set if not exists
        let mut xx = false; // Only set if exists
        for opt in &args[2..] {
            match String::from_utf8_lossy(opt).to_uppercase().as_str() {
                "NX" => nx = true,
                "XX" => xx = true,
                _ => return Err(CommandError::Syntax),
            }
        }

        let stored = match (nx, xx) {
            (true, true) => return Err(CommandError::Syntax),
            (true, false) => self.store.put_if_absent(key, value),
            (false, true) => self.store.put_if_exists(key, value),
            (false, false) => {
                self.store.put(key, value);
                true
            }
        };

        Ok(if stored {
            RespValue::ok()
        } else {
            RespValue::null()
        })
    }

    /// SETNX key value
    fn cmd_setnx(&self, args: &[Bytes]) -> CommandResult {
        let [key, value] = args else {
            return Err(CommandError::WrongArity("SETNX"));
        };
        let key = key_str(key)?;

        let inserted = self.store.put_if_absent(key, Value::Str(value.clone()));
        Ok(RespValue::integer(inserted as i64))
    }

    /// MSET key value [key value ...]
    fn cmd_mset(&self, args: &[Bytes]) -> CommandResult {
        let pairs = key_value_pairs(args, "MSET")?;
        let keys: Vec<&str> = pairs.iter().map(|(k, _)| *k).collect();

        let mut locked = self.store.lock_keys(&keys);
        for (key, value) in pairs {
            locked.put_with_lock(key, Value::Str(value.clone()));
        }

        Ok(RespValue::ok())
    }

    /// MSETNX key value [key value ...]
    fn cmd_msetnx(&self, args: &[Bytes]) -> CommandResult {
        let pairs = key_value_pairs(args, "MSETNX")?;
        let keys: Vec<&str> = pairs.iter().map(|(k, _)| *k).collect();

        let mut locked = self.store.lock_keys(&keys);
        if keys.iter().any(|key| locked.contains_key_with_lock(key)) {
            return Ok(RespValue::integer(0));
        }
        for (key, value) in pairs {
            locked.put_with_lock(key, Value::Str(value.clone()));
        }

        Ok(RespValue::integer(1))
    }

    // ========================================================================
    // List Commands
    // ========================================================================

    /// LPUSH / RPUSH key value [value ...]
    ///
    /// Values are pushed one at a time, so `LPUSH k a b` leaves `b` at the head.
    fn cmd_push(&self, args: &[Bytes], name: &'static str, end: End) -> CommandResult {
        let [key, values @ ..] = args else {
            return Err(CommandError::WrongArity(name));
        };
        if values.is_empty() {
            return Err(CommandError::WrongArity(name));
        }
        let key = key_str(key)?;

        let mut locked = self.store.lock_keys(&[key]);
        let len = match locked.get_mut_with_lock(key) {
            Some(value) => {
                let list = value.as_list_mut()?;
                push_all(list, values, end);
                list.len()
            }
            None => {
                let mut list = VecDeque::with_capacity(values.len());
                push_all(&mut list, values, end);
                let len = list.len();
                locked.put_with_lock(key, Value::List(list));
                len
            }
        };
        Ok(RespValue::integer(len as i64))
    }

    /// LPOP / RPOP key
    ///
    /// A list emptied by the pop is removed.
    fn cmd_pop(&self, args: &[Bytes], name: &'static str, end: End) -> CommandResult {
        let [key] = args else {
            return Err(CommandError::WrongArity(name));
        };
        let key = key_str(key)?;

        let mut locked = self.store.lock_keys(&[key]);
        let Some(value) = locked.get_mut_with_lock(key) else {
            return Ok(RespValue::null());
        };
        let list = value.as_list_mut()?;
        let popped = match end {
            End::Head => list.pop_front(),
            End::Tail => list.pop_back(),
        };
        if list.is_empty() {
            locked.remove_with_lock(key);
        }

        Ok(match popped {
            Some(item) => RespValue::bulk_string(item),
            None => RespValue::null(),
        })
    }

    /// LLEN key
    fn cmd_llen(&self, args: &[Bytes]) -> CommandResult {
        let [key] = args else {
            return Err(CommandError::WrongArity("LLEN"));
        };
        let key = key_str(key)?;

        let len = self
            .store
            .get_with(key, |v| v.as_list().map(VecDeque::len))
            .transpose()?
            .unwrap_or(0);
        Ok(RespValue::integer(len as i64))
    }

    /// LRANGE key start stop
    fn cmd_lrange(&self, args: &[Bytes]) -> CommandResult {
        let [key, start, stop] = args else {
            return Err(CommandError::WrongArity("LRANGE"));
        };
        let key = key_str(key)?;
        let (start, stop) = (integer_arg(start)?, integer_arg(stop)?);

        let items = self
            .store
            .get_with(key, |v| v.as_list().map(|list| list_range(list, start, stop)))
            .transpose()?
            .unwrap_or_default();
        Ok(RespValue::array(items))
    }

    // ========================================================================
    // Key Commands
    // ========================================================================

    /// DEL key [key ...]
    fn cmd_del(&self, args: &[Bytes]) -> CommandResult {
        if args.is_empty() {
            return Err(CommandError::WrongArity("DEL"));
        }

        // Every key is checked before the first one is removed
        let keys = args.iter().map(key_str).collect::<Result<Vec<_>, _>>()?;
        let deleted = keys
            .into_iter()
            .filter(|key| self.store.remove(key).is_some())
            .count();
        Ok(RespValue::integer(deleted as i64))
    }

    /// EXISTS key [key ...]
    ///
    /// A key named twice is counted twice.
    fn cmd_exists(&self, args: &[Bytes]) -> CommandResult {
        if args.is_empty() {
            return Err(CommandError::WrongArity("EXISTS"));
        }

        let keys = args.iter().map(key_str).collect::<Result<Vec<_>, _>>()?;
        let count = keys
            .into_iter()
            .filter(|key| self.store.contains_key(key))
            .count();
        Ok(RespValue::integer(count as i64))
    }

    /// TYPE key
    fn cmd_type(&self, args: &[Bytes]) -> CommandResult {
        let [key] = args else {
            return Err(CommandError::WrongArity("TYPE"));
        };
        let key = key_str(key)?;

        let kind = self
            .store
            .get_with(key, |v| v.kind().name())
            .unwrap_or("none");
        Ok(RespValue::simple_string(kind))
    }

    /// RENAME key newkey
    fn cmd_rename(&self, args: &[Bytes]) -> CommandResult {
        let [key, newkey] = args else {
            return Err(CommandError::WrongArity("RENAME"));
        };
        let (key, newkey) = (key_str(key)?, key_str(newkey)?);

        let mut locked = self.store.lock_keys(&[key, newkey]);
        let value = locked.remove_with_lock(key).ok_or(CommandError::NoSuchKey)?;
        locked.put_with_lock(newkey, value);

        Ok(RespValue::ok())
    }

    /// RENAMENX key newkey
    fn cmd_renamenx(&self, args: &[Bytes]) -> CommandResult {
        let [key, newkey] = args else {
            return Err(CommandError::WrongArity("RENAMENX"));
        };
        let (key, newkey) = (key_str(key)?, key_str(newkey)?);

        let mut locked = self.store.lock_keys(&[key, newkey]);
        if !locked.contains_key_with_lock(key) {
            return Err(CommandError::NoSuchKey);
        }
        if locked.contains_key_with_lock(newkey) {
            return Ok(RespValue::integer(0));
        }

        if let Some(value) = locked.remove_with_lock(key) {
            locked.put_with_lock(newkey, value);
        }
        Ok(RespValue::integer(1))
    }

    /// KEYS *
    fn cmd_keys(&self, args: &[Bytes]) -> CommandResult {
        let [pattern] = args else {
            return Err(CommandError::WrongArity("KEYS"));
        };
        if pattern.as_ref() != b"*" {
            return Err(CommandError::UnsupportedPattern);
        }

        let keys = self.store.keys().into_iter().map(Bytes::from).collect();
        Ok(RespValue::array(keys))
    }

    /// RANDOMKEY
    fn cmd_randomkey(&self, args: &[Bytes]) -> CommandResult {
        if !args.is_empty() {
            return Err(CommandError::WrongArity("RANDOMKEY"));
        }

        Ok(match self.store.random_keys(1).pop() {
            Some(key) => RespValue::bulk_string(key),
            None => RespValue::null(),
        })
    }

    // ========================================================================
    // Server Commands
    // ========================================================================

    /// PING [message]
    fn cmd_ping(&self, args: &[Bytes]) -> CommandResult {
        match args {
            [] => Ok(RespValue::pong()),
            [msg] => Ok(RespValue::bulk_string(msg.clone())),
            _ => Err(CommandError::WrongArity("PING")),
        }
    }

    /// ECHO message
    fn cmd_echo(&self, args: &[Bytes]) -> CommandResult {
        let [msg] = args else {
            return Err(CommandError::WrongArity("ECHO"));
        };
        Ok(RespValue::bulk_string(msg.clone()))
    }

    /// DBSIZE
    fn cmd_dbsize(&self, args: &[Bytes]) -> CommandResult {
        if !args.is_empty() {
            return Err(CommandError::WrongArity("DBSIZE"));
        }
        Ok(RespValue::integer(self.store.len() as i64))
    }

    /// FLUSHDB / FLUSHALL
    fn cmd_flushdb(&self, args: &[Bytes], name: &'static str) -> CommandResult {
        if !args.is_empty() {
            return Err(CommandError::WrongArity(name));
        }
        self.store.clear();
        Ok(RespValue::ok())
    }
}

impl RequestHandler for CommandHandler {
    fn handle(&self, request: RespValue) -> RespValue {
        self.execute(request)
    }
}

// ============================================================================
// Helper functions
// ============================================================================

/// Keys are stored as strings; binary keys that are not UTF-8 are refused.
fn key_str(arg: &Bytes) -> Result<&str, CommandError> {
    std::str::from_utf8(arg).map_err(|_| CommandError::InvalidKey)
}

fn integer_arg(arg: &Bytes) -> Result<i64, CommandError> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(CommandError::NotInteger)
}

fn push_all(list: &mut VecDeque<Bytes>, values: &[Bytes], end: End) {
    for value in values {
        match end {
            End::Head => list.push_front(value.clone()),
            End::Tail => list.push_back(value.clone()),
        }
    }
}

/// The elements between `start` and `stop` inclusive. Negative indices count
/// from the tail; out-of-range bounds are clamped.
fn list_range(list: &VecDeque<Bytes>, start: i64, stop: i64) -> Vec<Bytes> {
    let len = list.len() as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };

    if start > stop || start >= len {
        return Vec::new();
    }
    list.range(start as usize..=stop as usize).cloned().collect()
}

fn key_value_pairs<'a>(
    args: &'a [Bytes],
    name: &'static str,
) -> Result<Vec<(&'a str, &'a Bytes)>, CommandError> {
    if args.is_empty() || args.len() % 2 != 0 {
        return Err(CommandError::WrongArity(name));
    }
    args.chunks_exact(2)
        .map(|pair| Ok((key_str(&pair[0])?, &pair[1])))
        .collect()
}
