//! Sharded Concurrent Map
//!
//! This module implements the key-value map at the heart of shardkv.
//! The key space is split into a fixed number of shards, each guarded by its
//! own `RwLock`, so operations on different shards never contend.
//!
//! ## Design Decisions
//!
//! 1. **Fixed shard table**: The shard count is chosen once at construction and
//!    never changes. A shard rehashes internally, but that only blocks its own keys.
//! 2. **Power-of-two shard count**: Shard selection is a bitmask over a 32-bit
//!    FNV hash instead of a modulo.
//! 3. **Loose counter**: The entry count is a single atomic updated alongside
//!    (not under) the shard locks. It may briefly lag the shards during a burst
//!    but always converges.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ShardedMap                             │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐            │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │            │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │            │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │            │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘            │
//! │                 count: AtomicUsize                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Multi-key operations that must be atomic lock every shard they touch with
//! [`ShardedMap::lock_keys`], which always acquires in ascending shard order.

use rand::seq::IteratorRandom;
use rand::Rng;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

use super::value::ValueKind;

/// Smallest shard table built by the rounding path.
pub const MIN_SHARDS: usize = 16;

/// Largest shard table; the shard index is derived from a 32-bit hash.
pub const MAX_SHARDS: usize = 1 << 31;

const FNV_OFFSET_BASIS: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

/// Errors raised by the storage layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// A map cannot be built without at least one shard
    #[error("invalid shard count: {0}")]
    InvalidShardCount(usize),

    /// The stored value is not of the kind the caller asked for
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value (expected {expected}, found {found})")]
    WrongType {
        expected: ValueKind,
        found: ValueKind,
    },
}

/// 32-bit FNV hash of `key`.
///
/// Each byte first multiplies the running hash by the FNV prime, then is
/// XOR-ed in.
#[inline]
pub fn fnv32(key: &[u8]) -> u32 {
    key.iter().fold(FNV_OFFSET_BASIS, |hash, &byte| {
        hash.wrapping_mul(FNV_PRIME) ^ u32::from(byte)
    })
}

/// Rounds a requested shard count up to the table size actually built.
///
/// Returns the smallest power of two that is at least `requested` and at least
/// [`MIN_SHARDS`], capped at [`MAX_SHARDS`].
pub fn compute_capacity(requested: usize) -> usize {
    if requested <= MIN_SHARDS {
        return MIN_SHARDS;
    }
    if requested >= MAX_SHARDS {
        return MAX_SHARDS;
    }
    requested.next_power_of_two()
}

/// One independently lockable partition of the key space.
#[derive(Debug)]
pub struct Shard<V> {
    entries: RwLock<HashMap<String, V>>,
}

impl<V> Shard<V> {
    fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, V>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, V>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of entries currently held by this shard.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns true if this shard holds no entries.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Returns one arbitrary key from this shard, or `None` if it is empty.
    pub fn random_key(&self) -> Option<String> {
        let entries = self.read();
        entries.keys().choose(&mut rand::rng()).cloned()
    }
}

/// A concurrent `String -> V` map split across a fixed set of shards.
///
/// # Thread Safety
///
/// Designed to be wrapped in an `Arc` and shared by every connection task.
/// Readers of one shard share its lock, writers are exclusive, and different
/// shards never block each other.
///
/// # Example
///
/// ```
/// use shardkv::storage::ShardedMap;
///
/// let map: ShardedMap<u32> = ShardedMap::new(64).unwrap();
///
/// assert!(map.put("apples", 3));
/// assert!(!map.put("apples", 4));
/// assert_eq!(map.get("apples"), Some(4));
/// assert_eq!(map.remove("apples"), Some(4));
/// assert!(map.is_empty());
/// ```
pub struct ShardedMap<V> {
    shards: Box<[Shard<V>]>,
    count: AtomicUsize,
    mask: u32,
}

impl<V> fmt::Debug for ShardedMap<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardedMap")
            .field("shards", &self.shards.len())
            .field("count", &self.len())
            .finish()
    }
}

impl<V> Default for ShardedMap<V> {
    fn default() -> Self {
        Self::build(MIN_SHARDS)
    }
}

impl<V> ShardedMap<V> {
    /// Creates a map sized for `requested` shards.
    ///
    /// A request for exactly one shard builds a single-shard map; any other
    /// request is rounded with [`compute_capacity`]. Zero shards is refused.
    pub fn new(requested: usize) -> Result<Self, StorageError> {
        match requested {
            0 => Err(StorageError::InvalidShardCount(0)),
            1 => Ok(Self::build(1)),
            n => Ok(Self::build(compute_capacity(n))),
        }
    }

    fn build(shard_count: usize) -> Self {
        debug_assert!(shard_count.is_power_of_two());
        let shards = (0..shard_count).map(|_| Shard::new()).collect();
        Self {
            shards,
            count: AtomicUsize::new(0),
            mask: (shard_count - 1) as u32,
        }
    }

    /// Number of shards in the table.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Index of the shard that owns `key`. Always in `0..shard_count()`.
    #[inline]
    pub fn shard_index(&self, key: &str) -> usize {
        (fnv32(key.as_bytes()) & self.mask) as usize
    }

    /// Returns the shard at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= shard_count()`.
    pub fn shard(&self, index: usize) -> &Shard<V> {
        &self.shards[index]
    }

    /// Returns the shard that owns `key`.
    #[inline]
    pub fn shard_for(&self, key: &str) -> &Shard<V> {
        &self.shards[self.shard_index(key)]
    }

    /// Approximate number of entries in the map.
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    /// Returns true if the map is (approximately) empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a clone of the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<V>
    where
        V: Clone,
    {
        self.shard_for(key).read().get(key).cloned()
    }

    /// Runs `f` against the value stored under `key` while its shard is
    /// read-locked, without cloning the value.
    pub fn get_with<R>(&self, key: &str, f: impl FnOnce(&V) -> R) -> Option<R> {
        self.shard_for(key).read().get(key).map(f)
    }

    /// Returns true if `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.shard_for(key).read().contains_key(key)
    }

    /// Stores `value` under `key`.
    ///
    /// Returns `true` if the key was newly created, `false` if an existing
    /// value was overwritten.
    pub fn put(&self, key: impl Into<String>, value: V) -> bool {
        let key = key.into();
        let mut entries = self.shard_for(&key).write();
        put_entry(&mut entries, &self.count, key, value)
    }

    /// Stores `value` only if `key` is absent. Returns `true` if inserted.
    pub fn put_if_absent(&self, key: impl Into<String>, value: V) -> bool {
        let key = key.into();
        let mut entries = self.shard_for(&key).write();
        put_if_absent_entry(&mut entries, &self.count, key, value)
    }

    /// Replaces the value under `key` only if it is present. Returns `true`
    /// if updated; never inserts.
    pub fn put_if_exists(&self, key: &str, value: V) -> bool {
        let mut entries = self.shard_for(key).write();
        put_if_exists_entry(&mut entries, key, value)
    }

    /// Removes `key`, returning the value it held.
    pub fn remove(&self, key: &str) -> Option<V> {
        let mut entries = self.shard_for(key).write();
        remove_entry(&mut entries, &self.count, key)
    }

    /// Visits every entry, shard by shard, in table order.
    ///
    /// Each shard stays read-locked while its entries are visited, so keep the
    /// consumer short: it blocks writers to that shard. Returning `false` from
    /// the consumer stops the traversal at once; the remaining shards are
    /// never visited.
    pub fn for_each(&self, mut consumer: impl FnMut(&str, &V) -> bool) {
        for shard in self.shards.iter() {
            let entries = shard.read();
            for (key, value) in entries.iter() {
                if !consumer(key, value) {
                    return;
                }
            }
        }
    }

    /// Collects every key. Consistent within a shard, not across shards.
    pub fn keys(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(self.len());
        self.for_each(|key, _| {
            keys.push(key.to_string());
            true
        });
        keys
    }

    /// Samples `limit` keys from uniformly chosen shards.
    ///
    /// The result may contain duplicates. Sampling stops early, returning what
    /// it has, if the map becomes empty.
    pub fn random_keys(&self, limit: usize) -> Vec<String> {
        let mut rng = rand::rng();
        let mut keys = Vec::with_capacity(limit);
        while keys.len() < limit {
            if self.is_empty() {
                break;
            }
            let index = rng.random_range(0..self.shards.len());
            if let Some(key) = self.shards[index].random_key() {
                keys.push(key);
            }
        }
        keys
    }

    /// Samples up to `limit` distinct keys.
    ///
    /// If `limit` covers the whole map, every key is returned. Otherwise random
    /// shards are asked for one key each until `limit` distinct keys are found.
    /// The size is re-checked every round, so a map shrinking underneath the
    /// sampler falls back to [`keys`](Self::keys) instead of spinning.
    pub fn random_distinct_keys(&self, limit: usize) -> Vec<String> {
        if limit >= self.len() {
            return self.keys();
        }

        let mut rng = rand::rng();
        let mut picked = HashSet::with_capacity(limit);
        while picked.len() < limit {
            if self.len() <= limit {
                return self.keys();
            }
            let index = rng.random_range(0..self.shards.len());
            if let Some(key) = self.shards[index].random_key() {
                picked.insert(key);
            }
        }
        picked.into_iter().collect()
    }

    /// Removes every entry. The shard table itself is kept.
    pub fn clear(&self) {
        for shard in self.shards.iter() {
            let mut entries = shard.write();
            let removed = entries.len();
            *entries = HashMap::new();
            self.count.fetch_sub(removed, Ordering::Relaxed);
        }
    }

    /// Write-locks every shard covering `keys`, in ascending shard order.
    ///
    /// The returned guard exposes the `*_with_lock` operations for those keys,
    /// which lets a caller compose several reads and writes into one atomic
    /// step. Each shard is locked once even if several keys share it.
    ///
    /// Do not call the locking operations of this map for a covered key while
    /// the guard is alive: that shard is already held.
    pub fn lock_keys<K: AsRef<str>>(&self, keys: &[K]) -> LockedShards<'_, V> {
        let mut indices: Vec<usize> = keys.iter().map(|k| self.shard_index(k.as_ref())).collect();
        indices.sort_unstable();
        indices.dedup();

        let guards = indices
            .into_iter()
            .map(|index| (index, self.shards[index].write()))
            .collect();
        LockedShards { map: self, guards }
    }
}

/// Exclusive locks over a set of shards, acquired by [`ShardedMap::lock_keys`].
///
/// Every `*_with_lock` method expects its key to live in one of the locked
/// shards. Touching any other key is a programming error and panics.
pub struct LockedShards<'a, V> {
    map: &'a ShardedMap<V>,
    guards: Vec<(usize, RwLockWriteGuard<'a, HashMap<String, V>>)>,
}

impl<'a, V> LockedShards<'a, V> {
    /// Indices of the held shards, ascending.
    pub fn shard_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.guards.iter().map(|(index, _)| *index)
    }

    fn slot(&self, key: &str) -> usize {
        let index = self.map.shard_index(key);
        match self.guards.binary_search_by_key(&index, |(i, _)| *i) {
            Ok(slot) => slot,
            Err(_) => panic!("key {key:?} maps to shard {index}, which is not locked by this guard"),
        }
    }

    fn entries(&self, key: &str) -> &HashMap<String, V> {
        let slot = self.slot(key);
        &self.guards[slot].1
    }

    fn entries_mut(&mut self, key: &str) -> &mut HashMap<String, V> {
        let slot = self.slot(key);
        &mut self.guards[slot].1
    }

    /// Reads `key` from an already locked shard.
    pub fn get_with_lock(&self, key: &str) -> Option<&V> {
        self.entries(key).get(key)
    }

    /// Mutable access to `key` in an already locked shard.
    pub fn get_mut_with_lock(&mut self, key: &str) -> Option<&mut V> {
        self.entries_mut(key).get_mut(key)
    }

    /// Returns true if `key` is present in an already locked shard.
    pub fn contains_key_with_lock(&self, key: &str) -> bool {
        self.entries(key).contains_key(key)
    }

    /// [`ShardedMap::put`] for an already locked shard.
    pub fn put_with_lock(&mut self, key: impl Into<String>, value: V) -> bool {
        let key = key.into();
        let map = self.map;
        put_entry(self.entries_mut(&key), &map.count, key, value)
    }

    /// [`ShardedMap::put_if_absent`] for an already locked shard.
    pub fn put_if_absent_with_lock(&mut self, key: impl Into<String>, value: V) -> bool {
        let key = key.into();
        let map = self.map;
        put_if_absent_entry(self.entries_mut(&key), &map.count, key, value)
    }

    /// [`ShardedMap::put_if_exists`] for an already locked shard.
    pub fn put_if_exists_with_lock(&mut self, key: &str, value: V) -> bool {
        put_if_exists_entry(self.entries_mut(key), key, value)
    }

    /// [`ShardedMap::remove`] for an already locked shard.
    pub fn remove_with_lock(&mut self, key: &str) -> Option<V> {
        let map = self.map;
        remove_entry(self.entries_mut(key), &map.count, key)
    }
}

fn put_entry<V>(entries: &mut HashMap<String, V>, count: &AtomicUsize, key: String, value: V) -> bool {
    match entries.entry(key) {
        Entry::Occupied(mut slot) => {
            slot.insert(value);
            false
        }
        Entry::Vacant(slot) => {
            slot.insert(value);
            count.fetch_add(1, Ordering::Relaxed);
            true
        }
    }
}

fn put_if_absent_entry<V>(
    entries: &mut HashMap<String, V>,
    count: &AtomicUsize,
    key: String,
    value: V,
) -> bool {
    match entries.entry(key) {
        Entry::Occupied(_) => false,
        Entry::Vacant(slot) => {
            slot.insert(value);
            count.fetch_add(1, Ordering::Relaxed);
            true
        }
    }
}

fn put_if_exists_entry<V>(entries: &mut HashMap<String, V>, key: &str, value: V) -> bool {
    match entries.get_mut(key) {
        Some(slot) => {
            *slot = value;
            true
        }
        None => false,
    }
}

fn remove_entry<V>(entries: &mut HashMap<String, V>, count: &AtomicUsize, key: &str) -> Option<V> {
    let removed = entries.remove(key);
    if removed.is_some() {
        count.fetch_sub(1, Ordering::Relaxed);
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn map(shards: usize) -> ShardedMap<String> {
        ShardedMap::new(shards).unwrap()
    }

    #[test]
    fn test_compute_capacity() {
        assert_eq!(compute_capacity(0), 16);
        assert_eq!(compute_capacity(2), 16);
        assert_eq!(compute_capacity(16), 16);
        assert_eq!(compute_capacity(17), 32);
        assert_eq!(compute_capacity(1000), 1024);
        assert_eq!(compute_capacity(1024), 1024);
        assert_eq!(compute_capacity(1025), 2048);
        assert_eq!(compute_capacity(usize::MAX), MAX_SHARDS);
    }

    #[test]
    fn test_shard_count_rounding() {
        assert_eq!(map(1).shard_count(), 1);
        assert_eq!(map(2).shard_count(), 16);
        assert_eq!(map(100).shard_count(), 128);
        assert_eq!(ShardedMap::<String>::default().shard_count(), 16);
    }

    #[test]
    fn test_zero_shards_rejected() {
        let result = ShardedMap::<String>::new(0);
        assert_eq!(result.unwrap_err(), StorageError::InvalidShardCount(0));
    }

    #[test]
    fn test_fnv32_known_values() {
        assert_eq!(fnv32(b""), FNV_OFFSET_BASIS);
        // FNV-1 reference vector for "a"
        assert_eq!(fnv32(b"a"), 0x050c_5d7e);
    }

    #[test]
    fn test_shard_index_is_stable_and_in_range() {
        let m = map(64);
        for i in 0..1000 {
            let key = format!("key:{}", i);
            let index = m.shard_index(&key);
            assert!(index < m.shard_count());
            assert_eq!(index, m.shard_index(&key));
        }
        let single = map(1);
        assert_eq!(single.shard_index("anything"), 0);
    }

    #[test]
    fn test_put_and_get() {
        let m = map(16);
        assert!(m.put("name", "Ariz".to_string()));
        assert!(!m.put("name", "Zira".to_string()));
        assert_eq!(m.get("name"), Some("Zira".to_string()));
        assert_eq!(m.get("missing"), None);
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn test_put_if_absent() {
        let m = map(16);
        assert!(m.put_if_absent("k", "v1".to_string()));
        assert!(!m.put_if_absent("k", "v2".to_string()));
        assert_eq!(m.get("k"), Some("v1".to_string()));
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn test_put_if_exists() {
        let m = map(16);
        assert!(!m.put_if_exists("k", "v1".to_string()));
        assert!(!m.contains_key("k"));
        assert_eq!(m.len(), 0);

        m.put("k", "v1".to_string());
        assert!(m.put_if_exists("k", "v2".to_string()));
        assert_eq!(m.get("k"), Some("v2".to_string()));
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn test_remove() {
        let m = map(16);
        m.put("k", "v".to_string());
        assert_eq!(m.remove("k"), Some("v".to_string()));
        assert_eq!(m.remove("k"), None);
        assert_eq!(m.len(), 0);
    }

    #[test]
    fn test_get_with_avoids_clone() {
        let m = map(16);
        m.put("k", "hello".to_string());
        assert_eq!(m.get_with("k", |v| v.len()), Some(5));
        assert_eq!(m.get_with("nope", |v| v.len()), None);
    }

    #[test]
    fn test_keys_and_for_each() {
        let m = map(16);
        for i in 0..100 {
            m.put(format!("key:{}", i), i.to_string());
        }

        let mut keys = m.keys();
        keys.sort();
        assert_eq!(keys.len(), 100);
        assert!(keys.contains(&"key:42".to_string()));

        let mut visited = 0;
        m.for_each(|_, _| {
            visited += 1;
            true
        });
        assert_eq!(visited, 100);
    }

    #[test]
    fn test_for_each_stops_early() {
        let m = map(16);
        for i in 0..100 {
            m.put(format!("key:{}", i), i.to_string());
        }

        let mut visited = 0;
        m.for_each(|_, _| {
            visited += 1;
            visited < 10
        });
        assert_eq!(visited, 10);
    }

    #[test]
    fn test_random_keys() {
        let m = map(16);
        assert!(m.random_keys(5).is_empty());

        m.put("only", "1".to_string());
        let keys = m.random_keys(3);
        assert_eq!(keys, vec!["only", "only", "only"]);
    }

    #[test]
    fn test_random_distinct_keys() {
        let m = map(16);
        for i in 0..50 {
            m.put(format!("key:{}", i), i.to_string());
        }

        let keys = m.random_distinct_keys(10);
        assert_eq!(keys.len(), 10);
        let unique: HashSet<_> = keys.iter().collect();
        assert_eq!(unique.len(), 10);
        assert!(keys.iter().all(|k| m.contains_key(k)));

        // asking for more than exist returns everything
        assert_eq!(m.random_distinct_keys(500).len(), 50);
    }

    #[test]
    fn test_random_distinct_keys_while_map_shrinks() {
        let m = Arc::new(map(64));
        for i in 0..4000 {
            m.put(format!("key:{}", i), i.to_string());
        }

        let remover = {
            let m = Arc::clone(&m);
            thread::spawn(move || {
                for i in 0..4000 {
                    m.remove(&format!("key:{}", i));
                }
            })
        };

        // each call must return even as the map drops below the limit
        while !m.is_empty() {
            let keys = m.random_distinct_keys(3000);
            assert!(keys.len() <= 3000);
            let unique: HashSet<_> = keys.iter().collect();
            assert_eq!(unique.len(), keys.len());
        }

        remover.join().unwrap();
        assert!(m.random_distinct_keys(3000).is_empty());
    }

    #[test]
    fn test_clear() {
        let m = map(16);
        for i in 0..20 {
            m.put(format!("key:{}", i), i.to_string());
        }
        m.clear();
        assert_eq!(m.len(), 0);
        assert!(m.keys().is_empty());
        assert_eq!(m.shard_count(), 16);
    }

    #[test]
    fn test_lock_keys_composite_update() {
        let m = map(16);
        m.put("a", "1".to_string());

        {
            let mut locked = m.lock_keys(&["a", "b", "a"]);
            let indices: Vec<usize> = locked.shard_indices().collect();
            let mut sorted = indices.clone();
            sorted.sort_unstable();
            sorted.dedup();
            assert_eq!(indices, sorted);

            let moved = locked.remove_with_lock("a").unwrap();
            assert!(locked.put_with_lock("b", moved));
            assert!(!locked.put_if_absent_with_lock("b", "x".to_string()));
            assert!(locked.put_if_exists_with_lock("b", "2".to_string()));
            assert_eq!(locked.get_with_lock("b"), Some(&"2".to_string()));
            locked.get_mut_with_lock("b").unwrap().push('!');
            assert!(locked.get_mut_with_lock("a").is_none());
            assert!(!locked.contains_key_with_lock("a"));
        }

        assert_eq!(m.get("b"), Some("2!".to_string()));
        assert_eq!(m.len(), 1);
    }

    #[test]
    #[should_panic(expected = "not locked by this guard")]
    fn test_lock_keys_rejects_foreign_key() {
        let m = map(1024);
        let other = (0..)
            .map(|i| format!("k{}", i))
            .find(|k| m.shard_index(k) != m.shard_index("a"))
            .unwrap();
        let locked = m.lock_keys(&["a"]);
        locked.get_with_lock(&other);
    }

    #[test]
    fn test_concurrent_distinct_puts() {
        let m = Arc::new(map(64));
        let mut handles = vec![];

        for i in 0..10 {
            let m = Arc::clone(&m);
            handles.push(thread::spawn(move || {
                for j in 0..100 {
                    let key = format!("key-{}-{}", i, j);
                    m.put(key.clone(), "value".to_string());
                    m.put(key, "again".to_string());
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(m.len(), 1000);
    }

    #[test]
    fn test_concurrent_lock_keys_no_deadlock() {
        let m = Arc::new(map(16));
        let mut handles = vec![];

        for i in 0..8 {
            let m = Arc::clone(&m);
            handles.push(thread::spawn(move || {
                for j in 0..200 {
                    let keys = if i % 2 == 0 {
                        [format!("x{}", j), format!("y{}", j)]
                    } else {
                        [format!("y{}", j), format!("x{}", j)]
                    };
                    let mut locked = m.lock_keys(&keys);
                    locked.put_with_lock(keys[0].clone(), "v".to_string());
                    locked.put_with_lock(keys[1].clone(), "v".to_string());
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(m.len(), 400);
    }
}
