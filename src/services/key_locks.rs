//! Sharded per-identifier lock table.
//!
//! Identifiers hash onto a fixed set of async mutexes. Two operations on the
//! same identifier always contend for the same shard; unrelated identifiers
//! only collide when they share a shard.

use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
};
use tokio::sync::{Mutex, MutexGuard};

pub const DEFAULT_SHARDS: usize = 256;

#[derive(Debug)]
pub struct KeyLocks {
    shards: Box<[Mutex<()>]>,
}

/// Guards held for an operation spanning two identifiers.
pub struct PairGuard<'a> {
    _first: MutexGuard<'a, ()>,
    _second: Option<MutexGuard<'a, ()>>,
}

impl KeyLocks {
    pub fn new(shards: usize) -> Self {
        let shards = shards.max(1);
        Self {
            shards: (0..shards).map(|_| Mutex::new(())).collect(),
        }
    }

    fn shard_of(&self, identifier: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        identifier.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    pub async fn lock(&self, identifier: &str) -> MutexGuard<'_, ()> {
        self.shards[self.shard_of(identifier)].lock().await
    }

    /// Lock two identifiers, always in ascending shard order.
    pub async fn lock_pair(&self, a: &str, b: &str) -> PairGuard<'_> {
        let (sa, sb) = (self.shard_of(a), self.shard_of(b));
        if sa == sb {
            return PairGuard {
                _first: self.shards[sa].lock().await,
                _second: None,
            };
        }
        let (lo, hi) = if sa < sb { (sa, sb) } else { (sb, sa) };
        let first = self.shards[lo].lock().await;
        let second = self.shards[hi].lock().await;
        PairGuard {
            _first: first,
            _second: Some(second),
        }
    }
}

impl Default for KeyLocks {
    fn default() -> Self {
        Self::new(DEFAULT_SHARDS)
    }
}
