// Copyright 2015-2017 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The message store.
//!
//! Sharded like the record-set store, but simpler: message entries are not
//! referenced by anything, so there are no id tags, and the payload is
//! immutable once stored. The query hash is supplied by the caller (it is
//! precomputed by the wire parser) and reused for shard selection.

use std::sync::Arc;

use lru_cache::LruCache;
use parking_lot::lock_api::ArcRwLockReadGuard;
use parking_lot::{Mutex, RawRwLock, RwLock};
use tracing::trace;

use crate::config::CacheConfig;
use crate::message::{QueryKey, ReplyInfo};

type ReplyGuard = ArcRwLockReadGuard<RawRwLock, ReplyInfo>;

#[derive(Debug)]
struct MsgEntry {
    key: QueryKey,
    data: Arc<RwLock<ReplyInfo>>,
}

/// A read-locked view of a cached message.
///
/// Holding the guard pins the entry's contents, not its liveness: the TTL
/// check and the locking of the referenced record sets are the caller's
/// responsibility.
pub struct MsgReadGuard {
    entry: Arc<MsgEntry>,
    data: ReplyGuard,
}

impl MsgReadGuard {
    /// The query this entry answers.
    pub fn key(&self) -> &QueryKey {
        &self.entry.key
    }
}

impl std::ops::Deref for MsgReadGuard {
    type Target = ReplyInfo;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

struct Shard {
    entries: Mutex<LruCache<QueryKey, Arc<MsgEntry>>>,
}

/// The concurrent message store.
pub struct MessageCache {
    shards: Box<[Shard]>,
    per_shard: usize,
}

impl MessageCache {
    /// A store holding up to `capacity` messages spread over `shards`
    /// shards, evicting least recently used entries under pressure.
    pub fn new(capacity: usize, shards: usize) -> Self {
        let per_shard = CacheConfig::per_shard(capacity, shards);
        let shards = (0..shards.max(1))
            .map(|_| Shard {
                entries: Mutex::new(LruCache::new(per_shard)),
            })
            .collect::<Vec<_>>();
        Self {
            shards: shards.into(),
            per_shard,
        }
    }

    fn shard(&self, hash: u64) -> &Shard {
        &self.shards[(hash as usize) % self.shards.len()]
    }

    /// Returns the entry for `key` read-locked, refreshing its recency.
    pub fn lookup(&self, key: &QueryKey, hash: u64) -> Option<MsgReadGuard> {
        let entry = {
            let mut entries = self.shard(hash).entries.lock();
            entries.get_mut(key).map(|entry| entry.clone())
        }?;
        let data = entry.data.read_arc();
        Some(MsgReadGuard { entry, data })
    }

    /// Installs a message, replacing any previous entry for the query and
    /// evicting shard victims as needed. Never fails.
    pub fn store(&self, key: QueryKey, hash: u64, reply: ReplyInfo) {
        let mut entries = self.shard(hash).entries.lock();
        while entries.len() >= self.per_shard && !entries.contains_key(&key) {
            match entries.remove_lru() {
                Some((victim, _)) => trace!(query = %victim, "evicting message"),
                None => break,
            }
        }
        let entry = Arc::new(MsgEntry {
            key: key.clone(),
            data: Arc::new(RwLock::new(reply)),
        });
        entries.insert(key, entry);
    }

    /// Drops the entry for `key`, if any. Used when a lookup finds the
    /// entry's references gone stale.
    pub fn remove(&self, key: &QueryKey, hash: u64) {
        let mut entries = self.shard(hash).entries.lock();
        if entries.remove(key).is_some() {
            trace!(query = %key, "dropped message with dead references");
        }
    }

    /// Number of resident messages.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.entries.lock().len())
            .sum()
    }

    /// True when no messages are resident.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
