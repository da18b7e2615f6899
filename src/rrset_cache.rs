// Copyright 2015-2017 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The record-set store.
//!
//! A sharded map from [`RrsetKey`] to a payload guarded by a per-entry
//! reader/writer lock. Every entry carries an id tag assigned from a
//! store-wide counter at insertion, bumped when the payload is replaced and
//! zeroed at eviction; stored [`RrsetRef`]s are only dereferenced back
//! through the store with the tag verified under the entry's lock, so a
//! reference that outlives its entry is a miss, never a dangling read.
//!
//! Lock discipline: a shard's mutex is only held for map operations, never
//! while an entry lock is being acquired, and never across user work.
//! Multi-entry acquisition happens exclusively through [`RrsetCache::lock_refs`]
//! in the canonical key order.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lru_cache::LruCache;
use parking_lot::lock_api::ArcRwLockReadGuard;
use parking_lot::{Mutex, RawRwLock, RwLock};
use tracing::trace;

use crate::config::CacheConfig;
use crate::error::{Error, ErrorKind};
use crate::rrset::{Rrset, RrsetData, RrsetKey, RrsetRef};

type DataGuard = ArcRwLockReadGuard<RawRwLock, RrsetData>;

#[derive(Debug)]
struct RrsetEntry {
    key: RrsetKey,
    hash: u64,
    /// 0 once the entry has been evicted or its payload replaced
    id: AtomicU64,
    data: Arc<RwLock<RrsetData>>,
}

/// A read-locked view of a cached record set.
///
/// Dropping the guard releases the entry lock. Guards obtained through
/// [`RrsetCache::lock_refs`] should be handed back via
/// [`RrsetCache::unlock_touch`] on the hit path so the entries keep their
/// recency.
pub struct RrsetReadGuard {
    entry: Arc<RrsetEntry>,
    data: DataGuard,
}

impl RrsetReadGuard {
    /// The key of the locked entry.
    pub fn key(&self) -> &RrsetKey {
        &self.entry.key
    }

    /// The id tag the entry carried when this guard was taken.
    pub fn id(&self) -> u64 {
        self.entry.id.load(Ordering::Acquire)
    }

    /// A durable reference to this entry.
    pub fn to_ref(&self) -> RrsetRef {
        RrsetRef {
            key: self.entry.key.clone(),
            id: self.id(),
        }
    }

    /// A deep copy for the caller, TTLs rebased to seconds remaining.
    pub fn served(&self, now: u64) -> Rrset {
        Rrset {
            key: self.entry.key.clone(),
            data: self.data.to_relative(now),
        }
    }
}

impl std::ops::Deref for RrsetReadGuard {
    type Target = RrsetData;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

/// The result of an [`RrsetCache::update`]: the reference every reply
/// should carry, and how long the data behind it actually lives.
///
/// The payload behind the reference is not always the inserted copy: the
/// merge may keep a higher-trust pre-existing set or extend the lifetime
/// of a byte-equal one. Callers deriving a message TTL must use this
/// value, not the TTL they inserted with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Reference to the canonical entry for the key
    pub rref: RrsetRef,
    /// Seconds remaining on the canonical payload, 0 when already expired
    pub ttl: u64,
}

/// Reusable per-thread buffer for batching recency touches, so the hot
/// lookup path takes each shard mutex once per reply instead of once per
/// record set.
#[derive(Default)]
pub struct Scratch {
    touches: Vec<(usize, Arc<RrsetEntry>)>,
}

impl Scratch {
    /// An empty scratch buffer.
    pub fn new() -> Self {
        Self::default()
    }
}

struct Shard {
    entries: Mutex<LruCache<RrsetKey, Arc<RrsetEntry>>>,
}

/// The concurrent record-set store.
pub struct RrsetCache {
    shards: Box<[Shard]>,
    per_shard: usize,
    next_id: AtomicU64,
}

impl RrsetCache {
    /// A store holding up to `capacity` entries spread over `shards`
    /// shards. When a shard fills up, its least recently used entries are
    /// evicted; insertion never fails.
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
            next_id: AtomicU64::new(1),
        }
    }

    fn shard_index(&self, hash: u64) -> usize {
        (hash as usize) % self.shards.len()
    }

    fn shard(&self, hash: u64) -> &Shard {
        &self.shards[self.shard_index(hash)]
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Looks up an unexpired entry and returns it read-locked, refreshing
    /// its recency. An expired entry is a miss.
    pub fn lookup(&self, key: &RrsetKey, now: u64) -> Option<RrsetReadGuard> {
        let hash = key.compute_hash();
        let entry = {
            let mut entries = self.shard(hash).entries.lock();
            entries.get_mut(key).map(|entry| entry.clone())
        }?;
        let data = entry.data.read_arc();
        if entry.id.load(Ordering::Acquire) == 0 {
            // evicted between the map lookup and the entry lock
            return None;
        }
        if data.ttl <= now {
            trace!(key = %key, "record set expired");
            return None;
        }
        Some(RrsetReadGuard { entry, data })
    }

    /// Installs or merges a record set and returns the canonical outcome.
    ///
    /// Merge policy against an existing entry:
    /// - strictly higher existing trust always wins: the existing payload
    ///   is kept and the returned reference adopts it;
    /// - byte-equal data extends the per-record TTLs to the max of both
    ///   copies;
    /// - anything else replaces the payload in place and bumps the id tag,
    ///   invalidating outstanding references.
    ///
    /// TTLs in `rrset.data` must already be absolute expiry timestamps.
    /// The store is never full: victims are evicted as needed. The
    /// returned [`UpdateOutcome::ttl`] is the remaining lifetime of the
    /// canonical payload at `now`, which after a keep or an extend is not
    /// the lifetime the caller inserted with.
    pub fn update(&self, rrset: Rrset, now: u64) -> UpdateOutcome {
        let Rrset { key, data: incoming } = rrset;
        let hash = key.compute_hash();
        let shard = self.shard(hash);
        loop {
            let existing = {
                let mut entries = shard.entries.lock();
                entries.get_mut(&key).map(|entry| entry.clone())
            };
            match existing {
                Some(entry) => {
                    let mut guard = entry.data.write();
                    let id = entry.id.load(Ordering::Acquire);
                    if id == 0 {
                        // evicted while we waited for the entry lock
                        continue;
                    }
                    if guard.trust > incoming.trust {
                        trace!(key = %key, existing = %guard.trust, new = %incoming.trust,
                            "keeping higher-trust copy");
                        return UpdateOutcome {
                            rref: RrsetRef { key, id },
                            ttl: guard.ttl.saturating_sub(now),
                        };
                    }
                    if guard.data_equal(&incoming) {
                        guard.extend_ttls(&incoming);
                        return UpdateOutcome {
                            rref: RrsetRef { key, id },
                            ttl: guard.ttl.saturating_sub(now),
                        };
                    }
                    let ttl = incoming.ttl.saturating_sub(now);
                    let id = self.next_id();
                    *guard = incoming;
                    entry.id.store(id, Ordering::Release);
                    trace!(key = %key, id, "replaced record set in place");
                    return UpdateOutcome {
                        rref: RrsetRef { key, id },
                        ttl,
                    };
                }
                None => {
                    let mut entries = shard.entries.lock();
                    if entries.contains_key(&key) {
                        // lost the race to another insert; merge with it
                        drop(entries);
                        continue;
                    }
                    while entries.len() >= self.per_shard {
                        match entries.remove_lru() {
                            Some((victim_key, victim)) => {
                                victim.id.store(0, Ordering::Release);
                                trace!(key = %victim_key, "evicting record set");
                            }
                            None => break,
                        }
                    }
                    let ttl = incoming.ttl.saturating_sub(now);
                    let id = self.next_id();
                    let entry = Arc::new(RrsetEntry {
                        key: key.clone(),
                        hash,
                        id: AtomicU64::new(id),
                        data: Arc::new(RwLock::new(incoming)),
                    });
                    entries.insert(key.clone(), entry);
                    return UpdateOutcome {
                        rref: RrsetRef { key, id },
                        ttl,
                    };
                }
            }
        }
    }

    /// Acquires read locks on every referenced entry, in the callers'
    /// (pre-sorted) order, verifying each id tag. All-or-nothing: any
    /// stale or expired reference releases what was already taken and the
    /// whole set is a miss.
    pub fn lock_refs(&self, refs: &[RrsetRef], now: u64) -> Option<Vec<RrsetReadGuard>> {
        let mut guards = Vec::with_capacity(refs.len());
        for rref in refs {
            match self.lock_ref(rref, now) {
                Ok(guard) => guards.push(guard),
                Err(err) => {
                    trace!(key = %rref.key, %err, "reference no longer served");
                    return None;
                }
            }
        }
        Some(guards)
    }

    fn lock_ref(&self, rref: &RrsetRef, now: u64) -> Result<RrsetReadGuard, Error> {
        let hash = rref.key.compute_hash();
        let entry = {
            let mut entries = self.shard(hash).entries.lock();
            entries.get_mut(&rref.key).map(|entry| entry.clone())
        }
        .ok_or(ErrorKind::StaleReference)?;
        let data = entry.data.read_arc();
        if rref.id == 0 || entry.id.load(Ordering::Acquire) != rref.id {
            return Err(ErrorKind::StaleReference.into());
        }
        if data.ttl <= now {
            return Err(ErrorKind::Expired.into());
        }
        Ok(RrsetReadGuard { entry, data })
    }

    /// Releases a batch of read locks and records a recency touch for each
    /// entry. Entry locks are dropped before any shard mutex is taken;
    /// touches are grouped so every shard is locked at most once.
    pub fn unlock_touch(&self, guards: Vec<RrsetReadGuard>, scratch: &mut Scratch) {
        scratch.touches.clear();
        for guard in guards {
            let RrsetReadGuard { entry, data } = guard;
            drop(data);
            scratch.touches.push((self.shard_index(entry.hash), entry));
        }
        scratch.touches.sort_unstable_by_key(|(shard, _)| *shard);
        let mut i = 0;
        while i < scratch.touches.len() {
            let shard = scratch.touches[i].0;
            let mut entries = self.shards[shard].entries.lock();
            while i < scratch.touches.len() && scratch.touches[i].0 == shard {
                let entry = &scratch.touches[i].1;
                if entry.id.load(Ordering::Acquire) != 0 {
                    let _ = entries.get_mut(&entry.key);
                }
                i += 1;
            }
        }
        scratch.touches.clear();
    }

    /// Drops the entry for `key`, zeroing its id tag. Used to shed entries
    /// whose cached bytes turned out malformed.
    pub fn remove(&self, key: &RrsetKey) {
        let mut entries = self.shard(key.compute_hash()).entries.lock();
        if let Some(entry) = entries.remove(key) {
            entry.id.store(0, Ordering::Release);
            trace!(key = %key, "removed record set");
        }
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.entries.lock().len())
            .sum()
    }

    /// True when no entries are resident.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::Name;
    use crate::rrset::{DnsClass, RecordData, RecordType, RrsetTrust, SecurityStatus};

    fn a_rrset(name: &str, octets: [u8; 4], expiry: u64, trust: RrsetTrust) -> Rrset {
        Rrset {
            key: RrsetKey::new(
                Name::from_ascii(name).unwrap(),
                RecordType::A,
                DnsClass::IN,
            ),
            data: RrsetData::new(
                vec![RecordData::new(&octets, expiry)],
                0,
                trust,
                SecurityStatus::Unchecked,
            ),
        }
    }

    #[test]
    fn test_insert_lookup() {
        let cache = RrsetCache::new(64, 4);
        let rrset = a_rrset("example.com.", [192, 0, 2, 1], 1300, RrsetTrust::AnswerAa);
        let outcome = cache.update(rrset.clone(), 1000);
        assert_ne!(outcome.rref.id, 0);
        assert_eq!(outcome.ttl, 300);

        let guard = cache.lookup(&rrset.key, 1000).unwrap();
        assert_eq!(guard.id(), outcome.rref.id);
        assert_eq!(guard.records()[0].rdata(), &[192, 0, 2, 1]);
        drop(guard);

        // expired at its own timestamp
        assert!(cache.lookup(&rrset.key, 1300).is_none());
    }

    #[test]
    fn test_higher_trust_kept() {
        let cache = RrsetCache::new(64, 4);
        let validated = a_rrset("example.com.", [192, 0, 2, 1], 1300, RrsetTrust::Validated);
        let first = cache.update(validated, 1000);

        let weaker = a_rrset("example.com.", [192, 0, 2, 99], 1500, RrsetTrust::Glue);
        let second = cache.update(weaker.clone(), 1000);

        // caller adopts the canonical entry, data untouched, and the
        // outcome reports the kept copy's lifetime
        assert_eq!(second.rref.id, first.rref.id);
        assert_eq!(second.ttl, 300);
        let guard = cache.lookup(&weaker.key, 1000).unwrap();
        assert_eq!(guard.records()[0].rdata(), &[192, 0, 2, 1]);
        assert_eq!(guard.trust, RrsetTrust::Validated);
    }

    #[test]
    fn test_higher_trust_kept_even_when_expired() {
        let cache = RrsetCache::new(64, 4);
        let validated = a_rrset("example.com.", [192, 0, 2, 1], 1100, RrsetTrust::Validated);
        let first = cache.update(validated, 1000);

        // the validated copy has expired, but a weaker set still never
        // displaces it
        let weaker = a_rrset("example.com.", [192, 0, 2, 99], 2000, RrsetTrust::Glue);
        let second = cache.update(weaker.clone(), 1500);
        assert_eq!(second.rref.id, first.rref.id);
        assert_eq!(second.ttl, 0);
        assert!(cache.lookup(&weaker.key, 1500).is_none());

        // an equal-or-higher rank replaces it as usual
        let fresh = a_rrset("example.com.", [192, 0, 2, 7], 2000, RrsetTrust::Validated);
        let third = cache.update(fresh.clone(), 1500);
        assert_ne!(third.rref.id, first.rref.id);
        let guard = cache.lookup(&fresh.key, 1500).unwrap();
        assert_eq!(guard.records()[0].rdata(), &[192, 0, 2, 7]);
    }

    #[test]
    fn test_equal_data_extends_ttl() {
        let cache = RrsetCache::new(64, 4);
        let short = a_rrset("example.com.", [192, 0, 2, 1], 1100, RrsetTrust::AnswerAa);
        let first = cache.update(short.clone(), 1000);

        let longer = a_rrset("example.com.", [192, 0, 2, 1], 1900, RrsetTrust::AnswerNoAa);
        let second = cache.update(longer, 1000);

        assert_eq!(second.rref.id, first.rref.id);
        // the outcome reports the extended lifetime
        assert_eq!(second.ttl, 900);
        let guard = cache.lookup(&short.key, 1000).unwrap();
        assert_eq!(guard.ttl, 1900);
    }

    #[test]
    fn test_idempotent_update() {
        let cache = RrsetCache::new(64, 4);
        let rrset = a_rrset("example.com.", [192, 0, 2, 1], 1300, RrsetTrust::AnswerAa);
        let first = cache.update(rrset.clone(), 1000);
        let second = cache.update(rrset.clone(), 1000);
        assert_eq!(first, second);
        let guard = cache.lookup(&rrset.key, 1000).unwrap();
        assert_eq!(guard.ttl, 1300);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_replace_bumps_id() {
        let cache = RrsetCache::new(64, 4);
        let old = a_rrset("example.com.", [192, 0, 2, 1], 1300, RrsetTrust::AnswerAa);
        let old_ref = cache.update(old.clone(), 1000).rref;

        let new = a_rrset("example.com.", [192, 0, 2, 2], 1300, RrsetTrust::AnswerAa);
        let new_ref = cache.update(new, 1000).rref;
        assert_ne!(new_ref.id, old_ref.id);

        // the stale reference no longer locks
        assert!(cache.lock_refs(&[old_ref], 1000).is_none());
        assert!(cache.lock_refs(std::slice::from_ref(&new_ref), 1000).is_some());
    }

    #[test]
    fn test_lock_refs_all_or_nothing() {
        let cache = RrsetCache::new(64, 4);
        let a = a_rrset("a.example.com.", [192, 0, 2, 1], 1300, RrsetTrust::AnswerAa);
        let b = a_rrset("b.example.com.", [192, 0, 2, 2], 1100, RrsetTrust::AnswerAa);
        let mut refs = vec![cache.update(a, 1000).rref, cache.update(b, 1000).rref];
        refs.sort_by(|x, y| x.key.cmp(&y.key));

        assert_eq!(cache.lock_refs(&refs, 1000).unwrap().len(), 2);
        // b expires first and takes the whole set with it
        assert!(cache.lock_refs(&refs, 1100).is_none());
    }

    #[test]
    fn test_eviction_zeroes_id() {
        let cache = RrsetCache::new(2, 1);
        let first = a_rrset("a.example.com.", [192, 0, 2, 1], 1300, RrsetTrust::AnswerAa);
        let first_ref = cache.update(first, 1000).rref;
        cache.update(
            a_rrset("b.example.com.", [192, 0, 2, 2], 1300, RrsetTrust::AnswerAa),
            1000,
        );
        // third insert evicts the least recently used entry
        cache.update(
            a_rrset("c.example.com.", [192, 0, 2, 3], 1300, RrsetTrust::AnswerAa),
            1000,
        );
        assert_eq!(cache.len(), 2);
        assert!(cache.lookup(&first_ref.key, 1000).is_none());
        assert!(cache.lock_refs(&[first_ref], 1000).is_none());
    }

    #[test]
    fn test_eviction_during_read_is_safe() {
        let cache = RrsetCache::new(1, 1);
        let held = a_rrset("a.example.com.", [192, 0, 2, 1], 1300, RrsetTrust::AnswerAa);
        let key = held.key.clone();
        cache.update(held, 1000);

        let guard = cache.lookup(&key, 1000).unwrap();
        // evicts the held entry out from under the reader
        cache.update(
            a_rrset("b.example.com.", [192, 0, 2, 2], 1300, RrsetTrust::AnswerAa),
            1000,
        );
        // the read view stays intact, but the entry is now dead
        assert_eq!(guard.records()[0].rdata(), &[192, 0, 2, 1]);
        assert_eq!(guard.id(), 0);
        drop(guard);
        assert!(cache.lookup(&key, 1000).is_none());
    }

    #[test]
    fn test_unlock_touch_refreshes_recency() {
        let cache = RrsetCache::new(2, 1);
        let mut scratch = Scratch::new();
        let a = a_rrset("a.example.com.", [192, 0, 2, 1], 1300, RrsetTrust::AnswerAa);
        let b = a_rrset("b.example.com.", [192, 0, 2, 2], 1300, RrsetTrust::AnswerAa);
        let a_ref = cache.update(a, 1000).rref;
        cache.update(b.clone(), 1000);

        // touch `a`, making `b` the eviction victim
        let guards = cache.lock_refs(std::slice::from_ref(&a_ref), 1000).unwrap();
        cache.unlock_touch(guards, &mut scratch);
        cache.update(
            a_rrset("c.example.com.", [192, 0, 2, 3], 1300, RrsetTrust::AnswerAa),
            1000,
        );
        assert!(cache.lookup(&a_ref.key, 1000).is_some());
        assert!(cache.lookup(&b.key, 1000).is_none());
    }

    mod props {
        use proptest::prelude::*;

        use super::*;

        fn arb_trust() -> impl Strategy<Value = RrsetTrust> {
            prop_oneof![
                Just(RrsetTrust::None),
                Just(RrsetTrust::AdditionalNoAa),
                Just(RrsetTrust::AnswerNoAa),
                Just(RrsetTrust::Glue),
                Just(RrsetTrust::AnswerAa),
                Just(RrsetTrust::Validated),
                Just(RrsetTrust::Ultimate),
            ]
        }

        proptest! {
            #[test]
            fn prop_lower_trust_never_replaces(
                existing_trust in arb_trust(),
                incoming_trust in arb_trust(),
                incoming_rdata in prop::collection::vec(any::<u8>(), 1..16),
            ) {
                let cache = RrsetCache::new(64, 4);
                let existing =
                    a_rrset("example.com.", [192, 0, 2, 1], 2000, existing_trust);
                let key = existing.key.clone();
                cache.update(existing, 1000);

                let incoming = Rrset {
                    key: key.clone(),
                    data: RrsetData::new(
                        vec![RecordData::new(&incoming_rdata, 2000)],
                        0,
                        incoming_trust,
                        SecurityStatus::Unchecked,
                    ),
                };
                cache.update(incoming, 1000);

                let guard = cache.lookup(&key, 1000).unwrap();
                if incoming_trust < existing_trust {
                    prop_assert_eq!(guard.records()[0].rdata(), &[192, 0, 2, 1]);
                    prop_assert_eq!(guard.trust, existing_trust);
                }
            }
        }
    }

    #[test]
    fn test_concurrent_updates_and_lookups() {
        let cache = std::sync::Arc::new(RrsetCache::new(256, 8));
        std::thread::scope(|scope| {
            for worker in 0..4u8 {
                let cache = std::sync::Arc::clone(&cache);
                scope.spawn(move || {
                    for i in 0..100u8 {
                        let name = format!("h{}.w{worker}.example.com.", i % 16);
                        let rrset =
                            a_rrset(&name, [10, worker, 0, i], 2000, RrsetTrust::AnswerAa);
                        let key = rrset.key.clone();
                        let outcome = cache.update(rrset, 1000);
                        assert_ne!(outcome.rref.id, 0);
                        if let Some(guard) = cache.lookup(&key, 1000) {
                            assert!(guard.ttl > 1000);
                        }
                    }
                });
            }
        });
        assert!(!cache.is_empty());
    }
}
