// Copyright 2015-2017 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Cache configuration.

#[cfg(feature = "serde")]
use serde::Deserialize;

/// Maximum TTL accepted into the cache, in seconds. This is set to one day.
///
/// [RFC 2181, section 8](https://tools.ietf.org/html/rfc2181#section-8) says
/// that the maximum TTL value is 2147483647, but implementations may place an
/// upper bound on received TTLs.
pub const MAX_TTL: u64 = 86_400;

/// Sizing and TTL policy for the two caches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Deserialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
pub struct CacheConfig {
    /// Capacity of the record-set store, in entries across all shards.
    pub rrset_capacity: usize,

    /// Capacity of the message store, in entries across all shards.
    pub msg_capacity: usize,

    /// Number of shards per store. Each shard holds its own recency list
    /// and lock, so this bounds contention between worker threads.
    pub shards: usize,

    /// Upper bound applied to every TTL at store time, in seconds.
    /// Authorities advertising longer lifetimes are clamped to this.
    pub max_ttl: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            rrset_capacity: 8192,
            msg_capacity: 4096,
            shards: 16,
            max_ttl: MAX_TTL,
        }
    }
}

impl CacheConfig {
    /// Per-shard entry count for a store of `capacity` total entries.
    pub(crate) fn per_shard(capacity: usize, shards: usize) -> usize {
        (capacity / shards.max(1)).max(1)
    }
}
