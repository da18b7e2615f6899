// Copyright 2015-2017 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Message and RRset caches for a validating recursive DNS resolver.
//!
//! Two coupled stores make up the cache. The record-set store maps an
//! owner/type/class/flags key to wire-parsed records with absolute expiry
//! timestamps, one reader/writer lock per entry. The message store maps a
//! query to a cached reply that references its record sets *by identity*
//! (key plus an id tag stamped at insertion), so sets can be merged,
//! replaced or evicted underneath cached messages; a reply whose reference
//! no longer verifies is simply a miss. On top sits the synthesis logic:
//! direct message hits, CNAME passthrough, DNAME-derived CNAME synthesis,
//! and referral construction from the closest cached delegation.
//!
//! Everything returned to callers is an owned deep copy with TTLs rebased
//! to seconds remaining. All operations take an explicit `now` timestamp;
//! the cache never reads the wall clock, which keeps behavior fully
//! deterministic under test.
//!
//! # Example
//!
//! ```rust
//! use resolver_cache::{
//!     CacheConfig, DnsCache, DnsMsg, DnsClass, Name, QueryKey, RecordData, RecordType, Rrset,
//!     RrsetData, RrsetKey, RrsetTrust, Scratch, SecurityStatus,
//! };
//!
//! let cache = DnsCache::new(CacheConfig::default());
//! let now = 1_700_000_000;
//!
//! // a parsed reply: one A record set, 300 second TTL
//! let qname = Name::from_ascii("example.com.").unwrap();
//! let query = QueryKey::new(qname.clone(), RecordType::A, DnsClass::IN);
//! let rrset = Rrset {
//!     key: RrsetKey::new(qname.clone(), RecordType::A, DnsClass::IN),
//!     data: RrsetData::new(
//!         vec![RecordData::new(&[192, 0, 2, 1], 300)],
//!         0,
//!         RrsetTrust::AnswerAa,
//!         SecurityStatus::Unchecked,
//!     ),
//! };
//! let mut msg = DnsMsg::reply(query.clone());
//! msg.ttl = 300;
//! msg.answer.push(rrset);
//!
//! cache.store_message(msg, query.compute_hash(), now);
//!
//! let mut scratch = Scratch::new();
//! let served = cache
//!     .lookup(&qname, RecordType::A, DnsClass::IN, now + 10, &mut scratch)
//!     .expect("cached");
//! assert_eq!(served.answer[0].data.ttl, 290);
//! ```

#![warn(
    clippy::default_trait_access,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::unimplemented,
    missing_copy_implementations,
    missing_docs,
    non_snake_case,
    non_upper_case_globals,
    rust_2018_idioms,
    unreachable_pub
)]
#![allow(clippy::single_component_path_imports)]

mod cache;
mod config;
mod delegation;
pub mod error;
mod message;
mod msg_cache;
mod name;
mod rrset;
mod rrset_cache;

pub use crate::cache::DnsCache;
pub use crate::config::{CacheConfig, MAX_TTL};
pub use crate::delegation::{DelegationPoint, Nameserver};
pub use crate::error::{Error, ErrorKind};
pub use crate::message::{DnsMsg, QueryKey, ReplyInfo, ResponseCode, ResponseFlags};
pub use crate::msg_cache::{MessageCache, MsgReadGuard};
pub use crate::name::{Name, MAX_LABEL_LEN, MAX_NAME_LEN};
pub use crate::rrset::{
    DnsClass, RecordData, RecordType, Rrset, RrsetData, RrsetKey, RrsetRef, RrsetTrust,
    SecurityStatus,
};
pub use crate::rrset_cache::{RrsetCache, RrsetReadGuard, Scratch, UpdateOutcome};
