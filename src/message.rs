// Copyright 2015-2017 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Cached and served message types.
//!
//! A cached message ([`ReplyInfo`]) does not own its record sets: it holds
//! id-tagged references into the record-set store, so the sets can be
//! merged, replaced or evicted independently. The exchange type handed to
//! and received from callers ([`DnsMsg`]) is fully owned, with all TTLs
//! relative: counts of seconds as parsed on the way in, seconds remaining
//! on the way out.

use std::fmt;

use crate::name::Name;
use crate::rrset::{DnsClass, RecordType, Rrset, RrsetRef};

/// The question a cached message answers.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct QueryKey {
    /// Canonical query name
    pub qname: Name,
    /// Query type
    pub qtype: RecordType,
    /// Query class
    pub qclass: DnsClass,
}

impl QueryKey {
    /// A new query key.
    pub fn new(qname: Name, qtype: RecordType, qclass: DnsClass) -> Self {
        Self {
            qname,
            qtype,
            qclass,
        }
    }

    /// Stable non-cryptographic hash over name, type and class, with the
    /// same mix the wire parser applies to incoming questions.
    pub fn compute_hash(&self) -> u64 {
        crate::rrset::hash_fields(&self.qname, self.qtype, self.qclass, 0)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.qname, self.qclass, self.qtype)
    }
}

/// Response codes carried in the low bits of the header flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ResponseCode {
    /// No error
    NoError,
    /// Non-existent domain
    NxDomain,
    /// A name exists where it must not, e.g. an overflowing DNAME rewrite
    YxDomain,
    /// Any other code
    Unknown(u8),
}

impl From<u8> for ResponseCode {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::NoError,
            3 => Self::NxDomain,
            6 => Self::YxDomain,
            other => Self::Unknown(other),
        }
    }
}

impl From<ResponseCode> for u8 {
    fn from(code: ResponseCode) -> Self {
        match code {
            ResponseCode::NoError => 0,
            ResponseCode::NxDomain => 3,
            ResponseCode::YxDomain => 6,
            ResponseCode::Unknown(other) => other,
        }
    }
}

/// DNS header flag bits as cached alongside a message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResponseFlags(u16);

impl ResponseFlags {
    const QR: u16 = 0x8000;
    const AA: u16 = 0x0400;
    const RCODE_MASK: u16 = 0x000f;

    /// Flags for a plain reply: QR set, nothing else.
    pub fn reply() -> Self {
        Self(Self::QR)
    }

    /// The raw bits.
    pub fn bits(self) -> u16 {
        self.0
    }

    /// Flags from raw header bits.
    pub fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    /// Whether this is a response.
    pub fn qr(self) -> bool {
        self.0 & Self::QR != 0
    }

    /// Whether the answer was authoritative.
    pub fn aa(self) -> bool {
        self.0 & Self::AA != 0
    }

    /// Sets the authoritative-answer bit.
    pub fn set_aa(&mut self) {
        self.0 |= Self::AA;
    }

    /// The response code.
    pub fn rcode(self) -> ResponseCode {
        ResponseCode::from((self.0 & Self::RCODE_MASK) as u8)
    }

    /// Replaces the response code.
    pub fn set_rcode(&mut self, code: ResponseCode) {
        self.0 = (self.0 & !Self::RCODE_MASK) | u16::from(u8::from(code)) & Self::RCODE_MASK;
    }
}

/// A message as cached: header state, section shape, and id-tagged
/// references into the record-set store.
///
/// `rrsets` lists the references in section order (answer, then authority,
/// then additional, partitioned by the three counts); `refs` holds the same
/// references sorted by the canonical key order, which is the order every
/// locking pass uses. The message TTL is the minimum of the constituent
/// record-set TTLs at the time of caching. A message is never served if any
/// reference has gone stale or any constituent expired.
#[derive(Clone, Debug)]
pub struct ReplyInfo {
    /// Cached header flag bits
    pub flags: ResponseFlags,
    /// Question count of the cached reply
    pub qdcount: u16,
    /// Number of record sets in the answer section
    pub an_count: usize,
    /// Number of record sets in the authority section
    pub ns_count: usize,
    /// Number of record sets in the additional section
    pub ar_count: usize,
    /// Absolute expiry timestamp
    pub ttl: u64,
    /// References in section order
    pub rrsets: Vec<RrsetRef>,
    /// The same references in canonical key order, for locking
    pub refs: Vec<RrsetRef>,
}

impl ReplyInfo {
    /// Total number of referenced record sets.
    pub fn rrset_count(&self) -> usize {
        self.rrsets.len()
    }

    /// Rebuilds the lock-order view from the section-order references.
    /// Duplicates collapse so no entry is ever locked twice in one pass.
    pub fn sync_refs(&mut self) {
        self.refs = self.rrsets.clone();
        self.refs.sort_unstable_by(|a, b| a.key.cmp(&b.key));
        self.refs.dedup();
    }
}

/// An owned DNS message exchanged with the cache.
///
/// Produced by lookups (all TTLs rebased to seconds remaining, never
/// aliasing cache memory) and accepted by the store path (TTLs relative, as
/// parsed off the wire).
#[derive(Clone, Debug)]
pub struct DnsMsg {
    /// The question
    pub query: QueryKey,
    /// Header flag bits
    pub flags: ResponseFlags,
    /// Question count
    pub qdcount: u16,
    /// Message TTL in relative seconds
    pub ttl: u64,
    /// Answer section record sets
    pub answer: Vec<Rrset>,
    /// Authority section record sets
    pub authority: Vec<Rrset>,
    /// Additional section record sets
    pub additional: Vec<Rrset>,
}

impl DnsMsg {
    /// An empty reply for `query` with the QR bit set.
    pub fn reply(query: QueryKey) -> Self {
        Self {
            query,
            flags: ResponseFlags::reply(),
            qdcount: 1,
            ttl: 0,
            answer: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
        }
    }

    /// Total number of record sets across all three sections.
    pub fn rrset_count(&self) -> usize {
        self.answer.len() + self.authority.len() + self.additional.len()
    }

    /// All record sets in section order.
    pub fn sections(&self) -> impl Iterator<Item = &Rrset> {
        self.answer
            .iter()
            .chain(self.authority.iter())
            .chain(self.additional.iter())
    }
}
