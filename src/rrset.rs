// Copyright 2015-2017 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The RRset data model: keys, payloads, trust ranks and references.
//!
//! Records are carried in their wire-parsed form: the on-wire rdata preceded
//! by a 16-bit big-endian length. While resident in the cache all TTLs are
//! absolute expiry timestamps; copies handed to callers are rebased to
//! seconds remaining.

use std::cmp::Ordering;
use std::fmt;

use crate::error::{Error, ErrorKind};
use crate::name::Name;

/// The type of a resource record.
#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone)]
#[non_exhaustive]
pub enum RecordType {
    /// [RFC 1035](https://tools.ietf.org/html/rfc1035) IPv4 address record
    A,
    /// [RFC 3596](https://tools.ietf.org/html/rfc3596) IPv6 address record
    AAAA,
    /// [RFC 1035](https://tools.ietf.org/html/rfc1035) canonical name record
    CNAME,
    /// [RFC 6672](https://tools.ietf.org/html/rfc6672) delegation name record
    DNAME,
    /// [RFC 4034](https://tools.ietf.org/html/rfc4034) delegation signer
    DS,
    /// [RFC 1035](https://tools.ietf.org/html/rfc1035) name server record
    NS,
    /// [RFC 4034](https://tools.ietf.org/html/rfc4034) next-secure record
    NSEC,
    /// [RFC 4034](https://tools.ietf.org/html/rfc4034) DNSSEC signature
    RRSIG,
    /// [RFC 1035](https://tools.ietf.org/html/rfc1035) start of authority
    SOA,
    /// [RFC 1035](https://tools.ietf.org/html/rfc1035) text record
    TXT,
    /// Unknown or unsupported record type
    Unknown(u16),
}

impl From<u16> for RecordType {
    fn from(value: u16) -> Self {
        match value {
            1 => Self::A,
            2 => Self::NS,
            5 => Self::CNAME,
            6 => Self::SOA,
            16 => Self::TXT,
            28 => Self::AAAA,
            39 => Self::DNAME,
            43 => Self::DS,
            46 => Self::RRSIG,
            47 => Self::NSEC,
            other => Self::Unknown(other),
        }
    }
}

impl From<RecordType> for u16 {
    fn from(rtype: RecordType) -> Self {
        match rtype {
            RecordType::A => 1,
            RecordType::NS => 2,
            RecordType::CNAME => 5,
            RecordType::SOA => 6,
            RecordType::TXT => 16,
            RecordType::AAAA => 28,
            RecordType::DNAME => 39,
            RecordType::DS => 43,
            RecordType::RRSIG => 46,
            RecordType::NSEC => 47,
            RecordType::Unknown(other) => other,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => f.write_str("A"),
            Self::AAAA => f.write_str("AAAA"),
            Self::CNAME => f.write_str("CNAME"),
            Self::DNAME => f.write_str("DNAME"),
            Self::DS => f.write_str("DS"),
            Self::NS => f.write_str("NS"),
            Self::NSEC => f.write_str("NSEC"),
            Self::RRSIG => f.write_str("RRSIG"),
            Self::SOA => f.write_str("SOA"),
            Self::TXT => f.write_str("TXT"),
            Self::Unknown(code) => write!(f, "TYPE{code}"),
        }
    }
}

/// The class of a resource record, almost always `IN`.
#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone)]
#[non_exhaustive]
pub enum DnsClass {
    /// Internet
    IN,
    /// Unknown or unsupported class
    Unknown(u16),
}

impl From<u16> for DnsClass {
    fn from(value: u16) -> Self {
        match value {
            1 => Self::IN,
            other => Self::Unknown(other),
        }
    }
}

impl From<DnsClass> for u16 {
    fn from(class: DnsClass) -> Self {
        match class {
            DnsClass::IN => 1,
            DnsClass::Unknown(other) => other,
        }
    }
}

impl fmt::Display for DnsClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IN => f.write_str("IN"),
            Self::Unknown(code) => write!(f, "CLASS{code}"),
        }
    }
}

/// Where a record set came from, as an ordinal rank. Higher ranks win when
/// the store merges a new copy over an existing one.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Copy, Clone)]
pub enum RrsetTrust {
    /// Not yet classified
    None,
    /// Additional section of a non-authoritative answer
    AdditionalNoAa,
    /// Authority section of a non-authoritative answer
    AuthorityNoAa,
    /// Additional section of an authoritative answer
    AdditionalAa,
    /// Answer section of an authoritative answer for a different owner
    NonauthAnswerAa,
    /// Answer section of a non-authoritative answer
    AnswerNoAa,
    /// Glue from a delegating zone
    Glue,
    /// Authority section of an authoritative answer
    AuthorityAa,
    /// Answer section of an authoritative answer
    AnswerAa,
    /// Zone transfer from a secondary, without glue
    SecondaryNoGlue,
    /// Loaded on a primary, without glue
    PrimaryNoGlue,
    /// DNSSEC-validated
    Validated,
    /// Locally configured, beyond question
    Ultimate,
}

impl fmt::Display for RrsetTrust {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::AdditionalNoAa => "additional without AA",
            Self::AuthorityNoAa => "authority without AA",
            Self::AdditionalAa => "additional with AA",
            Self::NonauthAnswerAa => "non-authoritative answer with AA",
            Self::AnswerNoAa => "answer without AA",
            Self::Glue => "glue",
            Self::AuthorityAa => "authority with AA",
            Self::AnswerAa => "answer with AA",
            Self::SecondaryNoGlue => "secondary without glue",
            Self::PrimaryNoGlue => "primary without glue",
            Self::Validated => "validated",
            Self::Ultimate => "ultimate",
        };
        f.write_str(s)
    }
}

/// DNSSEC status assigned by the validator. The cache only carries it.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Copy, Clone)]
pub enum SecurityStatus {
    /// Not yet checked
    Unchecked,
    /// Failed validation
    Bogus,
    /// Could not be determined
    Indeterminate,
    /// Provably without DNSSEC coverage
    Insecure,
    /// Validated
    Secure,
}

impl fmt::Display for SecurityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unchecked => "unchecked",
            Self::Bogus => "bogus",
            Self::Indeterminate => "indeterminate",
            Self::Insecure => "insecure",
            Self::Secure => "secure",
        };
        f.write_str(s)
    }
}

/// The composite identity of a cached record set.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RrsetKey {
    /// Canonical owner name
    pub name: Name,
    /// Record type
    pub rtype: RecordType,
    /// Record class
    pub class: DnsClass,
    /// Opaque flag bits; copies with different flags are distinct entries
    pub flags: u32,
}

impl RrsetKey {
    /// Flag marking an NSEC stored for the apex side of a zone cut, so it
    /// does not shadow the parent-side copy used for referrals.
    pub const NSEC_AT_APEX: u32 = 0x1;

    /// A key with no flags set.
    pub fn new(name: Name, rtype: RecordType, class: DnsClass) -> Self {
        Self {
            name,
            rtype,
            class,
            flags: 0,
        }
    }

    /// Sets the flag bits.
    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    /// Stable non-cryptographic hash over the four key fields in fixed
    /// order: FNV-1a over the canonical name bytes, then type, class and
    /// flags in big-endian byte order. The wire parser must use the same
    /// mix so parser-built keys land in the same bucket as store-built
    /// ones.
    pub fn compute_hash(&self) -> u64 {
        hash_fields(&self.name, self.rtype, self.class, self.flags)
    }
}

// Total order used wherever several entries are locked together: type,
// name length, name bytes, class, flags. All lock acquisition paths agree
// on it, which is what keeps multi-entry locking deadlock-free.
impl Ord for RrsetKey {
    fn cmp(&self, other: &Self) -> Ordering {
        u16::from(self.rtype)
            .cmp(&u16::from(other.rtype))
            .then_with(|| self.name.len().cmp(&other.name.len()))
            .then_with(|| self.name.cmp(&other.name))
            .then_with(|| u16::from(self.class).cmp(&u16::from(other.class)))
            .then_with(|| self.flags.cmp(&other.flags))
    }
}

impl PartialOrd for RrsetKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for RrsetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.name, self.class, self.rtype)
    }
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(mut h: u64, bytes: &[u8]) -> u64 {
    for &b in bytes {
        h ^= u64::from(b);
        h = h.wrapping_mul(FNV_PRIME);
    }
    h
}

pub(crate) fn hash_fields(name: &Name, rtype: RecordType, class: DnsClass, flags: u32) -> u64 {
    let mut h = fnv1a(FNV_OFFSET, name.as_wire());
    h = fnv1a(h, &u16::from(rtype).to_be_bytes());
    h = fnv1a(h, &u16::from(class).to_be_bytes());
    h = fnv1a(h, &flags.to_be_bytes());
    h
}

/// One record of a set: wire-parsed rdata plus its TTL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordData {
    /// On-wire rdata preceded by its 16-bit big-endian length
    wire: Box<[u8]>,
    /// Expiry timestamp in the cache; seconds remaining in a served copy
    pub ttl: u64,
}

impl RecordData {
    /// Builds a record from bare rdata, prepending the length prefix.
    pub fn new(rdata: &[u8], ttl: u64) -> Self {
        debug_assert!(rdata.len() <= u16::MAX as usize);
        let mut wire = Vec::with_capacity(rdata.len() + 2);
        wire.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
        wire.extend_from_slice(rdata);
        Self {
            wire: wire.into(),
            ttl,
        }
    }

    /// Adopts an already length-prefixed buffer as produced by the wire
    /// parser. The prefix is not validated here; consumers that interpret
    /// the rdata check it and treat disagreement as a miss.
    pub fn from_prefixed(wire: impl Into<Box<[u8]>>, ttl: u64) -> Self {
        Self {
            wire: wire.into(),
            ttl,
        }
    }

    /// The full stored form, length prefix included.
    pub fn wire(&self) -> &[u8] {
        &self.wire
    }

    /// The rdata without its length prefix. Empty when the buffer is too
    /// short to carry a prefix at all.
    pub fn rdata(&self) -> &[u8] {
        self.wire.get(2..).unwrap_or_default()
    }

    /// Interprets the rdata as a single wire-format name, as found in
    /// CNAME, DNAME and NS records. Verifies the length prefix against the
    /// stored buffer before trusting it.
    pub fn as_name(&self) -> Result<Name, Error> {
        // at least the prefix and a root label
        if self.wire.len() < 3 {
            return Err(ErrorKind::MalformedRdata.into());
        }
        let declared = u16::from_be_bytes([self.wire[0], self.wire[1]]) as usize;
        if declared != self.wire.len() - 2 {
            return Err(ErrorKind::MalformedRdata.into());
        }
        Name::from_wire(self.rdata()).map_err(|_| ErrorKind::MalformedRdata.into())
    }
}

/// The payload stored for an [`RrsetKey`]: the records, any covering
/// signatures, and the merged TTL/trust/security state.
#[derive(Clone, Debug)]
pub struct RrsetData {
    records: Vec<RecordData>,
    rrsig_count: usize,
    /// Set-level TTL, always the minimum of the per-record TTLs
    pub ttl: u64,
    /// Trust rank, consulted by the store's merge policy
    pub trust: RrsetTrust,
    /// Validator-assigned security status
    pub security: SecurityStatus,
}

impl RrsetData {
    /// Builds a payload; the trailing `rrsig_count` entries of `records`
    /// are the covering RRSIGs. The set TTL is derived from the records.
    pub fn new(
        records: Vec<RecordData>,
        rrsig_count: usize,
        trust: RrsetTrust,
        security: SecurityStatus,
    ) -> Self {
        debug_assert!(rrsig_count <= records.len());
        let mut data = Self {
            records,
            rrsig_count,
            ttl: 0,
            trust,
            security,
        };
        data.refresh_ttl();
        data
    }

    /// Number of primary records, signatures excluded.
    pub fn count(&self) -> usize {
        self.records.len() - self.rrsig_count
    }

    /// Number of covering signatures.
    pub fn rrsig_count(&self) -> usize {
        self.rrsig_count
    }

    /// All records, primaries first, then signatures.
    pub fn records(&self) -> &[RecordData] {
        &self.records
    }

    /// Recomputes the set-level TTL as the minimum over all records.
    pub fn refresh_ttl(&mut self) {
        self.ttl = self.records.iter().map(|r| r.ttl).min().unwrap_or(0);
    }

    /// Byte equality of the record payloads; counts and rdata must match,
    /// TTL, trust and security are not compared.
    pub fn data_equal(&self, other: &Self) -> bool {
        self.count() == other.count()
            && self.rrsig_count == other.rrsig_count
            && self
                .records
                .iter()
                .zip(other.records.iter())
                .all(|(a, b)| a.wire() == b.wire())
    }

    /// Extends every per-record TTL to the max of both copies and refreshes
    /// the set TTL. Used when byte-equal data is re-inserted.
    pub fn extend_ttls(&mut self, newer: &Self) {
        for (rec, new) in self.records.iter_mut().zip(newer.records.iter()) {
            rec.ttl = rec.ttl.max(new.ttl);
        }
        self.refresh_ttl();
    }

    /// Shifts every TTL from a relative count of seconds to an absolute
    /// expiry timestamp, capping each at `max_ttl` seconds out.
    pub fn absolutize_ttls(&mut self, now: u64, max_ttl: u64) {
        for rec in &mut self.records {
            rec.ttl = now + rec.ttl.min(max_ttl);
        }
        self.refresh_ttl();
    }

    /// A deep copy with TTLs rebased to seconds remaining at `now`.
    pub fn to_relative(&self, now: u64) -> Self {
        let mut copy = self.clone();
        for rec in &mut copy.records {
            rec.ttl = rec.ttl.saturating_sub(now);
        }
        copy.ttl = copy.ttl.saturating_sub(now);
        copy
    }

    /// The validated rewrite target of a CNAME or DNAME set: the name in
    /// the first record's rdata. Any disagreement between the length
    /// prefix and the stored buffer is malformed and reported as such.
    pub fn cname_target(&self) -> Result<Name, Error> {
        let Some(first) = self.records.first() else {
            return Err(ErrorKind::InvariantViolation("record set with no records").into());
        };
        first.as_name()
    }
}

/// A record set as handed to callers: key plus payload, both deep copies.
#[derive(Clone, Debug)]
pub struct Rrset {
    /// The identity of the set
    pub key: RrsetKey,
    /// The payload; TTLs are seconds remaining in served copies
    pub data: RrsetData,
}

/// A durable, non-owning reference to a cached record set.
///
/// The `id` tag is assigned by the store at insertion and zeroed at
/// destruction; a reference is live only while the store's entry for `key`
/// still carries the same tag. Dereferencing always goes back through the
/// store under the entry's lock, so a stale reference is a clean miss and
/// never a dangling read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RrsetRef {
    /// Identity of the referenced set
    pub key: RrsetKey,
    /// Id tag observed at insertion; 0 never matches a live entry
    pub id: u64,
}
