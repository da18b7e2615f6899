// Copyright 2015-2017 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The cache front end: storing replies, synthesizing answers from cached
//! state, and finding the closest known delegation.
//!
//! A lookup tries, in order: the exact cached message (positive and
//! negative answers both live there), a DNAME on any ancestor of the query
//! name (with the CNAME resynthesized so it stays consistent with the
//! rewrite), and finally a CNAME at the query name itself. Everything the
//! cache hands out is an owned deep copy with TTLs rebased to seconds
//! remaining; cache memory is never aliased by callers.

use tracing::{debug, trace, warn};

use crate::config::CacheConfig;
use crate::delegation::DelegationPoint;
use crate::error::Error;
use crate::message::{DnsMsg, QueryKey, ReplyInfo, ResponseCode};
use crate::msg_cache::{MessageCache, MsgReadGuard};
use crate::name::Name;
use crate::rrset::{
    DnsClass, RecordData, RecordType, Rrset, RrsetData, RrsetKey, RrsetTrust, SecurityStatus,
};
use crate::rrset_cache::{RrsetCache, RrsetReadGuard, Scratch};

/// The DNS response cache: a record-set store, a message store referencing
/// it, and the synthesis logic over both.
///
/// All operations take an explicit `now` timestamp in seconds; the cache
/// never reads the wall clock.
pub struct DnsCache {
    rrsets: RrsetCache,
    messages: MessageCache,
    config: CacheConfig,
}

impl DnsCache {
    /// A cache sized and bounded by `config`.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            rrsets: RrsetCache::new(config.rrset_capacity, config.shards),
            messages: MessageCache::new(config.msg_capacity, config.shards),
            config,
        }
    }

    /// The underlying record-set store. The validator and the iterator
    /// update individual record sets through this without going through a
    /// whole message.
    pub fn rrsets(&self) -> &RrsetCache {
        &self.rrsets
    }

    /// The underlying message store.
    pub fn messages(&self) -> &MessageCache {
        &self.messages
    }

    /// The configuration the cache was built with.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Stores a reply: every record set is installed (or merged) in the
    /// record-set store, then the message is cached referencing the
    /// canonical entries.
    ///
    /// TTLs in `msg` are relative, as parsed off the wire; they are clamped
    /// to [`CacheConfig::max_ttl`] and converted to absolute expiry here.
    /// The cached message expires with the canonical entries its references
    /// point at after the merge, which may outlive (kept or extended
    /// copies) the TTLs the reply arrived with. A message whose own TTL is
    /// zero is not retained, but its record sets are, so delegation
    /// information survives. `hash` is the query hash precomputed by the
    /// parser.
    pub fn store_message(&self, msg: DnsMsg, hash: u64, now: u64) {
        let DnsMsg {
            query,
            flags,
            qdcount,
            ttl: msg_ttl,
            answer,
            authority,
            additional,
        } = msg;
        let an_count = answer.len();
        let ns_count = authority.len();
        let ar_count = additional.len();
        if an_count + ns_count + ar_count == 0 {
            debug_assert!(false, "reply with no record sets");
            warn!(query = %query, "refusing to store reply with no record sets");
            return;
        }

        // the message expires with the canonical entries its references
        // end up pointing at: the merge below may keep a higher-trust
        // pre-existing copy or extend a byte-equal one, so the lifetime
        // each update reports wins over the TTL that was parsed in
        let max_ttl = self.config.max_ttl;
        let mut reply_ttl = max_ttl;
        let mut rrsets = Vec::with_capacity(an_count + ns_count + ar_count);
        for mut rrset in answer.into_iter().chain(authority).chain(additional) {
            rrset.data.absolutize_ttls(now, max_ttl);
            let outcome = self.rrsets.update(rrset, now);
            reply_ttl = reply_ttl.min(outcome.ttl);
            rrsets.push(outcome.rref);
        }

        // the message's own TTL may be zero even when its record sets are
        // not: a caller stores a reply it never wants served (a referral,
        // a scrubbed answer) while keeping the record sets, which may
        // carry delegation data worth having
        if msg_ttl == 0 || reply_ttl == 0 {
            debug!(query = %query, "TTL 0: message not cached");
            return;
        }

        let mut reply = ReplyInfo {
            flags,
            qdcount,
            an_count,
            ns_count,
            ar_count,
            ttl: now + reply_ttl,
            rrsets,
            refs: Vec::new(),
        };
        reply.sync_refs();
        trace!(query = %query, ttl = reply_ttl, "caching message");
        self.messages.store(query, hash, reply);
    }

    /// Synthesizes a reply for the query from cached state, or `None` on a
    /// miss. `scratch` is a reusable buffer for the hit path's recency
    /// bookkeeping.
    pub fn lookup(
        &self,
        qname: &Name,
        qtype: RecordType,
        qclass: DnsClass,
        now: u64,
        scratch: &mut Scratch,
    ) -> Option<DnsMsg> {
        let qkey = QueryKey::new(qname.clone(), qtype, qclass);
        let hash = qkey.compute_hash();

        // the message cache holds both answers and NXDOMAIN/NODATA replies
        if let Some(entry) = self.messages.lookup(&qkey, hash) {
            if let Some(msg) = self.reply_to_msg(&entry, now, scratch) {
                debug!(query = %qkey, "message cache hit");
                return Some(msg);
            }
            drop(entry);
            // expired, or a constituent was evicted or replaced; the entry
            // can never be served again
            self.messages.remove(&qkey, hash);
        }

        // DNAME is checked before CNAME so the CNAME is resynthesized and
        // stays consistent with the rewrite
        if let Some(dname) = self.find_closest_of_type(qname, RecordType::DNAME, qclass, now) {
            match self.synth_dname_msg(&dname, &qkey, now) {
                Ok(msg) => {
                    debug!(query = %qkey, owner = %dname.key().name, "DNAME synthesis hit");
                    return Some(msg);
                }
                Err(err) => {
                    debug!(owner = %dname.key().name, %err, "dropping unusable DNAME");
                    let key = dname.key().clone();
                    drop(dname);
                    self.rrsets.remove(&key);
                }
            }
        }

        if let Some(cname) =
            self.rrsets
                .lookup(&RrsetKey::new(qname.clone(), RecordType::CNAME, qclass), now)
        {
            debug!(query = %qkey, "CNAME hit");
            return Some(Self::cname_msg(&cname, &qkey, now));
        }

        trace!(query = %qkey, "cache miss");
        None
    }

    /// Finds the closest enclosing delegation for the query name: the
    /// longest-suffix NS set in the cache, with glue addresses and the
    /// DS (or parent-side NSEC; NSEC3 and opt-in are not handled) attached.
    /// With `want_referral`, a referral message (QR only, no AA) is built
    /// alongside: NS in authority, security record after it, glue in the
    /// additional section.
    ///
    /// Missing glue or security records never fail the call; the
    /// delegation point is returned as populated as the cache allows.
    pub fn find_delegation(
        &self,
        qname: &Name,
        qtype: RecordType,
        qclass: DnsClass,
        now: u64,
        want_referral: bool,
    ) -> Option<(DelegationPoint, Option<DnsMsg>)> {
        let ns = self.find_closest_of_type(qname, RecordType::NS, qclass, now)?;
        let mut dp = DelegationPoint::from_ns_rrset(ns.key().name.clone(), &ns);
        let mut referral = want_referral.then(|| {
            let mut msg = DnsMsg::reply(QueryKey::new(qname.clone(), qtype, qclass));
            msg.ttl = ns.ttl - now;
            // NS plus DS or NSEC; up to two address sets per nameserver
            msg.authority = Vec::with_capacity(2);
            msg.additional = Vec::with_capacity(2 * dp.nameservers.len());
            msg.authority.push(ns.served(now));
            msg
        });
        // one entry lock at a time: release the NS set before the
        // DS/NSEC and glue lookups
        drop(ns);

        self.find_add_ds(&mut dp, referral.as_mut(), qclass, now);
        self.find_add_addrs(&mut dp, referral.as_mut(), qclass, now);
        debug!(
            query = %qname,
            delegation = %dp.name,
            nameservers = dp.nameservers.len(),
            "delegation found"
        );
        Some((dp, referral))
    }

    /// Promotes a cached message into a served reply: TTL check, lock all
    /// referenced record sets, deep-copy them in section order, release
    /// with a recency touch.
    fn reply_to_msg(
        &self,
        entry: &MsgReadGuard,
        now: u64,
        scratch: &mut Scratch,
    ) -> Option<DnsMsg> {
        if entry.ttl <= now {
            trace!(query = %entry.key(), "cached message expired");
            return None;
        }
        if entry.rrset_count() == 0 {
            debug_assert!(false, "cached message with no record sets");
            return None;
        }
        let guards = self.rrsets.lock_refs(&entry.refs, now)?;

        let mut msg = DnsMsg::reply(entry.key().clone());
        msg.flags = entry.flags;
        msg.qdcount = entry.qdcount;
        msg.ttl = entry.ttl - now;
        for (i, rref) in entry.rrsets.iter().enumerate() {
            // the lock-order view is sorted, so the guard for any
            // section-order reference is found by binary search
            let slot = entry
                .refs
                .binary_search_by(|probe| probe.key.cmp(&rref.key))
                .ok()?;
            let rrset = guards[slot].served(now);
            if i < entry.an_count {
                msg.answer.push(rrset);
            } else if i < entry.an_count + entry.ns_count {
                msg.authority.push(rrset);
            } else {
                msg.additional.push(rrset);
            }
        }
        self.rrsets.unlock_touch(guards, scratch);
        Some(msg)
    }

    /// A reply containing just the cached CNAME; the caller re-drives
    /// resolution on its target.
    fn cname_msg(cname: &RrsetReadGuard, qkey: &QueryKey, now: u64) -> DnsMsg {
        let mut msg = DnsMsg::reply(qkey.clone());
        msg.ttl = cname.ttl - now;
        msg.answer.push(cname.served(now));
        msg
    }

    /// A reply carrying the DNAME and a freshly synthesized CNAME for the
    /// query name. A rewrite overflowing the 255-octet name bound yields
    /// YXDOMAIN with the CNAME omitted; malformed DNAME rdata is an error
    /// and the caller evicts the set.
    fn synth_dname_msg(
        &self,
        dname: &RrsetReadGuard,
        qkey: &QueryKey,
        now: u64,
    ) -> Result<DnsMsg, Error> {
        let mut msg = DnsMsg::reply(qkey.clone());
        msg.ttl = dname.ttl - now;
        msg.answer.push(dname.served(now));

        let owner = &dname.key().name;
        if qkey.qtype == RecordType::DNAME && owner == &qkey.qname {
            // the query asked for the DNAME itself; nothing to rewrite
            return Ok(msg);
        }
        let target = dname.cname_target()?;
        let prefix_len = qkey.qname.len() - owner.len();
        let Some(rewritten) = qkey.qname.concat_prefix(prefix_len, &target) else {
            msg.flags.set_rcode(ResponseCode::YxDomain);
            return Ok(msg);
        };

        // the synthesized CNAME is per-query and must not be cached
        let record = RecordData::new(rewritten.as_wire(), 0);
        let data = RrsetData::new(
            vec![record],
            0,
            RrsetTrust::AnswerNoAa,
            SecurityStatus::Unchecked,
        );
        msg.answer.push(Rrset {
            key: RrsetKey::new(qkey.qname.clone(), RecordType::CNAME, qkey.qclass),
            data,
        });
        msg.ttl = 0;
        Ok(msg)
    }

    /// Walks ancestors of `qname` (itself included) and returns the first
    /// cached set of the wanted type, read-locked.
    fn find_closest_of_type(
        &self,
        qname: &Name,
        rtype: RecordType,
        qclass: DnsClass,
        now: u64,
    ) -> Option<RrsetReadGuard> {
        let mut name = qname.clone();
        loop {
            if let Some(guard) = self
                .rrsets
                .lookup(&RrsetKey::new(name.clone(), rtype, qclass), now)
            {
                return Some(guard);
            }
            name = name.parent()?;
        }
    }

    /// Attaches the DS, or failing that the parent-side NSEC, found at the
    /// delegation owner. A referral proves the cut from the parent side,
    /// so the apex-side NSEC (flagged) does not apply; neither do NSEC3 or
    /// opt-in, which are not handled here.
    fn find_add_ds(
        &self,
        dp: &mut DelegationPoint,
        referral: Option<&mut DnsMsg>,
        qclass: DnsClass,
        now: u64,
    ) {
        let guard = self
            .rrsets
            .lookup(&RrsetKey::new(dp.name.clone(), RecordType::DS, qclass), now)
            .or_else(|| {
                self.rrsets.lookup(
                    &RrsetKey::new(dp.name.clone(), RecordType::NSEC, qclass),
                    now,
                )
            });
        if let Some(guard) = guard {
            let rrset = guard.served(now);
            drop(guard);
            if let Some(msg) = referral {
                msg.authority.push(rrset.clone());
            }
            dp.ds_or_nsec = Some(rrset);
        }
    }

    /// Looks up A and AAAA for every nameserver of the delegation and
    /// attaches what the cache has, both to the address table and to the
    /// referral's additional section.
    fn find_add_addrs(
        &self,
        dp: &mut DelegationPoint,
        mut referral: Option<&mut DnsMsg>,
        qclass: DnsClass,
        now: u64,
    ) {
        let names: Vec<Name> = dp.nameservers.iter().map(|ns| ns.name.clone()).collect();
        for name in names {
            if let Some(guard) = self
                .rrsets
                .lookup(&RrsetKey::new(name.clone(), RecordType::A, qclass), now)
            {
                let rrset = guard.served(now);
                drop(guard);
                if let Some(msg) = referral.as_mut() {
                    msg.additional.push(rrset.clone());
                }
                dp.attach_a(&name, rrset);
            }
            if let Some(guard) = self
                .rrsets
                .lookup(&RrsetKey::new(name.clone(), RecordType::AAAA, qclass), now)
            {
                let rrset = guard.served(now);
                drop(guard);
                if let Some(msg) = referral.as_mut() {
                    msg.additional.push(rrset.clone());
                }
                dp.attach_aaaa(&name, rrset);
            }
        }
    }
}
