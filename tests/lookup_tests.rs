// Copyright 2015-2017 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! End-to-end lookup flows: store and serve, CNAME/DNAME synthesis, and
//! reference invalidation.

use resolver_cache::{
    CacheConfig, DnsCache, DnsClass, DnsMsg, Name, QueryKey, RecordData, RecordType, ResponseCode,
    Rrset, RrsetData, RrsetKey, RrsetTrust, Scratch, SecurityStatus,
};

const NOW: u64 = 1_700_000_000;

fn name(s: &str) -> Name {
    Name::from_ascii(s).unwrap()
}

fn rrset(owner: &str, rtype: RecordType, rdatas: &[&[u8]], ttl: u64, trust: RrsetTrust) -> Rrset {
    let records = rdatas
        .iter()
        .map(|rdata| RecordData::new(rdata, ttl))
        .collect();
    Rrset {
        key: RrsetKey::new(name(owner), rtype, DnsClass::IN),
        data: RrsetData::new(records, 0, trust, SecurityStatus::Unchecked),
    }
}

fn name_rrset(owner: &str, rtype: RecordType, target: &str, ttl: u64, trust: RrsetTrust) -> Rrset {
    rrset(owner, rtype, &[name(target).as_wire()], ttl, trust)
}

/// Inserts a record set directly, converting its relative TTLs to cache
/// (absolute) form the way the store path does.
fn insert_rrset(cache: &DnsCache, mut rrset: Rrset, now: u64) {
    rrset.data.absolutize_ttls(now, cache.config().max_ttl);
    cache.rrsets().update(rrset, now);
}

fn store_reply(cache: &DnsCache, qname: &str, qtype: RecordType, answer: Vec<Rrset>, now: u64) {
    let query = QueryKey::new(name(qname), qtype, DnsClass::IN);
    let mut msg = DnsMsg::reply(query.clone());
    msg.ttl = answer.iter().map(|r| r.data.ttl).min().unwrap_or(0);
    msg.answer = answer;
    cache.store_message(msg, query.compute_hash(), now);
}

fn lookup(cache: &DnsCache, qname: &str, qtype: RecordType, now: u64) -> Option<DnsMsg> {
    let mut scratch = Scratch::new();
    cache.lookup(&name(qname), qtype, DnsClass::IN, now, &mut scratch)
}

#[test]
fn test_store_then_lookup_round_trip() {
    let cache = DnsCache::new(CacheConfig::default());
    store_reply(
        &cache,
        "example.com.",
        RecordType::A,
        vec![rrset(
            "example.com.",
            RecordType::A,
            &[&[192, 0, 2, 1]],
            300,
            RrsetTrust::AnswerAa,
        )],
        NOW,
    );

    let served = lookup(&cache, "example.com.", RecordType::A, NOW + 10).unwrap();
    assert_eq!(served.answer.len(), 1);
    assert!(served.authority.is_empty());
    assert!(served.additional.is_empty());
    assert_eq!(served.ttl, 290);

    let set = &served.answer[0];
    assert_eq!(set.key.name, name("example.com."));
    assert_eq!(set.key.rtype, RecordType::A);
    assert_eq!(set.data.records()[0].ttl, 290);
    assert_eq!(set.data.records()[0].rdata(), &[192, 0, 2, 1]);
}

#[test]
fn test_case_insensitive_lookup() {
    let cache = DnsCache::new(CacheConfig::default());
    store_reply(
        &cache,
        "Example.COM.",
        RecordType::A,
        vec![rrset(
            "EXAMPLE.com.",
            RecordType::A,
            &[&[192, 0, 2, 1]],
            300,
            RrsetTrust::AnswerAa,
        )],
        NOW,
    );
    assert!(lookup(&cache, "eXaMpLe.CoM.", RecordType::A, NOW).is_some());
}

#[test]
fn test_expired_message_is_a_miss() {
    let cache = DnsCache::new(CacheConfig::default());
    store_reply(
        &cache,
        "example.com.",
        RecordType::A,
        vec![rrset(
            "example.com.",
            RecordType::A,
            &[&[192, 0, 2, 1]],
            300,
            RrsetTrust::AnswerAa,
        )],
        NOW,
    );
    assert!(lookup(&cache, "example.com.", RecordType::A, NOW + 300).is_none());
}

#[test]
fn test_zero_ttl_message_not_retained_but_rrsets_are() {
    let cache = DnsCache::new(CacheConfig::default());
    let query = QueryKey::new(name("example.com."), RecordType::NS, DnsClass::IN);
    let mut msg = DnsMsg::reply(query.clone());
    msg.ttl = 0;
    msg.answer = vec![name_rrset(
        "example.com.",
        RecordType::NS,
        "ns1.example.com.",
        60,
        RrsetTrust::AuthorityAa,
    )];
    cache.store_message(msg, query.compute_hash(), NOW);

    // the message is gone ...
    assert!(lookup(&cache, "example.com.", RecordType::NS, NOW).is_none());

    // ... but the NS set still answers delegation queries
    let (dp, _) = cache
        .find_delegation(&name("www.example.com."), RecordType::A, DnsClass::IN, NOW, false)
        .unwrap();
    assert_eq!(dp.name, name("example.com."));
    assert_eq!(dp.nameservers.len(), 1);
    assert_eq!(dp.nameservers[0].name, name("ns1.example.com."));
}

#[test]
fn test_negative_answer_served_from_message_cache() {
    let cache = DnsCache::new(CacheConfig::default());
    let query = QueryKey::new(name("nope.example.com."), RecordType::A, DnsClass::IN);
    let mut msg = DnsMsg::reply(query.clone());
    let mut flags = msg.flags;
    flags.set_rcode(ResponseCode::NxDomain);
    msg.flags = flags;
    msg.ttl = 60;
    // SOA in authority, as negative answers carry
    msg.authority = vec![rrset(
        "example.com.",
        RecordType::SOA,
        &[b"fake-soa-rdata"],
        60,
        RrsetTrust::AuthorityAa,
    )];
    cache.store_message(msg, query.compute_hash(), NOW);

    let served = lookup(&cache, "nope.example.com.", RecordType::A, NOW + 1).unwrap();
    assert_eq!(served.flags.rcode(), ResponseCode::NxDomain);
    assert!(served.answer.is_empty());
    assert_eq!(served.authority.len(), 1);
    assert_eq!(served.authority[0].data.records()[0].ttl, 59);
}

#[test]
fn test_cname_hit() {
    let cache = DnsCache::new(CacheConfig::default());
    insert_rrset(
        &cache,
        name_rrset(
            "www.example.com.",
            RecordType::CNAME,
            "host.example.net.",
            120,
            RrsetTrust::AnswerAa,
        ),
        NOW,
    );

    let served = lookup(&cache, "www.example.com.", RecordType::A, NOW + 20).unwrap();
    assert_eq!(served.answer.len(), 1);
    assert_eq!(served.answer[0].key.rtype, RecordType::CNAME);
    assert_eq!(served.ttl, 100);
    assert_eq!(
        served.answer[0].data.cname_target().unwrap(),
        name("host.example.net.")
    );

    // asking for the CNAME itself serves it the same way
    let served = lookup(&cache, "www.example.com.", RecordType::CNAME, NOW).unwrap();
    assert_eq!(served.answer.len(), 1);
}

#[test]
fn test_dname_preferred_over_cname() {
    let cache = DnsCache::new(CacheConfig::default());
    insert_rrset(
        &cache,
        name_rrset(
            "example.com.",
            RecordType::DNAME,
            "example.net.",
            3600,
            RrsetTrust::AnswerAa,
        ),
        NOW,
    );
    insert_rrset(
        &cache,
        name_rrset(
            "www.example.com.",
            RecordType::CNAME,
            "old.example.com.",
            3600,
            RrsetTrust::AnswerAa,
        ),
        NOW,
    );

    let served = lookup(&cache, "www.example.com.", RecordType::A, NOW).unwrap();
    assert_eq!(served.answer.len(), 2);

    let dname = &served.answer[0];
    assert_eq!(dname.key.rtype, RecordType::DNAME);
    assert_eq!(dname.key.name, name("example.com."));

    let cname = &served.answer[1];
    assert_eq!(cname.key.rtype, RecordType::CNAME);
    assert_eq!(cname.key.name, name("www.example.com."));
    assert_eq!(
        cname.data.cname_target().unwrap(),
        name("www.example.net.")
    );
    // synthesized per query, never cacheable
    assert_eq!(cname.data.ttl, 0);
    assert_eq!(served.ttl, 0);
}

#[test]
fn test_dname_rewrite_overflow_yields_yxdomain() {
    let cache = DnsCache::new(CacheConfig::default());
    let label = "a".repeat(63);
    // a target deep enough that any longer prefix overflows 255 octets
    let target = format!("{label}.{label}.{label}.b.");
    insert_rrset(
        &cache,
        name_rrset("a.", RecordType::DNAME, &target, 3600, RrsetTrust::AnswerAa),
        NOW,
    );

    let qname = format!("{label}.a.");
    let served = lookup(&cache, &qname, RecordType::A, NOW).unwrap();
    assert_eq!(served.flags.rcode(), ResponseCode::YxDomain);
    // only the DNAME; the overflowing CNAME is omitted
    assert_eq!(served.answer.len(), 1);
    assert_eq!(served.answer[0].key.rtype, RecordType::DNAME);
}

#[test]
fn test_stale_reference_invalidates_message() {
    let cache = DnsCache::new(CacheConfig::default());
    store_reply(
        &cache,
        "example.com.",
        RecordType::A,
        vec![rrset(
            "example.com.",
            RecordType::A,
            &[&[192, 0, 2, 1]],
            300,
            RrsetTrust::AnswerAa,
        )],
        NOW,
    );
    assert!(lookup(&cache, "example.com.", RecordType::A, NOW).is_some());

    // replace the underlying record set with different bytes; the id tag
    // bumps and every outstanding reference goes stale
    insert_rrset(
        &cache,
        rrset(
            "example.com.",
            RecordType::A,
            &[&[203, 0, 113, 9]],
            300,
            RrsetTrust::AnswerAa,
        ),
        NOW,
    );

    assert!(lookup(&cache, "example.com.", RecordType::A, NOW).is_none());
}

#[test]
fn test_equal_reinsert_keeps_message_serveable() {
    let cache = DnsCache::new(CacheConfig::default());
    let answer = rrset(
        "example.com.",
        RecordType::A,
        &[&[192, 0, 2, 1]],
        300,
        RrsetTrust::AnswerAa,
    );
    store_reply(&cache, "example.com.", RecordType::A, vec![answer.clone()], NOW);

    // byte-equal data only extends TTLs; the id tag is untouched
    insert_rrset(&cache, answer, NOW + 100);

    let served = lookup(&cache, "example.com.", RecordType::A, NOW + 10).unwrap();
    assert_eq!(served.answer.len(), 1);
}

#[test]
fn test_reply_ttl_follows_kept_higher_trust_copy() {
    let cache = DnsCache::new(CacheConfig::default());
    // a validated copy is already cached with 500 seconds to live
    insert_rrset(
        &cache,
        rrset(
            "example.com.",
            RecordType::A,
            &[&[192, 0, 2, 1]],
            500,
            RrsetTrust::Validated,
        ),
        NOW,
    );

    // a weaker reply for the same set arrives with only 50 seconds
    store_reply(
        &cache,
        "example.com.",
        RecordType::A,
        vec![rrset(
            "example.com.",
            RecordType::A,
            &[&[203, 0, 113, 9]],
            50,
            RrsetTrust::AnswerNoAa,
        )],
        NOW,
    );

    // the cached message references the kept validated copy and lives as
    // long as it does, well past the weaker reply's own TTL
    let served = lookup(&cache, "example.com.", RecordType::A, NOW + 100).unwrap();
    assert_eq!(served.ttl, 400);
    assert_eq!(served.answer[0].data.records()[0].rdata(), &[192, 0, 2, 1]);
    assert_eq!(served.answer[0].data.trust, RrsetTrust::Validated);
}

#[test]
fn test_reply_ttl_follows_extended_lifetime() {
    let cache = DnsCache::new(CacheConfig::default());
    // the same bytes are already cached with more time left
    insert_rrset(
        &cache,
        rrset(
            "example.com.",
            RecordType::A,
            &[&[192, 0, 2, 1]],
            400,
            RrsetTrust::AnswerAa,
        ),
        NOW,
    );

    store_reply(
        &cache,
        "example.com.",
        RecordType::A,
        vec![rrset(
            "example.com.",
            RecordType::A,
            &[&[192, 0, 2, 1]],
            300,
            RrsetTrust::AnswerAa,
        )],
        NOW,
    );

    // byte-equal data only extends TTLs, and the message follows the
    // extended lifetime of the canonical entry
    let served = lookup(&cache, "example.com.", RecordType::A, NOW + 350).unwrap();
    assert_eq!(served.ttl, 50);
    assert_eq!(served.answer[0].data.records()[0].ttl, 50);
}

#[test]
fn test_lookup_miss() {
    let cache = DnsCache::new(CacheConfig::default());
    assert!(lookup(&cache, "example.com.", RecordType::A, NOW).is_none());
}
