// Copyright 2015-2017 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Delegation points: the best known zone cut for a name.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use tracing::debug;

use crate::name::Name;
use crate::rrset::{Rrset, RrsetData};

/// One nameserver of a delegation, with any resolved addresses found in
/// the cache.
#[derive(Clone, Debug)]
pub struct Nameserver {
    /// The nameserver's name, from the NS rdata
    pub name: Name,
    /// Cached A set for the name, if any
    pub a: Option<Rrset>,
    /// Cached AAAA set for the name, if any
    pub aaaa: Option<Rrset>,
}

impl Nameserver {
    fn new(name: Name) -> Self {
        Self {
            name,
            a: None,
            aaaa: None,
        }
    }

    /// All addresses resolved for this nameserver. Records whose rdata is
    /// not a well-formed address are skipped.
    pub fn addrs(&self) -> Vec<IpAddr> {
        let mut addrs = Vec::new();
        if let Some(a) = &self.a {
            for rec in &a.data.records()[..a.data.count()] {
                if let Ok(octets) = <[u8; 4]>::try_from(rec.rdata()) {
                    addrs.push(IpAddr::V4(Ipv4Addr::from(octets)));
                }
            }
        }
        if let Some(aaaa) = &self.aaaa {
            for rec in &aaaa.data.records()[..aaaa.data.count()] {
                if let Ok(octets) = <[u8; 16]>::try_from(rec.rdata()) {
                    addrs.push(IpAddr::V6(Ipv6Addr::from(octets)));
                }
            }
        }
        addrs
    }
}

/// The best known (ancestor or exact) zone cut for a query name: the
/// delegated owner, its nameservers with any cached glue, and the security
/// record proving (or denying) a signed delegation.
#[derive(Clone, Debug)]
pub struct DelegationPoint {
    /// Owner of the NS set, i.e. the delegated zone
    pub name: Name,
    /// Nameservers, deduplicated by name
    pub nameservers: Vec<Nameserver>,
    /// DS, or parent-side NSEC, found at the cut
    pub ds_or_nsec: Option<Rrset>,
}

impl DelegationPoint {
    /// An empty delegation point at `name`.
    pub fn new(name: Name) -> Self {
        Self {
            name,
            nameservers: Vec::new(),
            ds_or_nsec: None,
        }
    }

    /// A delegation point populated from the rdata of an NS set. Records
    /// with malformed rdata are skipped; duplicate names collapse.
    pub fn from_ns_rrset(owner: Name, ns_data: &RrsetData) -> Self {
        let mut dp = Self::new(owner);
        for rec in &ns_data.records()[..ns_data.count()] {
            match rec.as_name() {
                Ok(name) => dp.add_ns(name),
                Err(err) => {
                    debug!(owner = %dp.name, %err, "skipping nameserver with malformed rdata");
                }
            }
        }
        dp
    }

    /// Adds a nameserver by name, ignoring duplicates.
    pub fn add_ns(&mut self, name: Name) {
        if self.find_ns(&name).is_none() {
            self.nameservers.push(Nameserver::new(name));
        }
    }

    fn find_ns(&self, name: &Name) -> Option<usize> {
        self.nameservers.iter().position(|ns| &ns.name == name)
    }

    /// Attaches a cached A set to the named nameserver.
    pub fn attach_a(&mut self, name: &Name, rrset: Rrset) {
        if let Some(i) = self.find_ns(name) {
            self.nameservers[i].a = Some(rrset);
        }
    }

    /// Attaches a cached AAAA set to the named nameserver.
    pub fn attach_aaaa(&mut self, name: &Name, rrset: Rrset) {
        if let Some(i) = self.find_ns(name) {
            self.nameservers[i].aaaa = Some(rrset);
        }
    }
}
