// Copyright 2015-2017 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Canonical wire-format domain names.
//!
//! A [`Name`] is always absolute and always lowercase: a sequence of
//! length-prefixed labels terminated by the zero-length root label.
//! Canonicalizing at construction means equality, hashing and ordering are
//! plain byte operations, which is what the cache keys rely on.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, ErrorKind};

/// Maximum length of a wire-format domain name, in octets.
pub const MAX_NAME_LEN: usize = 255;

/// Maximum length of a single label, in octets (excluding the length byte).
pub const MAX_LABEL_LEN: usize = 63;

/// An absolute DNS name in canonical (lowercased) wire format.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Name {
    wire: Box<[u8]>,
}

impl Name {
    /// The root name `.`
    pub fn root() -> Self {
        Self {
            wire: Box::from([0u8].as_slice()),
        }
    }

    /// Builds a name from uncompressed wire bytes, validating label structure
    /// and the 255-octet bound. ASCII uppercase is folded to lowercase.
    pub fn from_wire(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() > MAX_NAME_LEN {
            return Err(ErrorKind::NameTooLong.into());
        }
        let mut i = 0;
        loop {
            let Some(&len) = bytes.get(i) else {
                return Err(ErrorKind::Message("name not terminated by root label").into());
            };
            if len == 0 {
                i += 1;
                break;
            }
            if len as usize > MAX_LABEL_LEN {
                // also rejects compression pointers (top bits set)
                return Err(ErrorKind::Message("label exceeds 63 octets").into());
            }
            i += 1 + len as usize;
        }
        if i != bytes.len() {
            return Err(ErrorKind::Message("trailing bytes after root label").into());
        }
        let mut wire = bytes.to_vec();
        wire.make_ascii_lowercase();
        Ok(Self { wire: wire.into() })
    }

    /// Parses a dotted name such as `www.example.com.`. A missing trailing
    /// dot is accepted; the result is absolute either way.
    pub fn from_ascii(name: &str) -> Result<Self, Error> {
        if name == "." || name.is_empty() {
            return Ok(Self::root());
        }
        let mut wire = Vec::with_capacity(name.len() + 2);
        for label in name.strip_suffix('.').unwrap_or(name).split('.') {
            if label.is_empty() {
                return Err(ErrorKind::Message("empty label in name").into());
            }
            if label.len() > MAX_LABEL_LEN {
                return Err(ErrorKind::Message("label exceeds 63 octets").into());
            }
            wire.push(label.len() as u8);
            wire.extend_from_slice(label.as_bytes());
        }
        wire.push(0);
        if wire.len() > MAX_NAME_LEN {
            return Err(ErrorKind::NameTooLong.into());
        }
        wire.make_ascii_lowercase();
        Ok(Self { wire: wire.into() })
    }

    /// The raw canonical wire bytes, root label included.
    pub fn as_wire(&self) -> &[u8] {
        &self.wire
    }

    /// Length of the wire form in octets. At least 1 (the root label).
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.wire.len()
    }

    /// True for the root name `.`
    pub fn is_root(&self) -> bool {
        self.wire.len() == 1
    }

    /// Number of labels, excluding the root label.
    pub fn label_count(&self) -> usize {
        let mut count = 0;
        let mut i = 0;
        while self.wire[i] != 0 {
            count += 1;
            i += 1 + self.wire[i] as usize;
        }
        count
    }

    /// Strips the leftmost label. `None` at the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        let skip = 1 + self.wire[0] as usize;
        Some(Self {
            wire: Box::from(&self.wire[skip..]),
        })
    }

    /// Whether `self` equals `ancestor` or lies below it.
    pub fn is_subdomain_of(&self, ancestor: &Self) -> bool {
        let (a, b) = (self.as_wire(), ancestor.as_wire());
        a.len() >= b.len() && &a[a.len() - b.len()..] == b
    }

    /// The first `prefix_len` octets of `self` (which must end on a label
    /// boundary) followed by `suffix`. `None` when the result would exceed
    /// the 255-octet bound. This is the DNAME rewrite primitive: the owner
    /// suffix of the query name is replaced by the rewrite target.
    pub fn concat_prefix(&self, prefix_len: usize, suffix: &Self) -> Option<Self> {
        let new_len = prefix_len + suffix.len();
        if new_len > MAX_NAME_LEN {
            return None;
        }
        let mut wire = Vec::with_capacity(new_len);
        wire.extend_from_slice(&self.wire[..prefix_len]);
        wire.extend_from_slice(suffix.as_wire());
        Some(Self { wire: wire.into() })
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return f.write_str(".");
        }
        let mut i = 0;
        while self.wire[i] != 0 {
            let len = self.wire[i] as usize;
            for &b in &self.wire[i + 1..i + 1 + len] {
                match b {
                    b'.' | b'\\' => write!(f, "\\{}", b as char)?,
                    0x21..=0x7e => write!(f, "{}", b as char)?,
                    _ => write!(f, "\\{b:03}")?,
                }
            }
            f.write_str(".")?;
            i += 1 + len;
        }
        Ok(())
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({self})")
    }
}

impl FromStr for Name {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_ascii(s)
    }
}
