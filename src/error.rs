// Copyright 2015-2017 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Error types for the crate.
//!
//! The cache never propagates failures to its callers: a lookup that runs
//! into a stale reference, an expired entry, or malformed cached bytes is a
//! miss. These types exist for the validating helpers underneath (name
//! construction, rdata inspection) and for logging the reason a candidate
//! entry was rejected.

use std::fmt;

use enum_as_inner::EnumAsInner;
use thiserror::Error;

/// The kind for errors that get returned in the crate.
#[derive(Debug, EnumAsInner, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// An error with an arbitrary message, referenced as &'static str
    #[error("{0}")]
    Message(&'static str),

    /// An error with an arbitrary message, stored as String
    #[error("{0}")]
    Msg(String),

    /// A domain name exceeded the 255-octet wire-format bound
    #[error("domain name exceeds 255 octets")]
    NameTooLong,

    /// Cached rdata whose 16-bit length prefix disagrees with the stored
    /// buffer, or whose embedded name fails validation
    #[error("malformed rdata in cached record set")]
    MalformedRdata,

    /// A stored reference whose id tag no longer matches the cache entry
    #[error("record set reference is stale (entry evicted or replaced)")]
    StaleReference,

    /// An entry whose TTL has passed
    #[error("cache entry expired")]
    Expired,

    /// An internal consistency check failed
    #[error("invariant violation: {0}")]
    InvariantViolation(&'static str),
}

/// The error type for errors that get returned in the crate.
#[derive(Debug, Error)]
pub struct Error {
    kind: Box<ErrorKind>,
}

impl Error {
    /// Get the kind of the error.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.kind, f)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self {
            kind: Box::new(kind),
        }
    }
}

impl From<&'static str> for Error {
    fn from(msg: &'static str) -> Self {
        ErrorKind::Message(msg).into()
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        ErrorKind::Msg(msg).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = Error::from(ErrorKind::StaleReference);
        assert_eq!(
            err.to_string(),
            "record set reference is stale (entry evicted or replaced)"
        );
        assert!(err.kind().is_stale_reference());
    }
}
