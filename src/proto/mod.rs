// The MIT License (MIT)

// Copyright (c) 2014 Y. T. CHUNG <zonyitoo@gmail.com>

// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:

// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! Versioned key-value store contract
//!
//! Everything the chain updater needs from a store: insert-if-absent, read with a
//! CAS tag, conditional replace and remove, each write carrying a durability level.

use std::error;
use std::fmt;
use std::io;
use std::sync::Arc;

use bytes::Bytes;

pub use self::text::Reply;

pub mod text;

/// Opaque version tag returned with every read.
///
/// A conditional write must present the tag unchanged; the store rejects it once
/// the record has been modified since the tag was issued.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cas(pub u64);

impl fmt::Display for Cas {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// How many nodes must persist a write before the call returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PersistTo {
    /// No acknowledgement required
    None,
    One,
    Two,
    Three,
    Four,
}

impl PersistTo {
    pub fn nodes(self) -> u8 {
        match self {
            PersistTo::None => 0,
            PersistTo::One => 1,
            PersistTo::Two => 2,
            PersistTo::Three => 3,
            PersistTo::Four => 4,
        }
    }

    /// Rejects levels a store with `available` nodes can never acknowledge.
    pub fn check(self, available: u8) -> Result<()> {
        if self.nodes() > available {
            return Err(Error::Durability {
                requested: self,
                available: available,
            });
        }
        Ok(())
    }
}

impl Default for PersistTo {
    fn default() -> PersistTo {
        PersistTo::One
    }
}

#[derive(Debug)]
pub enum Error {
    /// Insert on a key that already exists
    DuplicateKey,
    NotFound,
    /// Conditional write with a tag that no longer matches
    StaleVersion,
    Durability {
        requested: PersistTo,
        available: u8,
    },
    /// Transport failure, timeout or a reply that cannot be framed; the outcome
    /// of an in-flight write is unknown
    StoreUnavailable(io::Error),
    Server(Reply),
    Malformed {
        desc: &'static str,
        detail: Option<String>,
    },
}

impl Error {
    pub fn timed_out(desc: &'static str) -> Error {
        Error::StoreUnavailable(io::Error::new(io::ErrorKind::TimedOut, desc))
    }

    /// The connection no longer lines up with request boundaries.
    pub fn bad_reply(desc: &'static str, detail: &str) -> Error {
        Error::StoreUnavailable(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{}: {}", desc, detail),
        ))
    }

    /// Whether a failed write may still have been applied by the store.
    pub fn is_ambiguous(&self) -> bool {
        match *self {
            Error::StoreUnavailable(..) => true,
            _ => false,
        }
    }

    pub fn desc(&self) -> &'static str {
        match *self {
            Error::DuplicateKey => "key already exists",
            Error::NotFound => "key not found",
            Error::StaleVersion => "stale version tag",
            Error::Durability { .. } => "durability requirement cannot be met",
            Error::StoreUnavailable(..) => "store unavailable",
            Error::Server(ref r) => r.desc(),
            Error::Malformed { desc, .. } => desc,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Durability { requested, available } => write!(
                f,
                "cannot persist to {} nodes, only {} available",
                requested.nodes(),
                available
            ),
            Error::StoreUnavailable(ref err) => write!(f, "store unavailable: {}", err),
            Error::Server(ref reply) => write!(f, "{}", reply),
            Error::Malformed {
                desc,
                detail: Some(ref detail),
            } => write!(f, "{}: {}", desc, detail),
            _ => f.write_str(self.desc()),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::StoreUnavailable(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::StoreUnavailable(err)
    }
}

pub type Result<T> = ::std::result::Result<T, Error>;

/// A key-value store with per-record compare-and-swap.
///
/// Implementations must make `replace` linearizable per key: of several writers
/// holding the same tag, at most one succeeds.
pub trait CasStore: Send + Sync {
    /// Stores `value` only if `key` is absent, `Error::DuplicateKey` otherwise.
    fn insert(&self, key: &str, value: Bytes, persist: PersistTo) -> Result<()>;

    fn get(&self, key: &str) -> Result<(Bytes, Cas)>;

    /// Overwrites `key` only if its current tag is still `cas`.
    fn replace(&self, key: &str, value: Bytes, cas: Cas, persist: PersistTo) -> Result<()>;

    fn remove(&self, key: &str, persist: PersistTo) -> Result<()>;
}

macro_rules! forward_cas_store(
    ($($ty:ty),+) => ($(
        impl<S: CasStore + ?Sized> CasStore for $ty {
            fn insert(&self, key: &str, value: Bytes, persist: PersistTo) -> Result<()> {
                (**self).insert(key, value, persist)
            }

            fn get(&self, key: &str) -> Result<(Bytes, Cas)> {
                (**self).get(key)
            }

            fn replace(&self, key: &str, value: Bytes, cas: Cas, persist: PersistTo) -> Result<()> {
                (**self).replace(key, value, cas, persist)
            }

            fn remove(&self, key: &str, persist: PersistTo) -> Result<()> {
                (**self).remove(key, persist)
            }
        }
    )+);
);

forward_cas_store!(&S, Arc<S>, Box<S>);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_persist_check() {
        assert!(PersistTo::None.check(0).is_ok());
        assert!(PersistTo::One.check(1).is_ok());

        match PersistTo::Two.check(1) {
            Err(Error::Durability { requested, available }) => {
                assert_eq!(requested, PersistTo::Two);
                assert_eq!(available, 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_only_transport_errors_are_ambiguous() {
        assert!(Error::timed_out("slow").is_ambiguous());
        assert!(Error::bad_reply("Unknown reply", "STORED").is_ambiguous());
        assert!(!Error::StaleVersion.is_ambiguous());
        assert!(!Error::NotFound.is_ambiguous());
        assert!(!Error::Durability {
            requested: PersistTo::Three,
            available: 1,
        }
        .is_ambiguous());
    }

    #[test]
    fn test_display() {
        let err = Error::from(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert_eq!(err.to_string(), "store unavailable: reset");
        assert_eq!(Error::DuplicateKey.to_string(), "key already exists");
        assert_eq!(Cas(255).to_string(), "0xff");
    }
}
