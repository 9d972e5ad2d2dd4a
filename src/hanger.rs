// Copyright (c) 2015 Y. T. Chung <zonyitoo@gmail.com>
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Hanger records and the identifiers they point at
//!
//! A hanger is a small mutable document whose only content is the id of the
//! current version record:
//!
//! ```text
//! {"pointer":"6f1c2a9e-3b7d-4c0e-9a51-0d2f8e4b7c13"}
//! ```

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::proto::{Error, PersistTo, Result};

macro_rules! record_id(
    ($name:ident, $doc:expr) => (
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> $name {
                $name(s)
            }
        }

        impl<'a> From<&'a str> for $name {
            fn from(s: &'a str) -> $name {
                $name(s.to_owned())
            }
        }
    );
);

record_id!(VersionId, "Key of an immutable version record.");
record_id!(HangerId, "Key of a hanger record.");

/// Source of fresh record keys.
pub type IdSource = Arc<dyn Fn() -> String + Send + Sync>;

/// A random RFC 4122 version 4 identifier.
pub fn random_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn random_ids() -> IdSource {
    Arc::new(random_id)
}

/// Content of a hanger record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Hanger {
    pub pointer: VersionId,
}

impl Hanger {
    pub fn new(pointer: VersionId) -> Hanger {
        Hanger { pointer: pointer }
    }

    pub fn encode(&self) -> Bytes {
        // Serializing a single string field cannot fail
        Bytes::from(serde_json::to_vec(self).unwrap_or_default())
    }

    pub fn decode(buf: &[u8]) -> Result<Hanger> {
        serde_json::from_slice(buf).map_err(|err| Error::Malformed {
            desc: "Invalid hanger record",
            detail: Some(err.to_string()),
        })
    }
}

/// Result of one optimistic update round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The hanger now points at this new version.
    Updated(VersionId),
    /// Another writer moved the hanger first, the new version was discarded.
    ///
    /// `current` is the version the hanger was seen pointing at, when the
    /// conflict was detected before writing. It is `None` when the conditional
    /// write itself was rejected.
    Conflict { current: Option<VersionId> },
}

impl Outcome {
    pub fn is_updated(&self) -> bool {
        match *self {
            Outcome::Updated(..) => true,
            Outcome::Conflict { .. } => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Durability of version inserts and hanger writes
    pub durability: PersistTo,
    /// Durability of the compensating delete after a conflict
    pub cleanup_durability: PersistTo,
    /// Fresh ids to try after a `DuplicateKey` on a generated one
    pub id_retries: u32,
    /// Insert the new version and read the hanger at the same time
    pub parallel: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            durability: PersistTo::One,
            cleanup_durability: PersistTo::None,
            id_retries: 1,
            parallel: true,
        }
    }
}
