// Copyright (c) 2015 Y. T. Chung <zonyitoo@gmail.com>
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Blocking chain updater

use std::cmp;
use std::panic;
use std::thread;
use std::time::Instant;

use bytes::Bytes;

use crate::hanger::{random_ids, Config, Hanger, HangerId, IdSource, Outcome, VersionId};
use crate::proto::{Cas, CasStore, Error, PersistTo, Result};

/// Maintains hangers over any `CasStore`.
///
/// ```no_run
/// use hanger::{MemStore, Outcome, Updater};
///
/// let updater = Updater::new(MemStore::new());
/// let h = updater.initialize(&b"{\"data\":\"some json\"}"[..]).unwrap();
/// let (v1, _) = updater.head(&h).unwrap();
///
/// match updater.update(&h, &v1, &b"{\"data\":\"updated json\"}"[..]).unwrap() {
///     Outcome::Updated(v2) => println!("now at {}", v2),
///     Outcome::Conflict { .. } => println!("somebody else moved {} first", h),
/// }
/// ```
pub struct Updater<S: CasStore> {
    store: S,
    config: Config,
    ids: IdSource,
}

impl<S: CasStore> Updater<S> {
    pub fn new(store: S) -> Updater<S> {
        Updater::with_config(store, Config::default())
    }

    pub fn with_config(store: S, config: Config) -> Updater<S> {
        Updater::with_ids(store, config, random_ids())
    }

    pub fn with_ids(store: S, config: Config, ids: IdSource) -> Updater<S> {
        Updater {
            store: store,
            config: config,
            ids: ids,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Inserts `value` under a freshly generated key, retrying on collision.
    fn insert_fresh(&self, value: &Bytes, persist: PersistTo) -> Result<String> {
        let mut attempt = 0;
        loop {
            let key = (self.ids)();
            match self.store.insert(&key, value.clone(), persist) {
                Ok(()) => return Ok(key),
                Err(Error::DuplicateKey) if attempt < self.config.id_retries => {
                    warn!("generated key {} already exists, retrying with a new one", key);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Best-effort delete of a version no hanger will ever point at.
    fn discard(&self, version: &VersionId) {
        match self.store.remove(version.as_str(), self.config.cleanup_durability) {
            Ok(()) => debug!("discarded version {}", version),
            Err(Error::NotFound) => debug!("version {} already gone", version),
            Err(err) => warn!("failed to discard version {}, left orphaned: {}", version, err),
        }
    }

    /// Current version of `hanger` and the tag to replace it with.
    pub fn head(&self, hanger: &HangerId) -> Result<(VersionId, Cas)> {
        let (doc, cas) = self.store.get(hanger.as_str())?;
        Ok((Hanger::decode(&doc)?.pointer, cas))
    }

    /// Follows `hanger` to the content of its current version.
    pub fn resolve(&self, hanger: &HangerId) -> Result<(VersionId, Bytes)> {
        let (version, _) = self.head(hanger)?;
        let (content, _) = self.store.get(version.as_str())?;
        Ok((version, content))
    }

    /// Creates a first version holding `content` and a new hanger pointing at it.
    pub fn initialize<B: Into<Bytes>>(&self, content: B) -> Result<HangerId> {
        let start = Instant::now();
        let v1 = VersionId::from(self.insert_fresh(&content.into(), self.config.durability)?);
        debug!("{:.2}ms: created version {}", elapsed_ms(start), v1);

        // a hanger nobody acknowledged would lose the whole chain
        let doc = Hanger::new(v1.clone()).encode();
        match self.insert_fresh(&doc, cmp::max(self.config.durability, PersistTo::One)) {
            Ok(h) => {
                debug!("{:.2}ms: created hanger {} -> {}", elapsed_ms(start), h, v1);
                Ok(HangerId::from(h))
            }
            Err(err) => {
                if !err.is_ambiguous() {
                    self.discard(&v1);
                }
                Err(err)
            }
        }
    }

    /// One round of optimistic concurrency on `hanger`.
    ///
    /// Publishes `content` as a new version and points `hanger` at it, but only
    /// if the hanger still points at `expected`. Losing a race is reported as
    /// `Outcome::Conflict`, never as an error; the caller re-reads the head and
    /// tries again if it still wants to extend the chain.
    pub fn update<B: Into<Bytes>>(&self, hanger: &HangerId, expected: &VersionId, content: B) -> Result<Outcome> {
        let start = Instant::now();
        let content = content.into();

        let (inserted, head) = if self.config.parallel {
            thread::scope(|s| {
                let writer = s.spawn(|| self.insert_fresh(&content, self.config.durability));
                let head = self.head(hanger);
                let inserted = writer.join().unwrap_or_else(|p| panic::resume_unwind(p));
                (inserted, head)
            })
        } else {
            let inserted = self.insert_fresh(&content, self.config.durability);
            (inserted, self.head(hanger))
        };

        let v2 = VersionId::from(inserted?);
        debug!("{:.2}ms: wrote new version {}", elapsed_ms(start), v2);

        let (current, cas) = match head {
            Ok(head) => head,
            Err(err) => {
                self.discard(&v2);
                return Err(err);
            }
        };
        debug!("{:.2}ms: hanger {} at {} ({})", elapsed_ms(start), hanger, current, cas);

        if current != *expected {
            debug!(
                "{:.2}ms: conflict, {} moved from {} to {}",
                elapsed_ms(start),
                hanger,
                expected,
                current
            );
            self.discard(&v2);
            return Ok(Outcome::Conflict { current: Some(current) });
        }

        let doc = Hanger::new(v2.clone()).encode();
        match self.store.replace(hanger.as_str(), doc, cas, self.config.durability) {
            Ok(()) => {
                debug!("{:.2}ms: updated hanger {} -> {}", elapsed_ms(start), hanger, v2);
                Ok(Outcome::Updated(v2))
            }
            Err(Error::StaleVersion) => {
                debug!("{:.2}ms: conflict, {} changed after read", elapsed_ms(start), hanger);
                self.discard(&v2);
                Ok(Outcome::Conflict { current: None })
            }
            Err(err) => {
                // An ambiguous write may have landed, v2 could be referenced
                if !err.is_ambiguous() {
                    self.discard(&v2);
                }
                Err(err)
            }
        }
    }
}

pub(crate) fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
