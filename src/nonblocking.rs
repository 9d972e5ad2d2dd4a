// Copyright (c) 2015 Y. T. Chung <zonyitoo@gmail.com>
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Future-based chain updater
//!
//! Same algorithm as [`Updater`](crate::Updater), with store calls composed as
//! futures. Every call runs on tokio's blocking pool and may be bounded by a
//! timeout; a call that times out keeps running in the background and is
//! reported as `StoreUnavailable`, since its effect is unknown.

use std::cmp;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::hanger::{random_ids, Config, Hanger, HangerId, IdSource, Outcome, VersionId};
use crate::proto::{Cas, CasStore, Error, PersistTo, Result};
use crate::updater::elapsed_ms;

pub struct AsyncUpdater<S: CasStore + 'static> {
    store: Arc<S>,
    config: Config,
    ids: IdSource,
    timeout: Option<Duration>,
}

impl<S: CasStore + 'static> Clone for AsyncUpdater<S> {
    fn clone(&self) -> AsyncUpdater<S> {
        AsyncUpdater {
            store: self.store.clone(),
            config: self.config.clone(),
            ids: self.ids.clone(),
            timeout: self.timeout,
        }
    }
}

impl<S: CasStore + 'static> AsyncUpdater<S> {
    pub fn new(store: Arc<S>) -> AsyncUpdater<S> {
        AsyncUpdater::with_config(store, Config::default())
    }

    pub fn with_config(store: Arc<S>, config: Config) -> AsyncUpdater<S> {
        AsyncUpdater::with_ids(store, config, random_ids())
    }

    pub fn with_ids(store: Arc<S>, config: Config, ids: IdSource) -> AsyncUpdater<S> {
        AsyncUpdater {
            store: store,
            config: config,
            ids: ids,
            timeout: None,
        }
    }

    /// Bounds every store call by `limit`.
    pub fn with_timeout(mut self, limit: Duration) -> AsyncUpdater<S> {
        self.timeout = Some(limit);
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    async fn call<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&S) -> Result<T> + Send + 'static,
    {
        let store = self.store.clone();
        let task = tokio::task::spawn_blocking(move || f(&*store));
        let joined = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(..) => return Err(Error::timed_out("store call timed out")),
            },
            None => task.await,
        };
        joined.map_err(|err| Error::StoreUnavailable(io::Error::new(io::ErrorKind::Other, err)))?
    }

    async fn insert_fresh(&self, value: Bytes, persist: PersistTo) -> Result<String> {
        let mut attempt = 0;
        loop {
            let key = (self.ids)();
            let (k, v) = (key.clone(), value.clone());
            match self.call(move |s| s.insert(&k, v, persist)).await {
                Ok(()) => return Ok(key),
                Err(Error::DuplicateKey) if attempt < self.config.id_retries => {
                    warn!("generated key {} already exists, retrying with a new one", key);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn discard(&self, version: &VersionId) {
        let (key, persist) = (version.as_str().to_owned(), self.config.cleanup_durability);
        match self.call(move |s| s.remove(&key, persist)).await {
            Ok(()) => debug!("discarded version {}", version),
            Err(Error::NotFound) => debug!("version {} already gone", version),
            Err(err) => warn!("failed to discard version {}, left orphaned: {}", version, err),
        }
    }

    pub async fn head(&self, hanger: &HangerId) -> Result<(VersionId, Cas)> {
        let key = hanger.as_str().to_owned();
        let (doc, cas) = self.call(move |s| s.get(&key)).await?;
        Ok((Hanger::decode(&doc)?.pointer, cas))
    }

    pub async fn resolve(&self, hanger: &HangerId) -> Result<(VersionId, Bytes)> {
        let (version, _) = self.head(hanger).await?;
        let key = version.as_str().to_owned();
        let (content, _) = self.call(move |s| s.get(&key)).await?;
        Ok((version, content))
    }

    pub async fn initialize<B: Into<Bytes>>(&self, content: B) -> Result<HangerId> {
        let start = Instant::now();
        let v1 = VersionId::from(self.insert_fresh(content.into(), self.config.durability).await?);
        debug!("{:.2}ms: created version {}", elapsed_ms(start), v1);

        let persist = cmp::max(self.config.durability, PersistTo::One);
        match self.insert_fresh(Hanger::new(v1.clone()).encode(), persist).await {
            Ok(h) => {
                debug!("{:.2}ms: created hanger {} -> {}", elapsed_ms(start), h, v1);
                Ok(HangerId::from(h))
            }
            Err(err) => {
                if !err.is_ambiguous() {
                    self.discard(&v1).await;
                }
                Err(err)
            }
        }
    }

    /// See [`Updater::update`](crate::Updater::update).
    pub async fn update<B: Into<Bytes>>(&self, hanger: &HangerId, expected: &VersionId, content: B) -> Result<Outcome> {
        let start = Instant::now();

        let (inserted, head) = tokio::join!(
            self.insert_fresh(content.into(), self.config.durability),
            self.head(hanger)
        );

        let v2 = VersionId::from(inserted?);
        debug!("{:.2}ms: wrote new version {}", elapsed_ms(start), v2);

        let (current, cas) = match head {
            Ok(head) => head,
            Err(err) => {
                self.discard(&v2).await;
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
            self.discard(&v2).await;
            return Ok(Outcome::Conflict { current: Some(current) });
        }

        let (key, doc, persist) = (
            hanger.as_str().to_owned(),
            Hanger::new(v2.clone()).encode(),
            self.config.durability,
        );
        match self.call(move |s| s.replace(&key, doc, cas, persist)).await {
            Ok(()) => {
                debug!("{:.2}ms: updated hanger {} -> {}", elapsed_ms(start), hanger, v2);
                Ok(Outcome::Updated(v2))
            }
            Err(Error::StaleVersion) => {
                debug!("{:.2}ms: conflict, {} changed after read", elapsed_ms(start), hanger);
                self.discard(&v2).await;
                Ok(Outcome::Conflict { current: None })
            }
            Err(err) => {
                if !err.is_ambiguous() {
                    self.discard(&v2).await;
                }
                Err(err)
            }
        }
    }
}
