// Copyright (c) 2015 Y. T. Chung <zonyitoo@gmail.com>
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! In-memory store

use std::collections::{HashMap, HashSet};
use std::io;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::proto::{Cas, CasStore, Error, PersistTo, Result};

/// Store operations, for fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Insert,
    Get,
    Replace,
    Remove,
}

struct Inner {
    records: HashMap<String, (Bytes, Cas)>,
    next_cas: u64,
    offline: bool,
    broken: HashSet<Op>,
}

/// A `CasStore` kept in a single process.
///
/// Every call takes the map lock once, so each operation is linearizable. CAS
/// tags come from one counter and are never reused.
pub struct MemStore {
    inner: Mutex<Inner>,
    nodes: u8,
}

impl MemStore {
    pub fn new() -> MemStore {
        MemStore::with_nodes(1)
    }

    /// A store that pretends to persist on `nodes` nodes.
    pub fn with_nodes(nodes: u8) -> MemStore {
        MemStore {
            inner: Mutex::new(Inner {
                records: HashMap::new(),
                next_cas: 1,
                offline: false,
                broken: HashSet::new(),
            }),
            nodes: nodes,
        }
    }

    /// While offline every operation fails with `StoreUnavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.inner.lock().offline = offline;
    }

    /// Makes one kind of operation fail with `StoreUnavailable` until `heal`.
    pub fn break_op(&self, op: Op) {
        self.inner.lock().broken.insert(op);
    }

    pub fn heal(&self) {
        let mut inner = self.inner.lock();
        inner.offline = false;
        inner.broken.clear();
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().records.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().records.keys().cloned().collect()
    }
}

impl Default for MemStore {
    fn default() -> MemStore {
        MemStore::new()
    }
}

impl Inner {
    fn check(&self, op: Op) -> Result<()> {
        if self.offline || self.broken.contains(&op) {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "store offline").into());
        }
        Ok(())
    }

    fn bump(&mut self) -> Cas {
        let cas = Cas(self.next_cas);
        self.next_cas += 1;
        cas
    }
}

impl CasStore for MemStore {
    fn insert(&self, key: &str, value: Bytes, persist: PersistTo) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.check(Op::Insert)?;
        persist.check(self.nodes)?;
        if inner.records.contains_key(key) {
            return Err(Error::DuplicateKey);
        }
        let cas = inner.bump();
        inner.records.insert(key.to_owned(), (value, cas));
        Ok(())
    }

    fn get(&self, key: &str) -> Result<(Bytes, Cas)> {
        let inner = self.inner.lock();
        inner.check(Op::Get)?;
        inner.records.get(key).cloned().ok_or(Error::NotFound)
    }

    fn replace(&self, key: &str, value: Bytes, cas: Cas, persist: PersistTo) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.check(Op::Replace)?;
        persist.check(self.nodes)?;
        match inner.records.get(key) {
            None => return Err(Error::NotFound),
            Some(&(_, current)) if current != cas => return Err(Error::StaleVersion),
            Some(..) => {}
        }
        let next = inner.bump();
        inner.records.insert(key.to_owned(), (value, next));
        Ok(())
    }

    fn remove(&self, key: &str, persist: PersistTo) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.check(Op::Remove)?;
        persist.check(self.nodes)?;
        inner.records.remove(key).map(|_| ()).ok_or(Error::NotFound)
    }
}

#[cfg(test)]
mod test {
    use bytes::Bytes;

    use crate::memory::{MemStore, Op};
    use crate::proto::{CasStore, Error, PersistTo};

    #[test]
    fn test_insert_get_remove() {
        let store = MemStore::new();
        store.insert("k", Bytes::from_static(b"v"), PersistTo::One).unwrap();
        assert!(match store.insert("k", Bytes::from_static(b"w"), PersistTo::One) {
            Err(Error::DuplicateKey) => true,
            _ => false,
        });

        let (val, _) = store.get("k").unwrap();
        assert_eq!(&val[..], b"v");

        store.remove("k", PersistTo::None).unwrap();
        assert!(!store.contains("k"));
        assert!(match store.remove("k", PersistTo::None) {
            Err(Error::NotFound) => true,
            _ => false,
        });
    }

    #[test]
    fn test_replace_requires_current_tag() {
        let store = MemStore::new();
        store.insert("k", Bytes::from_static(b"v1"), PersistTo::One).unwrap();
        let (_, cas) = store.get("k").unwrap();

        store.replace("k", Bytes::from_static(b"v2"), cas, PersistTo::One).unwrap();
        assert!(match store.replace("k", Bytes::from_static(b"v3"), cas, PersistTo::One) {
            Err(Error::StaleVersion) => true,
            _ => false,
        });
        assert_eq!(&store.get("k").unwrap().0[..], b"v2");

        assert!(match store.replace("missing", Bytes::new(), cas, PersistTo::One) {
            Err(Error::NotFound) => true,
            _ => false,
        });
    }

    #[test]
    fn test_repeated_reads_are_identical() {
        let store = MemStore::new();
        store.insert("k", Bytes::from_static(b"v"), PersistTo::One).unwrap();
        let first = store.get("k").unwrap();
        let second = store.get("k").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_durability_levels() {
        let store = MemStore::with_nodes(2);
        store.insert("a", Bytes::new(), PersistTo::Two).unwrap();
        match store.insert("b", Bytes::new(), PersistTo::Three) {
            Err(Error::Durability { available, .. }) => assert_eq!(available, 2),
            other => panic!("unexpected {:?}", other),
        }
        assert!(!store.contains("b"));
    }

    #[test]
    fn test_fault_injection() {
        let store = MemStore::new();
        store.insert("k", Bytes::new(), PersistTo::One).unwrap();

        store.break_op(Op::Get);
        assert!(store.get("k").unwrap_err().is_ambiguous());
        store.remove("k", PersistTo::None).unwrap();

        store.set_offline(true);
        assert!(store.insert("j", Bytes::new(), PersistTo::One).unwrap_err().is_ambiguous());

        store.heal();
        store.insert("j", Bytes::new(), PersistTo::One).unwrap();
        assert_eq!(store.keys(), vec!["j".to_owned()]);
    }
}
