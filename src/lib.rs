// Copyright (c) 2015 Y. T. Chung <zonyitoo@gmail.com>
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Version chains over compare-and-swap key-value stores.
//!
//! A *hanger* is a mutable record pointing at the current immutable *version*
//! record. Writers publish a new version, then swing the hanger to it with a
//! CAS-guarded replace; whoever loses the race deletes the version it published.
//! No locks are taken, the store's per-record CAS is the only coordination.

#[macro_use]
extern crate log;

pub use crate::client::{Client, ConnectOptions};
pub use crate::hanger::{Config, Hanger, HangerId, Outcome, VersionId};
pub use crate::memory::MemStore;
pub use crate::nonblocking::AsyncUpdater;
pub use crate::proto::{Cas, CasStore, Error, PersistTo, Result};
pub use crate::updater::Updater;

pub mod client;
pub mod hanger;
pub mod memory;
pub mod nonblocking;
pub mod proto;
pub mod updater;
