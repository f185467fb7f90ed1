//! # Session Module
//!
//! A `Session` owns one association database and hands out transactions.
//!
//! ## Storage Backends
//!
//! - `InMemory`: a `Ledger` (fast, volatile)
//! - `Persistent`: a `RedbStore` (ACID, on disk)
//!
//! Both backends give the same guarantee: the closure passed to
//! `transact` sees a consistent view, and its writes become visible all
//! together or not at all. Every write goes through `&mut self`, so one
//! session is one writer.

use crate::ledger::Ledger;
use crate::storage::{RedbStore, TableCounts};
use crate::tables::Tables;
use crate::Result;
use std::path::Path;
use tracing::debug;

/// Storage backend for a Session.
#[derive(Debug)]
pub enum StorageBackend {
    /// In-memory ledger (fast, volatile).
    InMemory(Ledger),
    /// Disk-backed tables using redb (ACID, persistent).
    Persistent(RedbStore),
}

impl Default for StorageBackend {
    fn default() -> Self {
        Self::InMemory(Ledger::new())
    }
}

/// Handle to one association database.
#[derive(Debug, Default)]
pub struct Session {
    backend: StorageBackend,
}

impl Session {
    /// Create a new empty session with in-memory storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session over an existing in-memory ledger.
    #[must_use]
    pub fn with_ledger(ledger: Ledger) -> Self {
        Self {
            backend: StorageBackend::InMemory(ledger),
        }
    }

    /// Create a session with persistent redb storage.
    ///
    /// Opens or creates a redb database at the given path.
    pub fn with_redb(path: impl AsRef<Path>) -> Result<Self> {
        let store = RedbStore::open(path)?;
        Ok(Self {
            backend: StorageBackend::Persistent(store),
        })
    }

    /// Check if using persistent storage.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, StorageBackend::Persistent(_))
    }

    /// The in-memory ledger, if this session is not persistent.
    #[must_use]
    pub fn ledger(&self) -> Option<&Ledger> {
        match &self.backend {
            StorageBackend::InMemory(ledger) => Some(ledger),
            StorageBackend::Persistent(_) => None,
        }
    }

    /// Run `f` as one transaction.
    ///
    /// With `commit == false`, or when `f` fails, nothing `f` wrote is kept.
    pub fn transact<T>(
        &mut self,
        commit: bool,
        f: impl FnOnce(&mut dyn Tables) -> Result<T>,
    ) -> Result<T> {
        match &mut self.backend {
            StorageBackend::InMemory(ledger) => {
                let mut scratch = ledger.clone();
                let value = f(&mut scratch)?;
                if commit {
                    *ledger = scratch;
                } else {
                    debug!("in-memory transaction rolled back");
                }
                Ok(value)
            }
            StorageBackend::Persistent(store) => store.transact(commit, f),
        }
    }

    /// Row counts of the main tables.
    pub fn counts(&self) -> Result<TableCounts> {
        match &self.backend {
            StorageBackend::InMemory(ledger) => {
                let t: &dyn Tables = ledger;
                let mut islands = 0;
                for image in t.images()? {
                    islands += t.islands_of(image.id)?.len() as u64;
                }
                Ok(TableCounts {
                    images: t.images()?.len() as u64,
                    islands,
                    detections: t.all_detections()?.len() as u64,
                    assocs: t.all_assocs()?.len() as u64,
                    matches: t.all_matches()?.len() as u64,
                    uniqueness: t.all_uniqueness()?.len() as u64,
                })
            }
            StorageBackend::Persistent(store) => store.counts(),
        }
    }

    /// Run a read-only closure.
    pub fn read<T>(&self, f: impl FnOnce(&dyn Tables) -> Result<T>) -> Result<T> {
        match &self.backend {
            StorageBackend::InMemory(ledger) => f(ledger),
            StorageBackend::Persistent(store) => store.read(f),
        }
    }
}
