//! The set of live mocks.
//!
//! Writers (startup loading, the control plane) go through a mutex and
//! publish a fresh [`RouteTable`] when they are done. Readers (the request
//! path) only ever load the published table, so they never wait on writers
//! and never observe a half-applied change.

use crate::error::RegistryError;
use crate::hash::to_hex;
use crate::matcher::{Route, RouteTable};
use crate::mock::Mock;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

struct Entry {
    mock: Mock,
    sequence: u64,
    routes: Vec<Arc<Route>>,
}

#[derive(Default)]
struct Entries {
    by_hash: HashMap<u64, Entry>,
    next_sequence: u64,
}

impl Entries {
    fn insert(&mut self, hash: u64, mock: Mock, routes: Vec<Route>) {
        self.next_sequence += 1;
        let sequence = self.next_sequence;
        let routes = routes
            .into_iter()
            .map(|mut route| {
                route.sequence = sequence;
                Arc::new(route)
            })
            .collect();

        let replaced = self
            .by_hash
            .insert(
                hash,
                Entry {
                    mock,
                    sequence,
                    routes,
                },
            )
            .is_some();

        debug!(hash = %to_hex(hash), sequence, replaced, "Mock stored");
    }

    fn table(&self) -> RouteTable {
        let routes = self
            .by_hash
            .values()
            .flat_map(|entry| entry.routes.iter().cloned())
            .collect();
        RouteTable::new(routes)
    }
}

/// Concurrency-safe store of mocks keyed by their expectation hash.
pub struct MockRegistry {
    entries: Mutex<Entries>,
    table: ArcSwap<RouteTable>,
}

impl Default for MockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            table: ArcSwap::from_pointee(RouteTable::default()),
        }
    }

    fn prepare(mock: Mock) -> Result<(u64, Mock, Vec<Route>), RegistryError> {
        let mock = mock.resolve();
        let hash = mock.hash();
        let routes = Route::compile(hash, &mock)?;
        Ok((hash, mock, routes))
    }

    /// Insert a mock, replacing any mock with the same expectation.
    ///
    /// Returns the mock's hash. A mock whose patterns do not compile is
    /// rejected and the registry is left as it was.
    pub fn upsert(&self, mock: impl Into<Mock>) -> Result<u64, RegistryError> {
        let (hash, mock, routes) = Self::prepare(mock.into())?;
        let label = mock.to_string();

        let mut entries = self.entries.lock();
        entries.insert(hash, mock, routes);
        self.table.store(Arc::new(entries.table()));
        drop(entries);

        info!(hash = %to_hex(hash), mock = %label, "Mock registered");
        Ok(hash)
    }

    /// Insert several mocks at once. Either all of them are registered, under
    /// a single published snapshot, or none is.
    pub fn upsert_all<I, M>(&self, mocks: I) -> Result<Vec<u64>, RegistryError>
    where
        I: IntoIterator<Item = M>,
        M: Into<Mock>,
    {
        let prepared = mocks
            .into_iter()
            .map(|m| Self::prepare(m.into()))
            .collect::<Result<Vec<_>, _>>()?;

        let hashes: Vec<u64> = prepared.iter().map(|(hash, _, _)| *hash).collect();

        let mut entries = self.entries.lock();
        for (hash, mock, routes) in prepared {
            entries.insert(hash, mock, routes);
        }
        self.table.store(Arc::new(entries.table()));
        let total = entries.by_hash.len();
        drop(entries);

        info!(count = hashes.len(), total, "Mocks registered");
        Ok(hashes)
    }

    /// Remove the mock registered under `hash`. Unknown hashes are a no-op.
    pub fn remove(&self, hash: u64) -> Option<Mock> {
        let mut entries = self.entries.lock();
        let removed = entries.by_hash.remove(&hash)?;
        self.table.store(Arc::new(entries.table()));
        drop(entries);

        info!(hash = %to_hex(hash), mock = %removed.mock, "Mock removed");
        Some(removed.mock)
    }

    /// Remove the mock with the same expectation as `mock`.
    pub fn remove_mock(&self, mock: &Mock) -> Option<Mock> {
        self.remove(mock.clone().resolve().hash())
    }

    pub fn get(&self, hash: u64) -> Option<Mock> {
        self.entries
            .lock()
            .by_hash
            .get(&hash)
            .map(|entry| entry.mock.clone())
    }

    /// The current route table. Later writes do not affect it.
    pub fn snapshot(&self) -> Arc<RouteTable> {
        self.table.load_full()
    }

    /// Registered mocks with their hashes, oldest registration first.
    pub fn mocks(&self) -> Vec<(u64, Mock)> {
        let entries = self.entries.lock();
        let mut listed: Vec<(u64, u64, Mock)> = entries
            .by_hash
            .iter()
            .map(|(hash, entry)| (entry.sequence, *hash, entry.mock.clone()))
            .collect();
        drop(entries);

        listed.sort_by_key(|(sequence, _, _)| *sequence);
        listed
            .into_iter()
            .map(|(_, hash, mock)| (hash, mock))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.by_hash.clear();
        self.table.store(Arc::new(RouteTable::default()));
        drop(entries);

        info!("All mocks removed");
    }
}
