//! Deduplicating collection of search responses.

use std::collections::HashSet;
use std::net::SocketAddrV4;

use parking_lot::Mutex;

use crate::discovery::Discovered;
use crate::protocol::SearchResponse;

#[derive(Debug, Default)]
struct Entries {
    ordered: Vec<Discovered<SearchResponse>>,
    seen: HashSet<SocketAddrV4>,
}

/// Search responses of all sessions of one discoverer, in first-arrival order
///
/// The first response from a server wins; later ones with the same
/// [`server_key`](Discovered::server_key) are dropped.
#[derive(Debug, Default)]
pub(crate) struct ResponseAggregator {
    entries: Mutex<Entries>,
}

impl ResponseAggregator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add a response; `false` if its server is already present
    pub(crate) fn insert(&self, discovered: Discovered<SearchResponse>) -> bool {
        let key = discovered.server_key();
        let mut entries = self.entries.lock();
        if !entries.seen.insert(key) {
            return false;
        }
        entries.ordered.push(discovered);
        true
    }

    pub(crate) fn snapshot(&self) -> Vec<Discovered<SearchResponse>> {
        self.entries.lock().ordered.clone()
    }

    pub(crate) fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.ordered.clear();
        entries.seen.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().ordered.len()
    }
}
