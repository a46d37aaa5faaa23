// Copyright 2024 Bridge Relayer Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::HashSet;
use std::sync::Arc;

use ethers::types::H256;
use parking_lot::Mutex;

/// An in-memory set of transaction hashes already accepted for relay.
///
/// This is the fast path in front of the durable store: membership here
/// means some task already owns the hash. The set is rebuilt from the
/// store at startup and its loss is always recoverable, the store is the
/// truth.
#[derive(Clone, Default)]
pub struct DedupIndex {
    inner: Arc<Mutex<HashSet<H256>>>,
}

impl std::fmt::Debug for DedupIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupIndex").field("len", &self.len()).finish()
    }
}

impl DedupIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bulk-load hashes, typically from the store at startup. Returns how
    /// many entries the index holds afterwards.
    pub fn seed<I>(&self, hashes: I) -> usize
    where
        I: IntoIterator<Item = H256>,
    {
        let mut guard = self.inner.lock();
        guard.extend(hashes);
        guard.len()
    }

    /// Atomic test-and-set: returns `true` if the hash was already
    /// present. This is the only linearization point for concurrent
    /// ingestion from both chains.
    pub fn contains_or_add(&self, hash: H256) -> bool {
        !self.inner.lock().insert(hash)
    }

    /// Roll a hash back out of the index.
    ///
    /// Used when a relay aborts before a destination transaction exists,
    /// so a later backfill sweep can pick the intent up again.
    pub fn remove(&self, hash: &H256) -> bool {
        self.inner.lock().remove(hash)
    }

    /// How many hashes the index currently holds.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the index holds no hashes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
