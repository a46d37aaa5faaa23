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

use std::collections::HashMap;
use std::sync::Arc;

use ethers::types::H256;
use parking_lot::RwLock;

use super::{ChainTag, RelayRecord, RelayStatus, TxStore};
use crate::error::{Error, Result};

/// InMemoryTxStore keeps relay records in process memory.
///
/// It mirrors the durable store's semantics and exists for tests and
/// ephemeral runs; nothing survives a restart.
#[derive(Clone, Default)]
pub struct InMemoryTxStore {
    records: Arc<RwLock<HashMap<String, RelayRecord>>>,
}

impl std::fmt::Debug for InMemoryTxStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTxStore").finish()
    }
}

impl InMemoryTxStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn sorted_desc(mut records: Vec<RelayRecord>) -> Vec<RelayRecord> {
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }
}

impl TxStore for InMemoryTxStore {
    fn upsert_by_id(&self, record: RelayRecord) -> Result<RelayRecord> {
        let mut guard = self.records.write();
        if let Some(event_hash) = record.event_hash {
            let taken = guard.values().any(|r| {
                r.id != record.id && r.event_hash == Some(event_hash)
            });
            if taken {
                return Err(Error::DuplicateEventHash(event_hash));
            }
        }
        guard.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    fn hash_exists(&self, hash: H256) -> Result<bool> {
        let guard = self.records.read();
        Ok(guard.values().any(|r| {
            r.event_hash == Some(hash) || r.relay_hash == Some(hash)
        }))
    }

    fn find_by_hash(&self, hash: H256) -> Result<Option<RelayRecord>> {
        let guard = self.records.read();
        Ok(guard
            .values()
            .find(|r| {
                r.event_hash == Some(hash) || r.relay_hash == Some(hash)
            })
            .cloned())
    }

    fn update_status_by_hash(
        &self,
        hash: H256,
        status: RelayStatus,
    ) -> Result<bool> {
        let mut guard = self.records.write();
        let record = guard.values_mut().find(|r| {
            r.event_hash == Some(hash) || r.relay_hash == Some(hash)
        });
        match record {
            Some(record)
                if !record.status.is_terminal()
                    && record.status != status =>
            {
                record.status = status;
                record.updated_at = super::now_millis();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn list_all(&self, limit: usize) -> Result<Vec<RelayRecord>> {
        let guard = self.records.read();
        let mut out = Self::sorted_desc(guard.values().cloned().collect());
        out.truncate(limit);
        Ok(out)
    }

    fn list_pending(&self, limit: usize) -> Result<Vec<RelayRecord>> {
        let guard = self.records.read();
        let pending = guard
            .values()
            .filter(|r| r.status == RelayStatus::Pending)
            .cloned()
            .collect();
        let mut out = Self::sorted_desc(pending);
        out.truncate(limit);
        Ok(out)
    }

    fn list_pending_by_user(&self, user: &str) -> Result<Vec<RelayRecord>> {
        let user = user.to_lowercase();
        let pending = self.list_pending(usize::MAX)?;
        Ok(pending.into_iter().filter(|r| r.user == user).collect())
    }

    fn list_pending_by_chain(
        &self,
        chain: ChainTag,
    ) -> Result<Vec<RelayRecord>> {
        let pending = self.list_pending(usize::MAX)?;
        Ok(pending.into_iter().filter(|r| r.chain == chain).collect())
    }

    fn all_hashes(&self) -> Result<Vec<H256>> {
        let guard = self.records.read();
        let mut out = Vec::new();
        for record in guard.values() {
            out.extend(record.event_hash);
            out.extend(record.relay_hash);
        }
        Ok(out)
    }

    fn clear_all(&self) -> Result<()> {
        self.records.write().clear();
        Ok(())
    }
}
