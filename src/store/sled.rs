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

use std::path::Path;

use ethers::types::H256;

use super::{ChainTag, RelayRecord, RelayStatus, TxStore};
use crate::error::{Error, Result};

/// Tree holding `id -> serialized RelayRecord`.
const RECORDS_TREE: &str = "relay_records";
/// Tree holding `hash -> id` for both event and relay hashes.
const HASHES_TREE: &str = "relay_hashes";
/// Tree holding `created_at (be bytes) ++ id -> id` for ordered listing.
const CREATED_TREE: &str = "relay_created_index";

/// SledTxStore is a store that persists relay records in a
/// [Sled](https://sled.rs)-based database.
#[derive(Clone)]
pub struct SledTxStore {
    db: sled::Db,
}

impl std::fmt::Debug for SledTxStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledTxStore").finish()
    }
}

impl SledTxStore {
    /// Create a new SledTxStore.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::Config::new()
            .path(path)
            .temporary(cfg!(test))
            .mode(sled::Mode::HighThroughput)
            .open()?;
        Ok(Self { db })
    }

    /// Creates a temporary SledTxStore.
    pub fn temporary() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        Self::open(dir.path())
    }

    /// Gets the total amount of data stored on disk.
    pub fn get_data_stored_size(&self) -> u64 {
        self.db.size_on_disk().unwrap_or_default()
    }

    fn created_key(record: &RelayRecord) -> Vec<u8> {
        let mut key = record.created_at.to_be_bytes().to_vec();
        key.extend_from_slice(record.id.as_bytes());
        key
    }

    fn get_record(&self, id: &[u8]) -> Result<Option<RelayRecord>> {
        let records = self.db.open_tree(RECORDS_TREE)?;
        let value = records.get(id)?;
        match value {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

impl TxStore for SledTxStore {
    #[tracing::instrument(skip(self, record), fields(id = %record.id))]
    fn upsert_by_id(&self, record: RelayRecord) -> Result<RelayRecord> {
        let records = self.db.open_tree(RECORDS_TREE)?;
        let hashes = self.db.open_tree(HASHES_TREE)?;
        let created = self.db.open_tree(CREATED_TREE)?;

        // the event hash is sparse-unique across the whole store.
        if let Some(event_hash) = record.event_hash {
            if let Some(owner) = hashes.get(event_hash.as_bytes())? {
                if owner.as_ref() != record.id.as_bytes() {
                    return Err(Error::DuplicateEventHash(event_hash));
                }
            }
        }

        let bytes = serde_json::to_vec(&record)?;
        records.insert(record.id.as_bytes(), bytes)?;
        if let Some(event_hash) = record.event_hash {
            hashes.insert(event_hash.as_bytes(), record.id.as_bytes())?;
        }
        if let Some(relay_hash) = record.relay_hash {
            hashes.insert(relay_hash.as_bytes(), record.id.as_bytes())?;
        }
        created.insert(Self::created_key(&record), record.id.as_bytes())?;
        Ok(record)
    }

    fn hash_exists(&self, hash: H256) -> Result<bool> {
        let hashes = self.db.open_tree(HASHES_TREE)?;
        Ok(hashes.contains_key(hash.as_bytes())?)
    }

    fn find_by_hash(&self, hash: H256) -> Result<Option<RelayRecord>> {
        let hashes = self.db.open_tree(HASHES_TREE)?;
        match hashes.get(hash.as_bytes())? {
            Some(id) => self.get_record(&id),
            None => Ok(None),
        }
    }

    #[tracing::instrument(skip(self))]
    fn update_status_by_hash(
        &self,
        hash: H256,
        status: RelayStatus,
    ) -> Result<bool> {
        let Some(mut record) = self.find_by_hash(hash)? else {
            return Ok(false);
        };
        if record.status.is_terminal() {
            tracing::debug!(
                id = %record.id,
                current = %record.status,
                requested = %status,
                "refusing to overwrite a terminal relay status",
            );
            return Ok(false);
        }
        if record.status == status {
            return Ok(false);
        }
        record.status = status;
        record.updated_at = super::now_millis();
        self.upsert_by_id(record)?;
        Ok(true)
    }

    fn list_all(&self, limit: usize) -> Result<Vec<RelayRecord>> {
        let created = self.db.open_tree(CREATED_TREE)?;
        let mut out = Vec::new();
        for item in created.iter().rev() {
            let (_, id) = item?;
            if let Some(record) = self.get_record(&id)? {
                out.push(record);
            }
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    fn list_pending(&self, limit: usize) -> Result<Vec<RelayRecord>> {
        let created = self.db.open_tree(CREATED_TREE)?;
        let mut out = Vec::new();
        for item in created.iter().rev() {
            let (_, id) = item?;
            if let Some(record) = self.get_record(&id)? {
                if record.status == RelayStatus::Pending {
                    out.push(record);
                }
            }
            if out.len() >= limit {
                break;
            }
        }
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
        let hashes = self.db.open_tree(HASHES_TREE)?;
        let mut out = Vec::new();
        for item in hashes.iter() {
            let (key, _) = item?;
            out.push(H256::from_slice(&key));
        }
        Ok(out)
    }

    fn clear_all(&self) -> Result<()> {
        self.db.open_tree(RECORDS_TREE)?.clear()?;
        self.db.open_tree(HASHES_TREE)?.clear()?;
        self.db.open_tree(CREATED_TREE)?.clear()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{now_millis, RelayKind};
    use ethers::types::Address;

    fn record(id: &str, created_at: i64) -> RelayRecord {
        RelayRecord {
            id: id.to_string(),
            chain: ChainTag::L2,
            kind: RelayKind::Buy,
            user: "0x00000000000000000000000000000000000000aa".to_string(),
            amount: "1".to_string(),
            source_token: Address::repeat_byte(0x11),
            dest_token: Address::repeat_byte(0x22),
            event_hash: Some(H256::from_low_u64_be(created_at as u64)),
            relay_hash: Some(H256::from_low_u64_be(0xff00 + created_at as u64)),
            status: RelayStatus::Pending,
            timestamp: created_at,
            created_at,
            updated_at: created_at,
        }
    }

    #[test]
    fn it_upserts_in_place_by_id() {
        let store = SledTxStore::temporary().unwrap();
        let mut r = record("x", 1);
        store.upsert_by_id(r.clone()).unwrap();
        r.amount = "2".to_string();
        store.upsert_by_id(r.clone()).unwrap();
        let found = store.find_by_hash(r.event_hash.unwrap()).unwrap().unwrap();
        assert_eq!(found.amount, "2");
        assert_eq!(store.list_all(10).unwrap().len(), 1);
    }

    #[test]
    fn event_hash_is_sparse_unique() {
        let store = SledTxStore::temporary().unwrap();
        let first = record("a", 1);
        store.upsert_by_id(first.clone()).unwrap();
        let mut clash = record("b", 2);
        clash.event_hash = first.event_hash;
        let err = store.upsert_by_id(clash).unwrap_err();
        assert!(matches!(err, Error::DuplicateEventHash(_)));
    }

    #[test]
    fn it_finds_records_by_either_hash() {
        let store = SledTxStore::temporary().unwrap();
        let r = record("x", 7);
        store.upsert_by_id(r.clone()).unwrap();
        assert!(store.hash_exists(r.event_hash.unwrap()).unwrap());
        assert!(store.hash_exists(r.relay_hash.unwrap()).unwrap());
        assert!(!store.hash_exists(H256::repeat_byte(0xde)).unwrap());
        let by_relay =
            store.find_by_hash(r.relay_hash.unwrap()).unwrap().unwrap();
        assert_eq!(by_relay.id, "x");
    }

    #[test]
    fn terminal_status_is_never_downgraded() {
        let store = SledTxStore::temporary().unwrap();
        let r = record("x", 1);
        let relay_hash = r.relay_hash.unwrap();
        store.upsert_by_id(r).unwrap();

        let changed = store
            .update_status_by_hash(relay_hash, RelayStatus::Confirmed)
            .unwrap();
        assert!(changed);
        assert_eq!(
            store.find_by_hash(relay_hash).unwrap().unwrap().status,
            RelayStatus::Confirmed
        );

        let changed = store
            .update_status_by_hash(relay_hash, RelayStatus::Failed)
            .unwrap();
        assert!(!changed);
        assert_eq!(
            store.find_by_hash(relay_hash).unwrap().unwrap().status,
            RelayStatus::Confirmed
        );
    }

    #[test]
    fn listing_is_most_recent_first() {
        let store = SledTxStore::temporary().unwrap();
        for (i, created_at) in [3i64, 1, 2].iter().enumerate() {
            store
                .upsert_by_id(record(&format!("r{i}"), *created_at))
                .unwrap();
        }
        let all = store.list_all(10).unwrap();
        let stamps: Vec<i64> = all.iter().map(|r| r.created_at).collect();
        assert_eq!(stamps, vec![3, 2, 1]);
        assert_eq!(store.list_all(2).unwrap().len(), 2);
    }

    #[test]
    fn pending_filters_by_user_and_chain() {
        let store = SledTxStore::temporary().unwrap();
        let mut confirmed = record("done", 1);
        confirmed.status = RelayStatus::Confirmed;
        store.upsert_by_id(confirmed).unwrap();

        let mut l1 = record("l1", 2);
        l1.chain = ChainTag::L1;
        l1.user = "0x00000000000000000000000000000000000000bb".to_string();
        store.upsert_by_id(l1).unwrap();
        store.upsert_by_id(record("l2", 3)).unwrap();

        assert_eq!(store.list_pending(10).unwrap().len(), 2);
        let by_chain = store.list_pending_by_chain(ChainTag::L1).unwrap();
        assert_eq!(by_chain.len(), 1);
        assert_eq!(by_chain[0].id, "l1");
        // lookups lowercase the input.
        let by_user = store
            .list_pending_by_user(
                "0x00000000000000000000000000000000000000BB",
            )
            .unwrap();
        assert_eq!(by_user.len(), 1);
    }

    #[test]
    fn all_hashes_covers_both_sides() {
        let store = SledTxStore::temporary().unwrap();
        store.upsert_by_id(record("a", 1)).unwrap();
        store.upsert_by_id(record("b", 2)).unwrap();
        assert_eq!(store.all_hashes().unwrap().len(), 4);
        store.clear_all().unwrap();
        assert!(store.all_hashes().unwrap().is_empty());
        assert!(store.list_all(10).unwrap().is_empty());
    }

    #[test]
    fn updated_at_moves_on_status_change() {
        let store = SledTxStore::temporary().unwrap();
        let r = record("x", now_millis() - 10_000);
        let relay_hash = r.relay_hash.unwrap();
        let before = r.updated_at;
        store.upsert_by_id(r).unwrap();
        store
            .update_status_by_hash(relay_hash, RelayStatus::Failed)
            .unwrap();
        let after = store.find_by_hash(relay_hash).unwrap().unwrap();
        assert!(after.updated_at > before);
    }
}
