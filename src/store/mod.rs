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

//! # Relay Record Store Module
//!
//! A module for managing the storage of the relayer.
//!
//! ## Overview
//!
//! The store keeps one durable record per relayed intent, keyed by id and
//! indexed by both the source-chain and destination-chain transaction
//! hashes. It is the durable truth behind the in-memory dedup index.

use std::fmt::Display;

use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A module for managing in-memory storage of the relayer.
pub mod mem;
/// A module for setting up and managing a [Sled](https://sled.rs)-based database.
pub mod sled;

pub use self::sled::SledTxStore;
pub use mem::InMemoryTxStore;

/// The destination chain a relay was submitted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChainTag {
    /// The first chain of the bridge pair.
    L1,
    /// The second chain of the bridge pair.
    L2,
}

/// Which bridge flow produced a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayKind {
    /// L1 → L2 flow, settled by `executeBuy` on L2.
    #[serde(rename = "BUY")]
    Buy,
    /// L2 → L1 flow, settled by `withdraw` on L1.
    #[serde(rename = "SELL")]
    Sell,
}

/// Lifecycle state of a relay record.
///
/// Transitions are monotonic: `PENDING` may move to `CONFIRMED` or
/// `FAILED` exactly once, terminal states are never overwritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RelayStatus {
    /// The destination transaction is submitted and not yet mined.
    Pending,
    /// The destination transaction was mined successfully.
    Confirmed,
    /// The destination transaction reverted.
    Failed,
}

impl RelayStatus {
    /// Whether this status can never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RelayStatus::Confirmed | RelayStatus::Failed)
    }
}

impl Display for ChainTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::L1 => write!(f, "L1"),
            Self::L2 => write!(f, "L2"),
        }
    }
}

impl Display for RelayKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

impl Display for RelayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Confirmed => write!(f, "CONFIRMED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// The persisted unit: one destination-chain transaction submitted on
/// behalf of one source-chain intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRecord {
    /// Unique identifier assigned at record creation. Primary key.
    pub id: String,
    /// Destination chain tag.
    pub chain: ChainTag,
    /// Which bridge flow produced this record.
    pub kind: RelayKind,
    /// Lowercased hex address of the end user initiating the intent.
    pub user: String,
    /// Human-readable decimal amount, post decimal normalization.
    pub amount: String,
    /// Token address on the originating chain.
    pub source_token: Address,
    /// Token address on the destination chain.
    pub dest_token: Address,
    /// Hash of the source-chain transaction that emitted the intent.
    pub event_hash: Option<H256>,
    /// Hash of the destination-chain transaction the relayer submitted.
    pub relay_hash: Option<H256>,
    /// Lifecycle state of the relay.
    pub status: RelayStatus,
    /// Unix-millis of record creation.
    pub timestamp: i64,
    /// Audit timestamp, set once at creation.
    pub created_at: i64,
    /// Audit timestamp, touched on every write.
    pub updated_at: i64,
}

impl RelayRecord {
    /// Lowercase an address into the stored `user` representation.
    pub fn normalize_user(user: Address) -> String {
        format!("{user:#x}")
    }
}

/// Default listing limit for [`TxStore::list_all`] and friends.
pub const DEFAULT_LIST_LIMIT: usize = 1_000;

/// Durable mapping from relay-record id to relay record, with lookup by
/// either the source or the relay transaction hash.
pub trait TxStore: Send + Sync {
    /// Insert-or-update by `id`, returns the stored record.
    ///
    /// Enforces the sparse-unique `event_hash` constraint: a different
    /// record claiming an already-indexed event hash is rejected.
    fn upsert_by_id(&self, record: RelayRecord) -> Result<RelayRecord>;

    /// True iff any record has `event_hash == hash` or `relay_hash == hash`.
    fn hash_exists(&self, hash: H256) -> Result<bool>;

    /// First match across `event_hash` or `relay_hash`.
    fn find_by_hash(&self, hash: H256) -> Result<Option<RelayRecord>>;

    /// Sets `status` on the record matching either hash; returns whether
    /// any record changed. Never downgrades a terminal status.
    fn update_status_by_hash(
        &self,
        hash: H256,
        status: RelayStatus,
    ) -> Result<bool>;

    /// Up to `limit` records, most recent `created_at` first.
    fn list_all(&self, limit: usize) -> Result<Vec<RelayRecord>>;

    /// Up to `limit` `PENDING` records, most recent `created_at` first.
    fn list_pending(&self, limit: usize) -> Result<Vec<RelayRecord>>;

    /// All `PENDING` records for the given user (input is lowercased).
    fn list_pending_by_user(&self, user: &str) -> Result<Vec<RelayRecord>>;

    /// All `PENDING` records destined for the given chain.
    fn list_pending_by_chain(
        &self,
        chain: ChainTag,
    ) -> Result<Vec<RelayRecord>>;

    /// Every indexed transaction hash, event and relay side alike.
    ///
    /// This is the dedup-index seed and deliberately not bounded by the
    /// listing limit.
    fn all_hashes(&self) -> Result<Vec<H256>>;

    /// Administrative wipe of every record and index.
    fn clear_all(&self) -> Result<()>;
}

/// Unix-millis now, the timestamp base for all records.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
