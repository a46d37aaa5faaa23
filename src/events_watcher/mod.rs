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

//! # Events Watcher Module
//!
//! A module that turns raw bridge events from either chain into
//! deduplicated relay intents.
//!
//! ## Overview
//!
//! Events reach the ingestor from two paths: the live subscription stream
//! owned by the chain supervisor, and the periodic historical backfiller.
//! Both feed the same pipeline: extract the source transaction hash,
//! consult the in-memory dedup index, consult the durable store, and only
//! then hand the intent to the relayer. The in-memory check runs first so
//! duplicates cost no store round-trip.

use std::sync::Arc;

use ethers::types::{Address, H256, U256};

use crate::dedup::DedupIndex;
use crate::error::Result;
use crate::store::{ChainTag, TxStore};

/// A module for the periodic historical sweep that recovers events the
/// subscription path dropped.
pub mod backfill;

/// Where a streamed event may carry its originating transaction hash.
///
/// Transports disagree on the envelope shape: some put the hash on the
/// event itself, some on the attached log, some only on the receipt or
/// the embedded transaction. The probe order is fixed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventEnvelope {
    /// `transactionHash` directly on the event.
    pub transaction_hash: Option<H256>,
    /// `log.transactionHash`.
    pub log_transaction_hash: Option<H256>,
    /// `receipt.transactionHash`.
    pub receipt_transaction_hash: Option<H256>,
    /// `transaction.hash`.
    pub inner_transaction_hash: Option<H256>,
}

impl EventEnvelope {
    /// Envelope for an event decoded from an on-chain log.
    pub fn from_log(transaction_hash: H256) -> Self {
        Self {
            log_transaction_hash: Some(transaction_hash),
            ..Default::default()
        }
    }

    /// The source transaction hash, probing the known locations in order.
    pub fn event_hash(&self) -> Option<H256> {
        self.transaction_hash
            .or(self.log_transaction_hash)
            .or(self.receipt_transaction_hash)
            .or(self.inner_transaction_hash)
    }

    /// Like [`Self::event_hash`], but a hashless envelope is an error.
    pub fn require_event_hash(&self) -> Result<H256> {
        self.event_hash().ok_or(crate::error::Error::MissingEventHash)
    }
}

/// An `AssetsBuy` intent emitted on L1, to be settled on L2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuyEvent {
    /// The end user initiating the buy.
    pub user: Address,
    /// The asset the user paid in on L1.
    pub asset_in: Address,
    /// The raw paid amount, in `asset_in` base units.
    pub amount_in: U256,
    /// The token to deliver on L2.
    pub l2_target_token: Address,
    /// The signature deadline carried into the authorization.
    pub deadline: U256,
    /// The nonce the contract attached to the intent.
    pub nonce: U256,
}

/// An `ASSETS_SOLD` intent emitted on L2, to be settled on L1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SellEvent {
    /// The end user initiating the sell.
    pub user: Address,
    /// The token the user sold on L2.
    pub token_to_sell: Address,
    /// The raw sold amount, in `token_to_sell` base units.
    pub amount_in: U256,
    /// The L1 asset the user withdraws into.
    pub target_l1_asset: Address,
    /// The signature deadline carried into the authorization.
    pub deadline: U256,
    /// The nonce the contract attached to the intent.
    pub nonce: U256,
}

/// The decoded payload of a bridge event, before dedup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentBody {
    /// An L1 `AssetsBuy` event.
    Buy(BuyEvent),
    /// An L2 `ASSETS_SOLD` event.
    Sell(SellEvent),
}

/// A raw bridge event as delivered by a transport, live or historical.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntentEvent {
    /// The decoded event payload.
    pub body: IntentBody,
    /// The envelope the transport wrapped it in.
    pub envelope: EventEnvelope,
}

/// A deduplicated intent, owned by exactly one relay task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayIntent {
    /// Execute a buy on L2.
    Buy {
        /// The originating event.
        event: BuyEvent,
        /// Hash of the L1 transaction that emitted it.
        event_hash: H256,
    },
    /// Execute a withdraw on L1.
    Sell {
        /// The originating event.
        event: SellEvent,
        /// Hash of the L2 transaction that emitted it.
        event_hash: H256,
    },
}

impl RelayIntent {
    fn new(body: IntentBody, event_hash: H256) -> Self {
        match body {
            IntentBody::Buy(event) => Self::Buy { event, event_hash },
            IntentBody::Sell(event) => Self::Sell { event, event_hash },
        }
    }

    /// Hash of the source transaction this intent came from.
    pub fn event_hash(&self) -> H256 {
        match self {
            Self::Buy { event_hash, .. } | Self::Sell { event_hash, .. } => {
                *event_hash
            }
        }
    }
}

/// The seam between ingestion and relaying: something that takes
/// ownership of a deduplicated intent.
#[async_trait::async_trait]
pub trait IntentDispatcher: Send + Sync {
    /// Take ownership of the intent. Implementations spawn their own task
    /// per intent; this call must not block ingestion on chain I/O.
    async fn dispatch(&self, intent: RelayIntent);
}

/// What the ingestor did with one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// A fresh intent was handed to the dispatcher.
    Dispatched,
    /// The in-memory index already knew the hash.
    DuplicateInMemory,
    /// The durable store already knew the hash (e.g. across a restart).
    DuplicateInStore,
    /// The event carried no transaction hash anywhere; dropped.
    MissingHash,
}

/// Composes the dedup index, the durable store and the relayer into the
/// single ingestion path both the live stream and the backfiller use.
pub struct EventIngestor<S, D> {
    chain: ChainTag,
    dedup: DedupIndex,
    store: Arc<S>,
    dispatcher: Arc<D>,
}

impl<S, D> EventIngestor<S, D>
where
    S: TxStore,
    D: IntentDispatcher,
{
    /// Creates a new ingestor for events originating on `chain`.
    pub fn new(
        chain: ChainTag,
        dedup: DedupIndex,
        store: Arc<S>,
        dispatcher: Arc<D>,
    ) -> Self {
        Self {
            chain,
            dedup,
            store,
            dispatcher,
        }
    }

    /// The source chain this ingestor listens on.
    pub fn chain(&self) -> ChainTag {
        self.chain
    }

    /// Run one event through extraction, dedup and dispatch.
    pub async fn ingest(&self, event: IntentEvent) -> Result<IngestOutcome> {
        let event_hash = match event.envelope.require_event_hash() {
            Ok(event_hash) => event_hash,
            Err(e) => {
                tracing::warn!(
                    chain = %self.chain,
                    error = %e,
                    "dropping bridge event",
                );
                return Ok(IngestOutcome::MissingHash);
            }
        };
        // in-memory first: a hit here costs no store round-trip.
        if self.dedup.contains_or_add(event_hash) {
            tracing::trace!(
                chain = %self.chain,
                ?event_hash,
                "skipping already-claimed event",
            );
            return Ok(IngestOutcome::DuplicateInMemory);
        }
        // the durable check recovers across restarts even if the index
        // rehydration lagged.
        let persisted = match self.store.hash_exists(event_hash) {
            Ok(persisted) => persisted,
            Err(e) => {
                // give the hash back so a later sweep can retry.
                self.dedup.remove(&event_hash);
                return Err(e);
            }
        };
        if persisted {
            tracing::debug!(
                chain = %self.chain,
                ?event_hash,
                "skipping event already persisted in the store",
            );
            return Ok(IngestOutcome::DuplicateInStore);
        }
        tracing::event!(
            target: crate::probe::TARGET,
            tracing::Level::DEBUG,
            kind = %crate::probe::Kind::Sync,
            chain = %self.chain,
            event_hash = ?event_hash,
            accepted = true,
        );
        self.dispatcher
            .dispatch(RelayIntent::new(event.body, event_hash))
            .await;
        Ok(IngestOutcome::Dispatched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{
        InMemoryTxStore, RelayKind, RelayRecord, RelayStatus,
    };
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CountingDispatcher {
        intents: Mutex<Vec<RelayIntent>>,
    }

    #[async_trait::async_trait]
    impl IntentDispatcher for CountingDispatcher {
        async fn dispatch(&self, intent: RelayIntent) {
            self.intents.lock().push(intent);
        }
    }

    fn buy_event(hash: H256) -> IntentEvent {
        IntentEvent {
            body: IntentBody::Buy(BuyEvent {
                user: Address::repeat_byte(0x01),
                asset_in: Address::repeat_byte(0x02),
                amount_in: U256::from(1_000_000u64),
                l2_target_token: Address::repeat_byte(0x03),
                deadline: U256::from(1_999_999_999u64),
                nonce: U256::one(),
            }),
            envelope: EventEnvelope::from_log(hash),
        }
    }

    fn ingestor(
        dedup: DedupIndex,
        store: Arc<InMemoryTxStore>,
        dispatcher: Arc<CountingDispatcher>,
    ) -> EventIngestor<InMemoryTxStore, CountingDispatcher> {
        EventIngestor::new(ChainTag::L1, dedup, store, dispatcher)
    }

    #[tokio::test]
    async fn duplicates_are_suppressed_across_paths() {
        let dispatcher = Arc::new(CountingDispatcher::default());
        let ingestor = ingestor(
            DedupIndex::new(),
            Arc::new(InMemoryTxStore::new()),
            dispatcher.clone(),
        );
        let hash = H256::repeat_byte(0xaa);

        // live stream delivery, then the backfiller returning the same
        // hash: exactly one dispatch.
        let first = ingestor.ingest(buy_event(hash)).await.unwrap();
        assert_eq!(first, IngestOutcome::Dispatched);
        let second = ingestor.ingest(buy_event(hash)).await.unwrap();
        assert_eq!(second, IngestOutcome::DuplicateInMemory);
        assert_eq!(dispatcher.intents.lock().len(), 1);
        assert_eq!(dispatcher.intents.lock()[0].event_hash(), hash);
    }

    #[tokio::test]
    async fn persisted_hashes_survive_a_cold_index() {
        let hash = H256::repeat_byte(0xbb);
        let store = Arc::new(InMemoryTxStore::new());
        store
            .upsert_by_id(RelayRecord {
                id: format!("{hash:#x}"),
                chain: ChainTag::L2,
                kind: RelayKind::Buy,
                user: "0x0000000000000000000000000000000000000001"
                    .to_string(),
                amount: "1".to_string(),
                source_token: Address::repeat_byte(0x02),
                dest_token: Address::repeat_byte(0x03),
                event_hash: Some(hash),
                relay_hash: Some(H256::repeat_byte(0xbc)),
                status: RelayStatus::Confirmed,
                timestamp: 0,
                created_at: 0,
                updated_at: 0,
            })
            .unwrap();

        // fresh process: empty dedup index, warm store.
        let dispatcher = Arc::new(CountingDispatcher::default());
        let ingestor =
            ingestor(DedupIndex::new(), store, dispatcher.clone());
        let outcome = ingestor.ingest(buy_event(hash)).await.unwrap();
        assert_eq!(outcome, IngestOutcome::DuplicateInStore);
        assert!(dispatcher.intents.lock().is_empty());
    }

    #[tokio::test]
    async fn hash_is_probed_across_envelope_variants() {
        let dispatcher = Arc::new(CountingDispatcher::default());
        let dedup = DedupIndex::new();
        let ingestor = ingestor(
            dedup.clone(),
            Arc::new(InMemoryTxStore::new()),
            dispatcher.clone(),
        );

        // hash only present on the receipt variant.
        let hash = H256::repeat_byte(0xcc);
        let mut event = buy_event(hash);
        event.envelope = EventEnvelope {
            receipt_transaction_hash: Some(hash),
            ..Default::default()
        };
        let outcome = ingestor.ingest(event).await.unwrap();
        assert_eq!(outcome, IngestOutcome::Dispatched);

        // no hash anywhere: dropped, and the index is untouched.
        let mut hashless = buy_event(hash);
        hashless.envelope = EventEnvelope::default();
        let before = dedup.len();
        let outcome = ingestor.ingest(hashless).await.unwrap();
        assert_eq!(outcome, IngestOutcome::MissingHash);
        assert_eq!(dedup.len(), before);
        assert_eq!(dispatcher.intents.lock().len(), 1);
    }

    #[test]
    fn envelope_probe_order_is_fixed() {
        let envelope = EventEnvelope {
            transaction_hash: Some(H256::repeat_byte(0x01)),
            log_transaction_hash: Some(H256::repeat_byte(0x02)),
            receipt_transaction_hash: Some(H256::repeat_byte(0x03)),
            inner_transaction_hash: Some(H256::repeat_byte(0x04)),
        };
        assert_eq!(envelope.event_hash(), Some(H256::repeat_byte(0x01)));
        let envelope = EventEnvelope {
            transaction_hash: None,
            ..envelope
        };
        assert_eq!(envelope.event_hash(), Some(H256::repeat_byte(0x02)));
        let envelope = EventEnvelope {
            inner_transaction_hash: Some(H256::repeat_byte(0x04)),
            ..Default::default()
        };
        assert_eq!(envelope.event_hash(), Some(H256::repeat_byte(0x04)));
        assert!(matches!(
            EventEnvelope::default().require_event_hash(),
            Err(crate::error::Error::MissingEventHash)
        ));
    }
}
