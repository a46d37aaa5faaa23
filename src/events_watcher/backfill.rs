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

use std::sync::Arc;
use std::time::Duration;

use crate::chains::ChainClient;
use crate::context::Shutdown;
use crate::error::Result;
use crate::events_watcher::{EventIngestor, IngestOutcome, IntentDispatcher};
use crate::store::TxStore;

/// Periodic sweep over the recent block window that re-feeds every found
/// event through the ingestor.
///
/// Subscriptions may silently drop events; this sweep is the authoritative
/// recovery path. It is intentionally overlapping and idempotent — the
/// dedup pipeline makes replays free.
pub struct HistoricalBackfiller<C, S, D> {
    client: Arc<C>,
    ingestor: Arc<EventIngestor<S, D>>,
    lookback_blocks: u64,
    interval: Duration,
}

impl<C, S, D> HistoricalBackfiller<C, S, D>
where
    C: ChainClient,
    S: TxStore,
    D: IntentDispatcher,
{
    /// Creates a backfiller sweeping `lookback_blocks` behind the tip
    /// every `interval`.
    pub fn new(
        client: Arc<C>,
        ingestor: Arc<EventIngestor<S, D>>,
        lookback_blocks: u64,
        interval: Duration,
    ) -> Self {
        Self {
            client,
            ingestor,
            lookback_blocks,
            interval,
        }
    }

    /// Runs the sweep loop until shutdown. The first sweep fires
    /// immediately, recovering anything missed while the process was
    /// down.
    pub async fn run(self, mut shutdown: Shutdown) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // sweep failures are bounded to this pass; the next
                    // tick retries.
                    if let Err(e) = self.sweep().await {
                        tracing::warn!(
                            chain = %self.ingestor.chain(),
                            error = %e,
                            "historical backfill sweep failed",
                        );
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!(
                        chain = %self.ingestor.chain(),
                        "historical backfiller stopped",
                    );
                    return;
                }
            }
        }
    }

    /// One sweep: query the trailing block window and replay every event
    /// through the dedup pipeline.
    pub async fn sweep(&self) -> Result<usize> {
        let current_block = self.client.block_number().await?;
        let from_block = current_block.saturating_sub(self.lookback_blocks);
        let events = self
            .client
            .query_intent_events(from_block, current_block)
            .await?;
        let total = events.len();
        let mut dispatched = 0usize;
        for event in events {
            if self.ingestor.ingest(event).await? == IngestOutcome::Dispatched
            {
                dispatched += 1;
            }
        }
        tracing::event!(
            target: crate::probe::TARGET,
            tracing::Level::TRACE,
            kind = %crate::probe::Kind::Sync,
            chain = %self.ingestor.chain(),
            from_block,
            to_block = current_block,
            found = total,
            dispatched,
        );
        if dispatched > 0 {
            tracing::info!(
                chain = %self.ingestor.chain(),
                dispatched,
                "backfill recovered events the stream missed",
            );
        }
        Ok(dispatched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::DedupIndex;
    use crate::error::Error;
    use crate::events_watcher::{
        BuyEvent, EventEnvelope, IntentBody, IntentEvent, RelayIntent,
    };
    use crate::store::{ChainTag, InMemoryTxStore};
    use ethers::types::{Address, H256, U256};
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

    struct FixedChain {
        block_number: u64,
        events: Vec<IntentEvent>,
        queries: Mutex<Vec<(u64, u64)>>,
    }

    #[async_trait::async_trait]
    impl ChainClient for FixedChain {
        fn chain(&self) -> ChainTag {
            ChainTag::L1
        }

        async fn block_number(&self) -> crate::error::Result<u64> {
            Ok(self.block_number)
        }

        async fn query_intent_events(
            &self,
            from_block: u64,
            to_block: u64,
        ) -> crate::error::Result<Vec<IntentEvent>> {
            self.queries.lock().push((from_block, to_block));
            Ok(self.events.clone())
        }
    }

    fn buy_event(hash: H256) -> IntentEvent {
        IntentEvent {
            body: IntentBody::Buy(BuyEvent {
                user: Address::repeat_byte(0x01),
                asset_in: Address::repeat_byte(0x02),
                amount_in: U256::from(10u64),
                l2_target_token: Address::repeat_byte(0x03),
                deadline: U256::from(1_999_999_999u64),
                nonce: U256::one(),
            }),
            envelope: EventEnvelope::from_log(hash),
        }
    }

    #[tokio::test]
    async fn sweep_queries_the_trailing_window() {
        let chain = Arc::new(FixedChain {
            block_number: 5_000,
            events: vec![],
            queries: Mutex::new(vec![]),
        });
        let ingestor = Arc::new(EventIngestor::new(
            ChainTag::L1,
            DedupIndex::new(),
            Arc::new(InMemoryTxStore::new()),
            Arc::new(CountingDispatcher::default()),
        ));
        let backfiller =
            HistoricalBackfiller::new(chain.clone(), ingestor, 1_000, Duration::from_secs(300));
        backfiller.sweep().await.unwrap();
        assert_eq!(*chain.queries.lock(), vec![(4_000, 5_000)]);
    }

    #[tokio::test]
    async fn sweep_clamps_the_window_at_genesis() {
        let chain = Arc::new(FixedChain {
            block_number: 250,
            events: vec![],
            queries: Mutex::new(vec![]),
        });
        let ingestor = Arc::new(EventIngestor::new(
            ChainTag::L1,
            DedupIndex::new(),
            Arc::new(InMemoryTxStore::new()),
            Arc::new(CountingDispatcher::default()),
        ));
        let backfiller =
            HistoricalBackfiller::new(chain.clone(), ingestor, 1_000, Duration::from_secs(300));
        backfiller.sweep().await.unwrap();
        assert_eq!(*chain.queries.lock(), vec![(0, 250)]);
    }

    #[tokio::test]
    async fn sweep_is_idempotent_through_the_dedup_pipeline() {
        let hash = H256::repeat_byte(0xaa);
        let chain = Arc::new(FixedChain {
            block_number: 2_000,
            events: vec![buy_event(hash), buy_event(hash)],
            queries: Mutex::new(vec![]),
        });
        let dispatcher = Arc::new(CountingDispatcher::default());
        let ingestor = Arc::new(EventIngestor::new(
            ChainTag::L1,
            DedupIndex::new(),
            Arc::new(InMemoryTxStore::new()),
            dispatcher.clone(),
        ));
        let backfiller = HistoricalBackfiller::new(
            chain,
            ingestor,
            1_000,
            Duration::from_secs(300),
        );
        // two sweeps over the same overlapping window, the duplicate
        // event inside each sweep included: a single dispatch.
        assert_eq!(backfiller.sweep().await.unwrap(), 1);
        assert_eq!(backfiller.sweep().await.unwrap(), 0);
        assert_eq!(dispatcher.intents.lock().len(), 1);
    }

    #[tokio::test]
    async fn sweep_surfaces_chain_errors() {
        struct FailingChain;

        #[async_trait::async_trait]
        impl ChainClient for FailingChain {
            fn chain(&self) -> ChainTag {
                ChainTag::L1
            }

            async fn block_number(&self) -> crate::error::Result<u64> {
                Err(Error::Connection("gone".to_string()))
            }

            async fn query_intent_events(
                &self,
                _from_block: u64,
                _to_block: u64,
            ) -> crate::error::Result<Vec<IntentEvent>> {
                unreachable!("block_number fails first")
            }
        }

        let ingestor = Arc::new(EventIngestor::new(
            ChainTag::L1,
            DedupIndex::new(),
            Arc::new(InMemoryTxStore::new()),
            Arc::new(CountingDispatcher::default()),
        ));
        let backfiller = HistoricalBackfiller::new(
            Arc::new(FailingChain),
            ingestor,
            1_000,
            Duration::from_secs(300),
        );
        assert!(backfiller.sweep().await.is_err());
    }
}
