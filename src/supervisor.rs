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

//! # Chain Supervisor Module
//!
//! Owns the streaming transport of one chain: builds the WebSocket
//! provider derived from the HTTPS endpoint, wires the bridge event
//! subscription into the ingestor, probes liveness with a periodic
//! block-number call, and reconnects with capped exponential backoff.
//! A supervisor that exhausts its retry budget halts; the other chain's
//! supervisor keeps running.

use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use ethers::providers::{Middleware, Provider, Ws};
use ethers::types::{Address, U256};
use futures::StreamExt;

use crate::chains::{L1BridgeContract, L2BridgeContract};
use crate::context::{RelayerContext, Shutdown};
use crate::error::{Error, Result};
use crate::events_watcher::{EventIngestor, IntentDispatcher, IntentEvent};
use crate::retry::ExponentialWithMaxRetryCount;
use crate::store::{ChainTag, TxStore};

/// Base delay of the reconnect schedule.
const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(2);
/// The supervisor halts after this many consecutive failed attempts.
const MAX_RECONNECT_ATTEMPTS: usize = 10;

/// Supervises the streaming connection of one chain.
pub struct ChainSupervisor<S, D> {
    chain: ChainTag,
    http_endpoint: String,
    bridge_address: Address,
    health_interval: Duration,
    ingestor: Arc<EventIngestor<S, D>>,
    backoff: ExponentialWithMaxRetryCount,
    known_chain_id: Option<U256>,
}

impl<S, D> ChainSupervisor<S, D>
where
    S: TxStore,
    D: IntentDispatcher,
{
    /// Creates a supervisor for `chain`, watching the bridge contract at
    /// `bridge_address` through the configured endpoint.
    pub fn new(
        ctx: &RelayerContext,
        chain: ChainTag,
        bridge_address: Address,
        ingestor: Arc<EventIngestor<S, D>>,
    ) -> Self {
        let http_endpoint = match chain {
            ChainTag::L1 => ctx.config.l1_rpc_url.clone(),
            ChainTag::L2 => ctx.config.l2_rpc_url.clone(),
        };
        let health_interval =
            Duration::from_secs(ctx.config.health_check_interval_secs);
        Self {
            chain,
            http_endpoint,
            bridge_address,
            health_interval,
            ingestor,
            backoff: ExponentialWithMaxRetryCount::new(
                RECONNECT_BASE_DELAY,
                MAX_RECONNECT_ATTEMPTS,
            ),
            known_chain_id: None,
        }
    }

    /// Runs the supervision loop until shutdown or until the reconnect
    /// budget is exhausted.
    pub async fn run(mut self, mut shutdown: Shutdown) {
        loop {
            match self.connect_and_watch(&mut shutdown).await {
                Ok(()) => {
                    tracing::event!(
                        target: crate::probe::TARGET,
                        tracing::Level::DEBUG,
                        kind = %crate::probe::Kind::Lifecycle,
                        chain = %self.chain,
                        stopped = true,
                    );
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        chain = %self.chain,
                        error = %e,
                        "chain connection lost",
                    );
                }
            }
            match self.backoff.next_backoff() {
                Some(delay) => {
                    tracing::event!(
                        target: crate::probe::TARGET,
                        tracing::Level::DEBUG,
                        kind = %crate::probe::Kind::Retry,
                        chain = %self.chain,
                        attempt = self.backoff.attempts(),
                        delay_secs = delay.as_secs(),
                    );
                    tracing::warn!(
                        chain = %self.chain,
                        attempt = self.backoff.attempts(),
                        "reconnecting in {}s",
                        delay.as_secs(),
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.recv() => return,
                    }
                }
                None => {
                    let e = Error::ReconnectAttemptsExhausted {
                        attempts: MAX_RECONNECT_ATTEMPTS,
                    };
                    tracing::error!(
                        chain = %self.chain,
                        error = %e,
                        "giving up on this chain, supervisor halted",
                    );
                    return;
                }
            }
        }
    }

    /// One connection lifetime: connect, subscribe, and pump events and
    /// health probes until something breaks or shutdown arrives.
    ///
    /// `Ok(())` means a graceful shutdown; any `Err` asks the caller to
    /// reconnect.
    async fn connect_and_watch(
        &mut self,
        shutdown: &mut Shutdown,
    ) -> Result<()> {
        let ws_endpoint =
            crate::config::derive_ws_endpoint(&self.http_endpoint)?;
        let provider = Provider::<Ws>::connect(ws_endpoint.as_str())
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        let client = Arc::new(provider);

        let chain_id = client
            .get_chainid()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        match self.known_chain_id {
            Some(previous) if previous != chain_id => {
                tracing::warn!(
                    chain = %self.chain,
                    %previous,
                    current = %chain_id,
                    "network changed under us",
                );
                self.backoff.reset();
            }
            _ => {}
        }
        self.known_chain_id = Some(chain_id);
        tracing::info!(
            chain = %self.chain,
            %chain_id,
            endpoint = %ws_endpoint,
            "subscribed to bridge events",
        );

        let mut health = tokio::time::interval(self.health_interval);

        match self.chain {
            ChainTag::L1 => {
                let contract = L1BridgeContract::new(
                    self.bridge_address,
                    client.clone(),
                );
                let events = contract.assets_buy_filter();
                let mut stream = events
                    .subscribe_with_meta()
                    .await
                    .map_err(|e| Error::Connection(e.to_string()))?;
                loop {
                    tokio::select! {
                        maybe_event = stream.next() => match maybe_event {
                            Some(Ok((event, meta))) => {
                                let intent = IntentEvent::from((event, meta));
                                if let Err(e) = self.ingestor.ingest(intent).await {
                                    tracing::error!(
                                        chain = %self.chain,
                                        error = %e,
                                        "failed to ingest streamed event",
                                    );
                                }
                            }
                            Some(Err(e)) => {
                                return Err(Error::Connection(e.to_string()));
                            }
                            None => {
                                return Err(Error::Connection(
                                    "event stream closed".to_string(),
                                ));
                            }
                        },
                        _ = health.tick() => self.health_probe(&client).await?,
                        _ = shutdown.recv() => return Ok(()),
                    }
                }
            }
            ChainTag::L2 => {
                let contract = L2BridgeContract::new(
                    self.bridge_address,
                    client.clone(),
                );
                let events = contract.assets_sold_filter();
                let mut stream = events
                    .subscribe_with_meta()
                    .await
                    .map_err(|e| Error::Connection(e.to_string()))?;
                loop {
                    tokio::select! {
                        maybe_event = stream.next() => match maybe_event {
                            Some(Ok((event, meta))) => {
                                let intent = IntentEvent::from((event, meta));
                                if let Err(e) = self.ingestor.ingest(intent).await {
                                    tracing::error!(
                                        chain = %self.chain,
                                        error = %e,
                                        "failed to ingest streamed event",
                                    );
                                }
                            }
                            Some(Err(e)) => {
                                return Err(Error::Connection(e.to_string()));
                            }
                            None => {
                                return Err(Error::Connection(
                                    "event stream closed".to_string(),
                                ));
                            }
                        },
                        _ = health.tick() => self.health_probe(&client).await?,
                        _ = shutdown.recv() => return Ok(()),
                    }
                }
            }
        }
    }

    /// Liveness probe; success resets the reconnect budget.
    async fn health_probe(&mut self, client: &Arc<Provider<Ws>>) -> Result<()> {
        match client.get_block_number().await {
            Ok(block_number) => {
                self.backoff.reset();
                tracing::trace!(
                    chain = %self.chain,
                    %block_number,
                    "chain is healthy",
                );
                Ok(())
            }
            Err(e) => Err(Error::Connection(e.to_string())),
        }
    }
}
