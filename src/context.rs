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

use std::convert::TryFrom;
use std::time::Duration;

use ethers::providers::{Http, Provider};
use ethers::signers::{LocalWallet, Signer};
use tokio::sync::broadcast;

use crate::config::RelayerConfig;
use crate::error::{Error, Result};

/// RelayerContext contains the relayer's configuration and shutdown signal.
#[derive(Clone)]
pub struct RelayerContext {
    /// The configuration of the relayer.
    pub config: RelayerConfig,
    /// Broadcasts a shutdown signal to all active connections.
    ///
    /// The initial `shutdown` trigger is provided by the `run` caller.
    /// When a long-running task is spawned, it is passed a broadcast
    /// receiver handle. When a graceful shutdown is initiated, a `()`
    /// value is sent via the broadcast::Sender. Each active task receives
    /// it, reaches a safe terminal state, and completes.
    notify_shutdown: broadcast::Sender<()>,
}

impl RelayerContext {
    /// Creates a new RelayerContext.
    pub fn new(config: RelayerConfig) -> Self {
        let (notify_shutdown, _) = broadcast::channel(2);
        Self {
            config,
            notify_shutdown,
        }
    }

    /// Returns a broadcast receiver handle for the shutdown signal.
    pub fn shutdown_signal(&self) -> Shutdown {
        Shutdown::new(self.notify_shutdown.subscribe())
    }

    /// Sends a shutdown signal to all subscribed tasks/connections.
    pub fn shutdown(&self) {
        let _ = self.notify_shutdown.send(());
    }

    /// Returns a new HTTP provider for the given chain endpoint.
    pub fn http_provider(&self, endpoint: &str) -> Result<Provider<Http>> {
        let provider = Provider::try_from(endpoint)
            .map_err(|e| Error::Connection(e.to_string()))?
            .interval(Duration::from_millis(5u64));
        Ok(provider)
    }

    /// Sets up an operator wallet bound to `chain_id`.
    ///
    /// The private key is read out of the configuration on every call and
    /// never cached: a relay that runs without `OWNER_PRIVATE_KEY` fails
    /// on its own, ingestion keeps going.
    pub fn operator_wallet(&self, chain_id: u64) -> Result<LocalWallet> {
        let raw = self
            .config
            .owner_private_key
            .as_deref()
            .ok_or(Error::MissingOperatorKey)?;
        let wallet: LocalWallet =
            raw.trim_start_matches("0x").parse().map_err(Error::EtherWallet)?;
        Ok(wallet.with_chain_id(chain_id))
    }
}

impl std::fmt::Debug for RelayerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayerContext").finish()
    }
}

/// Listens for the shutdown signal.
///
/// Shutdown is signalled using a `broadcast::Receiver`. Only a single
/// value is ever sent. Once a value has been sent via the broadcast
/// channel, every task should shut down.
///
/// The `Shutdown` struct listens for the signal and tracks that the
/// signal has been received. Callers may query for whether the shutdown
/// signal has been received or not.
#[derive(Debug)]
pub struct Shutdown {
    /// `true` if the shutdown signal has been received
    shutdown: bool,
    /// The receive half of the channel used to listen for shutdown.
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    /// Create a new `Shutdown` backed by the given `broadcast::Receiver`.
    pub fn new(notify: broadcast::Receiver<()>) -> Shutdown {
        Shutdown {
            shutdown: false,
            notify,
        }
    }

    /// Receive the shutdown notice, waiting if necessary.
    pub async fn recv(&mut self) {
        // If the shutdown signal has already been received, then return
        // immediately.
        if self.shutdown {
            return;
        }

        // Cannot receive a "lag error" as only one value is ever sent.
        let _ = self.notify.recv().await;

        // Remember that the signal has been received.
        self.shutdown = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str =
        "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    #[test]
    fn operator_wallet_requires_the_key() {
        let ctx = RelayerContext::new(RelayerConfig::default());
        let err = ctx.operator_wallet(1).unwrap_err();
        assert!(matches!(err, Error::MissingOperatorKey));
    }

    #[test]
    fn operator_wallet_accepts_keys_with_and_without_prefix() {
        let mut config = RelayerConfig::default();
        config.owner_private_key = Some(TEST_KEY.to_string());
        let plain = RelayerContext::new(config.clone())
            .operator_wallet(1)
            .unwrap();

        config.owner_private_key = Some(format!("0x{TEST_KEY}"));
        let prefixed =
            RelayerContext::new(config).operator_wallet(1).unwrap();
        assert_eq!(plain.address(), prefixed.address());
        assert_eq!(plain.chain_id(), 1);
    }

    #[tokio::test]
    async fn shutdown_signal_reaches_every_subscriber() {
        let ctx = RelayerContext::new(RelayerConfig::default());
        let mut first = ctx.shutdown_signal();
        let mut second = ctx.shutdown_signal();
        ctx.shutdown();
        first.recv().await;
        second.recv().await;
        // a second recv returns immediately.
        first.recv().await;
    }
}
