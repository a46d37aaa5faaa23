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

//! # Chains Module
//!
//! Contract bindings and chain-endpoint clients for the two sides of the
//! bridge. The traits here are the surface the relayer and backfiller
//! consume; the implementations talk `ethers` over HTTP. The long-living
//! subscription transport is owned by the supervisor, which builds it
//! from the same configuration.

use std::sync::Arc;
use std::time::Duration;

use ethers::contract::{abigen, LogMeta};
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, PendingTransaction, Provider};
use ethers::signers::LocalWallet;
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256};

use crate::context::RelayerContext;
use crate::error::{Error, Result};
use crate::events_watcher::{
    BuyEvent, EventEnvelope, IntentBody, IntentEvent, SellEvent,
};
use crate::store::ChainTag;

/// Fixed gas limit for every relay submission.
pub const RELAY_GAS_LIMIT: u64 = 500_000;

// Parameter names below are local; only the types bind the wire format.
abigen!(
    L1BridgeContract,
    r#"[
        event AssetsBuy(address user, address assetIn, uint256 amountIn, address targetToken, uint256 deadline, uint256 nonce)
        function DOMAIN_SEPARATOR() view returns (bytes32)
        function usedNonces(address user) view returns (uint256)
        function getUserLpShare(address user, address asset) view returns (uint256)
        function withdraw(address user, address asset, uint256 lpShare, uint256 nonce, uint256 deadline, bytes sig)
    ]"#
);

abigen!(
    L2BridgeContract,
    r#"[
        event ASSETS_SOLD(address user, address tokenSold, uint256 amountIn, address targetAsset, uint256 deadline, uint256 nonce)
        function DOMAIN_SEPARATOR() view returns (bytes32)
        function usedNonces(address user) view returns (uint256)
        function executeBuy(address user, address token, uint256 amount, uint256 minOut, uint256 nonce, uint256 deadline, bytes sig)
    ]"#
);

abigen!(
    Erc20Contract,
    r#"[
        function decimals() view returns (uint8)
    ]"#
);

impl From<(AssetsBuyFilter, LogMeta)> for IntentEvent {
    fn from((event, meta): (AssetsBuyFilter, LogMeta)) -> Self {
        IntentEvent {
            body: IntentBody::Buy(BuyEvent {
                user: event.user,
                asset_in: event.asset_in,
                amount_in: event.amount_in,
                l2_target_token: event.target_token,
                deadline: event.deadline,
                nonce: event.nonce,
            }),
            envelope: EventEnvelope::from_log(meta.transaction_hash),
        }
    }
}

impl From<(AssetsSoldFilter, LogMeta)> for IntentEvent {
    fn from((event, meta): (AssetsSoldFilter, LogMeta)) -> Self {
        IntentEvent {
            body: IntentBody::Sell(SellEvent {
                user: event.user,
                token_to_sell: event.token_sold,
                amount_in: event.amount_in,
                target_l1_asset: event.target_asset,
                deadline: event.deadline,
                nonce: event.nonce,
            }),
            envelope: EventEnvelope::from_log(meta.transaction_hash),
        }
    }
}

/// The fate of a submitted relay transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    /// Mined with a success status.
    Confirmed,
    /// Mined and reverted.
    Reverted,
    /// Fell out of the mempool before being mined.
    Dropped,
}

fn outcome_of(receipt: Option<TransactionReceipt>) -> TxOutcome {
    match receipt {
        Some(receipt) => match receipt.status {
            Some(status) if status.is_zero() => TxOutcome::Reverted,
            _ => TxOutcome::Confirmed,
        },
        None => TxOutcome::Dropped,
    }
}

/// Abstraction over one chain endpoint, shared by both bridge sides.
#[async_trait::async_trait]
pub trait ChainClient: Send + Sync {
    /// Which side of the bridge this client talks to.
    fn chain(&self) -> ChainTag;

    /// Current block number; the health-probe primitive.
    async fn block_number(&self) -> Result<u64>;

    /// Historical query for this chain's intent events in a block range.
    async fn query_intent_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<IntentEvent>>;
}

/// Operations the relayer performs against the L1 bridge contract.
#[async_trait::async_trait]
pub trait L1Bridge: ChainClient {
    /// The contract's EIP-712 domain separator.
    async fn domain_separator(&self) -> Result<[u8; 32]>;

    /// The last authorization nonce consumed for `user`.
    async fn used_nonces(&self, user: Address) -> Result<U256>;

    /// The user's liquidity share for `asset`, the `withdraw` argument.
    async fn user_lp_share(
        &self,
        user: Address,
        asset: Address,
    ) -> Result<U256>;

    /// ERC-20 `decimals()` of a token on this chain.
    async fn token_decimals(&self, token: Address) -> Result<u8>;

    /// Submit `withdraw` with the operator wallet. Returns the relay
    /// transaction hash.
    #[allow(clippy::too_many_arguments)]
    async fn withdraw(
        &self,
        wallet: LocalWallet,
        user: Address,
        asset: Address,
        lp_share: U256,
        nonce: U256,
        deadline: U256,
        sig: Bytes,
    ) -> Result<H256>;

    /// Wait until the relay transaction is mined or dropped.
    async fn wait_for_receipt(&self, tx_hash: H256) -> Result<TxOutcome>;
}

/// Operations the relayer performs against the L2 bridge contract.
#[async_trait::async_trait]
pub trait L2Bridge: ChainClient {
    /// The contract's EIP-712 domain separator.
    async fn domain_separator(&self) -> Result<[u8; 32]>;

    /// The last authorization nonce consumed for `user`.
    async fn used_nonces(&self, user: Address) -> Result<U256>;

    /// ERC-20 `decimals()` of a token on this chain.
    async fn token_decimals(&self, token: Address) -> Result<u8>;

    /// Submit `executeBuy` with the operator wallet. Returns the relay
    /// transaction hash.
    #[allow(clippy::too_many_arguments)]
    async fn execute_buy(
        &self,
        wallet: LocalWallet,
        user: Address,
        l2_token: Address,
        amount: U256,
        min_out: U256,
        nonce: U256,
        deadline: U256,
        sig: Bytes,
    ) -> Result<H256>;

    /// Wait until the relay transaction is mined or dropped.
    async fn wait_for_receipt(&self, tx_hash: H256) -> Result<TxOutcome>;
}

type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// `ethers`-backed client for the L1 side of the bridge.
pub struct L1Client {
    provider: Arc<Provider<Http>>,
    contract: L1BridgeContract<Provider<Http>>,
    address: Address,
}

impl L1Client {
    /// Builds the client from the context configuration.
    pub fn new(ctx: &RelayerContext) -> Result<Self> {
        let provider =
            Arc::new(ctx.http_provider(&ctx.config.l1_rpc_url)?);
        let address = parse_address(&ctx.config.l1_bridge_address)?;
        let contract = L1BridgeContract::new(address, provider.clone());
        Ok(Self {
            provider,
            contract,
            address,
        })
    }

    /// The configured bridge contract address on L1.
    pub fn bridge_address(&self) -> Address {
        self.address
    }

    fn signed_contract(
        &self,
        wallet: LocalWallet,
    ) -> L1BridgeContract<SignerClient> {
        let client = Arc::new(SignerMiddleware::new(
            (*self.provider).clone(),
            wallet,
        ));
        L1BridgeContract::new(self.address, client)
    }
}

#[async_trait::async_trait]
impl ChainClient for L1Client {
    fn chain(&self) -> ChainTag {
        ChainTag::L1
    }

    async fn block_number(&self) -> Result<u64> {
        let number = self
            .provider
            .get_block_number()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        Ok(number.as_u64())
    }

    async fn query_intent_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<IntentEvent>> {
        let events = self
            .contract
            .assets_buy_filter()
            .from_block(from_block)
            .to_block(to_block);
        let found = events
            .query_with_meta()
            .await
            .map_err(|e| Error::Chain(e.to_string()))?;
        Ok(found.into_iter().map(IntentEvent::from).collect())
    }
}

#[async_trait::async_trait]
impl L1Bridge for L1Client {
    async fn domain_separator(&self) -> Result<[u8; 32]> {
        self.contract
            .domain_separator()
            .call()
            .await
            .map_err(|e| Error::Chain(e.to_string()))
    }

    async fn used_nonces(&self, user: Address) -> Result<U256> {
        self.contract
            .used_nonces(user)
            .call()
            .await
            .map_err(|e| Error::Chain(e.to_string()))
    }

    async fn user_lp_share(
        &self,
        user: Address,
        asset: Address,
    ) -> Result<U256> {
        self.contract
            .get_user_lp_share(user, asset)
            .call()
            .await
            .map_err(|e| Error::Chain(e.to_string()))
    }

    async fn token_decimals(&self, token: Address) -> Result<u8> {
        Erc20Contract::new(token, self.provider.clone())
            .decimals()
            .call()
            .await
            .map_err(|e| Error::Chain(e.to_string()))
    }

    async fn withdraw(
        &self,
        wallet: LocalWallet,
        user: Address,
        asset: Address,
        lp_share: U256,
        nonce: U256,
        deadline: U256,
        sig: Bytes,
    ) -> Result<H256> {
        let contract = self.signed_contract(wallet);
        let call = contract
            .withdraw(user, asset, lp_share, nonce, deadline, sig)
            .gas(RELAY_GAS_LIMIT);
        let pending = call
            .send()
            .await
            .map_err(|e| Error::Tx(e.to_string()))?;
        Ok(*pending)
    }

    async fn wait_for_receipt(&self, tx_hash: H256) -> Result<TxOutcome> {
        wait_for_receipt(&self.provider, tx_hash).await
    }
}

/// `ethers`-backed client for the L2 side of the bridge.
pub struct L2Client {
    provider: Arc<Provider<Http>>,
    contract: L2BridgeContract<Provider<Http>>,
    address: Address,
}

impl L2Client {
    /// Builds the client from the context configuration.
    pub fn new(ctx: &RelayerContext) -> Result<Self> {
        let provider =
            Arc::new(ctx.http_provider(&ctx.config.l2_rpc_url)?);
        let address = parse_address(&ctx.config.l2_bridge_address)?;
        let contract = L2BridgeContract::new(address, provider.clone());
        Ok(Self {
            provider,
            contract,
            address,
        })
    }

    /// The configured bridge contract address on L2.
    pub fn bridge_address(&self) -> Address {
        self.address
    }

    fn signed_contract(
        &self,
        wallet: LocalWallet,
    ) -> L2BridgeContract<SignerClient> {
        let client = Arc::new(SignerMiddleware::new(
            (*self.provider).clone(),
            wallet,
        ));
        L2BridgeContract::new(self.address, client)
    }
}

#[async_trait::async_trait]
impl ChainClient for L2Client {
    fn chain(&self) -> ChainTag {
        ChainTag::L2
    }

    async fn block_number(&self) -> Result<u64> {
        let number = self
            .provider
            .get_block_number()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        Ok(number.as_u64())
    }

    async fn query_intent_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<IntentEvent>> {
        let events = self
            .contract
            .assets_sold_filter()
            .from_block(from_block)
            .to_block(to_block);
        let found = events
            .query_with_meta()
            .await
            .map_err(|e| Error::Chain(e.to_string()))?;
        Ok(found.into_iter().map(IntentEvent::from).collect())
    }
}

#[async_trait::async_trait]
impl L2Bridge for L2Client {
    async fn domain_separator(&self) -> Result<[u8; 32]> {
        self.contract
            .domain_separator()
            .call()
            .await
            .map_err(|e| Error::Chain(e.to_string()))
    }

    async fn used_nonces(&self, user: Address) -> Result<U256> {
        self.contract
            .used_nonces(user)
            .call()
            .await
            .map_err(|e| Error::Chain(e.to_string()))
    }

    async fn token_decimals(&self, token: Address) -> Result<u8> {
        Erc20Contract::new(token, self.provider.clone())
            .decimals()
            .call()
            .await
            .map_err(|e| Error::Chain(e.to_string()))
    }

    async fn execute_buy(
        &self,
        wallet: LocalWallet,
        user: Address,
        l2_token: Address,
        amount: U256,
        min_out: U256,
        nonce: U256,
        deadline: U256,
        sig: Bytes,
    ) -> Result<H256> {
        let contract = self.signed_contract(wallet);
        let call = contract
            .execute_buy(user, l2_token, amount, min_out, nonce, deadline, sig)
            .gas(RELAY_GAS_LIMIT);
        let pending = call
            .send()
            .await
            .map_err(|e| Error::Tx(e.to_string()))?;
        Ok(*pending)
    }

    async fn wait_for_receipt(&self, tx_hash: H256) -> Result<TxOutcome> {
        wait_for_receipt(&self.provider, tx_hash).await
    }
}

async fn wait_for_receipt(
    provider: &Provider<Http>,
    tx_hash: H256,
) -> Result<TxOutcome> {
    let pending = PendingTransaction::new(tx_hash, provider)
        .interval(Duration::from_millis(1_000));
    let receipt = pending
        .await
        .map_err(|e| Error::Connection(e.to_string()))?;
    Ok(outcome_of(receipt))
}

fn parse_address(raw: &str) -> Result<Address> {
    raw.parse()
        .map_err(|_| Error::Generic("invalid bridge contract address"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receipt_status_maps_onto_outcomes() {
        assert_eq!(outcome_of(None), TxOutcome::Dropped);

        let mut receipt = TransactionReceipt::default();
        receipt.status = Some(1u64.into());
        assert_eq!(outcome_of(Some(receipt.clone())), TxOutcome::Confirmed);

        receipt.status = Some(0u64.into());
        assert_eq!(outcome_of(Some(receipt)), TxOutcome::Reverted);
    }

    #[test]
    fn bridge_addresses_parse_from_config_defaults() {
        let config = crate::config::RelayerConfig::default();
        assert!(parse_address(&config.l1_bridge_address).is_ok());
        assert!(parse_address(&config.l2_bridge_address).is_ok());
        assert!(parse_address("not-an-address").is_err());
    }
}
