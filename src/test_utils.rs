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

//! Mock chain clients for exercising the relay pipeline without a node.

use ethers::signers::LocalWallet;
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::keccak256;
use parking_lot::Mutex;

use crate::chains::{ChainClient, L1Bridge, L2Bridge, TxOutcome};
use crate::error::{Error, Result};
use crate::events_watcher::IntentEvent;
use crate::store::ChainTag;

/// The well-known throwaway key used across the test suite.
pub const TEST_OPERATOR_KEY: &str =
    "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

/// Arguments captured from an `executeBuy` submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteBuyArgs {
    pub user: Address,
    pub l2_token: Address,
    pub amount: U256,
    pub min_out: U256,
    pub nonce: U256,
    pub deadline: U256,
    pub sig: Bytes,
}

/// Arguments captured from a `withdraw` submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawArgs {
    pub user: Address,
    pub asset: Address,
    pub lp_share: U256,
    pub nonce: U256,
    pub deadline: U256,
    pub sig: Bytes,
}

/// A scripted chain endpoint playing either side of the bridge.
pub struct MockChain {
    pub chain: ChainTag,
    pub block_number: u64,
    pub domain_separator: [u8; 32],
    pub used_nonces: U256,
    pub decimals: u8,
    pub lp_share: U256,
    pub relay_hash: H256,
    pub wait_outcome: TxOutcome,
    /// When set, every submission fails with `Error::Tx` of this message.
    pub submit_error: Option<&'static str>,
    /// When set, every contract read fails with `Error::Chain`.
    pub fail_reads: bool,
    pub buy_calls: Mutex<Vec<ExecuteBuyArgs>>,
    pub withdraw_calls: Mutex<Vec<WithdrawArgs>>,
}

impl Default for MockChain {
    fn default() -> Self {
        Self {
            chain: ChainTag::L2,
            block_number: 1_000,
            domain_separator: keccak256(b"mock-bridge-domain"),
            used_nonces: U256::zero(),
            decimals: 18,
            lp_share: U256::zero(),
            relay_hash: H256::repeat_byte(0xf1),
            wait_outcome: TxOutcome::Confirmed,
            submit_error: None,
            fail_reads: false,
            buy_calls: Mutex::new(vec![]),
            withdraw_calls: Mutex::new(vec![]),
        }
    }
}

impl MockChain {
    fn read_guard(&self) -> Result<()> {
        if self.fail_reads {
            return Err(Error::Chain("scripted read failure".to_string()));
        }
        Ok(())
    }

    fn submit_guard(&self) -> Result<()> {
        if let Some(msg) = self.submit_error {
            return Err(Error::Tx(msg.to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ChainClient for MockChain {
    fn chain(&self) -> ChainTag {
        self.chain
    }

    async fn block_number(&self) -> Result<u64> {
        Ok(self.block_number)
    }

    async fn query_intent_events(
        &self,
        _from_block: u64,
        _to_block: u64,
    ) -> Result<Vec<IntentEvent>> {
        Ok(vec![])
    }
}

#[async_trait::async_trait]
impl L1Bridge for MockChain {
    async fn domain_separator(&self) -> Result<[u8; 32]> {
        self.read_guard()?;
        Ok(self.domain_separator)
    }

    async fn used_nonces(&self, _user: Address) -> Result<U256> {
        self.read_guard()?;
        Ok(self.used_nonces)
    }

    async fn user_lp_share(
        &self,
        _user: Address,
        _asset: Address,
    ) -> Result<U256> {
        self.read_guard()?;
        Ok(self.lp_share)
    }

    async fn token_decimals(&self, _token: Address) -> Result<u8> {
        self.read_guard()?;
        Ok(self.decimals)
    }

    async fn withdraw(
        &self,
        _wallet: LocalWallet,
        user: Address,
        asset: Address,
        lp_share: U256,
        nonce: U256,
        deadline: U256,
        sig: Bytes,
    ) -> Result<H256> {
        self.submit_guard()?;
        self.withdraw_calls.lock().push(WithdrawArgs {
            user,
            asset,
            lp_share,
            nonce,
            deadline,
            sig,
        });
        Ok(self.relay_hash)
    }

    async fn wait_for_receipt(&self, _tx_hash: H256) -> Result<TxOutcome> {
        Ok(self.wait_outcome)
    }
}

#[async_trait::async_trait]
impl L2Bridge for MockChain {
    async fn domain_separator(&self) -> Result<[u8; 32]> {
        self.read_guard()?;
        Ok(self.domain_separator)
    }

    async fn used_nonces(&self, _user: Address) -> Result<U256> {
        self.read_guard()?;
        Ok(self.used_nonces)
    }

    async fn token_decimals(&self, _token: Address) -> Result<u8> {
        self.read_guard()?;
        Ok(self.decimals)
    }

    async fn execute_buy(
        &self,
        _wallet: LocalWallet,
        user: Address,
        l2_token: Address,
        amount: U256,
        min_out: U256,
        nonce: U256,
        deadline: U256,
        sig: Bytes,
    ) -> Result<H256> {
        self.submit_guard()?;
        self.buy_calls.lock().push(ExecuteBuyArgs {
            user,
            l2_token,
            amount,
            min_out,
            nonce,
            deadline,
            sig,
        });
        Ok(self.relay_hash)
    }

    async fn wait_for_receipt(&self, _tx_hash: H256) -> Result<TxOutcome> {
        Ok(self.wait_outcome)
    }
}
