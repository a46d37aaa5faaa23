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

//! EIP-712 typed-data signing for relay authorizations.
//!
//! The destination contracts verify an operator signature over a typed
//! struct bound to their own domain separator. This module builds the
//! digest by hand — type hash, struct hash, `0x19 0x01` prefix — signs
//! it, and refuses to hand out any signature whose recovered address
//! does not match the operator.

use ethers::abi::Token;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, RecoveryMessage, Signature, H256, U256};
use ethers::utils::keccak256;

use crate::error::{Error, Result};

/// The typed-data string for the buy authorization.
const ASSETS_BUY_TYPE: &str = "ASSETS_BUY(address user,address l2Token,address assetIn,uint256 amount,uint256 nonce,uint256 deadline)";

/// The typed-data string for the withdraw authorization.
const ASSETS_SOLD_TYPE: &str = "ASSETS_SOLD(address user,address assetToWithdraw,uint256 nonce,uint256 deadline)";

/// The buy authorization struct as the L2 contract hashes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuyAuthorization {
    /// The end user the relay executes for.
    pub user: Address,
    /// The token delivered on L2.
    pub l2_token: Address,
    /// The asset-in field.
    ///
    /// The deployed contract expects the zero address here regardless of
    /// the actual source asset; keep it that way until the contract
    /// changes.
    pub asset_in: Address,
    /// The 18-decimal normalized amount.
    pub amount: U256,
    /// The authorization nonce, `usedNonces(user) + 1`.
    pub nonce: U256,
    /// The signature deadline.
    pub deadline: U256,
}

/// The withdraw authorization struct as the L1 contract hashes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WithdrawAuthorization {
    /// The end user the relay executes for.
    pub user: Address,
    /// The L1 asset being withdrawn.
    pub asset_to_withdraw: Address,
    /// The authorization nonce, `usedNonces(user) + 1`.
    pub nonce: U256,
    /// The signature deadline.
    pub deadline: U256,
}

/// keccak256 of the buy type string.
pub fn buy_type_hash() -> [u8; 32] {
    keccak256(ASSETS_BUY_TYPE.as_bytes())
}

/// keccak256 of the withdraw type string.
pub fn withdraw_type_hash() -> [u8; 32] {
    keccak256(ASSETS_SOLD_TYPE.as_bytes())
}

/// `keccak256(0x19 || 0x01 || domainSeparator || structHash)`.
fn eip712_digest(domain_separator: [u8; 32], struct_hash: [u8; 32]) -> [u8; 32] {
    let mut preimage = Vec::with_capacity(66);
    preimage.extend_from_slice(&[0x19, 0x01]);
    preimage.extend_from_slice(&domain_separator);
    preimage.extend_from_slice(&struct_hash);
    keccak256(preimage)
}

/// Deterministic EIP-712 signer over the operator wallet.
#[derive(Debug, Clone)]
pub struct RelaySigner {
    wallet: LocalWallet,
}

impl RelaySigner {
    /// Wraps the operator wallet.
    pub fn new(wallet: LocalWallet) -> Self {
        Self { wallet }
    }

    /// The operator address signatures must recover to.
    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    /// Signs a buy authorization against the L2 contract's domain.
    pub fn sign_buy(
        &self,
        domain_separator: [u8; 32],
        auth: &BuyAuthorization,
    ) -> Result<Signature> {
        let struct_hash = keccak256(ethers::abi::encode(&[
            Token::FixedBytes(buy_type_hash().to_vec()),
            Token::Address(auth.user),
            Token::Address(auth.l2_token),
            Token::Address(auth.asset_in),
            Token::Uint(auth.amount),
            Token::Uint(auth.nonce),
            Token::Uint(auth.deadline),
        ]));
        self.sign_digest(eip712_digest(domain_separator, struct_hash))
    }

    /// Signs a withdraw authorization against the L1 contract's domain.
    pub fn sign_withdraw(
        &self,
        domain_separator: [u8; 32],
        auth: &WithdrawAuthorization,
    ) -> Result<Signature> {
        let struct_hash = keccak256(ethers::abi::encode(&[
            Token::FixedBytes(withdraw_type_hash().to_vec()),
            Token::Address(auth.user),
            Token::Address(auth.asset_to_withdraw),
            Token::Uint(auth.nonce),
            Token::Uint(auth.deadline),
        ]));
        self.sign_digest(eip712_digest(domain_separator, struct_hash))
    }

    /// Signs a raw digest and asserts the signature recovers to the
    /// operator address before handing it out.
    fn sign_digest(&self, digest: [u8; 32]) -> Result<Signature> {
        let digest = H256::from(digest);
        let signature = self.wallet.sign_hash(digest)?;
        let recovered =
            signature.recover(RecoveryMessage::Hash(digest))?;
        if recovered != self.wallet.address() {
            return Err(Error::SignatureMismatch {
                expected: self.wallet.address(),
                recovered,
            });
        }
        Ok(signature)
    }
}
