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

//! # Relayer Module
//!
//! The relay action itself: for every accepted intent, read the
//! authorization nonce, normalize the amount, obtain an EIP-712
//! signature, submit the destination transaction, and track it through
//! the pending → confirmed/failed state machine.

use std::sync::Arc;

use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::format_units;

use crate::chains::{L1Bridge, L2Bridge, TxOutcome};
use crate::context::RelayerContext;
use crate::dedup::DedupIndex;
use crate::error::Result;
use crate::events_watcher::{
    BuyEvent, IntentDispatcher, RelayIntent, SellEvent,
};
use crate::signer::{BuyAuthorization, RelaySigner, WithdrawAuthorization};
use crate::store::{
    now_millis, ChainTag, RelayKind, RelayRecord, RelayStatus, TxStore,
};

/// Re-encode a raw token amount into 18-decimal fixed point.
///
/// Exact integer scaling: `raw * 10^(18 - decimals)` when the token has
/// at most 18 decimals, truncating division otherwise. No floats touch
/// the money path.
pub fn normalize_to_18_decimals(raw: U256, decimals: u8) -> U256 {
    match decimals {
        d if d < 18 => raw * U256::exp10((18 - d) as usize),
        18 => raw,
        d => raw / U256::exp10((d - 18) as usize),
    }
}

/// Render an 18-decimal fixed-point amount as a human-readable decimal
/// string, with trailing zeros trimmed.
pub fn format_amount(value: U256) -> Result<String> {
    let rendered = format_units(value, 18)?;
    let trimmed = rendered.trim_end_matches('0').trim_end_matches('.');
    Ok(if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    })
}

struct SubmittedRelay {
    relay_hash: H256,
    amount: U256,
}

/// Executes relays against the opposite chain for every dispatched
/// intent, one spawned task per intent.
pub struct Relayer<L1, L2, S> {
    ctx: RelayerContext,
    l1: Arc<L1>,
    l2: Arc<L2>,
    store: Arc<S>,
    dedup: DedupIndex,
}

impl<L1, L2, S> Clone for Relayer<L1, L2, S> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
            l1: self.l1.clone(),
            l2: self.l2.clone(),
            store: self.store.clone(),
            dedup: self.dedup.clone(),
        }
    }
}

impl<L1, L2, S> Relayer<L1, L2, S>
where
    L1: L1Bridge,
    L2: L2Bridge,
    S: TxStore,
{
    /// Wires the relayer against both chain clients and the store.
    pub fn new(
        ctx: RelayerContext,
        l1: Arc<L1>,
        l2: Arc<L2>,
        store: Arc<S>,
        dedup: DedupIndex,
    ) -> Self {
        Self {
            ctx,
            l1,
            l2,
            store,
            dedup,
        }
    }

    /// Relay one intent to the opposite chain.
    pub async fn relay(&self, intent: RelayIntent) -> Result<()> {
        match intent {
            RelayIntent::Buy { event, event_hash } => {
                self.relay_buy(event, event_hash).await
            }
            RelayIntent::Sell { event, event_hash } => {
                self.relay_sell(event, event_hash).await
            }
        }
    }

    async fn relay_buy(
        &self,
        event: BuyEvent,
        event_hash: H256,
    ) -> Result<()> {
        let submitted = match self.submit_buy(&event, event_hash).await {
            Ok(submitted) => submitted,
            Err(e) if e.is_already_known() => {
                tracing::warn!(
                    ?event_hash,
                    "buy relay already known to the node, another attempt owns it",
                );
                return Ok(());
            }
            Err(e) => {
                // nothing was submitted: release the hash so the next
                // backfill sweep retries this intent.
                self.dedup.remove(&event_hash);
                return Err(e);
            }
        };

        let record = self.pending_record(
            ChainTag::L2,
            RelayKind::Buy,
            event.user,
            event.asset_in,
            event.l2_target_token,
            event_hash,
            &submitted,
        )?;
        self.store.upsert_by_id(record)?;
        self.dedup.contains_or_add(submitted.relay_hash);
        tracing::event!(
            target: crate::probe::TARGET,
            tracing::Level::DEBUG,
            kind = %crate::probe::Kind::Relay,
            flow = %RelayKind::Buy,
            relay_hash = ?submitted.relay_hash,
            pending = true,
        );

        let outcome =
            self.l2.wait_for_receipt(submitted.relay_hash).await?;
        self.finalize(RelayKind::Buy, submitted.relay_hash, outcome)
    }

    async fn relay_sell(
        &self,
        event: SellEvent,
        event_hash: H256,
    ) -> Result<()> {
        let submitted = match self.submit_sell(&event, event_hash).await {
            Ok(submitted) => submitted,
            Err(e) if e.is_already_known() => {
                tracing::warn!(
                    ?event_hash,
                    "withdraw relay already known to the node, another attempt owns it",
                );
                return Ok(());
            }
            Err(e) => {
                self.dedup.remove(&event_hash);
                return Err(e);
            }
        };

        let record = self.pending_record(
            ChainTag::L1,
            RelayKind::Sell,
            event.user,
            event.token_to_sell,
            event.target_l1_asset,
            event_hash,
            &submitted,
        )?;
        self.store.upsert_by_id(record)?;
        self.dedup.contains_or_add(submitted.relay_hash);
        tracing::event!(
            target: crate::probe::TARGET,
            tracing::Level::DEBUG,
            kind = %crate::probe::Kind::Relay,
            flow = %RelayKind::Sell,
            relay_hash = ?submitted.relay_hash,
            pending = true,
        );

        let outcome =
            self.l1.wait_for_receipt(submitted.relay_hash).await?;
        self.finalize(RelayKind::Sell, submitted.relay_hash, outcome)
    }

    async fn submit_buy(
        &self,
        event: &BuyEvent,
        event_hash: H256,
    ) -> Result<SubmittedRelay> {
        // the operator key is read per relay, never cached.
        let wallet =
            self.ctx.operator_wallet(self.ctx.config.l2_chain_id)?;
        let signer = RelaySigner::new(wallet.clone());

        let nonce =
            self.l2.used_nonces(event.user).await? + U256::one();
        let decimals = self.l1.token_decimals(event.asset_in).await?;
        let amount = normalize_to_18_decimals(event.amount_in, decimals);
        let domain_separator = self.l2.domain_separator().await?;
        let signature = signer.sign_buy(
            domain_separator,
            &BuyAuthorization {
                user: event.user,
                l2_token: event.l2_target_token,
                // the contract expects the zero address here.
                asset_in: Address::zero(),
                amount,
                nonce,
                deadline: event.deadline,
            },
        )?;

        tracing::debug!(
            ?event_hash,
            user = ?event.user,
            %nonce,
            %amount,
            "submitting executeBuy on L2",
        );
        let relay_hash = self
            .l2
            .execute_buy(
                wallet,
                event.user,
                event.l2_target_token,
                amount,
                U256::zero(),
                nonce,
                event.deadline,
                Bytes::from(signature.to_vec()),
            )
            .await?;
        Ok(SubmittedRelay { relay_hash, amount })
    }

    async fn submit_sell(
        &self,
        event: &SellEvent,
        event_hash: H256,
    ) -> Result<SubmittedRelay> {
        let wallet =
            self.ctx.operator_wallet(self.ctx.config.l1_chain_id)?;
        let signer = RelaySigner::new(wallet.clone());

        let nonce =
            self.l1.used_nonces(event.user).await? + U256::one();
        let decimals =
            self.l2.token_decimals(event.token_to_sell).await?;
        let amount = normalize_to_18_decimals(event.amount_in, decimals);
        let lp_share = self
            .l1
            .user_lp_share(event.user, event.target_l1_asset)
            .await?;
        let domain_separator = self.l1.domain_separator().await?;
        let signature = signer.sign_withdraw(
            domain_separator,
            &WithdrawAuthorization {
                user: event.user,
                asset_to_withdraw: event.target_l1_asset,
                nonce,
                deadline: event.deadline,
            },
        )?;

        tracing::debug!(
            ?event_hash,
            user = ?event.user,
            %nonce,
            %lp_share,
            "submitting withdraw on L1",
        );
        let relay_hash = self
            .l1
            .withdraw(
                wallet,
                event.user,
                event.target_l1_asset,
                lp_share,
                nonce,
                event.deadline,
                Bytes::from(signature.to_vec()),
            )
            .await?;
        Ok(SubmittedRelay { relay_hash, amount })
    }

    #[allow(clippy::too_many_arguments)]
    fn pending_record(
        &self,
        chain: ChainTag,
        kind: RelayKind,
        user: Address,
        source_token: Address,
        dest_token: Address,
        event_hash: H256,
        submitted: &SubmittedRelay,
    ) -> Result<RelayRecord> {
        let now = now_millis();
        Ok(RelayRecord {
            id: format!("{event_hash:#x}"),
            chain,
            kind,
            user: RelayRecord::normalize_user(user),
            amount: format_amount(submitted.amount)?,
            source_token,
            dest_token,
            event_hash: Some(event_hash),
            relay_hash: Some(submitted.relay_hash),
            status: RelayStatus::Pending,
            timestamp: now,
            created_at: now,
            updated_at: now,
        })
    }

    fn finalize(
        &self,
        kind: RelayKind,
        relay_hash: H256,
        outcome: TxOutcome,
    ) -> Result<()> {
        match outcome {
            TxOutcome::Confirmed => {
                self.store
                    .update_status_by_hash(relay_hash, RelayStatus::Confirmed)?;
                tracing::event!(
                    target: crate::probe::TARGET,
                    tracing::Level::DEBUG,
                    kind = %crate::probe::Kind::Relay,
                    flow = %kind,
                    relay_hash = ?relay_hash,
                    finalized = true,
                );
                tracing::info!(?relay_hash, "relay confirmed");
            }
            TxOutcome::Reverted => {
                self.store
                    .update_status_by_hash(relay_hash, RelayStatus::Failed)?;
                tracing::error!(?relay_hash, "relay reverted on chain");
            }
            TxOutcome::Dropped => {
                // no receipt will ever come; the record stays pending.
                tracing::warn!(
                    ?relay_hash,
                    "relay dropped from the mempool, record stays pending",
                );
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl<L1, L2, S> IntentDispatcher for Relayer<L1, L2, S>
where
    L1: L1Bridge + 'static,
    L2: L2Bridge + 'static,
    S: TxStore + 'static,
{
    async fn dispatch(&self, intent: RelayIntent) {
        let relayer = self.clone();
        tokio::spawn(async move {
            let event_hash = intent.event_hash();
            if let Err(e) = relayer.relay(intent).await {
                tracing::error!(
                    ?event_hash,
                    error = %e,
                    "relay task failed",
                );
            }
        });
    }
}
