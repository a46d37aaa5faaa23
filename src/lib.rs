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
//
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! # Bridge Relayer Crate
//!
//! A crate for relaying paired bridge intents between two independent
//! chains.
//!
//! ## Overview
//!
//! The relayer is a long-lived daemon that observes two chains at once.
//! For every `AssetsBuy` intent emitted by the L1 bridge contract it
//! executes `executeBuy` on L2; for every `ASSETS_SOLD` intent emitted on
//! L2 it executes `withdraw` on L1. Each outbound transaction is signed
//! with an EIP-712 typed-data authorization from the operator key, which
//! the destination contract verifies on chain.
//!
//! The pipeline has three stages:
//!
//! 1. **Ingestion** — events arrive over a live WebSocket subscription
//!    per chain and over a periodic historical backfill that re-reads the
//!    recent block window. Both paths converge on the same dedup
//!    pipeline, keyed by the source transaction hash, so an event is
//!    relayed at most once no matter how many times it is seen.
//! 2. **Relaying** — each accepted intent gets its own task: read the
//!    authorization nonce, normalize the amount to 18 decimals, sign,
//!    submit, and persist a pending record the moment the destination
//!    transaction exists.
//! 3. **Tracking** — the record follows the transaction through
//!    `PENDING → CONFIRMED | FAILED`; terminal states are never
//!    overwritten, and the records are queryable over a small HTTP
//!    surface.
//!
//! Connection supervision is per chain: a 30-second block-number probe,
//! exponential reconnect backoff capped at ten attempts, and a graceful
//! broadcast shutdown. One chain going dark never stops the other.

/// Contract bindings and chain-endpoint clients.
pub mod chains;
/// A module for configuring the relayer from the environment.
pub mod config;
/// A module for managing the context of the relayer.
pub mod context;
/// The in-memory index of already-claimed event hashes.
pub mod dedup;
/// Errors and the crate-wide result alias.
pub mod error;
/// A module that listens for events on both chains.
pub mod events_watcher;
/// HTTP handlers exposing relay records.
pub mod handler;
/// A module used for debugging relayer lifecycle and sync state.
pub mod probe;
/// The relay action and its state machine.
pub mod relayer;
/// Retry/backoff policies.
pub mod retry;
/// A module for starting long-running tasks for event watching.
pub mod service;
/// EIP-712 typed-data signing for relay authorizations.
pub mod signer;
/// A module for managing the storage of the relayer.
pub mod store;
/// Per-chain connection supervision.
pub mod supervisor;

#[cfg(test)]
mod test_utils;

pub use error::{Error, Result};
