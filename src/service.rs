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

//! # Relayer Service Module
//!
//! A module for starting long-running tasks for event watching.
//!
//! ## Overview
//!
//! Services are tasks which the relayer constantly runs throughout its
//! lifetime: one supervisor and one historical backfiller per chain, plus
//! the HTTP surface that exposes the relay records.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::chains::{L1Client, L2Client};
use crate::context::RelayerContext;
use crate::dedup::DedupIndex;
use crate::error::Result;
use crate::events_watcher::backfill::HistoricalBackfiller;
use crate::events_watcher::EventIngestor;
use crate::handler;
use crate::relayer::Relayer;
use crate::store::{ChainTag, SledTxStore, TxStore};
use crate::supervisor::ChainSupervisor;

/// Sets up the HTTP server exposing the relay records, with graceful
/// shutdown wired to the context's shutdown signal.
///
/// Returns `Ok((addr, server))` on success; the server future must be
/// spawned by the caller.
pub fn build_web_services(
    ctx: RelayerContext,
    store: Arc<SledTxStore>,
) -> Result<(SocketAddr, impl core::future::Future<Output = ()> + 'static)> {
    let addr = SocketAddr::from(([0, 0, 0, 0], ctx.config.port));
    let routes = handler::build_routes(store);
    let server = axum::Server::try_bind(&addr)?
        .serve(routes.into_make_service());
    let addr = server.local_addr();
    let mut shutdown = ctx.shutdown_signal();
    let graceful = server.with_graceful_shutdown(async move {
        shutdown.recv().await;
    });
    let service = async move {
        if let Err(e) = graceful.await {
            tracing::error!(error = %e, "http server error");
        }
    };
    Ok((addr, service))
}

/// Starts all background services: rebuilds the dedup index from the
/// store, then fires one supervisor and one backfiller per chain.
///
/// This does not block; every service runs on its own task and ends on
/// the context's shutdown signal.
pub async fn ignite(
    ctx: &RelayerContext,
    store: Arc<SledTxStore>,
) -> Result<()> {
    let dedup = DedupIndex::new();
    let seeded = dedup.seed(store.all_hashes()?);
    tracing::debug!(seeded, "dedup index rebuilt from the store");

    let l1 = Arc::new(L1Client::new(ctx)?);
    let l2 = Arc::new(L2Client::new(ctx)?);
    let relayer = Arc::new(Relayer::new(
        ctx.clone(),
        l1.clone(),
        l2.clone(),
        store.clone(),
        dedup.clone(),
    ));

    let l1_ingestor = Arc::new(EventIngestor::new(
        ChainTag::L1,
        dedup.clone(),
        store.clone(),
        relayer.clone(),
    ));
    let l2_ingestor = Arc::new(EventIngestor::new(
        ChainTag::L2,
        dedup,
        store,
        relayer,
    ));

    // each chain gets its own streaming supervisor; one side halting
    // never stops the other.
    let l1_supervisor = ChainSupervisor::new(
        ctx,
        ChainTag::L1,
        l1.bridge_address(),
        l1_ingestor.clone(),
    );
    tokio::spawn(l1_supervisor.run(ctx.shutdown_signal()));
    let l2_supervisor = ChainSupervisor::new(
        ctx,
        ChainTag::L2,
        l2.bridge_address(),
        l2_ingestor.clone(),
    );
    tokio::spawn(l2_supervisor.run(ctx.shutdown_signal()));

    let lookback = ctx.config.backfill_lookback_blocks;
    let interval = Duration::from_secs(ctx.config.backfill_interval_secs);
    let l1_backfiller =
        HistoricalBackfiller::new(l1, l1_ingestor, lookback, interval);
    tokio::spawn(l1_backfiller.run(ctx.shutdown_signal()));
    let l2_backfiller =
        HistoricalBackfiller::new(l2, l2_ingestor, lookback, interval);
    tokio::spawn(l2_backfiller.run(ctx.shutdown_signal()));

    Ok(())
}
