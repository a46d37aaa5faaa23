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

#![deny(unsafe_code)]

//! Bridge Relayer Binary.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use directories_next::ProjectDirs;
use structopt::StructOpt;
use tokio::signal::unix;

use bridge_relayer::context::RelayerContext;
use bridge_relayer::store::SledTxStore;
use bridge_relayer::{config, probe, service};

const PACKAGE_ID: [&str; 3] = ["tools", "bridge", "bridge-relayer"];

/// The Bridge Relayer Command-line tool
///
/// Start the relayer with the environment configured:
///
///     $ OWNER_PRIVATE_KEY=0x... bridge-relayer -vvv
#[derive(StructOpt)]
#[structopt(name = "Bridge Relayer")]
struct Opts {
    /// A level of verbosity, and can be used multiple times
    #[structopt(short, long, parse(from_occurrences))]
    verbose: i32,
    /// Directory that holds the relayer database.
    #[structopt(long = "db", value_name = "PATH", parse(from_os_str))]
    db: Option<PathBuf>,
}

#[paw::main]
#[tokio::main]
async fn main(args: Opts) -> anyhow::Result<()> {
    setup_logger(args.verbose)?;
    match dotenv::dotenv() {
        Ok(_) => {
            tracing::trace!("Loaded .env file");
        }
        Err(e) => {
            tracing::trace!("Failed to load .env file: {}", e);
        }
    }
    let config =
        config::load().context("failed to load config from the environment")?;
    let ctx = RelayerContext::new(config);
    let store = create_store(args.db).context("failed to open the store")?;

    let (addr, server) =
        service::build_web_services(ctx.clone(), Arc::new(store.clone()))?;
    tracing::info!("Starting the server on {}", addr);
    let server_handle = tokio::spawn(server);
    // start all background services.
    // this does not block, will fire the services on background tasks.
    service::ignite(&ctx, Arc::new(store)).await?;
    tracing::event!(
        target: probe::TARGET,
        tracing::Level::DEBUG,
        kind = %probe::Kind::Lifecycle,
        started = true,
    );

    // watch for signals
    let mut ctrlc_signal = unix::signal(unix::SignalKind::interrupt())?;
    let mut termination_signal = unix::signal(unix::SignalKind::terminate())?;
    let mut quit_signal = unix::signal(unix::SignalKind::quit())?;
    let shutdown = || {
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Lifecycle,
            shutdown = true,
        );
        tracing::warn!("Shutting down...");
        // send shutdown signal to all of the application.
        ctx.shutdown();
        // also abort the server task
        server_handle.abort();
        std::thread::sleep(std::time::Duration::from_millis(300));
        tracing::info!("Clean Exit ..");
    };
    tokio::select! {
        _ = ctrlc_signal.recv() => {
            tracing::warn!("Interrupted (Ctrl+C) ...");
            shutdown();
        },
        _ = termination_signal.recv() => {
            tracing::warn!("Got Terminate signal ...");
            shutdown();
        },
        _ = quit_signal.recv() => {
            tracing::warn!("Quitting ...");
            shutdown();
        },
    }
    Ok(())
}

fn setup_logger(verbosity: i32) -> anyhow::Result<()> {
    use tracing::Level;
    let log_level = match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        3 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(format!("bridge_relayer={}", log_level).parse()?);
    tracing_subscriber::fmt()
        .with_target(true)
        .with_max_level(log_level)
        .with_env_filter(env_filter)
        .init();
    Ok(())
}

fn create_store(path: Option<PathBuf>) -> anyhow::Result<SledTxStore> {
    let dirs = ProjectDirs::from(PACKAGE_ID[0], PACKAGE_ID[1], PACKAGE_ID[2])
        .context("failed to get the default data directory")?;
    let base = match path {
        Some(p) => p,
        None => dirs.data_local_dir().to_path_buf(),
    };
    let db_path = base.join("store");
    let store = SledTxStore::open(db_path)?;
    Ok(store)
}
