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
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Result;

const fn default_port() -> u16 {
    9955
}

fn default_l1_rpc_url() -> String {
    "https://sepolia.infura.io/v3/84842078b09946638c03157f83405213".to_string()
}

fn default_l2_rpc_url() -> String {
    "https://arbitrum-sepolia.infura.io/v3/84842078b09946638c03157f83405213"
        .to_string()
}

fn default_l1_bridge_address() -> String {
    "0x5FbDB2315678afecb367f032d93F642f64180aa3".to_string()
}

fn default_l2_bridge_address() -> String {
    "0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512".to_string()
}

const fn default_l1_chain_id() -> u64 {
    11155111
}

const fn default_l2_chain_id() -> u64 {
    421614
}

const fn default_backfill_lookback_blocks() -> u64 {
    1_000
}

const fn default_backfill_interval_secs() -> u64 {
    300
}

const fn default_health_check_interval_secs() -> u64 {
    30
}

/// RelayerConfig is the configuration for the bridge relayer.
///
/// Every field maps one-to-one onto an environment variable of the same
/// name in SCREAMING_SNAKE_CASE, e.g. `L1_RPC_URL`, `OWNER_PRIVATE_KEY`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayerConfig {
    /// HTTP Server Port number
    ///
    /// default to 9955
    #[serde(default = "default_port", skip_serializing)]
    pub port: u16,
    /// L1 HTTPS JSON-RPC endpoint. The WebSocket endpoint for the long
    /// living subscription is derived from it.
    #[serde(default = "default_l1_rpc_url")]
    pub l1_rpc_url: String,
    /// L2 HTTPS JSON-RPC endpoint.
    #[serde(default = "default_l2_rpc_url")]
    pub l2_rpc_url: String,
    /// The hex-encoded private key of the operator account that signs
    /// the typed-data authorizations and submits relays.
    ///
    /// There is deliberately no default: a missing key aborts each relay
    /// with a config error, it never stops ingestion.
    #[serde(default, skip_serializing)]
    pub owner_private_key: Option<String>,
    /// Address of the bridge contract on L1.
    #[serde(default = "default_l1_bridge_address")]
    pub l1_bridge_address: String,
    /// Address of the bridge contract on L2.
    #[serde(default = "default_l2_bridge_address")]
    pub l2_bridge_address: String,
    /// Chain id of L1, bound into the operator wallet.
    #[serde(default = "default_l1_chain_id")]
    pub l1_chain_id: u64,
    /// Chain id of L2, bound into the operator wallet.
    #[serde(default = "default_l2_chain_id")]
    pub l2_chain_id: u64,
    /// How many blocks each historical backfill sweep looks back.
    #[serde(default = "default_backfill_lookback_blocks")]
    pub backfill_lookback_blocks: u64,
    /// Seconds between historical backfill sweeps.
    #[serde(default = "default_backfill_interval_secs")]
    pub backfill_interval_secs: u64,
    /// Seconds between block-number health probes on each chain.
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
}

impl Default for RelayerConfig {
    fn default() -> Self {
        // an empty source yields all the serde defaults.
        serde_json::from_value(serde_json::json!({}))
            .expect("default config is deserializable")
    }
}

/// Load the relayer configuration from the process environment.
///
/// `.env` loading (if any) is the caller's concern; by the time this runs
/// the environment is the single source of truth.
pub fn load() -> Result<RelayerConfig> {
    let cfg = config::Config::builder()
        .add_source(config::Environment::default())
        .build()?;
    let config = serde_path_to_error::deserialize(cfg)?;
    Ok(config)
}

/// Derive the streaming WebSocket endpoint from an HTTPS JSON-RPC url:
/// `https` becomes `wss` (`http` becomes `ws`), and an Infura-style `/v3`
/// path gains the `/ws` prefix.
pub fn derive_ws_endpoint(http_endpoint: &str) -> Result<Url> {
    let mut url = Url::parse(http_endpoint)?;
    let ws_scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => other,
    }
    .to_string();
    url.set_scheme(&ws_scheme)
        .map_err(|_| crate::error::Error::Generic("cannot rewrite url scheme"))?;
    let path = url.path();
    if path.contains("/v3") && !path.contains("/ws/v3") {
        let rewritten = path.replacen("/v3", "/ws/v3", 1);
        url.set_path(&rewritten);
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_endpoint_is_derived_from_https() {
        let ws = derive_ws_endpoint(
            "https://mainnet.infura.io/v3/84842078b09946638c03157f83405213",
        )
        .unwrap();
        assert_eq!(
            ws.as_str(),
            "wss://mainnet.infura.io/ws/v3/84842078b09946638c03157f83405213"
        );
    }

    #[test]
    fn ws_endpoint_without_v3_path_only_swaps_the_scheme() {
        let ws = derive_ws_endpoint("https://rpc.example.com/").unwrap();
        assert_eq!(ws.as_str(), "wss://rpc.example.com/");
    }

    #[test]
    fn ws_endpoint_is_stable_for_ws_urls() {
        let ws = derive_ws_endpoint("wss://rpc.example.com/ws/v3/abc").unwrap();
        assert_eq!(ws.as_str(), "wss://rpc.example.com/ws/v3/abc");
    }

    #[test]
    fn defaults_are_present_for_both_endpoints() {
        let config = RelayerConfig::default();
        assert!(config.l1_rpc_url.starts_with("https://"));
        assert!(config.l2_rpc_url.starts_with("https://"));
        assert!(config.owner_private_key.is_none());
        assert_eq!(config.backfill_lookback_blocks, 1_000);
        assert_eq!(config.backfill_interval_secs, 300);
        assert_eq!(config.health_check_interval_secs, 30);
    }
}
