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

use ethers::types::{Address, H256};

/// An enum of all possible errors that could be encountered during the
/// execution of the bridge relayer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An Io error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// JSON Error occurred.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Config loading error.
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    /// Error while parsing the configuration out of the environment.
    #[error("Config parse error: {}", _0)]
    ParseConfig(#[from] serde_path_to_error::Error<config::ConfigError>),
    /// Error while parsing a URL.
    #[error(transparent)]
    Url(#[from] url::ParseError),
    /// Error in the underlying Http server.
    #[error(transparent)]
    Hyper(#[from] hyper::Error),
    /// Sled database error.
    #[error(transparent)]
    Sled(#[from] sled::Error),
    /// Ether wallet errors.
    #[error(transparent)]
    EtherWallet(#[from] ethers::signers::WalletError),
    /// ECDSA signature errors.
    #[error(transparent)]
    Signature(#[from] ethers::types::SignatureError),
    /// Ethers currency conversion error.
    #[error(transparent)]
    Conversion(#[from] ethers::utils::ConversionError),
    /// The transport to a chain is dead or unreachable.
    ///
    /// Handled by the supervisor through reconnection with backoff.
    #[error("Connection error: {}", _0)]
    Connection(String),
    /// The RPC endpoint returned an error response for a read.
    #[error("Chain RPC error: {}", _0)]
    Chain(String),
    /// A transaction submission was rejected by the node.
    #[error("Transaction rejected: {}", _0)]
    Tx(String),
    /// Missing `OWNER_PRIVATE_KEY` in the environment.
    #[error("Missing required OWNER_PRIVATE_KEY in the environment")]
    MissingOperatorKey,
    /// The address recovered from a fresh signature does not match the
    /// operator address.
    #[error("Signer mismatch: expected {}, recovered {}", expected, recovered)]
    SignatureMismatch {
        /// The configured operator address.
        expected: Address,
        /// The address recovered from the signature.
        recovered: Address,
    },
    /// The event carries no transaction hash in any known place.
    #[error("Event is missing a transaction hash")]
    MissingEventHash,
    /// A second record tried to claim an already-recorded event hash.
    #[error("Event hash {:#x} already recorded", _0)]
    DuplicateEventHash(H256),
    /// The chain supervisor gave up reconnecting.
    #[error("Reconnect attempts exhausted after {} tries", attempts)]
    ReconnectAttemptsExhausted {
        /// How many reconnect attempts were made before giving up.
        attempts: usize,
    },
    /// Generic error.
    #[error("{}", _0)]
    Generic(&'static str),
}

impl Error {
    /// Whether this is the node telling us the transaction is already in
    /// its mempool. A soft condition: another relay attempt owns that hash.
    pub fn is_already_known(&self) -> bool {
        matches!(self, Error::Tx(msg) if msg.contains("already known"))
    }
}

/// A type alias for the result for the bridge relayer, that uses the
/// `Error` enum.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_known_is_recognized_only_on_tx_errors() {
        let soft = Error::Tx("err: already known".to_string());
        assert!(soft.is_already_known());
        let hard = Error::Tx("nonce too low".to_string());
        assert!(!hard.is_already_known());
        let other = Error::Chain("already known".to_string());
        assert!(!other.is_already_known());
    }
}
