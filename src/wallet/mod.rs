//! Wallet adapter: the capability the portal needs from a browser wallet.
//!
//! The connection popup and the provider itself live outside this crate.
//! What we consume is the address, a connection-state stream, raw EIP-1193
//! style `request` calls and plain-text message signing.

pub mod chain;
pub mod readonly;

pub use chain::{ChainSwitch, ensure_chain};
pub use readonly::ReadOnlyWallet;

use std::sync::LazyLock;

use async_trait::async_trait;
use futures::stream::BoxStream;
use regex::Regex;

use crate::error::WalletError;

/// EIP-1193 "user rejected request".
pub const USER_REJECTED_CODE: i64 = 4001;

/// Returned by `wallet_switchEthereumChain` for chains the wallet does not know.
pub const UNRECOGNIZED_CHAIN_CODE: i64 = 4902;

static REJECTION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(rejected|denied)\b").unwrap());

/// Connection state as observed from the wallet.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WalletConnection {
    pub connected: bool,
    pub address: Option<String>,
}

impl WalletConnection {
    pub fn connected(address: impl Into<String>) -> Self {
        Self {
            connected: true,
            address: Some(address.into()),
        }
    }

    pub fn disconnected() -> Self {
        Self::default()
    }
}

/// Browser wallet capability.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Open the connection prompt. Returns the selected address.
    async fn connect(&self) -> Result<String, WalletError>;

    async fn disconnect(&self) -> Result<(), WalletError>;

    /// Currently selected address, if connected.
    fn address(&self) -> Option<String>;

    fn is_connected(&self) -> bool;

    /// Stream of connection-state changes, starting with the current state.
    fn connection_events(&self) -> BoxStream<'static, WalletConnection>;

    /// Raw provider request (`eth_chainId`, `wallet_switchEthereumChain`, ...).
    async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, WalletError>;

    /// Sign a plain-text message with `address`.
    async fn sign_message(&self, address: &str, message: &str) -> Result<String, WalletError>;
}

/// Whether a wallet error message reads like a user rejection.
pub fn is_rejection_message(message: &str) -> bool {
    REJECTION_PATTERN.is_match(message)
}

/// Classify a provider error by code and message.
pub fn classify_rpc_error(method: &str, code: i64, message: &str) -> WalletError {
    if code == USER_REJECTED_CODE || is_rejection_message(message) {
        WalletError::UserRejected {
            code: Some(code),
            message: message.to_string(),
        }
    } else if code == UNRECOGNIZED_CHAIN_CODE {
        WalletError::UnrecognizedChain {
            chain_id: message.to_string(),
        }
    } else {
        WalletError::Rpc {
            method: method.to_string(),
            code,
            message: message.to_string(),
        }
    }
}

/// Basic shape check for an EVM address.
pub fn is_valid_address(address: &str) -> bool {
    let Some(hex) = address.strip_prefix("0x").or_else(|| address.strip_prefix("0X")) else {
        return false;
    };
    hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit())
}
