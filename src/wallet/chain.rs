//! Chain switching through the wallet provider.

use serde_json::json;
use tracing::{debug, info};

use super::WalletProvider;
use crate::config::ChainConfig;
use crate::error::WalletError;

/// What `ensure_chain` had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainSwitch {
    AlreadyActive,
    Switched,
    Added,
}

/// Read the wallet's active chain id.
pub async fn current_chain_id(wallet: &dyn WalletProvider) -> Result<u64, WalletError> {
    let value = wallet.request("eth_chainId", json!([])).await?;
    parse_chain_id(&value).ok_or_else(|| WalletError::Rpc {
        method: "eth_chainId".to_string(),
        code: -32603,
        message: format!("unexpected chain id {value}"),
    })
}

fn parse_chain_id(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::String(s) => match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16).ok(),
            None => s.parse().ok(),
        },
        serde_json::Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

/// `wallet_addEthereumChain` parameters for `chain`.
pub fn add_chain_params(chain: &ChainConfig) -> serde_json::Value {
    json!([{
        "chainId": chain.chain_id_hex(),
        "chainName": chain.chain_name,
        "nativeCurrency": {
            "name": chain.currency_name,
            "symbol": chain.currency_symbol,
            "decimals": chain.decimals,
        },
        "rpcUrls": [chain.rpc_url],
        "blockExplorerUrls": [chain.explorer_url],
    }])
}

/// Make `chain` the wallet's active chain, adding it if the wallet does not
/// know it yet.
pub async fn ensure_chain(
    wallet: &dyn WalletProvider,
    chain: &ChainConfig,
) -> Result<ChainSwitch, WalletError> {
    if current_chain_id(wallet).await? == chain.chain_id {
        debug!(chain_id = chain.chain_id, "Wallet already on target chain");
        return Ok(ChainSwitch::AlreadyActive);
    }

    let switch = wallet
        .request(
            "wallet_switchEthereumChain",
            json!([{ "chainId": chain.chain_id_hex() }]),
        )
        .await
        .map_err(WalletError::classified);

    match switch {
        Ok(_) => {
            info!(chain_id = chain.chain_id, "Switched wallet chain");
            Ok(ChainSwitch::Switched)
        }
        Err(WalletError::UnrecognizedChain { .. }) => {
            wallet
                .request("wallet_addEthereumChain", add_chain_params(chain))
                .await?;
            info!(chain_id = chain.chain_id, name = %chain.chain_name, "Added chain to wallet");
            Ok(ChainSwitch::Added)
        }
        Err(e) => Err(e),
    }
}
