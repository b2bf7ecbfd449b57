//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Default API base URL for the Helios testnet portal.
pub const DEFAULT_API_URL: &str = "https://testnet-api.helioschain.network/api";

/// Parameters handed to `wallet_addEthereumChain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub chain_name: String,
    pub currency_name: String,
    pub currency_symbol: String,
    pub decimals: u8,
    pub rpc_url: String,
    pub explorer_url: String,
}

impl ChainConfig {
    /// Chain id in the `0x`-prefixed hex form wallets expect.
    pub fn chain_id_hex(&self) -> String {
        format!("{:#x}", self.chain_id)
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: 42000,
            chain_name: "Helios Testnet".to_string(),
            currency_name: "Helios".to_string(),
            currency_symbol: "HLS".to_string(),
            decimals: 18,
            rpc_url: "https://testnet1.helioschainlabs.org".to_string(),
            explorer_url: "https://explorer.helioschainlabs.org".to_string(),
        }
    }
}

/// Backoff schedule for out-of-band link polling.
#[derive(Debug, Clone, PartialEq)]
pub struct PollConfig {
    /// First wait between polls.
    pub base_interval: Duration,
    /// Growth factor applied after every unsuccessful poll.
    pub backoff_factor: f64,
    /// Upper bound for a single wait.
    pub max_interval: Duration,
    /// Give up after this long.
    pub max_duration: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(5),
            backoff_factor: 1.5,
            max_interval: Duration::from_secs(30),
            max_duration: Duration::from_secs(300), // 5 minutes
        }
    }
}

/// Portal client configuration.
#[derive(Debug, Clone)]
pub struct PortalConfig {
    /// Base URL of the remote portal API (no trailing slash).
    pub api_url: String,
    /// File backing the durable token store.
    pub token_path: PathBuf,
    /// Chain the add-network step targets.
    pub chain: ChainConfig,
    /// Window used to collapse connect/disconnect flicker.
    pub connection_debounce: Duration,
    pub poll: PollConfig,
    /// Port for the local session API.
    pub http_port: u16,
    /// Wallet address to restore on boot, when no wallet adapter is attached.
    pub wallet: Option<String>,
    /// URL the user landed on; its `ref` query parameter is the referral code.
    pub landing_url: Option<String>,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            token_path: default_token_path(),
            chain: ChainConfig::default(),
            connection_debounce: Duration::from_millis(500),
            poll: PollConfig::default(),
            http_port: 8080,
            wallet: None,
            landing_url: None,
        }
    }
}

impl PortalConfig {
    /// Build config from environment variables, falling back to defaults
    /// for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let api_url = std::env::var("HELIOS_API_URL")
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or(defaults.api_url);

        let token_path = std::env::var("HELIOS_TOKEN_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.token_path);

        let mut chain = defaults.chain;
        if let Some(id) = env_parse::<u64>("HELIOS_CHAIN_ID") {
            chain.chain_id = id;
        }
        if let Ok(rpc) = std::env::var("HELIOS_RPC_URL") {
            chain.rpc_url = rpc;
        }
        if let Ok(explorer) = std::env::var("HELIOS_EXPLORER_URL") {
            chain.explorer_url = explorer;
        }

        let connection_debounce = env_parse::<u64>("HELIOS_DEBOUNCE_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.connection_debounce);

        let mut poll = defaults.poll;
        if let Some(secs) = env_parse::<u64>("HELIOS_POLL_INTERVAL_SECS") {
            poll.base_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("HELIOS_POLL_MAX_SECS") {
            poll.max_duration = Duration::from_secs(secs);
        }

        let http_port = env_parse::<u16>("HELIOS_HTTP_PORT").unwrap_or(defaults.http_port);

        let wallet = std::env::var("HELIOS_WALLET")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let landing_url = std::env::var("HELIOS_LANDING_URL")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Self {
            api_url,
            token_path,
            chain,
            connection_debounce,
            poll,
            http_port,
            wallet,
            landing_url,
        }
    }

    /// Reject values that would only fail later at request time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        reqwest::Url::parse(&self.api_url).map_err(|e| ConfigError::InvalidValue {
            key: "HELIOS_API_URL".to_string(),
            message: e.to_string(),
        })?;
        if self.poll.backoff_factor < 1.0 {
            return Err(ConfigError::InvalidValue {
                key: "poll.backoff_factor".to_string(),
                message: format!("must be >= 1.0, got {}", self.poll.backoff_factor),
            });
        }
        if self.poll.base_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "HELIOS_POLL_INTERVAL_SECS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn default_token_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".helios-portal/storage.json")
}
