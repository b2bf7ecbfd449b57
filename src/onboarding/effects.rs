//! External side effects performed by the onboarding steps.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::step::StepKey;
use crate::config::ChainConfig;
use crate::error::WalletError;
use crate::wallet::{WalletProvider, ensure_chain};

/// The action a step performs before reporting completion.
#[async_trait]
pub trait StepEffect: Send + Sync {
    fn key(&self) -> StepKey;

    async fn apply(&self) -> Result<(), WalletError>;
}

/// Add (or switch to) the Helios chain in the user's wallet.
pub struct AddNetworkEffect {
    wallet: Arc<dyn WalletProvider>,
    chain: ChainConfig,
}

impl AddNetworkEffect {
    pub fn new(wallet: Arc<dyn WalletProvider>, chain: ChainConfig) -> Self {
        Self { wallet, chain }
    }
}

#[async_trait]
impl StepEffect for AddNetworkEffect {
    fn key(&self) -> StepKey {
        StepKey::AddHeliosNetwork
    }

    async fn apply(&self) -> Result<(), WalletError> {
        if !self.wallet.is_connected() {
            return Err(WalletError::NotConnected);
        }
        let outcome = ensure_chain(self.wallet.as_ref(), &self.chain).await?;
        info!(outcome = ?outcome, chain_id = self.chain.chain_id, "Helios network ready in wallet");
        Ok(())
    }
}

/// Steps whose effect happens on the server as part of completion
/// (faucet payout, NFT mint). Nothing to do client-side.
pub struct ServerSideEffect {
    key: StepKey,
}

impl ServerSideEffect {
    pub fn new(key: StepKey) -> Self {
        Self { key }
    }
}

#[async_trait]
impl StepEffect for ServerSideEffect {
    fn key(&self) -> StepKey {
        self.key
    }

    async fn apply(&self) -> Result<(), WalletError> {
        Ok(())
    }
}

/// Default effects for every catalog step.
pub fn default_effects(
    wallet: Arc<dyn WalletProvider>,
    chain: ChainConfig,
) -> Vec<Arc<dyn StepEffect>> {
    vec![
        Arc::new(AddNetworkEffect::new(wallet, chain)),
        Arc::new(ServerSideEffect::new(StepKey::ClaimFromFaucet)),
        Arc::new(ServerSideEffect::new(StepKey::MintEarlyBirdNft)),
    ]
}
