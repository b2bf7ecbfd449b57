//! Onboarding step catalog and per-step execution state.

use serde::{Deserialize, Serialize};

use crate::error::ProgressError;
use crate::session::WizardStep;

/// One bootstrap task. Declaration order is catalog order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKey {
    AddHeliosNetwork,
    ClaimFromFaucet,
    MintEarlyBirdNft,
}

/// Every step, in the order the wizard presents them.
pub const CATALOG: [StepKey; 3] = [
    StepKey::AddHeliosNetwork,
    StepKey::ClaimFromFaucet,
    StepKey::MintEarlyBirdNft,
];

impl StepKey {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AddHeliosNetwork => "add_helios_network",
            Self::ClaimFromFaucet => "claim_from_faucet",
            Self::MintEarlyBirdNft => "mint_early_bird_nft",
        }
    }

    /// Parse a key reported by the server. Unknown keys are an error.
    pub fn parse(key: &str) -> Result<Self, ProgressError> {
        CATALOG
            .into_iter()
            .find(|k| k.as_str() == key)
            .ok_or_else(|| ProgressError::UnknownStepKey(key.to_string()))
    }

    pub fn catalog_index(self) -> usize {
        self as usize
    }

    /// Wizard screen where this step is performed.
    pub fn phase(self) -> WizardStep {
        match self {
            Self::AddHeliosNetwork => WizardStep::AddNetwork,
            Self::ClaimFromFaucet => WizardStep::ClaimFaucet,
            Self::MintEarlyBirdNft => WizardStep::MintNft,
        }
    }

    /// Evidence tag sent with the completion call.
    pub fn evidence(self) -> &'static str {
        match self {
            Self::AddHeliosNetwork => "network_added",
            Self::ClaimFromFaucet => "faucet_claimed",
            Self::MintEarlyBirdNft => "nft_minted",
        }
    }

    /// XP credited to the pending counter when the step completes.
    pub fn xp_reward(self) -> u64 {
        match self {
            Self::AddHeliosNetwork => 50,
            Self::ClaimFromFaucet => 100,
            Self::MintEarlyBirdNft => 150,
        }
    }

    /// The last step triggers the one-time reward claim.
    pub fn is_final(self) -> bool {
        matches!(self, Self::MintEarlyBirdNft)
    }
}

impl std::fmt::Display for StepKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StepKey {
    type Err = ProgressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Where a single step is in its client-side protocol.
///
/// Progresses linearly: NotStarted → Started → EffectApplied → Completed.
/// A failed effect leaves the step at `Started` so a retry goes straight
/// back to the effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    #[default]
    NotStarted,
    Started,
    EffectApplied,
    Completed,
}

impl StepState {
    pub fn can_transition_to(&self, target: StepState) -> bool {
        use StepState::*;
        matches!(
            (self, target),
            (NotStarted, Started)
                | (Started, EffectApplied)
                | (EffectApplied, Completed)
                // Server already has it done: idempotency probe short-circuit.
                | (NotStarted, Completed)
                | (Started, Completed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl std::fmt::Display for StepState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotStarted => "not_started",
            Self::Started => "started",
            Self::EffectApplied => "effect_applied",
            Self::Completed => "completed",
        };
        write!(f, "{s}")
    }
}
