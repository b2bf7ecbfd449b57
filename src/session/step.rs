//! Wizard position: which screen the portal is showing.

use serde::{Deserialize, Serialize};

/// The screens of the portal, in the order a user walks through them.
///
/// Each variant keeps a stable numeric code (the UI routes on it):
/// Unauthenticated → Splash → Welcome → AddNetwork → ClaimFaucet →
/// MintNft → Completion → Dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum WizardStep {
    /// Connect-wallet screen.
    Unauthenticated = 0,
    /// Reserved transition screen.
    Splash = 1,
    /// First onboarding screen, nothing completed yet.
    Welcome = 2,
    AddNetwork = 3,
    ClaimFaucet = 4,
    MintNft = 5,
    /// Onboarding done, pending XP is shown once.
    Completion = 6,
    Dashboard = 7,
}

impl WizardStep {
    pub const ALL: [WizardStep; 8] = [
        Self::Unauthenticated,
        Self::Splash,
        Self::Welcome,
        Self::AddNetwork,
        Self::ClaimFaucet,
        Self::MintNft,
        Self::Completion,
        Self::Dashboard,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    /// The screen after this one, if any.
    pub fn next(self) -> Option<WizardStep> {
        Self::from_code(self.code() + 1)
    }

    /// Whether this screen is only reachable with a signed-in user.
    pub fn requires_user(self) -> bool {
        self >= Self::Welcome
    }

    /// Whether this is one of the onboarding screens.
    pub fn is_onboarding(self) -> bool {
        (Self::Welcome..=Self::Completion).contains(&self)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Dashboard)
    }

    /// Steps only move forward; going back happens through a reset.
    pub fn can_transition_to(self, target: WizardStep) -> bool {
        target > self
    }
}

impl Default for WizardStep {
    fn default() -> Self {
        Self::Unauthenticated
    }
}

impl From<WizardStep> for u8 {
    fn from(step: WizardStep) -> Self {
        step.code()
    }
}

impl TryFrom<u8> for WizardStep {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::from_code(code).ok_or_else(|| format!("unknown wizard step code {code}"))
    }
}

impl std::fmt::Display for WizardStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Splash => "splash",
            Self::Welcome => "welcome",
            Self::AddNetwork => "add_network",
            Self::ClaimFaucet => "claim_faucet",
            Self::MintNft => "mint_nft",
            Self::Completion => "completion",
            Self::Dashboard => "dashboard",
        };
        write!(f, "{s}")
    }
}
