//! Error types for the Helios portal client.

/// Shown when neither the wallet nor the server gave us anything better.
pub const GENERIC_FAILURE_MESSAGE: &str = "Something went wrong. Please try again.";

/// Shown when the user declines a wallet prompt.
pub const SIGNATURE_REJECTED_MESSAGE: &str =
    "You declined the signature request in your wallet. Sign the message to continue.";

/// Top-level error type for the portal client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Onboarding step error: {0}")]
    Step(#[from] StepError),

    #[error("Onboarding progress error: {0}")]
    Progress(#[from] ProgressError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Link polling error: {0}")]
    Link(#[from] LinkError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Remote API errors.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request never produced an HTTP response.
    #[error("Network request failed: {0}")]
    Network(String),

    #[error("Unauthorized: {}", message.as_deref().unwrap_or("token rejected"))]
    Unauthorized { message: Option<String> },

    #[error("Server returned {status}: {}", message.as_deref().unwrap_or("no message"))]
    Status { status: u16, message: Option<String> },

    #[error("Invalid response from server: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// The message the server put in its error body, if any.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            Self::Unauthorized { message } | Self::Status { message, .. } => message.as_deref(),
            Self::Network(_) | Self::InvalidResponse(_) => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized { .. } => Some(401),
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// Case-insensitive substring match against the server message.
    pub fn message_contains(&self, needle: &str) -> bool {
        self.server_message()
            .map(|m| m.to_lowercase().contains(&needle.to_lowercase()))
            .unwrap_or(false)
    }

    /// Server message verbatim, or the generic fallback.
    pub fn user_message(&self) -> String {
        match self {
            Self::Network(_) => "Unable to reach the Helios portal. Check your connection and try again.".to_string(),
            _ => self
                .server_message()
                .unwrap_or(GENERIC_FAILURE_MESSAGE)
                .to_string(),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::InvalidResponse(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

/// Wallet provider errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WalletError {
    #[error("User rejected the wallet request: {message}")]
    UserRejected { code: Option<i64>, message: String },

    #[error("Wallet is not connected")]
    NotConnected,

    #[error("Chain {chain_id} is not known to the wallet")]
    UnrecognizedChain { chain_id: String },

    #[error("Wallet RPC {method} failed ({code}): {message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },

    #[error("Wallet provider unavailable: {0}")]
    Unavailable(String),
}

impl WalletError {
    /// Re-read a raw provider error by its code and message.
    pub fn classified(self) -> Self {
        match self {
            Self::Rpc {
                method,
                code,
                message,
            } => crate::wallet::classify_rpc_error(&method, code, &message),
            other => other,
        }
    }

    pub fn is_user_rejection(&self) -> bool {
        match self {
            Self::UserRejected { .. } => true,
            Self::Rpc { code, message, .. } => {
                *code == crate::wallet::USER_REJECTED_CODE
                    || crate::wallet::is_rejection_message(message)
            }
            _ => false,
        }
    }
}

/// Authentication errors surfaced to the UI.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Signature request rejected by the user")]
    UserRejectedSignature,

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Invalid invite code: {0}")]
    InvalidInviteCode(String),

    #[error("Wallet is not connected")]
    WalletNotConnected,

    #[error("Invalid wallet address: {0:?}")]
    InvalidAddress(String),

    #[error("No invite confirmation is pending")]
    NoPendingInvite,

    #[error("Wallet error: {0}")]
    Wallet(WalletError),

    #[error("Token storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Onboarding progress error: {0}")]
    Progress(#[from] ProgressError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

impl AuthError {
    /// Whether the user can simply try again.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Progress(_) | Self::Storage(_))
    }

    /// Text suitable for rendering inline next to the triggering action.
    pub fn user_message(&self) -> String {
        match self {
            Self::UserRejectedSignature => SIGNATURE_REJECTED_MESSAGE.to_string(),
            Self::AuthenticationFailed(msg) | Self::InvalidInviteCode(msg) => msg.clone(),
            Self::NetworkError(_) => {
                "Unable to reach the Helios portal. Check your connection and try again.".to_string()
            }
            Self::WalletNotConnected => "Connect your wallet to continue.".to_string(),
            Self::InvalidAddress(_) => "The connected wallet address is not valid.".to_string(),
            Self::NoPendingInvite => "Connect your wallet before entering an invite code.".to_string(),
            Self::Wallet(_) | Self::Storage(_) | Self::Progress(_) | Self::Session(_) => {
                GENERIC_FAILURE_MESSAGE.to_string()
            }
        }
    }
}

impl From<ApiError> for AuthError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::Network(msg) => Self::NetworkError(msg),
            other => Self::AuthenticationFailed(other.user_message()),
        }
    }
}

impl From<WalletError> for AuthError {
    fn from(e: WalletError) -> Self {
        match e.classified() {
            WalletError::UserRejected { .. } => Self::UserRejectedSignature,
            WalletError::NotConnected => Self::WalletNotConnected,
            other => Self::Wallet(other),
        }
    }
}

/// Onboarding step execution errors.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("User rejected the wallet request for step {step}")]
    UserRejected { step: String },

    #[error("Server rejected step {step}: {message}")]
    ServerRejectedStep { step: String, message: String },

    #[error("Network error during step {step}: {message}")]
    Network { step: String, message: String },

    #[error("Wallet error during step {step}: {source}")]
    Wallet {
        step: String,
        #[source]
        source: WalletError,
    },

    #[error("No authenticated session")]
    NotAuthenticated,

    #[error("Session was reset while step {step} was running")]
    SessionReset { step: String },

    #[error("Onboarding progress error: {0}")]
    Progress(#[from] ProgressError),
}

impl StepError {
    pub fn user_message(&self) -> String {
        match self {
            Self::UserRejected { .. } => {
                "You declined the request in your wallet. Approve it to continue.".to_string()
            }
            Self::ServerRejectedStep { message, .. } => message.clone(),
            Self::Network { .. } => {
                "Unable to reach the Helios portal. Check your connection and try again.".to_string()
            }
            _ => GENERIC_FAILURE_MESSAGE.to_string(),
        }
    }
}

/// Errors mapping server progress onto the wizard.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProgressError {
    #[error("Unknown onboarding step key reported by server: {0}")]
    UnknownStepKey(String),
}

/// Durable token storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Session store errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Session invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Session epoch changed from {expected} to {actual}")]
    Stale { expected: u64, actual: u64 },
}

/// Out-of-band link polling errors.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Session ended while waiting for the account link")]
    SessionEnded,

    #[error("Link polling failed: {0}")]
    Api(#[from] ApiError),
}

/// Result type alias for the portal client.
pub type Result<T> = std::result::Result<T, Error>;
