//! Remote portal API.
//!
//! The portal server owns XP, faucet payouts, referral quotas and
//! onboarding records. This module is only its client-side interface: the
//! `PortalApi` trait the orchestrator and step executors are written
//! against, and `HttpPortalApi`, the reqwest implementation.

pub mod http;
pub mod model;

pub use http::HttpPortalApi;
pub use model::{
    AuthResponse, ClaimRewardResponse, ConfirmRequest, OnboardingProgress, RegisterRequest, User,
};

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::PortalConfig;
use crate::error::{ApiError, ConfigError};
use crate::onboarding::StepKey;
use crate::storage::AuthToken;

/// Client-side contract of the portal API.
///
/// Register, login and confirm are unauthenticated; everything else takes
/// the bearer token.
#[async_trait]
pub trait PortalApi: Send + Sync {
    /// `POST /users/register`
    async fn register(&self, request: &RegisterRequest) -> Result<AuthResponse, ApiError>;

    /// `POST /users/login`
    async fn login(&self, wallet: &str, signature: &str) -> Result<AuthResponse, ApiError>;

    /// `POST /users/confirm`
    async fn confirm(&self, request: &ConfirmRequest) -> Result<AuthResponse, ApiError>;

    /// `GET /users/profile/{wallet}`
    async fn profile(&self, token: &AuthToken, wallet: &str) -> Result<User, ApiError>;

    /// `GET /users/onboarding/progress`
    async fn onboarding_progress(&self, token: &AuthToken) -> Result<OnboardingProgress, ApiError>;

    /// `POST /users/onboarding/start`
    async fn start_step(&self, token: &AuthToken, step: StepKey) -> Result<(), ApiError>;

    /// `POST /users/onboarding/complete`
    async fn complete_step(
        &self,
        token: &AuthToken,
        step: StepKey,
        evidence: &str,
    ) -> Result<(), ApiError>;

    /// `POST /users/onboarding/claim-reward`
    async fn claim_reward(
        &self,
        token: &AuthToken,
        reward_type: &str,
    ) -> Result<ClaimRewardResponse, ApiError>;
}

/// Create the HTTP API client from configuration.
pub fn create_client(config: &PortalConfig) -> Result<Arc<dyn PortalApi>, ConfigError> {
    config.validate()?;
    tracing::info!(api_url = %config.api_url, "Using Helios portal API");
    Ok(Arc::new(HttpPortalApi::new(&config.api_url)))
}
