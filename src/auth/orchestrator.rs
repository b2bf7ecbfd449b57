//! AuthOrchestrator: turns a connected wallet into an authenticated
//! session.
//!
//! Order of attempts, stopping at the first success:
//! 1. Stored token still valid for this wallet (no signature needed).
//! 2. Sign the challenge.
//! 3. Register with the referral code from the navigation context.
//! 4. Log in; an unconfirmed account parks the wallet in the invite flow,
//!    unless a referral code can confirm it on the spot.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::challenge::sign_challenge;
use crate::api::{AuthResponse, ConfirmRequest, PortalApi, RegisterRequest, User};
use crate::error::{ApiError, AuthError, SessionError};
use crate::onboarding::resolve_reported;
use crate::session::{PendingInvite, ResetReason, SessionStore, SessionUpdate, WizardStep};
use crate::storage::{AuthToken, TokenStore};
use crate::wallet::{WalletProvider, is_valid_address};

/// Query parameters that carry a referral code.
const REFERRAL_QUERY_KEYS: [&str; 3] = ["ref", "referral", "referralCode"];

/// How an authentication call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AuthOutcome {
    /// Stored token accepted; no signature was requested.
    Restored { step: WizardStep },
    Registered { step: WizardStep },
    LoggedIn { step: WizardStep },
    Confirmed { step: WizardStep },
    /// Confirmation was already done earlier; treated as success.
    AlreadyConfirmed { step: WizardStep },
    /// Account exists but needs an invite code.
    InviteRequired { signed: bool },
    /// Another authentication for this wallet is still running.
    AlreadyInFlight,
    /// Nothing to restore.
    NoSession,
}

impl AuthOutcome {
    pub fn step(&self) -> Option<WizardStep> {
        match self {
            Self::Restored { step }
            | Self::Registered { step }
            | Self::LoggedIn { step }
            | Self::Confirmed { step }
            | Self::AlreadyConfirmed { step } => Some(*step),
            _ => None,
        }
    }
}

pub struct AuthOrchestrator {
    api: Arc<dyn PortalApi>,
    wallet: Arc<dyn WalletProvider>,
    tokens: Arc<dyn TokenStore>,
    session: Arc<SessionStore>,
    referral_code: RwLock<Option<String>>,
    in_flight: Mutex<HashSet<String>>,
}

impl AuthOrchestrator {
    pub fn new(
        api: Arc<dyn PortalApi>,
        wallet: Arc<dyn WalletProvider>,
        tokens: Arc<dyn TokenStore>,
        session: Arc<SessionStore>,
    ) -> Self {
        Self {
            api,
            wallet,
            tokens,
            session,
            referral_code: RwLock::new(None),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn wallet(&self) -> &Arc<dyn WalletProvider> {
        &self.wallet
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    /// Remember the referral code from the page the user arrived on.
    pub fn set_referral_code(&self, code: Option<String>) {
        let code = code.map(|c| c.trim().to_string()).filter(|c| !c.is_empty());
        if let Ok(mut slot) = self.referral_code.write() {
            *slot = code;
        }
    }

    /// Take the referral code from the URL the user landed on. A URL
    /// without one clears any earlier code.
    pub fn set_landing_url(&self, url: &str) -> Option<String> {
        let code = referral_from_url(url);
        debug!(referral = ?code, "Landing URL recorded");
        self.set_referral_code(code);
        self.referral_code()
    }

    pub fn referral_code(&self) -> Option<String> {
        self.referral_code.read().ok().and_then(|c| c.clone())
    }

    /// Authenticate the connected wallet `address`.
    pub async fn authenticate(&self, address: &str) -> Result<AuthOutcome, AuthError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(AuthError::InvalidAddress(address.to_string()));
        }
        if !self.wallet.is_connected() {
            return Err(AuthError::WalletNotConnected);
        }
        if !is_valid_address(address) {
            warn!(wallet = %address, "Address does not look like an EVM address");
        }

        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, address) else {
            debug!(wallet = %address, "Authentication already in flight");
            return Ok(AuthOutcome::AlreadyInFlight);
        };

        let current = self.session.current().await;
        if current.is_authenticated() {
            if current.wallet().is_some_and(|w| w.eq_ignore_ascii_case(address)) {
                debug!(wallet = %address, "Session already authenticated for this wallet");
                return Ok(AuthOutcome::Restored { step: current.step });
            }
            info!(wallet = %address, "Wallet account changed, ending previous session");
            self.end_session(ResetReason::AccountChanged).await?;
        }
        let epoch = self.session.epoch().await;

        // 1. Stored token.
        if let Some(token) = self.tokens.load().await? {
            match self.api.profile(&token, address).await {
                Ok(user) => {
                    let step = self.populate(epoch, user, token).await?;
                    info!(wallet = %address, step = %step, "Session restored from stored token");
                    return Ok(AuthOutcome::Restored { step });
                }
                Err(ApiError::Network(message)) => {
                    warn!(error = %message, "Could not validate stored token");
                    return Err(AuthError::NetworkError(message));
                }
                Err(e) => {
                    info!(wallet = %address, error = %e, "Stored token rejected, signing in again");
                    self.tokens.clear().await?;
                }
            }
        }

        // 2. Signature.
        let signature = sign_challenge(self.wallet.as_ref(), address).await?;
        self.ensure_still_current(address, epoch).await?;

        // 3. Registration with referral.
        let referral = self.referral_code();
        if let Some(code) = referral.as_deref() {
            let request = RegisterRequest {
                wallet: address.to_string(),
                signature: signature.clone(),
                invite_code: Some(code.to_string()),
            };
            match self.api.register(&request).await {
                Ok(response) if response.usable_token().is_some() => {
                    let step = self.finish_auth(epoch, address, response).await?;
                    info!(wallet = %address, step = %step, "Registered with referral code");
                    return Ok(AuthOutcome::Registered { step });
                }
                Ok(_) => debug!(wallet = %address, "Registration returned no token"),
                Err(e) => debug!(wallet = %address, error = %e, "Registration with referral failed"),
            }
        }

        // 4. Login.
        match self.api.login(address, &signature).await {
            Ok(response) if response.requires_invite_code => {
                self.require_invite(epoch, address, signature).await
            }
            Ok(response) => {
                let step = self.finish_auth(epoch, address, response).await?;
                info!(wallet = %address, step = %step, "Logged in");
                Ok(AuthOutcome::LoggedIn { step })
            }
            Err(ApiError::Network(message)) => Err(AuthError::NetworkError(message)),
            Err(e) if is_unconfirmed(&e) => self.require_invite(epoch, address, signature).await,
            Err(e) => {
                debug!(wallet = %address, error = %e, "Login failed");
                if let Some(code) = referral {
                    let request = ConfirmRequest {
                        wallet: address.to_string(),
                        signature: signature.clone(),
                        invite_code: code,
                    };
                    match self.api.confirm(&request).await {
                        Ok(response) => {
                            let step = self.finish_auth(epoch, address, response).await?;
                            info!(wallet = %address, step = %step, "Confirmed with referral code");
                            return Ok(AuthOutcome::Confirmed { step });
                        }
                        Err(ApiError::Network(message)) => {
                            return Err(AuthError::NetworkError(message));
                        }
                        Err(e) => debug!(wallet = %address, error = %e, "Referral confirmation failed"),
                    }
                }
                self.require_invite(epoch, address, signature).await
            }
        }
    }

    /// Finish a pending invite with the code the user entered.
    pub async fn confirm_with_invite(&self, code: &str) -> Result<AuthOutcome, AuthError> {
        let session = self.session.current().await;
        let epoch = session.epoch;
        let Some(mut invite) = session.pending_invite.clone() else {
            if session.is_authenticated() {
                return Ok(AuthOutcome::AlreadyConfirmed { step: session.step });
            }
            return Err(AuthError::NoPendingInvite);
        };

        let code = code.trim();
        if code.is_empty() {
            return Err(AuthError::InvalidInviteCode("Enter an invite code.".to_string()));
        }
        self.session
            .apply_in(epoch, SessionUpdate::RecordInviteCode(code.to_string()))
            .await?;

        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, &invite.wallet) else {
            return Ok(AuthOutcome::AlreadyInFlight);
        };

        let signature = match invite.signature.clone() {
            Some(signature) => signature,
            None => {
                let signature = sign_challenge(self.wallet.as_ref(), &invite.wallet).await?;
                self.ensure_still_current(&invite.wallet, epoch).await?;
                invite.signature = Some(signature.clone());
                invite.last_code = Some(code.to_string());
                self.session
                    .apply_in(epoch, SessionUpdate::RequireInvite(invite.clone()))
                    .await?;
                signature
            }
        };

        let request = ConfirmRequest {
            wallet: invite.wallet.clone(),
            signature: signature.clone(),
            invite_code: code.to_string(),
        };
        match self.api.confirm(&request).await {
            Ok(response) => {
                let step = self.finish_auth(epoch, &invite.wallet, response).await?;
                info!(wallet = %invite.wallet, step = %step, "Invite code accepted");
                Ok(AuthOutcome::Confirmed { step })
            }
            Err(ApiError::Network(message)) => Err(AuthError::NetworkError(message)),
            Err(e) if e.message_contains("already confirmed") => {
                info!(wallet = %invite.wallet, "Account already confirmed, logging in");
                let response = self.api.login(&invite.wallet, &signature).await?;
                let step = self.finish_auth(epoch, &invite.wallet, response).await?;
                Ok(AuthOutcome::AlreadyConfirmed { step })
            }
            Err(e) => {
                warn!(wallet = %invite.wallet, error = %e, "Invite code rejected");
                Err(AuthError::InvalidInviteCode(e.user_message()))
            }
        }
    }

    /// Cold boot: rebuild the session from the stored token.
    ///
    /// Ends with either the same wallet's user in the session or a fully
    /// cleared session and token.
    pub async fn restore_session(&self) -> Result<AuthOutcome, AuthError> {
        let Some(token) = self.tokens.load().await? else {
            debug!("No stored token");
            return Ok(AuthOutcome::NoSession);
        };
        let Some(address) = self.wallet.address().filter(|a| !a.trim().is_empty()) else {
            debug!("Stored token present but no wallet address known yet");
            return Ok(AuthOutcome::NoSession);
        };

        let epoch = self.session.epoch().await;
        match self.api.profile(&token, &address).await {
            Ok(user) => {
                let step = self.populate(epoch, user, token).await?;
                info!(wallet = %address, step = %step, "Session restored");
                Ok(AuthOutcome::Restored { step })
            }
            Err(ApiError::Network(message)) => Err(AuthError::NetworkError(message)),
            Err(e) => {
                info!(wallet = %address, error = %e, "Stored token no longer valid");
                self.end_session(ResetReason::TokenRejected).await?;
                Ok(AuthOutcome::NoSession)
            }
        }
    }

    pub async fn logout(&self) -> Result<(), AuthError> {
        self.end_session(ResetReason::Logout).await
    }

    /// Clear the durable token and reset the session.
    pub async fn end_session(&self, reason: ResetReason) -> Result<(), AuthError> {
        self.tokens.clear().await?;
        self.session.reset(reason).await;
        Ok(())
    }

    pub async fn abandon_invite(&self) -> Result<(), AuthError> {
        self.session.apply(SessionUpdate::ClearInvite).await?;
        Ok(())
    }

    /// Re-fetch the current user. A rejected token ends the session.
    pub async fn refresh_profile(&self) -> Result<Option<User>, AuthError> {
        let session = self.session.current().await;
        let (Some(token), Some(wallet)) = (session.auth_token.clone(), session.wallet()) else {
            return Ok(None);
        };
        match self.api.profile(&token, wallet).await {
            Ok(user) => {
                self.session
                    .apply_in(session.epoch, SessionUpdate::RefreshUser(user.clone()))
                    .await?;
                Ok(Some(user))
            }
            Err(e) if e.is_unauthorized() => {
                info!(wallet = %wallet, "Token rejected during profile refresh");
                self.end_session(ResetReason::TokenRejected).await?;
                Err(AuthError::from(e))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Token from a login/register/confirm response → populated session,
    /// then persist the token.
    async fn finish_auth(
        &self,
        epoch: u64,
        address: &str,
        response: AuthResponse,
    ) -> Result<WizardStep, AuthError> {
        let Some(token) = response.usable_token().map(AuthToken::new) else {
            return Err(AuthError::AuthenticationFailed(
                response
                    .message
                    .unwrap_or_else(|| "Server did not return a session token".to_string()),
            ));
        };
        let user = match response.user {
            Some(user) => user,
            None => self.api.profile(&token, address).await?,
        };
        let step = self.populate(epoch, user, token.clone()).await?;
        self.tokens.save(&token).await?;
        Ok(step)
    }

    /// Resolve the wizard step and install user + token in one update.
    async fn populate(
        &self,
        epoch: u64,
        user: User,
        token: AuthToken,
    ) -> Result<WizardStep, AuthError> {
        let step = match self.api.onboarding_progress(&token).await {
            Ok(progress) => resolve_reported(&progress.completed_steps)?,
            Err(e) => {
                warn!(error = %e, "Progress fetch failed, using profile steps");
                resolve_reported(&user.completed_steps)?
            }
        };
        let snapshot = self
            .session
            .apply_in(epoch, SessionUpdate::Authenticate { user, token, step })
            .await?;
        Ok(snapshot.step)
    }

    async fn require_invite(
        &self,
        epoch: u64,
        address: &str,
        signature: String,
    ) -> Result<AuthOutcome, AuthError> {
        self.session
            .apply_in(
                epoch,
                SessionUpdate::RequireInvite(PendingInvite::new(address, Some(signature))),
            )
            .await?;
        Ok(AuthOutcome::InviteRequired { signed: true })
    }

    /// After a suspension: the wallet must still be connected to `address`
    /// and no reset may have happened.
    async fn ensure_still_current(&self, address: &str, epoch: u64) -> Result<(), AuthError> {
        let same_account = self
            .wallet
            .address()
            .is_some_and(|a| a.eq_ignore_ascii_case(address));
        if !self.wallet.is_connected() || !same_account {
            warn!(wallet = %address, "Wallet disconnected while waiting for signature");
            return Err(AuthError::WalletNotConnected);
        }
        let actual = self.session.epoch().await;
        if actual != epoch {
            return Err(SessionError::Stale {
                expected: epoch,
                actual,
            }
            .into());
        }
        Ok(())
    }
}

/// Pull a referral code out of a landing-page URL.
pub fn referral_from_url(url: &str) -> Option<String> {
    let url = reqwest::Url::parse(url).ok()?;
    url.query_pairs()
        .find(|(k, v)| REFERRAL_QUERY_KEYS.contains(&k.as_ref()) && !v.trim().is_empty())
        .map(|(_, v)| v.trim().to_string())
}

/// "Account exists but is not confirmed" answers from login.
fn is_unconfirmed(e: &ApiError) -> bool {
    e.status() == Some(403) || e.message_contains("not confirmed")
}

struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    key: String,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(set: &'a Mutex<HashSet<String>>, address: &str) -> Option<Self> {
        let key = address.to_lowercase();
        let mut guard = set.lock().ok()?;
        if !guard.insert(key.clone()) {
            return None;
        }
        Some(Self { set, key })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.key);
        }
    }
}
