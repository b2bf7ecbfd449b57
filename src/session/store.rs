//! Session store: the single source of truth for UI branching.
//!
//! All writes go through [`SessionStore::apply`] (or the epoch-checked
//! [`SessionStore::apply_in`]), which validates the resulting state before
//! committing it and broadcasts the change to subscribers. A rejected
//! update leaves the previous snapshot untouched.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info, warn};

use super::step::WizardStep;
use crate::api::User;
use crate::error::SessionError;
use crate::storage::AuthToken;

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 64;

/// Held while an account must supply an invite code before it is finalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingInvite {
    pub wallet: String,
    /// Retained login signature; `None` when identity was established
    /// without one and confirmation must sign first.
    #[serde(skip)]
    pub signature: Option<String>,
    /// Last code the user entered, kept across failed attempts.
    pub last_code: Option<String>,
}

impl PendingInvite {
    pub fn new(wallet: impl Into<String>, signature: Option<String>) -> Self {
        Self {
            wallet: wallet.into(),
            signature,
            last_code: None,
        }
    }

    pub fn has_signature(&self) -> bool {
        self.signature.is_some()
    }
}

/// Client session state.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub step: WizardStep,
    pub user: Option<User>,
    pub auth_token: Option<AuthToken>,
    pub pending_invite: Option<PendingInvite>,
    /// XP earned during onboarding, not yet shown to the user.
    pub pending_xp: u64,
    /// Bumped on every reset.
    pub epoch: u64,
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some() && self.auth_token.as_ref().is_some_and(|t| !t.is_empty())
    }

    pub fn wallet(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.wallet.as_str())
    }

    /// Check the cross-field invariants.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.user.is_some() && self.auth_token.as_ref().is_none_or(|t| t.is_empty()) {
            return Err(SessionError::InvariantViolation(
                "user is set without an auth token".to_string(),
            ));
        }
        if self.step.requires_user() && self.user.is_none() {
            return Err(SessionError::InvariantViolation(format!(
                "step {} requires a user",
                self.step
            )));
        }
        if self.pending_invite.is_some()
            && (self.user.is_some() || self.step != WizardStep::Unauthenticated)
        {
            return Err(SessionError::InvariantViolation(
                "pending invite on an authenticated session".to_string(),
            ));
        }
        Ok(())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            step: self.step,
            authenticated: self.is_authenticated(),
            user: self.user.clone(),
            pending_invite: self.pending_invite.clone(),
            pending_xp: self.pending_xp,
            epoch: self.epoch,
        }
    }
}

/// Serializable, token-free view of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub step: WizardStep,
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_invite: Option<PendingInvite>,
    pub pending_xp: u64,
    pub epoch: u64,
}

/// Every way the session can change, short of a reset.
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    /// Establish an authenticated session in one assignment.
    Authenticate {
        user: User,
        token: AuthToken,
        step: WizardStep,
    },
    /// Move the wizard forward. Backward moves are ignored.
    Advance(WizardStep),
    /// Replace the cached user after a refetch (same wallet only).
    RefreshUser(User),
    /// Park the wallet until an invite code is supplied.
    RequireInvite(PendingInvite),
    /// Remember the invite code the user typed.
    RecordInviteCode(String),
    /// Abandon the invite flow.
    ClearInvite,
    AddPendingXp(u64),
}

/// Why a session was reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetReason {
    Logout,
    WalletDisconnected,
    /// The wallet switched to a different account.
    AccountChanged,
    TokenRejected,
}

impl std::fmt::Display for ResetReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Logout => write!(f, "logout"),
            Self::WalletDisconnected => write!(f, "wallet_disconnected"),
            Self::AccountChanged => write!(f, "account_changed"),
            Self::TokenRejected => write!(f, "token_rejected"),
        }
    }
}

/// Events pushed to subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Full snapshot after any committed change.
    SessionChanged { session: SessionSnapshot },
    /// Session torn down.
    SessionReset { reason: ResetReason, epoch: u64 },
    /// Accumulated onboarding XP handed to the UI (happens once).
    PendingXpPresented { xp: u64 },
}

/// Explicit session context shared by the orchestrator, executors and UI.
pub struct SessionStore {
    state: RwLock<Session>,
    tx: broadcast::Sender<SessionEvent>,
}

impl SessionStore {
    /// Create a store in the unauthenticated state.
    pub fn new() -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Arc::new(Self {
            state: RwLock::new(Session::default()),
            tx,
        })
    }

    /// Subscribe to session events. Each UI consumer calls this.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Clone of the full session (token included).
    pub async fn current(&self) -> Session {
        self.state.read().await.clone()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.state.read().await.snapshot()
    }

    pub async fn step(&self) -> WizardStep {
        self.state.read().await.step
    }

    pub async fn epoch(&self) -> u64 {
        self.state.read().await.epoch
    }

    pub async fn token(&self) -> Option<AuthToken> {
        self.state.read().await.auth_token.clone()
    }

    /// Apply an update regardless of epoch.
    pub async fn apply(&self, update: SessionUpdate) -> Result<SessionSnapshot, SessionError> {
        self.mutate(None, |session| apply_update(session, update))
            .await
            .map(|(snapshot, _)| snapshot)
    }

    /// Apply an update only if no reset happened since `epoch` was read.
    ///
    /// Async work that captured the epoch before suspending uses this so a
    /// late result cannot write into a session that was torn down meanwhile.
    pub async fn apply_in(
        &self,
        epoch: u64,
        update: SessionUpdate,
    ) -> Result<SessionSnapshot, SessionError> {
        self.mutate(Some(epoch), |session| apply_update(session, update))
            .await
            .map(|(snapshot, _)| snapshot)
    }

    /// Zero the pending XP counter and return what it held.
    ///
    /// Subscribers are told about a non-zero amount exactly once.
    pub async fn take_pending_xp(&self, epoch: u64) -> Result<u64, SessionError> {
        let (_, xp) = self
            .mutate(Some(epoch), |session| {
                let xp = std::mem::take(&mut session.pending_xp);
                Ok(xp)
            })
            .await?;
        if xp > 0 {
            let _ = self.tx.send(SessionEvent::PendingXpPresented { xp });
        }
        Ok(xp)
    }

    /// Tear the session down: step 0, no user, no token, no invite.
    ///
    /// Clearing the durable token is the caller's job.
    pub async fn reset(&self, reason: ResetReason) -> SessionSnapshot {
        let snapshot = {
            let mut state = self.state.write().await;
            let epoch = state.epoch + 1;
            *state = Session {
                epoch,
                ..Session::default()
            };
            state.snapshot()
        };
        info!(reason = %reason, epoch = snapshot.epoch, "Session reset");
        let _ = self.tx.send(SessionEvent::SessionReset {
            reason,
            epoch: snapshot.epoch,
        });
        let _ = self.tx.send(SessionEvent::SessionChanged {
            session: snapshot.clone(),
        });
        snapshot
    }

    async fn mutate<R>(
        &self,
        expected_epoch: Option<u64>,
        f: impl FnOnce(&mut Session) -> Result<R, SessionError>,
    ) -> Result<(SessionSnapshot, R), SessionError> {
        let (snapshot, out) = {
            let mut state = self.state.write().await;
            if let Some(expected) = expected_epoch {
                if state.epoch != expected {
                    debug!(expected, actual = state.epoch, "Discarding write to stale session");
                    return Err(SessionError::Stale {
                        expected,
                        actual: state.epoch,
                    });
                }
            }
            let mut next = state.clone();
            let out = f(&mut next)?;
            if let Err(e) = next.validate() {
                warn!(error = %e, "Rejected session update");
                return Err(e);
            }
            *state = next;
            (state.snapshot(), out)
        };
        let _ = self.tx.send(SessionEvent::SessionChanged {
            session: snapshot.clone(),
        });
        Ok((snapshot, out))
    }
}

fn apply_update(session: &mut Session, update: SessionUpdate) -> Result<(), SessionError> {
    match update {
        SessionUpdate::Authenticate { user, token, step } => {
            info!(wallet = %user.wallet, step = %step, "Session authenticated");
            session.user = Some(user);
            session.auth_token = Some(token);
            session.pending_invite = None;
            session.step = step;
        }
        SessionUpdate::Advance(target) => {
            if session.step.can_transition_to(target) {
                debug!(from = %session.step, to = %target, "Advancing wizard");
                session.step = target;
            } else if target != session.step {
                debug!(current = %session.step, target = %target, "Ignoring backward step");
            }
        }
        SessionUpdate::RefreshUser(user) => {
            let Some(current) = session.user.as_ref() else {
                return Err(SessionError::InvariantViolation(
                    "cannot refresh user on an unauthenticated session".to_string(),
                ));
            };
            if !current.wallet.eq_ignore_ascii_case(&user.wallet) {
                return Err(SessionError::InvariantViolation(format!(
                    "refreshed user {} does not match session wallet {}",
                    user.wallet, current.wallet
                )));
            }
            session.user = Some(user);
        }
        SessionUpdate::RequireInvite(invite) => {
            info!(wallet = %invite.wallet, signed = invite.has_signature(), "Invite code required");
            session.pending_invite = Some(invite);
        }
        SessionUpdate::RecordInviteCode(code) => match session.pending_invite.as_mut() {
            Some(invite) => invite.last_code = Some(code),
            None => {
                return Err(SessionError::InvariantViolation(
                    "no pending invite to record a code on".to_string(),
                ));
            }
        },
        SessionUpdate::ClearInvite => {
            session.pending_invite = None;
        }
        SessionUpdate::AddPendingXp(xp) => {
            session.pending_xp = session.pending_xp.saturating_add(xp);
        }
    }
    Ok(())
}
