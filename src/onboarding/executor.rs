//! StepExecutor: runs onboarding steps against the portal API and moves
//! the wizard forward.
//!
//! Every step follows the same protocol:
//! 1. Probe server progress; if the step is already done, skip to advancing.
//! 2. Tell the server the step started ("already started" counts as success).
//! 3. Apply the step's effect, report completion with its evidence tag,
//!    credit pending XP and advance.
//!
//! The final step additionally claims the onboarding reward exactly once.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::effects::StepEffect;
use super::resolver::{parse_progress, resolve_step};
use super::step::{StepKey, StepState};
use crate::api::PortalApi;
use crate::error::{ApiError, SessionError, StepError};
use crate::session::{SessionStore, SessionUpdate, WizardStep};
use crate::storage::AuthToken;

/// Reward type claimed after the final step.
pub const ONBOARDING_REWARD_TYPE: &str = "xp";

/// How a `run` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    /// Effect applied and completion reported in this call.
    Completed,
    /// The server already had the step; nothing was re-done.
    AlreadyCompleted,
    /// Another call for the same step is still running.
    AlreadyRunning,
}

/// Result of the one-time reward claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardClaim {
    /// Pending XP handed to the UI by this call (0 if already presented).
    pub xp: u64,
    /// Whether this call is the one that presented it.
    pub newly_presented: bool,
}

/// What a `run` call did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReport {
    pub key: StepKey,
    pub outcome: StepOutcome,
    /// Wizard step after the call.
    pub step: WizardStep,
    /// XP credited to the pending counter by this call.
    pub xp_earned: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reward: Option<RewardClaim>,
}

/// Runs onboarding steps for the current session.
pub struct StepExecutor {
    api: Arc<dyn PortalApi>,
    session: Arc<SessionStore>,
    effects: HashMap<StepKey, Arc<dyn StepEffect>>,
    states: Mutex<HashMap<StepKey, StepState>>,
    running: Mutex<HashSet<StepKey>>,
    reward_claimed: AtomicBool,
    /// Session epoch the per-step states belong to.
    epoch: AtomicU64,
}

impl StepExecutor {
    pub fn new(
        api: Arc<dyn PortalApi>,
        session: Arc<SessionStore>,
        effects: Vec<Arc<dyn StepEffect>>,
    ) -> Self {
        Self {
            api,
            session,
            effects: effects.into_iter().map(|e| (e.key(), e)).collect(),
            states: Mutex::new(HashMap::new()),
            running: Mutex::new(HashSet::new()),
            reward_claimed: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
        }
    }

    /// Client-side state of a step.
    pub fn state(&self, key: StepKey) -> StepState {
        self.states
            .lock()
            .map(|s| s.get(&key).copied().unwrap_or_default())
            .unwrap_or_default()
    }

    fn set_state(&self, key: StepKey, target: StepState) {
        if let Ok(mut states) = self.states.lock() {
            let current = states.get(&key).copied().unwrap_or_default();
            if current.can_transition_to(target) {
                debug!(step = %key, from = %current, to = %target, "Step state transition");
                states.insert(key, target);
            }
        }
    }

    /// Forget per-step progress.
    pub fn clear(&self) {
        if let Ok(mut states) = self.states.lock() {
            states.clear();
        }
        self.reward_claimed.store(false, Ordering::SeqCst);
    }

    /// States from an earlier session are dropped on first use after a reset.
    fn sync_epoch(&self, epoch: u64) {
        let previous = self.epoch.swap(epoch, Ordering::SeqCst);
        if previous != epoch {
            debug!(previous, epoch, "Session changed, clearing step states");
            self.clear();
        }
    }

    /// Run one onboarding step end to end.
    pub async fn run(&self, key: StepKey) -> Result<StepReport, StepError> {
        let Some(_guard) = RunGuard::acquire(&self.running, key) else {
            debug!(step = %key, "Step already running, ignoring duplicate");
            return Ok(StepReport {
                key,
                outcome: StepOutcome::AlreadyRunning,
                step: self.session.step().await,
                xp_earned: 0,
                reward: None,
            });
        };

        let session = self.session.current().await;
        if !session.is_authenticated() {
            return Err(StepError::NotAuthenticated);
        }
        let Some(token) = session.auth_token else {
            return Err(StepError::NotAuthenticated);
        };
        let epoch = session.epoch;
        self.sync_epoch(epoch);

        // Phase 1: idempotency probe.
        let progress = self
            .api
            .onboarding_progress(&token)
            .await
            .map_err(|e| api_step_error(key, e))?;
        let mut completed = parse_progress(&progress.completed_steps)?;
        let done_here = self.state(key) == StepState::Completed;
        if done_here || completed.contains(&key) {
            if !completed.contains(&key) {
                // Server progress lags behind our own completion.
                debug!(step = %key, "Step completed in this session, progress not caught up yet");
                completed.push(key);
            } else {
                info!(step = %key, "Step already completed on server, skipping effect");
            }
            self.set_state(key, StepState::Completed);
            let step = self.advance(epoch, key, &completed).await?;
            let reward = if key.is_final() {
                Some(self.claim_reward_with(&token, epoch).await?)
            } else {
                None
            };
            return Ok(StepReport {
                key,
                outcome: StepOutcome::AlreadyCompleted,
                step,
                xp_earned: 0,
                reward,
            });
        }

        // Phase 2: start.
        if self.state(key) == StepState::NotStarted {
            match self.api.start_step(&token, key).await {
                Ok(()) => {}
                Err(e) if is_already_done(&e) => {
                    debug!(step = %key, "Server reports step already started");
                }
                Err(e) => return Err(api_step_error(key, e)),
            }
            self.set_state(key, StepState::Started);
        }

        // Phase 3: effect, then completion.
        if self.state(key) == StepState::Started {
            if let Some(effect) = self.effects.get(&key) {
                effect.apply().await.map_err(|e| {
                    let e = e.classified();
                    warn!(step = %key, error = %e, "Step effect failed");
                    if e.is_user_rejection() {
                        StepError::UserRejected {
                            step: key.to_string(),
                        }
                    } else {
                        StepError::Wallet {
                            step: key.to_string(),
                            source: e,
                        }
                    }
                })?;
            }
            self.set_state(key, StepState::EffectApplied);
        }

        if self.session.epoch().await != epoch {
            return Err(StepError::SessionReset {
                step: key.to_string(),
            });
        }

        let outcome = match self.api.complete_step(&token, key, key.evidence()).await {
            Ok(()) => StepOutcome::Completed,
            Err(e) if is_already_done(&e) => {
                debug!(step = %key, "Server reports step already completed");
                StepOutcome::AlreadyCompleted
            }
            Err(e) => return Err(api_step_error(key, e)),
        };
        self.set_state(key, StepState::Completed);
        // XP is credited only by the call that actually completed the step.
        let xp_earned = match outcome {
            StepOutcome::Completed => key.xp_reward(),
            _ => 0,
        };
        if xp_earned > 0 {
            self.session
                .apply_in(epoch, SessionUpdate::AddPendingXp(xp_earned))
                .await
                .map_err(|e| session_step_error(key, e))?;
        }
        info!(step = %key, xp = xp_earned, "Onboarding step completed");

        // Refetch so the resolver sees the server's view; fall back to the
        // optimistic local one.
        completed = match self.api.onboarding_progress(&token).await {
            Ok(progress) => parse_progress(&progress.completed_steps)?,
            Err(e) => {
                warn!(step = %key, error = %e, "Progress refetch failed, advancing optimistically");
                completed
            }
        };
        if !completed.contains(&key) {
            completed.push(key);
        }
        let step = self.advance(epoch, key, &completed).await?;

        let reward = if key.is_final() {
            Some(self.claim_reward_with(&token, epoch).await?)
        } else {
            None
        };

        Ok(StepReport {
            key,
            outcome,
            step,
            xp_earned,
            reward,
        })
    }

    /// Move the wizard past `key`. The final step always lands on the
    /// completion screen first so pending XP can be shown.
    async fn advance(
        &self,
        epoch: u64,
        key: StepKey,
        completed: &[StepKey],
    ) -> Result<WizardStep, StepError> {
        let target = if key.is_final() {
            WizardStep::Completion
        } else {
            resolve_step(completed)
        };
        let snapshot = self
            .session
            .apply_in(epoch, SessionUpdate::Advance(target))
            .await
            .map_err(|e| session_step_error(key, e))?;
        Ok(snapshot.step)
    }

    /// Claim the onboarding reward (retry entry point after a failed claim).
    pub async fn claim_reward(&self) -> Result<RewardClaim, StepError> {
        let session = self.session.current().await;
        let token = session
            .auth_token
            .filter(|_| session.user.is_some())
            .ok_or(StepError::NotAuthenticated)?;
        self.sync_epoch(session.epoch);
        self.claim_reward_with(&token, session.epoch).await
    }

    async fn claim_reward_with(&self, token: &AuthToken, epoch: u64) -> Result<RewardClaim, StepError> {
        let final_key = StepKey::MintEarlyBirdNft;
        if !self.reward_claimed.load(Ordering::SeqCst) {
            match self.api.claim_reward(token, ONBOARDING_REWARD_TYPE).await {
                Ok(response) => {
                    info!(xp_awarded = ?response.xp_awarded, "Onboarding reward claimed");
                }
                Err(e) if is_already_claimed(&e) => {
                    debug!("Onboarding reward already claimed");
                }
                Err(e) => return Err(api_step_error(final_key, e)),
            }
            self.reward_claimed.store(true, Ordering::SeqCst);
        }

        let xp = self
            .session
            .take_pending_xp(epoch)
            .await
            .map_err(|e| session_step_error(final_key, e))?;
        Ok(RewardClaim {
            xp,
            newly_presented: xp > 0,
        })
    }

    /// Leave the completion screen for the dashboard.
    pub async fn finish_onboarding(&self) -> Result<WizardStep, StepError> {
        let session = self.session.current().await;
        if !session.is_authenticated() {
            return Err(StepError::NotAuthenticated);
        }
        if session.step != WizardStep::Completion {
            return Ok(session.step);
        }
        let snapshot = self
            .session
            .apply_in(session.epoch, SessionUpdate::Advance(WizardStep::Dashboard))
            .await
            .map_err(|e| session_step_error(StepKey::MintEarlyBirdNft, e))?;
        Ok(snapshot.step)
    }
}

/// Marks a step as running for the lifetime of the guard.
struct RunGuard<'a> {
    running: &'a Mutex<HashSet<StepKey>>,
    key: StepKey,
}

impl<'a> RunGuard<'a> {
    fn acquire(running: &'a Mutex<HashSet<StepKey>>, key: StepKey) -> Option<Self> {
        let mut set = running.lock().ok()?;
        if !set.insert(key) {
            return None;
        }
        Some(Self { running, key })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.running.lock() {
            set.remove(&self.key);
        }
    }
}

/// "Already started" / "already completed" answers from start and complete.
fn is_already_done(e: &ApiError) -> bool {
    e.status() == Some(409)
        || e.message_contains("already started")
        || e.message_contains("already completed")
}

fn is_already_claimed(e: &ApiError) -> bool {
    e.status() == Some(409) || e.message_contains("already claimed")
}

fn api_step_error(key: StepKey, e: ApiError) -> StepError {
    match e {
        ApiError::Network(message) => StepError::Network {
            step: key.to_string(),
            message,
        },
        ApiError::Unauthorized { .. } => StepError::NotAuthenticated,
        other => StepError::ServerRejectedStep {
            step: key.to_string(),
            message: other.user_message(),
        },
    }
}

fn session_step_error(key: StepKey, e: SessionError) -> StepError {
    match e {
        SessionError::Stale { .. } => StepError::SessionReset {
            step: key.to_string(),
        },
        SessionError::InvariantViolation(_) => StepError::NotAuthenticated,
    }
}
