//! In-memory stand-ins for the portal API and the browser wallet, shared by
//! the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::api::model::{AuthResponse, ClaimRewardResponse, ConfirmRequest, OnboardingProgress, RegisterRequest, User};
use crate::api::PortalApi;
use crate::error::{ApiError, WalletError};
use crate::onboarding::StepKey;
use crate::storage::AuthToken;
use crate::wallet::{WalletConnection, WalletProvider, classify_rpc_error};

/// How the stub answers a login for an existing but unconfirmed account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateStyle {
    /// `200 {requiresInviteCode: true}`
    Flag,
    /// `403 {message: "User not confirmed"}`
    Forbidden,
    /// `400 {message: "Account not confirmed yet"}`
    Message,
}

struct Account {
    user: User,
    confirmed: bool,
}

#[derive(Default)]
struct ApiState {
    tokens: HashMap<String, String>,
    accounts: HashMap<String, Account>,
    invite_codes: HashSet<String>,
    progress: Vec<String>,
    started: Vec<StepKey>,
    completed: Vec<(StepKey, String)>,
    complete_failure: Option<String>,
    registration_closed: bool,
    reward_claimed: bool,
    calls: Vec<&'static str>,
    issued: usize,
}

pub struct StubApi {
    state: Mutex<ApiState>,
    gate: Mutex<GateStyle>,
    offline: AtomicBool,
    reward_claims: AtomicUsize,
}

impl StubApi {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ApiState::default()),
            gate: Mutex::new(GateStyle::Flag),
            offline: AtomicBool::new(false),
            reward_claims: AtomicUsize::new(0),
        }
    }

    pub fn set_gate(&self, gate: GateStyle) {
        *self.gate.lock().unwrap() = gate;
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_progress(&self, keys: &[&str]) {
        self.state.lock().unwrap().progress = keys.iter().map(|k| k.to_string()).collect();
    }

    pub fn add_token(&self, token: &str, wallet: &str) {
        let mut state = self.state.lock().unwrap();
        state.tokens.insert(token.to_string(), wallet.to_lowercase());
        state
            .accounts
            .entry(wallet.to_lowercase())
            .or_insert_with(|| Account {
                user: User::new(wallet),
                confirmed: true,
            });
    }

    pub fn add_account(&self, wallet: &str, confirmed: bool) {
        self.state.lock().unwrap().accounts.insert(
            wallet.to_lowercase(),
            Account {
                user: User::new(wallet),
                confirmed,
            },
        );
    }

    pub fn add_tag(&self, wallet: &str, tag: &str) {
        if let Some(account) = self.state.lock().unwrap().accounts.get_mut(&wallet.to_lowercase()) {
            account.user.tags.push(tag.to_string());
        }
    }

    pub fn add_invite_code(&self, code: &str) {
        self.state.lock().unwrap().invite_codes.insert(code.to_string());
    }

    pub fn close_registration(&self) {
        self.state.lock().unwrap().registration_closed = true;
    }

    pub fn mark_started(&self, key: StepKey) {
        self.state.lock().unwrap().started.push(key);
    }

    pub fn mark_reward_claimed(&self) {
        self.state.lock().unwrap().reward_claimed = true;
    }

    pub fn fail_complete(&self, message: &str) {
        self.state.lock().unwrap().complete_failure = Some(message.to_string());
    }

    pub fn revoke_tokens(&self) {
        self.state.lock().unwrap().tokens.clear();
    }

    pub fn started(&self) -> Vec<StepKey> {
        self.state.lock().unwrap().started.clone()
    }

    pub fn completed_with_evidence(&self) -> Vec<(StepKey, String)> {
        self.state.lock().unwrap().completed.clone()
    }

    pub fn reward_claims(&self) -> usize {
        self.reward_claims.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| **c == call).count()
    }

    fn enter(&self, call: &'static str) -> Result<std::sync::MutexGuard<'_, ApiState>, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        if self.offline.load(Ordering::SeqCst) {
            return Err(ApiError::Network("connection refused".into()));
        }
        Ok(state)
    }

    fn wallet_for(state: &ApiState, token: &AuthToken) -> Result<String, ApiError> {
        state
            .tokens
            .get(token.expose())
            .cloned()
            .ok_or(ApiError::Unauthorized {
                message: Some("Invalid or expired token".into()),
            })
    }

    fn issue(state: &mut ApiState, wallet: &str) -> AuthResponse {
        state.issued += 1;
        let token = format!("tok-{}", state.issued);
        state.tokens.insert(token.clone(), wallet.to_lowercase());
        let user = state
            .accounts
            .get(&wallet.to_lowercase())
            .map(|a| a.user.clone())
            .unwrap_or_else(|| User::new(wallet));
        AuthResponse {
            token: Some(token),
            user: Some(user),
            ..Default::default()
        }
    }
}

fn bad_request(message: &str) -> ApiError {
    ApiError::Status {
        status: 400,
        message: Some(message.to_string()),
    }
}

#[async_trait]
impl PortalApi for StubApi {
    async fn register(&self, request: &RegisterRequest) -> Result<AuthResponse, ApiError> {
        let mut state = self.enter("register")?;
        if state.registration_closed {
            return Err(bad_request("Registration is closed"));
        }
        let code = request.invite_code.clone().unwrap_or_default();
        if !state.invite_codes.contains(&code) {
            return Err(bad_request("Invalid referral code"));
        }
        let key = request.wallet.to_lowercase();
        if state.accounts.contains_key(&key) {
            return Err(bad_request("Wallet already registered"));
        }
        let mut user = User::new(&request.wallet);
        user.referral_code = Some(format!("HLS{}", &key[key.len().saturating_sub(4)..]).to_uppercase());
        state.accounts.insert(key, Account { user, confirmed: true });
        Ok(Self::issue(&mut state, &request.wallet))
    }

    async fn login(&self, wallet: &str, _signature: &str) -> Result<AuthResponse, ApiError> {
        let gate = *self.gate.lock().unwrap();
        let mut state = self.enter("login")?;
        let confirmed = match state.accounts.get(&wallet.to_lowercase()) {
            None => {
                return Err(ApiError::Status {
                    status: 404,
                    message: Some("User not found".into()),
                });
            }
            Some(account) => account.confirmed,
        };
        if confirmed {
            return Ok(Self::issue(&mut state, wallet));
        }
        match gate {
            GateStyle::Flag => Ok(AuthResponse {
                requires_invite_code: true,
                ..Default::default()
            }),
            GateStyle::Forbidden => Err(ApiError::Status {
                status: 403,
                message: Some("User not confirmed".into()),
            }),
            GateStyle::Message => Err(bad_request("Account not confirmed yet")),
        }
    }

    async fn confirm(&self, request: &ConfirmRequest) -> Result<AuthResponse, ApiError> {
        let mut state = self.enter("confirm")?;
        let key = request.wallet.to_lowercase();
        if state.accounts.get(&key).is_some_and(|a| a.confirmed) {
            return Err(bad_request("User already confirmed"));
        }
        if !state.invite_codes.contains(&request.invite_code) {
            return Err(bad_request("Invalid invite code"));
        }
        state.accounts.insert(
            key,
            Account {
                user: User::new(&request.wallet),
                confirmed: true,
            },
        );
        Ok(Self::issue(&mut state, &request.wallet))
    }

    async fn profile(&self, token: &AuthToken, wallet: &str) -> Result<User, ApiError> {
        let state = self.enter("profile")?;
        let owner = Self::wallet_for(&state, token)?;
        if owner != wallet.to_lowercase() {
            return Err(ApiError::Unauthorized {
                message: Some("Token does not belong to this wallet".into()),
            });
        }
        let mut user = state
            .accounts
            .get(&owner)
            .map(|a| a.user.clone())
            .unwrap_or_else(|| User::new(wallet));
        user.completed_steps = state.progress.clone();
        Ok(user)
    }

    async fn onboarding_progress(&self, token: &AuthToken) -> Result<OnboardingProgress, ApiError> {
        let state = self.enter("progress")?;
        Self::wallet_for(&state, token)?;
        Ok(OnboardingProgress {
            completed_steps: state.progress.clone(),
            is_completed: None,
        })
    }

    async fn start_step(&self, token: &AuthToken, step: StepKey) -> Result<(), ApiError> {
        let mut state = self.enter("start")?;
        Self::wallet_for(&state, token)?;
        if state.started.contains(&step) || state.progress.iter().any(|s| s == step.as_str()) {
            return Err(ApiError::Status {
                status: 409,
                message: Some("Step already started".into()),
            });
        }
        state.started.push(step);
        Ok(())
    }

    async fn complete_step(
        &self,
        token: &AuthToken,
        step: StepKey,
        evidence: &str,
    ) -> Result<(), ApiError> {
        let mut state = self.enter("complete")?;
        Self::wallet_for(&state, token)?;
        if let Some(message) = state.complete_failure.clone() {
            return Err(bad_request(&message));
        }
        if !state.progress.iter().any(|s| s == step.as_str()) {
            state.progress.push(step.as_str().to_string());
        }
        state.completed.push((step, evidence.to_string()));
        Ok(())
    }

    async fn claim_reward(
        &self,
        token: &AuthToken,
        _reward_type: &str,
    ) -> Result<ClaimRewardResponse, ApiError> {
        let mut state = self.enter("claim")?;
        Self::wallet_for(&state, token)?;
        self.reward_claims.fetch_add(1, Ordering::SeqCst);
        if state.reward_claimed {
            return Err(ApiError::Status {
                status: 409,
                message: Some("Reward already claimed".into()),
            });
        }
        state.reward_claimed = true;
        Ok(ClaimRewardResponse {
            xp_awarded: Some(300),
            message: None,
        })
    }
}

pub struct StubWallet {
    address: Mutex<Option<String>>,
    connected: AtomicBool,
    chain_id: Mutex<u64>,
    known_chains: Mutex<HashSet<u64>>,
    reject_rpc: AtomicBool,
    reject_signatures: AtomicBool,
    disconnect_on_sign: AtomicBool,
    raw_errors: AtomicBool,
    calls: Mutex<Vec<String>>,
    signatures: AtomicUsize,
    conn_tx: watch::Sender<WalletConnection>,
}

impl StubWallet {
    fn with_state(connection: WalletConnection) -> Self {
        let (conn_tx, _rx) = watch::channel(connection.clone());
        Self {
            address: Mutex::new(connection.address.clone()),
            connected: AtomicBool::new(connection.connected),
            chain_id: Mutex::new(1),
            known_chains: Mutex::new(HashSet::from([1])),
            reject_rpc: AtomicBool::new(false),
            reject_signatures: AtomicBool::new(false),
            disconnect_on_sign: AtomicBool::new(false),
            raw_errors: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
            signatures: AtomicUsize::new(0),
            conn_tx,
        }
    }

    pub fn connected(address: &str) -> Self {
        Self::with_state(WalletConnection::connected(address))
    }

    pub fn disconnected() -> Self {
        Self::with_state(WalletConnection::disconnected())
    }

    pub fn on_chain(self, chain_id: u64) -> Self {
        *self.chain_id.lock().unwrap() = chain_id;
        self.known_chains.lock().unwrap().insert(chain_id);
        self
    }

    pub fn knows_chain(&self, chain_id: u64) {
        self.known_chains.lock().unwrap().insert(chain_id);
    }

    pub fn reject_rpc(&self, reject: bool) {
        self.reject_rpc.store(reject, Ordering::SeqCst);
    }

    pub fn reject_signatures(&self, reject: bool) {
        self.reject_signatures.store(reject, Ordering::SeqCst);
    }

    /// Simulate the wallet disconnecting while the signature prompt is open.
    pub fn disconnect_during_sign(&self, yes: bool) {
        self.disconnect_on_sign.store(yes, Ordering::SeqCst);
    }

    /// Return provider failures as unclassified `WalletError::Rpc`, the
    /// way a bare EIP-1193 bridge reports them.
    pub fn raw_rpc_errors(&self, raw: bool) {
        self.raw_errors.store(raw, Ordering::SeqCst);
    }

    fn rpc_error(&self, method: &str, code: i64, message: &str) -> WalletError {
        if self.raw_errors.load(Ordering::SeqCst) {
            WalletError::Rpc {
                method: method.to_string(),
                code,
                message: message.to_string(),
            }
        } else {
            classify_rpc_error(method, code, message)
        }
    }

    pub fn set_connection(&self, connection: WalletConnection) {
        self.connected.store(connection.connected, Ordering::SeqCst);
        *self.address.lock().unwrap() = connection.address.clone();
        self.conn_tx.send_replace(connection);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn chain_id(&self) -> u64 {
        *self.chain_id.lock().unwrap()
    }

    pub fn signature_count(&self) -> usize {
        self.signatures.load(Ordering::SeqCst)
    }

    fn requested_chain(params: &serde_json::Value) -> Option<u64> {
        let hex = params.get(0)?.get("chainId")?.as_str()?;
        u64::from_str_radix(hex.trim_start_matches("0x"), 16).ok()
    }
}

#[async_trait]
impl WalletProvider for StubWallet {
    async fn connect(&self) -> Result<String, WalletError> {
        let address = self.address().ok_or(WalletError::NotConnected)?;
        self.set_connection(WalletConnection::connected(&address));
        Ok(address)
    }

    async fn disconnect(&self) -> Result<(), WalletError> {
        self.set_connection(WalletConnection::disconnected());
        Ok(())
    }

    fn address(&self) -> Option<String> {
        self.address.lock().unwrap().clone()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn connection_events(&self) -> BoxStream<'static, WalletConnection> {
        WatchStream::new(self.conn_tx.subscribe()).boxed()
    }

    async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, WalletError> {
        self.calls.lock().unwrap().push(method.to_string());
        match method {
            "eth_chainId" => Ok(serde_json::json!(format!("{:#x}", self.chain_id()))),
            "wallet_switchEthereumChain" | "wallet_addEthereumChain"
                if self.reject_rpc.load(Ordering::SeqCst) =>
            {
                Err(self.rpc_error(method, 4001, "User rejected the request."))
            }
            "wallet_switchEthereumChain" => {
                let target = Self::requested_chain(&params).unwrap_or_default();
                if self.known_chains.lock().unwrap().contains(&target) {
                    *self.chain_id.lock().unwrap() = target;
                    Ok(serde_json::Value::Null)
                } else {
                    Err(self.rpc_error(method, 4902, "Unrecognized chain ID"))
                }
            }
            "wallet_addEthereumChain" => {
                let target = Self::requested_chain(&params).unwrap_or_default();
                self.known_chains.lock().unwrap().insert(target);
                *self.chain_id.lock().unwrap() = target;
                Ok(serde_json::Value::Null)
            }
            other => Err(WalletError::Rpc {
                method: other.to_string(),
                code: -32601,
                message: "Method not found".into(),
            }),
        }
    }

    async fn sign_message(&self, address: &str, message: &str) -> Result<String, WalletError> {
        if self.reject_signatures.load(Ordering::SeqCst) {
            return Err(self.rpc_error(
                "personal_sign",
                4001,
                "MetaMask Tx Signature: User denied message signature.",
            ));
        }
        // The prompt is open: let other tasks run.
        tokio::task::yield_now().await;
        self.signatures.fetch_add(1, Ordering::SeqCst);
        if self.disconnect_on_sign.load(Ordering::SeqCst) {
            self.set_connection(WalletConnection::disconnected());
        }
        Ok(format!("0xsig-{}-{}", address.to_lowercase(), message.len()))
    }
}
