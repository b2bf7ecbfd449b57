//! Shared fixtures: an axum fake of the portal API on a random port and an
//! in-memory browser wallet.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use helios_portal::error::WalletError;
use helios_portal::wallet::{WalletConnection, WalletProvider, classify_rpc_error};

/// Maximum time any test is allowed to run before we consider it hung.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

pub const WALLET: &str = "0x52908400098527886e0f7030069857d2e4169ee7";

// ── Fake portal API ─────────────────────────────────────────────────────

struct Account {
    confirmed: bool,
    referral_code: String,
    completed: Vec<String>,
    reward_claimed: bool,
}

#[derive(Default)]
struct PortalState {
    accounts: HashMap<String, Account>,
    tokens: HashMap<String, String>,
    invite_codes: HashSet<String>,
    issued: u64,
}

#[derive(Clone, Default)]
pub struct FakePortal {
    state: Arc<Mutex<PortalState>>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl FakePortal {
    pub fn add_account(&self, wallet: &str, confirmed: bool) {
        let mut state = self.state.lock().unwrap();
        let referral_code = format!("REF{}", state.accounts.len() + 1);
        state.accounts.insert(
            wallet.to_lowercase(),
            Account {
                confirmed,
                referral_code,
                completed: Vec::new(),
                reward_claimed: false,
            },
        );
    }

    pub fn add_invite_code(&self, code: &str) {
        self.state.lock().unwrap().invite_codes.insert(code.to_string());
    }

    pub fn set_progress(&self, wallet: &str, keys: &[&str]) {
        if let Some(account) = self.state.lock().unwrap().accounts.get_mut(&wallet.to_lowercase()) {
            account.completed = keys.iter().map(|k| k.to_string()).collect();
        }
    }

    /// Issue a token directly (as if from an earlier login).
    pub fn issue_token(&self, wallet: &str) -> String {
        let mut state = self.state.lock().unwrap();
        issue(&mut state, wallet)
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    fn log(&self, request: &str) {
        self.requests.lock().unwrap().push(request.to_string());
    }
}

fn issue(state: &mut PortalState, wallet: &str) -> String {
    state.issued += 1;
    let token = format!("jwt-{}-{}", state.issued, &wallet[wallet.len().saturating_sub(6)..]);
    state.tokens.insert(token.clone(), wallet.to_lowercase());
    token
}

fn user_json(wallet: &str, account: &Account) -> Value {
    json!({
        "wallet": wallet,
        "xp": if account.reward_claimed { 300 } else { 0 },
        "completedSteps": account.completed,
        "referralCode": account.referral_code,
        "tags": [],
    })
}

fn auth_json(state: &mut PortalState, wallet: &str) -> Value {
    let token = issue(state, wallet);
    let account = &state.accounts[&wallet.to_lowercase()];
    json!({ "token": token, "user": user_json(wallet, account) })
}

fn error(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}

fn bearer_wallet(state: &PortalState, headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?;
    state.tokens.get(token).cloned()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthBody {
    wallet: String,
    signature: String,
    #[serde(default)]
    invite_code: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StepBody {
    step_key: String,
    #[serde(default)]
    evidence: Option<String>,
}

async fn register(State(portal): State<FakePortal>, Json(body): Json<AuthBody>) -> Response {
    portal.log("register");
    let mut state = portal.state.lock().unwrap();
    let key = body.wallet.to_lowercase();
    let code = body.invite_code.unwrap_or_default();
    if body.signature.is_empty() || !state.invite_codes.contains(&code) {
        return error(StatusCode::BAD_REQUEST, json!({"message": "Invalid referral code"}));
    }
    if state.accounts.contains_key(&key) {
        return error(StatusCode::BAD_REQUEST, json!({"message": "Wallet already registered"}));
    }
    let referral_code = format!("HLS{}", state.accounts.len() + 100);
    state.accounts.insert(
        key,
        Account {
            confirmed: true,
            referral_code,
            completed: Vec::new(),
            reward_claimed: false,
        },
    );
    Json(auth_json(&mut state, &body.wallet)).into_response()
}

async fn login(State(portal): State<FakePortal>, Json(body): Json<AuthBody>) -> Response {
    portal.log("login");
    let mut state = portal.state.lock().unwrap();
    match state.accounts.get(&body.wallet.to_lowercase()) {
        None => error(StatusCode::NOT_FOUND, json!({"error": "User not found"})),
        Some(account) if !account.confirmed => error(
            StatusCode::FORBIDDEN,
            json!({"message": "User not confirmed", "requiresInviteCode": true}),
        ),
        Some(_) => Json(auth_json(&mut state, &body.wallet)).into_response(),
    }
}

async fn confirm(State(portal): State<FakePortal>, Json(body): Json<AuthBody>) -> Response {
    portal.log("confirm");
    let mut state = portal.state.lock().unwrap();
    let key = body.wallet.to_lowercase();
    if state.accounts.get(&key).is_some_and(|a| a.confirmed) {
        return error(StatusCode::BAD_REQUEST, json!({"message": "User already confirmed"}));
    }
    let code = body.invite_code.unwrap_or_default();
    if !state.invite_codes.contains(&code) {
        return error(StatusCode::BAD_REQUEST, json!({"message": "Invalid invite code"}));
    }
    let account = state.accounts.entry(key).or_insert(Account {
        confirmed: false,
        referral_code: "HLS0".into(),
        completed: Vec::new(),
        reward_claimed: false,
    });
    account.confirmed = true;
    Json(auth_json(&mut state, &body.wallet)).into_response()
}

async fn profile(
    State(portal): State<FakePortal>,
    headers: HeaderMap,
    Path(wallet): Path<String>,
) -> Response {
    portal.log("profile");
    let state = portal.state.lock().unwrap();
    match bearer_wallet(&state, &headers) {
        Some(owner) if owner == wallet.to_lowercase() => {
            let account = &state.accounts[&owner];
            Json(json!({ "user": user_json(&wallet, account) })).into_response()
        }
        _ => error(StatusCode::UNAUTHORIZED, json!({"message": "Invalid or expired token"})),
    }
}

async fn progress(State(portal): State<FakePortal>, headers: HeaderMap) -> Response {
    portal.log("progress");
    let state = portal.state.lock().unwrap();
    let Some(owner) = bearer_wallet(&state, &headers) else {
        return error(StatusCode::UNAUTHORIZED, json!({"message": "Unauthorized"}));
    };
    let account = &state.accounts[&owner];
    Json(json!({
        "completedSteps": account.completed,
        "isCompleted": account.completed.len() >= 3,
    }))
    .into_response()
}

async fn start(
    State(portal): State<FakePortal>,
    headers: HeaderMap,
    Json(body): Json<StepBody>,
) -> Response {
    portal.log(&format!("start:{}", body.step_key));
    let state = portal.state.lock().unwrap();
    let Some(owner) = bearer_wallet(&state, &headers) else {
        return error(StatusCode::UNAUTHORIZED, json!({"message": "Unauthorized"}));
    };
    if state.accounts[&owner].completed.contains(&body.step_key) {
        return error(StatusCode::CONFLICT, json!({"message": "Step already completed"}));
    }
    Json(json!({"success": true})).into_response()
}

async fn complete(
    State(portal): State<FakePortal>,
    headers: HeaderMap,
    Json(body): Json<StepBody>,
) -> Response {
    portal.log(&format!("complete:{}", body.step_key));
    let mut state = portal.state.lock().unwrap();
    let Some(owner) = bearer_wallet(&state, &headers) else {
        return error(StatusCode::UNAUTHORIZED, json!({"message": "Unauthorized"}));
    };
    let expected = match body.step_key.as_str() {
        "add_helios_network" => "network_added",
        "claim_from_faucet" => "faucet_claimed",
        "mint_early_bird_nft" => "nft_minted",
        _ => return error(StatusCode::BAD_REQUEST, json!({"message": "Unknown step"})),
    };
    if body.evidence.as_deref() != Some(expected) {
        return error(StatusCode::BAD_REQUEST, json!({"message": "Missing evidence"}));
    }
    let account = state.accounts.get_mut(&owner).unwrap();
    if !account.completed.contains(&body.step_key) {
        account.completed.push(body.step_key);
    }
    Json(json!({"success": true})).into_response()
}

async fn claim_reward(State(portal): State<FakePortal>, headers: HeaderMap) -> Response {
    portal.log("claim");
    let mut state = portal.state.lock().unwrap();
    let Some(owner) = bearer_wallet(&state, &headers) else {
        return error(StatusCode::UNAUTHORIZED, json!({"message": "Unauthorized"}));
    };
    let account = state.accounts.get_mut(&owner).unwrap();
    if account.reward_claimed {
        return error(StatusCode::CONFLICT, json!({"message": "Reward already claimed"}));
    }
    account.reward_claimed = true;
    Json(json!({"xpAwarded": 300})).into_response()
}

/// Start the fake portal API on a random port; returns its base URL.
pub async fn start_portal(portal: FakePortal) -> String {
    let app = Router::new()
        .route("/users/register", post(register))
        .route("/users/login", post(login))
        .route("/users/confirm", post(confirm))
        .route("/users/profile/{wallet}", get(profile))
        .route("/users/onboarding/progress", get(progress))
        .route("/users/onboarding/start", post(start))
        .route("/users/onboarding/complete", post(complete))
        .route("/users/onboarding/claim-reward", post(claim_reward))
        .with_state(portal);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    format!("http://127.0.0.1:{port}")
}

/// Serve any router on a random port; returns the port.
pub async fn serve(app: Router) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    port
}

// ── Browser wallet ──────────────────────────────────────────────────────

pub struct BrowserWallet {
    connection: watch::Sender<WalletConnection>,
    chain_id: AtomicU64,
    known_chains: Mutex<HashSet<u64>>,
    reject_signatures: AtomicBool,
}

impl BrowserWallet {
    pub fn connected(address: &str) -> Self {
        let (connection, _rx) = watch::channel(WalletConnection::connected(address));
        Self {
            connection,
            chain_id: AtomicU64::new(1),
            known_chains: Mutex::new(HashSet::from([1])),
            reject_signatures: AtomicBool::new(false),
        }
    }

    pub fn set_connection(&self, connection: WalletConnection) {
        self.connection.send_replace(connection);
    }

    pub fn reject_signatures(&self, reject: bool) {
        self.reject_signatures.store(reject, Ordering::SeqCst);
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id.load(Ordering::SeqCst)
    }

    fn requested_chain(params: &Value) -> u64 {
        params[0]["chainId"]
            .as_str()
            .and_then(|hex| u64::from_str_radix(hex.trim_start_matches("0x"), 16).ok())
            .unwrap_or_default()
    }
}

#[async_trait]
impl WalletProvider for BrowserWallet {
    async fn connect(&self) -> Result<String, WalletError> {
        self.address().ok_or(WalletError::NotConnected)
    }

    async fn disconnect(&self) -> Result<(), WalletError> {
        self.set_connection(WalletConnection::disconnected());
        Ok(())
    }

    fn address(&self) -> Option<String> {
        let connection = self.connection.borrow();
        connection.address.clone().filter(|_| connection.connected)
    }

    fn is_connected(&self) -> bool {
        self.connection.borrow().connected
    }

    fn connection_events(&self) -> BoxStream<'static, WalletConnection> {
        WatchStream::new(self.connection.subscribe()).boxed()
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, WalletError> {
        match method {
            "eth_chainId" => Ok(json!(format!("{:#x}", self.chain_id()))),
            "wallet_switchEthereumChain" => {
                let target = Self::requested_chain(&params);
                if self.known_chains.lock().unwrap().contains(&target) {
                    self.chain_id.store(target, Ordering::SeqCst);
                    Ok(Value::Null)
                } else {
                    Err(classify_rpc_error(method, 4902, "Unrecognized chain ID"))
                }
            }
            "wallet_addEthereumChain" => {
                let target = Self::requested_chain(&params);
                self.known_chains.lock().unwrap().insert(target);
                self.chain_id.store(target, Ordering::SeqCst);
                Ok(Value::Null)
            }
            other => Err(classify_rpc_error(other, -32601, "Method not found")),
        }
    }

    async fn sign_message(&self, address: &str, message: &str) -> Result<String, WalletError> {
        if self.reject_signatures.load(Ordering::SeqCst) {
            return Err(classify_rpc_error("personal_sign", 4001, "User rejected the request."));
        }
        Ok(format!("0x{:x}{}", message.len(), &address[2..]))
    }
}
