//! HTTP + WebSocket surface for a local UI.
//!
//! The UI reads the session snapshot, follows session events over the
//! WebSocket, and triggers invite confirmation and onboarding steps.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::AuthOrchestrator;
use crate::error::{AuthError, StepError};
use crate::onboarding::{StepExecutor, StepKey};
use crate::session::{SessionEvent, SessionStore};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthOrchestrator>,
    pub executor: Arc<StepExecutor>,
    pub session: Arc<SessionStore>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(auth: Arc<AuthOrchestrator>, executor: Arc<StepExecutor>) -> Self {
        let session = Arc::clone(auth.session());
        Self {
            auth,
            executor,
            session,
            started_at: Utc::now(),
        }
    }
}

/// Build the router with session, invite and onboarding routes.
pub fn session_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws/session", get(ws_handler))
        .route("/api/session", get(get_session))
        .route("/api/session/logout", post(logout))
        .route("/api/session/invite", post(confirm_invite).delete(abandon_invite))
        .route("/api/session/referral", post(set_referral))
        .route("/api/onboarding/steps/{step_key}", post(run_step))
        .route("/api/onboarding/claim-reward", post(claim_reward))
        .route("/api/onboarding/finish", post(finish_onboarding))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "helios-portal",
        "startedAt": state.started_at.to_rfc3339(),
    }))
}

// ── WebSocket ───────────────────────────────────────────────────────────

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state.session))
}

async fn handle_socket(mut socket: WebSocket, session: Arc<SessionStore>) {
    let client_id = Uuid::new_v4();
    info!(client = %client_id, "Session feed client connected");

    // Subscribe before the snapshot so nothing falls in between.
    let mut rx = session.subscribe();

    let sync = SessionEvent::SessionChanged {
        session: session.snapshot().await,
    };
    if !send_event(&mut socket, &sync).await {
        warn!(client = %client_id, "Failed to send initial snapshot, client disconnected");
        return;
    }

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if !send_event(&mut socket, &event).await {
                            debug!(client = %client_id, "Client disconnected during send");
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(client = %client_id, missed = n, "Session feed lagged, resyncing");
                        let sync = SessionEvent::SessionChanged {
                            session: session.snapshot().await,
                        };
                        if !send_event(&mut socket, &sync).await {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        debug!("Session broadcast channel closed");
                        break;
                    }
                }
            }

            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(client = %client_id, error = %e, "WebSocket error");
                        break;
                    }
                    // The feed is read-only.
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    info!(client = %client_id, "Session feed client disconnected");
}

async fn send_event(socket: &mut WebSocket, event: &SessionEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to serialize session event");
            true
        }
    }
}

// ── Session ─────────────────────────────────────────────────────────────

async fn get_session(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.session.snapshot().await)
}

async fn logout(State(state): State<AppState>) -> Response {
    match state.auth.logout().await {
        Ok(()) => Json(state.session.snapshot().await).into_response(),
        Err(e) => auth_error(e),
    }
}

#[derive(Deserialize)]
struct InviteRequest {
    code: String,
}

async fn confirm_invite(
    State(state): State<AppState>,
    Json(body): Json<InviteRequest>,
) -> Response {
    match state.auth.confirm_with_invite(&body.code).await {
        Ok(outcome) => Json(serde_json::json!({
            "result": outcome,
            "session": state.session.snapshot().await,
        }))
        .into_response(),
        Err(e) => auth_error(e),
    }
}

async fn abandon_invite(State(state): State<AppState>) -> Response {
    match state.auth.abandon_invite().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => auth_error(e),
    }
}

/// Either the landing URL (its `ref` parameter is used) or a bare code.
/// Both absent clears the referral.
#[derive(Deserialize)]
struct ReferralRequest {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

async fn set_referral(
    State(state): State<AppState>,
    Json(body): Json<ReferralRequest>,
) -> impl IntoResponse {
    let code = match body.url {
        Some(url) => state.auth.set_landing_url(&url),
        None => {
            state.auth.set_referral_code(body.code);
            state.auth.referral_code()
        }
    };
    Json(serde_json::json!({ "referralCode": code }))
}

// ── Onboarding ──────────────────────────────────────────────────────────

async fn run_step(State(state): State<AppState>, Path(step_key): Path<String>) -> Response {
    let key = match StepKey::parse(&step_key) {
        Ok(key) => key,
        Err(e) => return error_json(StatusCode::NOT_FOUND, e.to_string()),
    };
    match state.executor.run(key).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => step_error(e),
    }
}

async fn claim_reward(State(state): State<AppState>) -> Response {
    match state.executor.claim_reward().await {
        Ok(claim) => Json(claim).into_response(),
        Err(e) => step_error(e),
    }
}

async fn finish_onboarding(State(state): State<AppState>) -> Response {
    match state.executor.finish_onboarding().await {
        Ok(step) => Json(serde_json::json!({ "step": step })).into_response(),
        Err(e) => step_error(e),
    }
}

// ── Errors ──────────────────────────────────────────────────────────────

fn error_json(status: StatusCode, message: String) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

fn auth_error(e: AuthError) -> Response {
    let status = match &e {
        AuthError::InvalidInviteCode(_)
        | AuthError::InvalidAddress(_)
        | AuthError::UserRejectedSignature => StatusCode::BAD_REQUEST,
        AuthError::NoPendingInvite => StatusCode::CONFLICT,
        AuthError::WalletNotConnected => StatusCode::PRECONDITION_FAILED,
        AuthError::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
        AuthError::NetworkError(_) | AuthError::Wallet(_) => StatusCode::BAD_GATEWAY,
        AuthError::Storage(_) | AuthError::Progress(_) | AuthError::Session(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    warn!(error = %e, status = status.as_u16(), "Auth request failed");
    error_json(status, e.user_message())
}

fn step_error(e: StepError) -> Response {
    let status = match &e {
        StepError::NotAuthenticated => StatusCode::UNAUTHORIZED,
        StepError::UserRejected { .. } => StatusCode::BAD_REQUEST,
        StepError::ServerRejectedStep { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        StepError::SessionReset { .. } => StatusCode::CONFLICT,
        StepError::Network { .. } | StepError::Wallet { .. } => StatusCode::BAD_GATEWAY,
        StepError::Progress(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!(error = %e, status = status.as_u16(), "Onboarding request failed");
    error_json(status, e.user_message())
}
