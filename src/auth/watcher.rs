//! Connection watcher: reacts to wallet connect/disconnect transitions.
//!
//! Transitions are debounced: a state is acted on only once it has been
//! stable for the debounce window, and only if it differs from the last
//! state acted on.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::orchestrator::AuthOrchestrator;
use crate::session::ResetReason;
use crate::wallet::WalletConnection;

/// How often an idle watcher checks its shutdown flag.
const SHUTDOWN_POLL: Duration = Duration::from_millis(250);

/// What a connection transition asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    Authenticate(String),
    /// Connected → disconnected.
    EndSession,
    /// Connected to a different account than before.
    SwitchAccount(String),
}

/// Remembers the last observed connection state.
#[derive(Debug, Default)]
pub struct ConnectionTracker {
    last: Option<WalletConnection>,
}

impl ConnectionTracker {
    pub fn observe(&mut self, next: WalletConnection) -> Option<ConnectionAction> {
        let previous = self.last.replace(next.clone());
        if previous.as_ref() == Some(&next) {
            return None;
        }
        let was_connected = previous.as_ref().is_some_and(|p| p.connected);
        let connected = next.connected;

        match next.address.filter(|a| connected && !a.trim().is_empty()) {
            Some(address) => {
                let previous_address = previous
                    .filter(|p| p.connected)
                    .and_then(|p| p.address);
                match previous_address {
                    Some(prev) if !prev.eq_ignore_ascii_case(&address) => {
                        Some(ConnectionAction::SwitchAccount(address))
                    }
                    Some(_) => None,
                    None => Some(ConnectionAction::Authenticate(address)),
                }
            }
            // A disconnected wallet at boot must not wipe a stored token.
            None if was_connected => Some(ConnectionAction::EndSession),
            None => None,
        }
    }
}

/// Spawn the watcher over the orchestrator's wallet.
///
/// Returns a `JoinHandle` and a shutdown flag. Set the flag to stop.
pub fn spawn_connection_watcher(
    auth: Arc<AuthOrchestrator>,
    debounce: Duration,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(debounce_ms = debounce.as_millis() as u64, "Connection watcher started");
        let mut events = auth.wallet().connection_events();
        let mut tracker = ConnectionTracker::default();
        let mut latest: Option<WalletConnection> = None;

        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!("Connection watcher shutting down");
                return;
            }

            let wait = if latest.is_some() { debounce } else { SHUTDOWN_POLL };
            match tokio::time::timeout(wait, events.next()).await {
                // New state: restart the window.
                Ok(Some(connection)) => latest = Some(connection),
                Ok(None) => {
                    if let Some(connection) = latest.take() {
                        if let Some(action) = tracker.observe(connection) {
                            dispatch(&auth, action).await;
                        }
                    }
                    info!("Wallet connection stream ended");
                    return;
                }
                Err(_) => {
                    if let Some(connection) = latest.take() {
                        debug!(connected = connection.connected, "Connection state settled");
                        if let Some(action) = tracker.observe(connection) {
                            dispatch(&auth, action).await;
                        }
                    }
                }
            }
        }
    });

    (handle, shutdown_flag)
}

async fn dispatch(auth: &Arc<AuthOrchestrator>, action: ConnectionAction) {
    match action {
        ConnectionAction::Authenticate(address) => spawn_authenticate(auth, address),
        ConnectionAction::EndSession => {
            info!("Wallet disconnected, ending session");
            if let Err(e) = auth.end_session(ResetReason::WalletDisconnected).await {
                warn!(error = %e, "Failed to end session after disconnect");
            }
        }
        ConnectionAction::SwitchAccount(address) => {
            info!(wallet = %address, "Wallet account switched");
            if let Err(e) = auth.end_session(ResetReason::AccountChanged).await {
                warn!(error = %e, "Failed to end previous session");
            }
            spawn_authenticate(auth, address);
        }
    }
}

/// Run authentication off the watcher loop so later transitions are
/// still observed while a signature prompt is open.
fn spawn_authenticate(auth: &Arc<AuthOrchestrator>, address: String) {
    let auth = Arc::clone(auth);
    tokio::spawn(async move {
        match auth.authenticate(&address).await {
            Ok(outcome) => info!(wallet = %address, outcome = ?outcome, "Wallet authenticated"),
            Err(e) => warn!(
                wallet = %address,
                error = %e,
                message = %e.user_message(),
                retryable = e.is_retryable(),
                "Wallet authentication failed"
            ),
        }
    });
}
