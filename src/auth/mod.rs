//! Wallet authentication: challenge signing, the orchestrator state machine
//! and the connection watcher that drives it.

pub mod challenge;
pub mod orchestrator;
pub mod watcher;

pub use challenge::{challenge_message, sign_challenge};
pub use orchestrator::{AuthOrchestrator, AuthOutcome, referral_from_url};
pub use watcher::{ConnectionAction, ConnectionTracker, spawn_connection_watcher};
