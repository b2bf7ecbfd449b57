//! Helios portal: wallet authentication and onboarding state machine.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod linking;
pub mod onboarding;
pub mod routes;
pub mod session;
pub mod storage;
pub mod wallet;

#[cfg(test)]
pub(crate) mod testing;
