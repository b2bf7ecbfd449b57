//! Session state: wizard position, cached user and auth token.

pub mod step;
pub mod store;

pub use step::WizardStep;
pub use store::{
    PendingInvite, ResetReason, Session, SessionEvent, SessionSnapshot, SessionStore,
    SessionUpdate,
};
