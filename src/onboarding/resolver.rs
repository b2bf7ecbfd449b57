//! Maps server-reported onboarding progress onto the wizard.

use super::step::{CATALOG, StepKey};
use crate::error::ProgressError;
use crate::session::WizardStep;

/// Parse reported keys into catalog keys, dropping repeats.
///
/// Order of first appearance is kept; an unknown key fails the whole call.
pub fn parse_progress<S: AsRef<str>>(keys: &[S]) -> Result<Vec<StepKey>, ProgressError> {
    let mut parsed = Vec::with_capacity(keys.len());
    for key in keys {
        let key = StepKey::parse(key.as_ref())?;
        if !parsed.contains(&key) {
            parsed.push(key);
        }
    }
    Ok(parsed)
}

/// Wizard step for a set of completed keys.
///
/// Nothing done → `Welcome`; everything done → `Dashboard`; otherwise the
/// screen after the one belonging to the most recently completed key.
pub fn resolve_step(completed: &[StepKey]) -> WizardStep {
    if completed.len() >= CATALOG.len() {
        return WizardStep::Dashboard;
    }
    match completed.last() {
        None => WizardStep::Welcome,
        Some(last) => last.phase().next().unwrap_or(WizardStep::Dashboard),
    }
}

/// Parse and resolve in one go.
pub fn resolve_reported<S: AsRef<str>>(keys: &[S]) -> Result<WizardStep, ProgressError> {
    Ok(resolve_step(&parse_progress(keys)?))
}
