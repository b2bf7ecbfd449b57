//! Onboarding wizard: the step catalog, the progress resolver and the
//! executors that drive each step against the portal API.

pub mod effects;
pub mod executor;
pub mod resolver;
pub mod step;

pub use effects::{AddNetworkEffect, ServerSideEffect, StepEffect, default_effects};
pub use executor::{ONBOARDING_REWARD_TYPE, RewardClaim, StepExecutor, StepOutcome, StepReport};
pub use resolver::{parse_progress, resolve_reported, resolve_step};
pub use step::{CATALOG, StepKey, StepState};
