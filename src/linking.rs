//! Link poller: waits for an out-of-band account link (e.g. a social
//! account connected in another tab) to show up on the user's profile.
//!
//! Polls the profile with exponential backoff and jitter, gives up after
//! the configured maximum duration, and stops early when its shutdown flag
//! is set.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{PortalApi, User};
use crate::config::PollConfig;
use crate::error::{LinkError, SessionError};
use crate::session::{SessionStore, SessionUpdate};

/// Upper bound on how long a sleeping poller ignores its shutdown flag.
const SHUTDOWN_SLICE: Duration = Duration::from_millis(100);

/// Relative jitter applied to each delay.
const JITTER: f64 = 0.1;

/// How a poll run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    /// The predicate matched the refreshed user.
    Linked(User),
    TimedOut { elapsed: Duration },
    Cancelled,
}

/// Delay after `current`: multiplied by the backoff factor, capped.
pub fn next_delay(current: Duration, config: &PollConfig) -> Duration {
    current
        .mul_f64(config.backoff_factor.max(1.0))
        .min(config.max_interval)
}

/// `delay` ± 10%.
pub fn jittered(delay: Duration) -> Duration {
    let factor = 1.0 + rand::thread_rng().gen_range(-JITTER..=JITTER);
    delay.mul_f64(factor)
}

/// Spawn a poller that refreshes the session user until `linked` holds.
///
/// Returns a `JoinHandle` and a shutdown flag. Set the flag to stop.
pub fn spawn_link_poller<P>(
    api: Arc<dyn PortalApi>,
    session: Arc<SessionStore>,
    config: PollConfig,
    linked: P,
) -> (JoinHandle<Result<LinkOutcome, LinkError>>, Arc<AtomicBool>)
where
    P: Fn(&User) -> bool + Send + 'static,
{
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(
            base_ms = config.base_interval.as_millis() as u64,
            max_secs = config.max_duration.as_secs(),
            "Link poller started"
        );
        let started = Instant::now();
        let mut delay = config.base_interval;

        loop {
            let elapsed = started.elapsed();
            if elapsed >= config.max_duration {
                info!(elapsed_secs = elapsed.as_secs(), "Link poller timed out");
                return Ok(LinkOutcome::TimedOut { elapsed });
            }
            let wait = jittered(delay).min(config.max_duration - elapsed);
            if !sleep_unless_cancelled(&shutdown, wait).await {
                info!("Link poller cancelled");
                return Ok(LinkOutcome::Cancelled);
            }

            match refresh_user(api.as_ref(), &session).await {
                Ok(user) if linked(&user) => {
                    info!(wallet = %user.wallet, "Account link detected");
                    return Ok(LinkOutcome::Linked(user));
                }
                Ok(_) => debug!(next_ms = delay.as_millis() as u64, "Account not linked yet"),
                Err(LinkError::Api(e)) if e.is_network() => {
                    warn!(error = %e, "Link poll failed, will retry");
                }
                Err(e) => {
                    warn!(error = %e, "Link poller stopping");
                    return Err(e);
                }
            }
            delay = next_delay(delay, &config);
        }
    });

    (handle, shutdown_flag)
}

/// Sleep for `duration`; false if the flag was set meanwhile.
async fn sleep_unless_cancelled(shutdown: &AtomicBool, duration: Duration) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return false;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return true;
        }
        tokio::time::sleep(remaining.min(SHUTDOWN_SLICE)).await;
    }
}

/// Fetch the profile for the current session and store it.
async fn refresh_user(api: &dyn PortalApi, session: &SessionStore) -> Result<User, LinkError> {
    let current = session.current().await;
    let (Some(token), Some(wallet)) = (current.auth_token.as_ref(), current.wallet()) else {
        return Err(LinkError::SessionEnded);
    };
    let user = api.profile(token, wallet).await?;
    match session
        .apply_in(current.epoch, SessionUpdate::RefreshUser(user.clone()))
        .await
    {
        Ok(_) => Ok(user),
        Err(SessionError::Stale { .. }) => Err(LinkError::SessionEnded),
        Err(e) => {
            warn!(error = %e, "Refreshed user rejected by session");
            Err(LinkError::SessionEnded)
        }
    }
}
