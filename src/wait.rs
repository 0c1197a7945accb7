//! Fixed-interval polling for container host deployment state.
//!
//! After a create, Cartel reports the host as `provisioning` (or
//! `indeterminate`) until it settles. [`wait_for_deployment`] polls until the
//! host reaches `succeeded`, hits a terminal failure state, reports a state
//! it does not know, or the timeout elapses.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cartel::{CartelApi, CartelError, DeploymentState};
use crate::config::{
    DEFAULT_CREATE_TIMEOUT_SECS, DEFAULT_POLL_DELAY_SECS, DEFAULT_POLL_INTERVAL_SECS,
};

/// Polling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Wait before the first poll.
    pub delay: Duration,
    /// Wait between polls.
    pub interval: Duration,
    /// Total time allowed, including the initial delay.
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(DEFAULT_POLL_DELAY_SECS),
            interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            timeout: Duration::from_secs(DEFAULT_CREATE_TIMEOUT_SECS),
        }
    }
}

/// Why a wait ended without reaching `succeeded`.
#[derive(Debug, Error)]
pub enum WaitError {
    #[error("failed to reach target state, reason: {0}")]
    TerminalState(DeploymentState),

    #[error("unexpected state '{0}', wanted target 'succeeded'")]
    UnexpectedState(DeploymentState),

    #[error("timeout while waiting for state to become 'succeeded' (last state: '{}', timeout: {timeout:?})", state_name(.last_state))]
    Timeout {
        last_state: Option<DeploymentState>,
        timeout: Duration,
    },

    #[error("deployment state lookup failed: {0}")]
    Lookup(#[from] CartelError),
}

fn state_name(state: &Option<DeploymentState>) -> &str {
    state.as_ref().map(DeploymentState::as_str).unwrap_or("none")
}

/// Poll `refresh` until it reports `succeeded`.
///
/// Returns the number of polls made.
pub async fn wait_for_state<F, Fut>(
    config: &PollConfig,
    resource_name: &str,
    mut refresh: F,
) -> Result<u32, WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<DeploymentState, CartelError>>,
{
    let start = Instant::now();
    let deadline = start + config.timeout;
    let mut polls = 0u32;
    let mut last_state = None;

    tokio::time::sleep_until((start + config.delay).min(deadline)).await;

    loop {
        polls += 1;
        let remaining = deadline.saturating_duration_since(Instant::now());
        let state = match tokio::time::timeout(remaining, refresh()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(WaitError::Timeout {
                    last_state,
                    timeout: config.timeout,
                })
            }
        };

        if state == DeploymentState::Succeeded {
            debug!(resource = %resource_name, polls, "Deployment succeeded");
            return Ok(polls);
        }
        if state.is_terminal_failure() {
            warn!(resource = %resource_name, state = %state, polls, "Deployment failed");
            return Err(WaitError::TerminalState(state));
        }
        if !state.is_pending() {
            warn!(resource = %resource_name, state = %state, "Unexpected deployment state");
            return Err(WaitError::UnexpectedState(state));
        }

        debug!(
            resource = %resource_name,
            state = %state,
            attempt = polls,
            delay_ms = config.interval.as_millis(),
            "Deployment pending, retrying"
        );
        last_state = Some(state);

        if Instant::now() >= deadline {
            return Err(WaitError::Timeout {
                last_state,
                timeout: config.timeout,
            });
        }
        tokio::time::sleep_until((Instant::now() + config.interval).min(deadline)).await;
    }
}

/// Poll Cartel for the deployment state of `name_tag` until it settles.
pub async fn wait_for_deployment(
    api: &dyn CartelApi,
    name_tag: &str,
    config: &PollConfig,
) -> Result<u32, WaitError> {
    wait_for_state(config, name_tag, || api.get_deployment_state(name_tag)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn instant() -> PollConfig {
        PollConfig {
            delay: Duration::ZERO,
            interval: Duration::ZERO,
            timeout: Duration::from_secs(5),
        }
    }

    fn script(states: &[&str]) -> Mutex<VecDeque<DeploymentState>> {
        Mutex::new(states.iter().map(|s| s.parse().unwrap()).collect())
    }

    async fn next(states: &Mutex<VecDeque<DeploymentState>>) -> Result<DeploymentState, CartelError> {
        Ok(states
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(DeploymentState::Provisioning))
    }

    #[tokio::test]
    async fn test_succeeds_after_pending_polls() {
        let states = script(&["provisioning", "indeterminate", "succeeded"]);
        let polls = wait_for_state(&instant(), "host-1", || next(&states))
            .await
            .unwrap();
        assert_eq!(polls, 3);
    }

    #[tokio::test]
    async fn test_terminal_failure() {
        let states = script(&["provisioning", "failed"]);
        let err = wait_for_state(&instant(), "host-1", || next(&states))
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::TerminalState(DeploymentState::Failed)));
        assert_eq!(err.to_string(), "failed to reach target state, reason: failed");
    }

    #[tokio::test]
    async fn test_unexpected_state() {
        let states = script(&["rebooting"]);
        let err = wait_for_state(&instant(), "host-1", || next(&states))
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::UnexpectedState(_)));
    }

    #[tokio::test]
    async fn test_lookup_error_aborts() {
        let err = wait_for_state(&instant(), "host-1", || async {
            Err(CartelError::rejected(500, "boom"))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, WaitError::Lookup(_)));
    }

    #[tokio::test]
    async fn test_timeout() {
        let config = PollConfig {
            timeout: Duration::ZERO,
            ..instant()
        };
        let states = script(&["provisioning"]);
        let err = wait_for_state(&config, "host-1", || next(&states))
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_interval_respected() {
        let config = PollConfig {
            delay: Duration::from_millis(5),
            interval: Duration::from_millis(5),
            timeout: Duration::from_secs(5),
        };
        let states = script(&["provisioning", "succeeded"]);
        let start = std::time::Instant::now();
        let polls = wait_for_state(&config, "host-1", || next(&states))
            .await
            .unwrap();
        assert_eq!(polls, 2);
        assert!(start.elapsed() >= Duration::from_millis(10));
    }
}
