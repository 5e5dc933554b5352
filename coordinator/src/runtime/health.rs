//! Bounded health polling for freshly started containers.

use core::time::Duration;

use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::debug;

use super::{ContainerRuntime, ContainerState, RuntimeError};

/// Polls `name` until it reports healthy.
///
/// # Errors
///
/// Returns [`RuntimeError::Unhealthy`] as soon as the runtime reports the
/// container unhealthy, [`RuntimeError::HealthTimeout`] once `timeout` elapses
/// in any other state, and any error from inspecting the container.
pub async fn wait_healthy(
    runtime: &dyn ContainerRuntime,
    name: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<(), RuntimeError> {
    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let start = Instant::now();
    loop {
        ticker.tick().await;
        let state = runtime.inspect(name).await?;
        debug!(container = %name, ?state, "Polled container health");
        match state {
            ContainerState::Healthy => return Ok(()),
            ContainerState::Unhealthy => return Err(RuntimeError::Unhealthy(name.to_string())),
            ContainerState::Absent | ContainerState::Stopped | ContainerState::Running => {}
        }
        let waited = start.elapsed();
        if waited >= timeout {
            return Err(RuntimeError::HealthTimeout {
                name: name.to_string(),
                waited,
            });
        }
    }
}
