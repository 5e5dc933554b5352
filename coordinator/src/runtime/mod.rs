//! Container lifecycle client.
//!
//! The orchestrator talks to the container runtime only through the
//! [`ContainerRuntime`] trait. [`DockerClient`] implements it against the Docker
//! Engine HTTP API, reached through an access-filtering socket proxy.

mod docker;
mod exec;
mod health;

use alloc::collections::BTreeMap;
use core::iter;
use core::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error as ThisError;

pub use docker::DockerClient;
pub use exec::{ExecOutput, demux_stream};
pub use health::wait_healthy;

/// Observed state of a single container. Never cached across operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Absent,
    Stopped,
    /// Running without a health verdict yet.
    Running,
    Healthy,
    Unhealthy,
}

impl ContainerState {
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Running | Self::Healthy | Self::Unhealthy)
    }
}

/// Liveness check embedded into a created container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthcheckSpec {
    /// Run directly inside the container, without a shell.
    pub command: Vec<String>,
    pub interval: Duration,
    pub timeout: Duration,
    pub retries: u32,
    pub start_period: Duration,
}

impl HealthcheckSpec {
    /// Runs `command` with the standard gateway timings.
    ///
    /// Gateway images may ship without a shell, so there is no `CMD-SHELL` variant.
    #[must_use]
    pub const fn exec(command: Vec<String>) -> Self {
        Self {
            command,
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            retries: 3,
            start_period: Duration::from_secs(30),
        }
    }

    /// The runtime's `Test` array: `CMD` followed by the command.
    #[must_use]
    pub fn test(&self) -> Vec<&str> {
        iter::once("CMD")
            .chain(self.command.iter().map(String::as_str))
            .collect()
    }
}

/// Everything needed to create a container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub network: Option<String>,
    /// `host_path:container_path[:mode]` entries.
    pub volume_binds: Vec<String>,
    pub healthcheck: HealthcheckSpec,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedContainer {
    pub id: String,
    pub name: String,
}

/// One entry of a container listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    /// Name without the runtime's leading `/`.
    pub name: String,
    /// Coarse state, e.g. `running` or `exited`.
    pub state: String,
    /// Human readable status, e.g. `Up 5 minutes (healthy)`.
    pub status: String,
}

#[derive(Debug, ThisError)]
pub enum RuntimeError {
    #[error("container '{0}' not found")]
    NotFound(String),
    #[error("container name '{0}' is already in use")]
    Conflict(String),
    #[error("runtime API returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("runtime API request failed")]
    Transport(#[from] reqwest::Error),
    #[error("command in '{container}' exited with {exit_code}: {stderr}")]
    ExecFailed {
        container: String,
        exit_code: i64,
        stderr: String,
    },
    #[error("container '{0}' reported unhealthy")]
    Unhealthy(String),
    #[error("container '{name}' did not become healthy within {waited:?}")]
    HealthTimeout { name: String, waited: Duration },
}

impl RuntimeError {
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(*self, Self::NotFound(_))
    }
}

/// Lifecycle operations against a container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Lists containers whose name starts with `name_prefix`, stopped ones too when `all` is set.
    async fn list(&self, all: bool, name_prefix: &str)
    -> Result<Vec<ContainerSummary>, RuntimeError>;

    /// Current state of `name`; a missing container is [`ContainerState::Absent`].
    async fn inspect(&self, name: &str) -> Result<ContainerState, RuntimeError>;

    async fn create(&self, spec: &ContainerSpec) -> Result<CreatedContainer, RuntimeError>;

    /// Starts a created container. Already running is success.
    async fn start(&self, name: &str) -> Result<(), RuntimeError>;

    /// Stops a container. Already stopped is success.
    async fn stop(&self, name: &str) -> Result<(), RuntimeError>;

    /// Force-removes a container. Not found is success.
    async fn remove(&self, name: &str) -> Result<(), RuntimeError>;

    /// Delivers a process signal such as `SIGHUP`.
    async fn signal(&self, name: &str, signal: &str) -> Result<(), RuntimeError>;

    /// Runs `command` inside another, already running container and collects its output.
    async fn exec_in_other(
        &self,
        container: &str,
        command: &[String],
        user: Option<&str>,
    ) -> Result<ExecOutput, RuntimeError>;

    async fn exists(&self, name: &str) -> Result<bool, RuntimeError> {
        Ok(self.list(true, name).await?.iter().any(|c| c.name == name))
    }

    async fn is_running(&self, name: &str) -> Result<bool, RuntimeError> {
        Ok(self.list(false, name).await?.iter().any(|c| c.name == name))
    }
}
