//! Gateway orchestrator.
//!
//! Reconciles what a tenant should have (an active project with credentials)
//! with what the runtime actually shows (a gateway container and its pool
//! entries). Every operation observes state fresh and applies the smallest
//! transition that gets there, so repeating an operation is harmless.

use alloc::sync::Arc;
use core::fmt;
use core::time::Duration;
use std::io;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tenantgate_common::{CipherError, SecretCipher};
use thiserror::Error as ThisError;
use tracing::{info, warn};

use crate::app::cache::{Action, OperationRecord, RecentOperations};
use crate::app::config_store::ConfigStore;
use crate::app::directory::{
    DecryptedSecret, DirectoryError, ProjectDirectory, TenantRecord, TenantStatus,
};
use crate::pool_registry::{PoolRegistry, RegistryError};
use crate::render::{GatewaySettings, RenderInput, content_hash, render};
use crate::runtime::{
    ContainerRuntime, ContainerSpec, ContainerState, HealthcheckSpec, RuntimeError, wait_healthy,
};

const RELOAD_SIGNAL: &str = "SIGHUP";

#[expect(clippy::unwrap_used, reason = "The pattern is a literal and known to be valid")]
static TENANT_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9_]{0,62}$").unwrap());

/// Whether `tenant_id` is safe to use as a container name suffix and registry key.
#[must_use]
pub fn is_valid_tenant_id(tenant_id: &str) -> bool {
    TENANT_ID.is_match(tenant_id)
}

#[derive(Debug, ThisError)]
pub enum GatewayError {
    #[error("tenant id '{0}' is not valid")]
    InvalidTenantId(String),
    #[error("project '{0}' not found")]
    ProjectNotFound(String),
    #[error("project '{tenant_id}' is {status}, not active")]
    ProjectNotActive {
        tenant_id: String,
        status: TenantStatus,
    },
    #[error("failed to look up project")]
    Directory(#[source] DirectoryError),
    #[error("no usable secret for project '{0}'")]
    SecretNotFound(String, #[source] Option<DirectoryError>),
    #[error("failed to decrypt project secret")]
    Decryption(#[source] CipherError),
    #[error("failed to persist gateway config")]
    ConfigStore(#[source] io::Error),
    #[error("failed to register tenant with the pooling proxy")]
    PoolAdd(#[source] RegistryError),
    #[error("gateway container '{0}' is being created concurrently")]
    SpawnConflict(String),
    #[error("gateway did not become healthy in time")]
    HealthTimeout(#[source] RuntimeError),
    #[error("gateway reported unhealthy")]
    Unhealthy(#[source] RuntimeError),
    #[error("failed to start gateway")]
    SpawnFailed(#[source] RuntimeError),
    #[error("gateway '{0}' is not running")]
    NotRunning(String),
    #[error("container runtime request failed")]
    Runtime(#[source] RuntimeError),
}

impl GatewayError {
    /// Stable machine-readable code for callers.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match *self {
            Self::InvalidTenantId(_) => "invalid_tenant_id",
            Self::ProjectNotFound(_) => "project_not_found",
            Self::ProjectNotActive { .. } => "project_not_active",
            Self::SecretNotFound(..) => "secret_not_found",
            Self::Decryption(_) => "decryption_failed",
            Self::PoolAdd(_) => "pgbouncer_add_failed",
            Self::SpawnConflict(_) => "spawn_conflict",
            Self::HealthTimeout(_) => "health_timeout",
            Self::Unhealthy(_) => "gateway_unhealthy",
            Self::Directory(_) | Self::ConfigStore(_) | Self::SpawnFailed(_) => "spawn_failed",
            Self::NotRunning(_) => "not_found",
            Self::Runtime(_) => "runtime_error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpawnStatus {
    /// A new container was created and is healthy.
    Running,
    AlreadyRunning,
    /// The running container was told to re-read its changed config.
    Reloaded,
}

impl SpawnStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::AlreadyRunning => "already_running",
            Self::Reloaded => "reloaded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnOutcome {
    pub status: SpawnStatus,
    pub tenant_id: String,
    pub container_name: String,
    pub config_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DestroyStatus {
    /// A container existed and was removed.
    Stopped,
    /// No container was found; leftovers were cleared.
    CleanedUp,
}

impl DestroyStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::CleanedUp => "cleaned_up",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DestroyOutcome {
    pub status: DestroyStatus,
    pub tenant_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadOutcome {
    pub status: &'static str,
    pub tenant_id: String,
}

/// One running gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayEntry {
    pub tenant_id: String,
    pub container_name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_operation: Option<OperationRecord>,
}

/// How gateway containers are built.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub image: String,
    /// Container name is this prefix followed by the tenant id.
    pub name_prefix: String,
    pub network: Option<String>,
    /// The config directory as the container runtime's host sees it.
    pub config_host_dir: PathBuf,
    /// Where `config_host_dir` is mounted inside the gateway container.
    pub config_mount_dir: String,
    pub settings: GatewaySettings,
    /// Pooling proxy address the gateways connect through.
    pub pool_host: String,
    pub pool_port: u16,
    pub health_timeout: Duration,
    pub health_poll_interval: Duration,
}

impl GatewayOptions {
    #[must_use]
    pub fn container_name(&self, tenant_id: &str) -> String {
        format!("{}{tenant_id}", self.name_prefix)
    }

    /// Path of the tenant's config inside its gateway container.
    fn mounted_config_path(&self, tenant_id: &str) -> String {
        format!(
            "{}/{tenant_id}.conf",
            self.config_mount_dir.trim_end_matches('/')
        )
    }

    /// The config directory is bind-mounted rather than the single file: a
    /// file mount pins the inode, and rewrites replace the inode.
    fn container_spec(&self, tenant_id: &str) -> ContainerSpec {
        let config_path = self.mounted_config_path(tenant_id);
        ContainerSpec {
            name: self.container_name(tenant_id),
            image: self.image.clone(),
            command: vec!["postgrest".to_owned(), config_path.clone()],
            env: [("TENANT_ID".to_owned(), tenant_id.to_owned())].into(),
            network: self.network.clone(),
            volume_binds: vec![format!(
                "{}:{}:ro",
                self.config_host_dir.display(),
                self.config_mount_dir
            )],
            healthcheck: HealthcheckSpec::exec(vec![
                "postgrest".to_owned(),
                "--ready".to_owned(),
                config_path,
            ]),
        }
    }
}

/// Collaborators and settings for gateway lifecycle operations.
pub struct Orchestrator {
    directory: Arc<dyn ProjectDirectory>,
    cipher: Arc<SecretCipher>,
    runtime: Arc<dyn ContainerRuntime>,
    registry: PoolRegistry,
    store: ConfigStore,
    recent: RecentOperations,
    options: GatewayOptions,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .field("store", &self.store)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        directory: Arc<dyn ProjectDirectory>,
        cipher: Arc<SecretCipher>,
        runtime: Arc<dyn ContainerRuntime>,
        registry: PoolRegistry,
        store: ConfigStore,
        recent: RecentOperations,
        options: GatewayOptions,
    ) -> Self {
        Self {
            directory,
            cipher,
            runtime,
            registry,
            store,
            recent,
            options,
        }
    }

    #[must_use]
    pub const fn options(&self) -> &GatewayOptions {
        &self.options
    }

    fn validate(tenant_id: &str) -> Result<(), GatewayError> {
        if is_valid_tenant_id(tenant_id) {
            Ok(())
        } else {
            Err(GatewayError::InvalidTenantId(tenant_id.to_owned()))
        }
    }

    fn record<T>(
        &self,
        tenant_id: &str,
        action: Action,
        result: &Result<T, GatewayError>,
        status: impl FnOnce(&T) -> &'static str,
    ) {
        let outcome = match *result {
            Ok(ref value) => status(value),
            Err(ref e) => e.code(),
        };
        self.recent.record(tenant_id, action, outcome);
    }

    /// Brings the tenant's gateway to running with its current config.
    ///
    /// # Errors
    ///
    /// See [`GatewayError::code`] for the distinct failure kinds.
    #[tracing::instrument(skip_all, fields(tenant = %tenant_id))]
    pub async fn spawn(&self, tenant_id: &str) -> Result<SpawnOutcome, GatewayError> {
        Self::validate(tenant_id)?;
        let result = self.spawn_validated(tenant_id).await;
        self.record(tenant_id, Action::Spawn, &result, |outcome| outcome.status.as_str());
        match result {
            Ok(ref outcome) => info!(status = outcome.status.as_str(), "Spawn finished"),
            Err(ref e) => warn!(code = e.code(), error = ?e, "Spawn failed"),
        }
        result
    }

    async fn spawn_validated(&self, tenant_id: &str) -> Result<SpawnOutcome, GatewayError> {
        let tenant = self.resolve_tenant(tenant_id).await?;
        let secret = self.resolve_secret(tenant_id).await?;

        let text = render(
            &RenderInput {
                tenant_id,
                db_name: &tenant.db_name,
                db_password: &secret.db_password,
                jwt_secret: &secret.jwt_secret,
                host: &self.options.pool_host,
                port: self.options.pool_port,
            },
            &self.options.settings,
        );
        let config_hash = content_hash(&text);
        let previous = self
            .store
            .read(tenant_id)
            .await
            .map_err(GatewayError::ConfigStore)?;
        let previous_hash = previous.as_deref().map(content_hash);
        let config_changed = previous_hash.as_deref() != Some(config_hash.as_str());

        // Observed before writing, so a failed lookup leaves the old config as the baseline
        let container_name = self.options.container_name(tenant_id);
        let state = self
            .runtime
            .inspect(&container_name)
            .await
            .map_err(GatewayError::SpawnFailed)?;

        if config_changed {
            self.store
                .write(tenant_id, text)
                .await
                .map_err(GatewayError::ConfigStore)?;
            info!(%config_hash, "Wrote gateway config");
        }

        let status = match state {
            ContainerState::Running | ContainerState::Healthy | ContainerState::Unhealthy => {
                if config_changed {
                    if let Err(e) = self.runtime.signal(&container_name, RELOAD_SIGNAL).await {
                        self.restore_config(tenant_id, previous).await;
                        return Err(GatewayError::SpawnFailed(e));
                    }
                    SpawnStatus::Reloaded
                } else {
                    SpawnStatus::AlreadyRunning
                }
            }
            ContainerState::Stopped => {
                info!(container = %container_name, "Removing stopped gateway before respawn");
                self.runtime
                    .remove(&container_name)
                    .await
                    .map_err(GatewayError::SpawnFailed)?;
                self.create_gateway(&tenant, &secret).await?;
                SpawnStatus::Running
            }
            ContainerState::Absent => {
                self.create_gateway(&tenant, &secret).await?;
                SpawnStatus::Running
            }
        };

        Ok(SpawnOutcome {
            status,
            tenant_id: tenant_id.to_owned(),
            container_name,
            config_hash,
        })
    }

    /// Puts back the config a running gateway still uses after its reload
    /// signal failed, so the next spawn sees the change again.
    async fn restore_config(&self, tenant_id: &str, previous: Option<String>) {
        let restored = match previous {
            Some(text) => self.store.write(tenant_id, text).await,
            None => self.store.remove(tenant_id).await.map(|_| ()),
        };
        match restored {
            Ok(()) => info!("Restored previous gateway config"),
            Err(e) => warn!(error = ?e, "Failed to restore previous gateway config"),
        }
    }

    async fn resolve_tenant(&self, tenant_id: &str) -> Result<TenantRecord, GatewayError> {
        let tenant = self
            .directory
            .tenant(tenant_id)
            .await
            .map_err(GatewayError::Directory)?
            .ok_or_else(|| GatewayError::ProjectNotFound(tenant_id.to_owned()))?;
        if tenant.status != TenantStatus::Active {
            return Err(GatewayError::ProjectNotActive {
                tenant_id: tenant_id.to_owned(),
                status: tenant.status,
            });
        }
        Ok(tenant)
    }

    async fn resolve_secret(&self, tenant_id: &str) -> Result<DecryptedSecret, GatewayError> {
        let encrypted = self
            .directory
            .encrypted_secret(tenant_id)
            .await
            .map_err(|e| GatewayError::SecretNotFound(tenant_id.to_owned(), Some(e)))?
            .ok_or_else(|| GatewayError::SecretNotFound(tenant_id.to_owned(), None))?;
        Ok(DecryptedSecret {
            jwt_secret: self
                .cipher
                .decrypt(&encrypted.jwt_secret)
                .map_err(GatewayError::Decryption)?,
            db_password: self
                .cipher
                .decrypt(&encrypted.db_password)
                .map_err(GatewayError::Decryption)?,
        })
    }

    /// Registers the tenant with the pool, then creates, starts and awaits the container.
    ///
    /// A started container is left in place on later failures.
    async fn create_gateway(
        &self,
        tenant: &TenantRecord,
        secret: &DecryptedSecret,
    ) -> Result<(), GatewayError> {
        self.registry
            .add_tenant(&tenant.id, &tenant.db_name, &secret.db_password)
            .await
            .map_err(GatewayError::PoolAdd)?;

        let spec = self.options.container_spec(&tenant.id);
        self.runtime.create(&spec).await.map_err(|e| match e {
            RuntimeError::Conflict(name) => GatewayError::SpawnConflict(name),
            other => GatewayError::SpawnFailed(other),
        })?;
        self.runtime
            .start(&spec.name)
            .await
            .map_err(GatewayError::SpawnFailed)?;

        wait_healthy(
            self.runtime.as_ref(),
            &spec.name,
            self.options.health_timeout,
            self.options.health_poll_interval,
        )
        .await
        .map_err(|e| match e {
            RuntimeError::HealthTimeout { .. } => GatewayError::HealthTimeout(e),
            RuntimeError::Unhealthy(_) => GatewayError::Unhealthy(e),
            other => GatewayError::SpawnFailed(other),
        })?;
        info!(container = %spec.name, "Gateway is healthy");
        Ok(())
    }

    /// Removes everything belonging to the tenant, tolerating partial leftovers.
    ///
    /// Each cleanup step runs regardless of the others; failures are logged.
    ///
    /// # Errors
    ///
    /// Only rejects an invalid tenant id.
    #[tracing::instrument(skip_all, fields(tenant = %tenant_id))]
    pub async fn destroy(&self, tenant_id: &str) -> Result<DestroyOutcome, GatewayError> {
        Self::validate(tenant_id)?;
        let container_name = self.options.container_name(tenant_id);

        let removed = match self.runtime.exists(&container_name).await {
            Ok(true) => {
                if let Err(e) = self.runtime.stop(&container_name).await
                    && !e.is_not_found()
                {
                    warn!(error = ?e, "Failed to stop gateway, removing anyway");
                }
                match self.runtime.remove(&container_name).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(error = ?e, "Failed to remove gateway container");
                        false
                    }
                }
            }
            Ok(false) => false,
            Err(e) => {
                warn!(error = ?e, "Failed to look up gateway container");
                false
            }
        };

        if let Err(e) = self.registry.remove_tenant(tenant_id).await {
            warn!(error = ?e, "Failed to remove pool entries");
        }
        if let Err(e) = self.store.remove(tenant_id).await {
            warn!(error = ?e, "Failed to delete gateway config");
        }

        let status = if removed {
            DestroyStatus::Stopped
        } else {
            DestroyStatus::CleanedUp
        };
        info!(status = status.as_str(), "Destroy finished");
        let result = Ok(DestroyOutcome {
            status,
            tenant_id: tenant_id.to_owned(),
        });
        self.record(tenant_id, Action::Destroy, &result, |outcome| outcome.status.as_str());
        result
    }

    /// Tells a running gateway to re-read its config without regenerating it.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotRunning`] when there is no running gateway.
    #[tracing::instrument(skip_all, fields(tenant = %tenant_id))]
    pub async fn reload(&self, tenant_id: &str) -> Result<ReloadOutcome, GatewayError> {
        Self::validate(tenant_id)?;
        let result = self.reload_validated(tenant_id).await;
        self.record(tenant_id, Action::Reload, &result, |outcome| outcome.status);
        result
    }

    async fn reload_validated(&self, tenant_id: &str) -> Result<ReloadOutcome, GatewayError> {
        let container_name = self.options.container_name(tenant_id);
        if !self
            .runtime
            .is_running(&container_name)
            .await
            .map_err(GatewayError::Runtime)?
        {
            return Err(GatewayError::NotRunning(container_name));
        }
        self.runtime
            .signal(&container_name, RELOAD_SIGNAL)
            .await
            .map_err(|e| match e {
                RuntimeError::NotFound(name) => GatewayError::NotRunning(name),
                other => GatewayError::Runtime(other),
            })?;
        info!(container = %container_name, "Sent reload signal");
        Ok(ReloadOutcome {
            status: "reloaded",
            tenant_id: tenant_id.to_owned(),
        })
    }

    /// Running gateways with their last recorded operation.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot list containers.
    #[tracing::instrument(skip_all)]
    pub async fn list(&self) -> Result<Vec<GatewayEntry>, GatewayError> {
        let prefix = &self.options.name_prefix;
        let containers = self
            .runtime
            .list(false, prefix)
            .await
            .map_err(GatewayError::Runtime)?;
        Ok(containers
            .into_iter()
            .filter_map(|summary| {
                let tenant_id = summary.name.strip_prefix(prefix.as_str())?.to_owned();
                Some(GatewayEntry {
                    last_operation: self.recent.last(&tenant_id),
                    tenant_id,
                    container_name: summary.name,
                    status: summary.status,
                })
            })
            .collect())
    }
}
