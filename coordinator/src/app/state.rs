use alloc::sync::Arc;
use std::fs;
use std::os::unix::fs::PermissionsExt as _;
use std::path::{Path, PathBuf};

use eyre::WrapErr as _;
use secrecy::{ExposeSecret as _, SecretString};
use tenantgate_common::SecretCipher;
use tracing::{info, warn};

use crate::{
    app::{
        cache::RecentOperations,
        config_store::ConfigStore,
        directory::PgProjectDirectory,
        orchestrator::{GatewayOptions, Orchestrator},
    },
    config::{ServiceConfig, load, resolve_config_relative_paths},
    pool_registry::{PoolRegistry, PoolSettings},
    runtime::{ContainerRuntime, DockerClient},
};

/// Application state shared across request handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Pre-shared key every control request must present.
    pub control_key: Arc<SecretString>,
}

impl AppState {
    #[must_use]
    pub const fn new(orchestrator: Arc<Orchestrator>, control_key: Arc<SecretString>) -> Self {
        Self {
            orchestrator,
            control_key,
        }
    }
}

/// Builds the orchestrator and its collaborators from a loaded config.
///
/// # Errors
///
/// Returns an error if the runtime endpoint, the cipher key or the directory URL is invalid.
pub fn build_orchestrator(config: &ServiceConfig, config_path: &Path) -> eyre::Result<Orchestrator> {
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(
        DockerClient::new(&config.runtime.endpoint, config.runtime.request_timeout())
            .wrap_err("Invalid container runtime endpoint")?,
    );
    let cipher = SecretCipher::from_base64(&config.secrets.key)
        .wrap_err("Invalid secrets.key, expected base64 of 32 bytes")?;
    let directory = PgProjectDirectory::connect_lazy(
        config.directory.database_url.expose_secret(),
        config.directory.max_connections,
    )
    .wrap_err("Invalid directory.database_url")?;

    let pool = &config.pool;
    let registry = PoolRegistry::new(
        Arc::clone(&runtime),
        PoolSettings {
            container: pool.container.clone(),
            database_host: pool.database_host.clone(),
            database_port: pool.database_port,
            ini_path: resolve_config_relative_paths(config_path, &pool.ini_path),
            userlist_path: resolve_config_relative_paths(config_path, &pool.userlist_path),
            reload_command: pool.reload_command.clone(),
            exec_user: pool.exec_user.clone(),
        },
    );

    let gateway = &config.gateway;
    let config_dir = resolve_config_relative_paths(config_path, &gateway.config_dir);
    let config_host_dir = gateway
        .config_host_dir
        .as_ref()
        .map_or_else(|| config_dir.clone(), PathBuf::from);
    info!(config_dir = %config_dir.display(), config_host_dir = %config_host_dir.display(), "Gateway config locations");

    Ok(Orchestrator::new(
        Arc::new(directory),
        Arc::new(cipher),
        runtime,
        registry,
        ConfigStore::new(config_dir),
        RecentOperations::new(config.cache.recent_operations),
        GatewayOptions {
            image: gateway.image.clone(),
            name_prefix: gateway.name_prefix.clone(),
            network: gateway.network.clone(),
            config_host_dir,
            config_mount_dir: gateway.config_mount_dir.clone(),
            settings: gateway.settings(),
            pool_host: pool.host.clone(),
            pool_port: pool.port,
            health_timeout: gateway.health_timeout(),
            health_poll_interval: gateway.health_poll_interval(),
        },
    ))
}

/// Emit startup warnings based on configuration.
fn emit_startup_warnings(config: &ServiceConfig, config_path: &Path) {
    if let Ok(metadata) = fs::metadata(config_path) {
        let mode = metadata.permissions().mode();
        if mode & 0o077 != 0 {
            warn!(
                "Config file permissions are too permissive (current: {mode:#o}). Run 'chmod 600 {}' to restrict access to owner only.",
                config_path.display()
            );
        }
    }

    if config.server.control_key.expose_secret().len() < 32 {
        warn!("server.control_key is shorter than 32 characters. Generate one with 'generate-key'.");
    }

    if config.server.bind != "127.0.0.1" && config.server.bind != "::1" {
        warn!(
            bind = %config.server.bind,
            "Control surface is reachable beyond localhost without TLS. Keep it on an internal network."
        );
    }
}

/// Loads the config and initializes application state.
#[tracing::instrument(skip_all)]
pub(super) async fn initialize_state(config_path: &Path) -> eyre::Result<(AppState, ServiceConfig)> {
    let config = load(config_path).await?;
    let orchestrator = build_orchestrator(&config, config_path)?;
    emit_startup_warnings(&config, config_path);

    let app_state = AppState::new(Arc::new(orchestrator), Arc::clone(&config.server.control_key));
    Ok((app_state, config))
}
