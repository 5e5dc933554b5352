//! Configuration data types for the control service.
//!
//! Every section except `[server]`, `[directory]` and `[secrets]` may be
//! omitted and falls back to the defaults of a single-host compose setup.

use alloc::sync::Arc;
use core::time::Duration;
use std::path::{Component, Path, PathBuf};

use secrecy::SecretString;
use serde::Deserialize;

use crate::render::GatewaySettings;

/// HTTP server binding configuration section.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// TCP port for the control service.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bind address for the HTTP listener.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Pre-shared key expected in `X-Control-Key` or as a bearer token.
    pub control_key: Arc<SecretString>,
}

/// Container runtime API, normally a filtering socket proxy.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    #[serde(default = "default_runtime_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            endpoint: default_runtime_endpoint(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl RuntimeConfig {
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Per-tenant gateway containers.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_image")]
    pub image: String,
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
    /// Network the gateways join; the runtime default when omitted.
    #[serde(default)]
    pub network: Option<String>,
    /// Where this service writes the rendered configs. Relative to the config file when not absolute.
    #[serde(default = "default_config_dir")]
    pub config_dir: String,
    /// The same directory as seen by the container runtime's host, if it differs.
    #[serde(default)]
    pub config_host_dir: Option<String>,
    /// Where the gateways see `config_dir`. The whole directory is mounted so rewrites stay visible.
    #[serde(default = "default_config_mount_dir")]
    pub config_mount_dir: String,
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    #[serde(default = "default_admin_port")]
    pub admin_port: u16,
    #[serde(default = "default_db_schemas")]
    pub db_schemas: String,
    #[serde(default = "default_db_anon_role")]
    pub db_anon_role: String,
    #[serde(default = "default_db_pool")]
    pub db_pool: u16,
    #[serde(default = "default_health_timeout_secs")]
    pub health_timeout_secs: u64,
    #[serde(default = "default_health_poll_interval_ms")]
    pub health_poll_interval_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            image: default_gateway_image(),
            name_prefix: default_name_prefix(),
            network: None,
            config_dir: default_config_dir(),
            config_host_dir: None,
            config_mount_dir: default_config_mount_dir(),
            server_port: default_server_port(),
            admin_port: default_admin_port(),
            db_schemas: default_db_schemas(),
            db_anon_role: default_db_anon_role(),
            db_pool: default_db_pool(),
            health_timeout_secs: default_health_timeout_secs(),
            health_poll_interval_ms: default_health_poll_interval_ms(),
        }
    }
}

impl GatewayConfig {
    #[must_use]
    pub const fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }

    #[must_use]
    pub const fn health_poll_interval(&self) -> Duration {
        Duration::from_millis(self.health_poll_interval_ms)
    }

    /// The tenant-independent part of every rendered gateway config.
    #[must_use]
    pub fn settings(&self) -> GatewaySettings {
        GatewaySettings {
            db_schemas: self.db_schemas.clone(),
            db_anon_role: self.db_anon_role.clone(),
            db_pool: self.db_pool,
            server_port: self.server_port,
            admin_port: self.admin_port,
        }
    }
}

/// The shared connection-pooling proxy.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Container that receives reload commands.
    #[serde(default = "default_pool_container")]
    pub container: String,
    /// Address gateways use to reach the proxy.
    #[serde(default = "default_pool_host")]
    pub host: String,
    #[serde(default = "default_pool_port")]
    pub port: u16,
    /// Database server the proxy routes tenant databases to.
    #[serde(default = "default_database_host")]
    pub database_host: String,
    #[serde(default = "default_database_port")]
    pub database_port: u16,
    #[serde(default = "default_ini_path")]
    pub ini_path: String,
    #[serde(default = "default_userlist_path")]
    pub userlist_path: String,
    #[serde(default = "default_reload_command")]
    pub reload_command: Vec<String>,
    #[serde(default)]
    pub exec_user: Option<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            container: default_pool_container(),
            host: default_pool_host(),
            port: default_pool_port(),
            database_host: default_database_host(),
            database_port: default_database_port(),
            ini_path: default_ini_path(),
            userlist_path: default_userlist_path(),
            reload_command: default_reload_command(),
            exec_user: None,
        }
    }
}

/// The tenant-management database this service reads projects from.
#[derive(Debug, Deserialize, Clone)]
pub struct DirectoryConfig {
    pub database_url: SecretString,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SecretsConfig {
    /// Base64 encoded 32-byte key for the secret envelopes.
    pub key: SecretString,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// How many tenants' last operations are remembered.
    #[serde(default = "default_recent_operations")]
    pub recent_operations: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            recent_operations: default_recent_operations(),
        }
    }
}

/// Root config structure of the control service.
#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    pub directory: DirectoryConfig,
    pub secrets: SecretsConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

const fn default_port() -> u16 {
    8090
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_runtime_endpoint() -> String {
    "http://docker-socket-proxy:2375".to_string()
}

const fn default_request_timeout_secs() -> u64 {
    30
}

fn default_gateway_image() -> String {
    "postgrest/postgrest:v12.2.3".to_string()
}

fn default_name_prefix() -> String {
    "postgrest_".to_string()
}

fn default_config_dir() -> String {
    "./gateways".to_string()
}

fn default_config_mount_dir() -> String {
    "/etc/postgrest".to_string()
}

const fn default_server_port() -> u16 {
    3000
}

const fn default_admin_port() -> u16 {
    3001
}

fn default_db_schemas() -> String {
    "public".to_string()
}

fn default_db_anon_role() -> String {
    "anon".to_string()
}

const fn default_db_pool() -> u16 {
    10
}

const fn default_health_timeout_secs() -> u64 {
    60
}

const fn default_health_poll_interval_ms() -> u64 {
    2000
}

fn default_pool_container() -> String {
    "pgbouncer".to_string()
}

fn default_pool_host() -> String {
    "pgbouncer".to_string()
}

const fn default_pool_port() -> u16 {
    6432
}

fn default_database_host() -> String {
    "postgres".to_string()
}

const fn default_database_port() -> u16 {
    5432
}

fn default_ini_path() -> String {
    "/etc/pgbouncer/pgbouncer.ini".to_string()
}

fn default_userlist_path() -> String {
    "/etc/pgbouncer/userlist.txt".to_string()
}

fn default_reload_command() -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), "kill -HUP 1".to_string()]
}

const fn default_max_connections() -> u32 {
    5
}

const fn default_recent_operations() -> usize {
    1024
}

/// Resolves a path to an absolute one.
///
/// Absolute paths are returned as-is. Relative paths are joined with the
/// config file's parent directory and normalized, without touching the
/// filesystem since the target may not exist yet.
#[must_use]
pub fn resolve_config_relative_paths(config_path: &Path, relative_path: &str) -> PathBuf {
    let path = Path::new(relative_path);
    let resolved = if path.is_absolute() {
        path.to_path_buf()
    } else {
        config_path
            .parent()
            .map_or_else(|| path.to_path_buf(), |d| d.join(path))
    };
    normalize_path(&resolved)
}

fn normalize_path(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        use Component as C;
        match component {
            C::Normal(c) => {
                result.push(c);
            }
            C::ParentDir => {
                result.pop();
            }
            C::CurDir => {}
            C::RootDir | C::Prefix(_) => {
                result.push(component);
            }
        }
    }
    result
}
