//! Pool registry mutator.
//!
//! Keeps the shared pooling proxy's `[databases]` routing lines and
//! credential lines in sync with the tenants this service manages. Each edit
//! is a locked read-modify-write followed by a reload of the proxy when the
//! content actually changed.

mod document;
mod lock;

use alloc::sync::Arc;
use core::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use secrecy::{ExposeSecret as _, SecretString};
use thiserror::Error as ThisError;
use tokio::task;
use tracing::{debug, info};

pub use document::{DATABASES_MARKER, RegistryDocument, RegistryKind, Upsert};

use crate::files::write_atomic;
use crate::runtime::{ContainerRuntime, RuntimeError};

#[derive(Debug, ThisError)]
pub enum RegistryError {
    #[error("failed to lock {}", path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: Errno,
    },
    #[error("failed to access {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{} has no {DATABASES_MARKER} section", path.display())]
    MissingMarker { path: PathBuf },
    #[error("registry edit task failed")]
    Task(#[from] task::JoinError),
    #[error("failed to reload the pooling proxy")]
    Reload(#[source] RuntimeError),
}

/// Where the pooling proxy lives and how to reach its files.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Container running the proxy, target of reload execs.
    pub container: String,
    /// Database server the proxy forwards tenant connections to.
    pub database_host: String,
    pub database_port: u16,
    pub ini_path: PathBuf,
    pub userlist_path: PathBuf,
    pub reload_command: Vec<String>,
    pub exec_user: Option<String>,
}

enum Edit {
    Upsert { key: String, line: SecretString },
    Remove { key: String },
}

#[derive(Clone)]
pub struct PoolRegistry {
    runtime: Arc<dyn ContainerRuntime>,
    settings: PoolSettings,
}

impl fmt::Debug for PoolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl PoolRegistry {
    #[must_use]
    pub fn new(runtime: Arc<dyn ContainerRuntime>, settings: PoolSettings) -> Self {
        Self { runtime, settings }
    }

    /// Registers the routing line and the credential line for a tenant.
    ///
    /// Returns whether either file changed. The proxy is reloaded once if so.
    ///
    /// # Errors
    ///
    /// Fails on lock or I/O errors, a registry without a `[databases]`
    /// section, or a failed reload.
    #[tracing::instrument(skip(self, db_password))]
    pub async fn add_tenant(
        &self,
        tenant_id: &str,
        db_name: &str,
        db_password: &SecretString,
    ) -> Result<bool, RegistryError> {
        let db_line = format!(
            "{tenant_id} = host={} port={} dbname={db_name}",
            self.settings.database_host, self.settings.database_port
        );
        let db_changed = self
            .edit(
                &self.settings.ini_path,
                RegistryKind::Databases,
                Edit::Upsert {
                    key: tenant_id.to_owned(),
                    line: SecretString::from(db_line),
                },
            )
            .await?;

        let credential = format!(
            "\"{tenant_id}\" \"{}\"",
            db_password.expose_secret().replace('"', "\"\"")
        );
        let credential_changed = self
            .edit(
                &self.settings.userlist_path,
                RegistryKind::Credentials,
                Edit::Upsert {
                    key: tenant_id.to_owned(),
                    line: SecretString::from(credential),
                },
            )
            .await?;

        let changed = db_changed || credential_changed;
        if changed {
            self.reload().await?;
            info!("Registered tenant with pooling proxy");
        } else {
            debug!("Pool entries already current");
        }
        Ok(changed)
    }

    /// Removes both of the tenant's lines, reloading the proxy once if either went.
    ///
    /// The credential line is removed even when the routing line edit fails.
    /// Returns whether anything was removed.
    ///
    /// # Errors
    ///
    /// Fails on lock or I/O errors in either file or a failed reload.
    #[tracing::instrument(skip(self))]
    pub async fn remove_tenant(&self, tenant_id: &str) -> Result<bool, RegistryError> {
        let remove = || Edit::Remove {
            key: tenant_id.to_owned(),
        };
        let database = self
            .edit(&self.settings.ini_path, RegistryKind::Databases, remove())
            .await;
        let credential = self
            .edit(&self.settings.userlist_path, RegistryKind::Credentials, remove())
            .await;

        let removed = matches!(database, Ok(true)) || matches!(credential, Ok(true));
        if removed {
            self.reload().await?;
            info!("Removed tenant from pooling proxy");
        }
        database.and(credential)?;
        Ok(removed)
    }

    async fn edit(&self, path: &Path, kind: RegistryKind, edit: Edit) -> Result<bool, RegistryError> {
        let path = path.to_owned();
        task::spawn_blocking(move || edit_locked(&path, kind, edit)).await?
    }

    async fn reload(&self) -> Result<(), RegistryError> {
        let container = &self.settings.container;
        self.runtime
            .exec_in_other(
                container,
                &self.settings.reload_command,
                self.settings.exec_user.as_deref(),
            )
            .await
            .and_then(|output| output.ensure_success(container))
            .map_err(RegistryError::Reload)?;
        debug!(%container, "Reloaded pooling proxy");
        Ok(())
    }
}

/// The whole read-modify-write, run while holding the lock.
fn edit_locked(path: &Path, kind: RegistryKind, edit: Edit) -> Result<bool, RegistryError> {
    let _guard = lock::acquire(path)?;
    let io_error = |source: io::Error| RegistryError::Io {
        path: path.to_owned(),
        source,
    };

    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound && kind == RegistryKind::Credentials => {
            String::new()
        }
        Err(e) => return Err(io_error(e)),
    };
    let mut doc = RegistryDocument::parse(&text, kind);

    let changed = match edit {
        Edit::Upsert { key, line } => doc
            .upsert(&key, line.expose_secret())
            .map_err(|_| RegistryError::MissingMarker {
                path: path.to_owned(),
            })?
            .changed(),
        Edit::Remove { key } => doc.remove(&key),
    };

    if changed {
        write_atomic(path, doc.serialize().as_bytes(), 0o600).map_err(io_error)?;
    }
    Ok(changed)
}
