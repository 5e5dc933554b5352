//! Per-tenant gateway config files on disk.

use std::fs::DirBuilder;
use std::io;
use std::os::unix::fs::DirBuilderExt as _;
use std::path::{Path, PathBuf};

use tokio::{fs, task};

use crate::files::write_atomic;

/// Owner-only directory of `<tenant_id>.conf` files.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    dir: PathBuf,
}

impl ConfigStore {
    #[must_use]
    pub const fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn path_for(&self, tenant_id: &str) -> PathBuf {
        self.dir.join(format!("{tenant_id}.conf"))
    }

    /// The config currently on disk, `None` if there is none.
    pub async fn read(&self, tenant_id: &str) -> io::Result<Option<String>> {
        match fs::read_to_string(self.path_for(tenant_id)).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Atomically replaces the tenant's config with mode 0600.
    pub async fn write(&self, tenant_id: &str, text: String) -> io::Result<()> {
        let dir = self.dir.clone();
        let path = self.path_for(tenant_id);
        task::spawn_blocking(move || {
            DirBuilder::new()
                .recursive(true)
                .mode(0o700)
                .create(&dir)?;
            write_atomic(&path, text.as_bytes(), 0o600)
        })
        .await
        .map_err(io::Error::other)?
    }

    /// Deletes the tenant's config. Returns whether a file was removed.
    pub async fn remove(&self, tenant_id: &str) -> io::Result<bool> {
        match fs::remove_file(self.path_for(tenant_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}
