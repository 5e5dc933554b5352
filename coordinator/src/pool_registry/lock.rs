//! Cross-process advisory lock around registry edits.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt as _;
use std::path::Path;

use nix::fcntl::{Flock, FlockArg};
use tracing::debug;

use super::RegistryError;
use crate::files::sibling_with_suffix;

/// Blocks until the exclusive lock on `<target>.lock` is held.
///
/// Every replica and any cooperating script must lock the same file. The
/// lock is released when the returned guard drops.
pub fn acquire(target: &Path) -> Result<Flock<File>, RegistryError> {
    let lock_path = sibling_with_suffix(target, "lock");
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .mode(0o600)
        .open(&lock_path)
        .map_err(|source| RegistryError::Io {
            path: lock_path.clone(),
            source,
        })?;
    let guard = Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, errno)| {
        RegistryError::Lock {
            path: lock_path.clone(),
            source: errno,
        }
    })?;
    debug!(lock = %lock_path.display(), "Acquired registry lock");
    Ok(guard)
}
