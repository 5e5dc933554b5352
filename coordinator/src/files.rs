//! Small filesystem helpers shared by the config store and the pool registry.

use std::ffi::OsString;
use std::fs::{self, Permissions};
use std::io::{self, Write as _};
use std::os::unix::fs::PermissionsExt as _;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

/// `<path>.<suffix>` next to `path`.
#[must_use]
pub fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map_or_else(OsString::new, ToOwned::to_owned);
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

/// Replaces `path` with `contents` via a uniquely named sibling temp file and a rename.
///
/// Keeps the permission bits of an existing target. A new file gets `mode`.
/// Concurrent writers to the same path never share a temp file; the last
/// rename wins.
///
/// # Errors
///
/// Returns any I/O error; the temp file is removed on failure.
pub fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> io::Result<()> {
    let permissions = match fs::metadata(path) {
        Ok(meta) => meta.permissions(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Permissions::from_mode(mode),
        Err(e) => return Err(e),
    };
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    // Created 0600 and removed on drop until persisted
    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(contents)?;
    tmp.as_file().set_permissions(permissions)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
