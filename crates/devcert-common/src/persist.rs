//! Crash-safe file writes.
//!
//! Content is written to a sibling `<name>.tmp` file, flushed, and then
//! renamed over the destination. A reader never observes a partially
//! written file; a crash leaves at most an orphaned `.tmp` file behind.

use std::ffi::OsString;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Suffix appended to a path to form its pending (temporary) sibling.
pub const PENDING_SUFFIX: &str = "tmp";

/// Append `.suffix` to the full file name (`a.crt` -> `a.crt.suffix`).
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

/// The pending sibling used while `path` is being replaced.
pub fn pending_path(path: &Path) -> PathBuf {
    with_suffix(path, PENDING_SUFFIX)
}

/// Write `contents` to the pending sibling of `dest` and return its path.
///
/// With `private` set, the file is restricted to the owner (0600 on Unix)
/// before any content is written.
pub fn write_pending(dest: &Path, contents: &[u8], private: bool) -> Result<PathBuf, io::Error> {
    if let Some(parent) = dest.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let tmp = pending_path(dest);
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    if private {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    #[cfg(not(unix))]
    let _ = private;

    let mut file = options.open(&tmp)?;
    file.write_all(contents)?;
    file.sync_all()?;
    Ok(tmp)
}

/// Rename a pending file over its destination.
pub fn promote(pending: &Path, dest: &Path) -> Result<(), io::Error> {
    std::fs::rename(pending, dest)
}

/// Write `contents` to `dest` via a pending file and rename.
pub fn write_atomic(dest: &Path, contents: &[u8], private: bool) -> Result<(), io::Error> {
    let tmp = write_pending(dest, contents, private)?;
    if let Err(e) = promote(&tmp, dest) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

/// Remove a file, treating "not found" as success.
///
/// Returns `true` when a file was actually removed.
pub fn remove_if_exists(path: &Path) -> Result<bool, io::Error> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
