/*!
 * Owner-only filesystem primitives shared by the event store and the
 * process registry.
 */

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use serde::Serialize;

use crate::error::{RelayError, Result};

pub const DIR_MODE: u32 = 0o700;
pub const FILE_MODE: u32 = 0o600;

/// Create `dir` (and parents) with owner-only permissions
pub fn ensure_private_dir(dir: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(DIR_MODE);
    }
    builder.create(dir)
}

/// Open `path` for appending, creating it owner-only if missing
pub fn open_private_append(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(FILE_MODE);
    }
    options.open(path)
}

/// Flush directory entries so a rename survives a crash
pub fn fsync_dir(dir: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        File::open(dir)?.sync_all()
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
        Ok(())
    }
}

fn set_owner_only(file: &File) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(FILE_MODE))
    }
    #[cfg(not(unix))]
    {
        let _ = file;
        Ok(())
    }
}

/// Replace `path` with the indented JSON rendering of `value`.
///
/// Writes a temp file named `<prefix>*.tmp` next to the target, syncs it,
/// restricts it to the owner and renames it over `path`. Readers see either
/// the old contents or the new ones. The temp file is removed on any error.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T, prefix: &str) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(RelayError::config("state file path is required"));
    }
    let encoded = serde_json::to_vec_pretty(value)?;

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    ensure_private_dir(dir)
        .map_err(|e| RelayError::execution(format!("create directory {}", dir.display()), e))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| RelayError::execution("create temp state file", e))?;

    tmp.write_all(&encoded)
        .map_err(|e| RelayError::execution("write temp state file", e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| RelayError::execution("sync temp state file", e))?;
    set_owner_only(tmp.as_file())
        .map_err(|e| RelayError::execution("chmod temp state file", e))?;

    // On failure the NamedTempFile inside the error is dropped, which unlinks it
    tmp.persist(path)
        .map_err(|e| RelayError::execution(format!("rename state file to {}", path.display()), e.error))?;

    if let Err(e) = fsync_dir(dir) {
        tracing::debug!(dir = %dir.display(), error = %e, "directory sync after rename failed");
    }
    Ok(())
}
