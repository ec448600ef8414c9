//! Permission handling for the state directory and the files in it.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Create `path` (and parents) if needed, then force `mode` on the leaf.
pub fn ensure_dir(path: &Path, mode: u32) -> Result<()> {
    if !path.is_dir() {
        fs::create_dir_all(path)
            .with_context(|| format!("create directory {}", path.display()))?;
    }
    restrict(path, mode)
}

/// Set `mode` unless it is already in place.
pub fn restrict(path: &Path, mode: u32) -> Result<()> {
    if mode_of(path) == Some(mode) {
        return Ok(());
    }
    #[cfg(unix)]
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("set mode {:04o} on {}", mode, path.display()))?;
    Ok(())
}

/// Permission bits of `path`, `None` when it cannot be read or off unix.
#[cfg(unix)]
pub fn mode_of(path: &Path) -> Option<u32> {
    fs::metadata(path).ok().map(|m| m.permissions().mode() & 0o777)
}

#[cfg(not(unix))]
pub fn mode_of(_path: &Path) -> Option<u32> {
    None
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_ensure_dir_tightens_existing() {
        let dir = TempDir::new().unwrap();
        let state = dir.path().join("a/b");
        ensure_dir(&state, 0o700).unwrap();
        assert_eq!(mode_of(&state), Some(0o700));

        fs::set_permissions(&state, fs::Permissions::from_mode(0o755)).unwrap();
        ensure_dir(&state, 0o700).unwrap();
        assert_eq!(mode_of(&state), Some(0o700));
    }

    #[test]
    fn test_mode_of_missing() {
        let dir = TempDir::new().unwrap();
        assert_eq!(mode_of(&dir.path().join("nope")), None);
    }
}
