//! Atomic, owner-only persistence of TOML state files.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::Path;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Load a TOML file. `Ok(None)` when it does not exist.
pub fn load<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let value = toml::from_str(&content).with_context(|| format!("parse {}", path.display()))?;
    Ok(Some(value))
}

/// Serialize `value` and persist it with `mode`, replacing any previous file atomically.
pub fn save<T: Serialize>(path: &Path, value: &T, header: &str, mode: u32) -> Result<()> {
    let body = toml::to_string_pretty(value)
        .with_context(|| format!("serialize {}", path.display()))?;
    let mut content = String::with_capacity(header.len() + body.len());
    content.push_str(header);
    content.push_str(&body);
    write_atomic(path, content.as_bytes(), mode)
}

/// Write through a temp file in the target directory, chmod, then rename.
pub fn write_atomic(path: &Path, content: &[u8], mode: u32) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).with_context(|| format!("create dir {}", parent.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("create temp file in {}", parent.display()))?;

    #[cfg(unix)]
    {
        // before any content lands on disk
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(mode))
            .with_context(|| format!("set permissions {:o} on temp file", mode))?;
    }

    tmp.write_all(content)
        .with_context(|| format!("write {}", path.display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("sync {}", path.display()))?;
    tmp.persist(path)
        .map_err(|err| anyhow::anyhow!("persist {}: {}", path.display(), err))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let loaded: Option<Sample> = load(&dir.path().join("absent.toml")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/sample.toml");
        let sample = Sample {
            name: "x".into(),
            count: 2,
        };
        save(&path, &sample, "# header\n", 0o600).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("# header\n"));
        assert_eq!(load::<Sample>(&path).unwrap(), Some(sample));
    }

    #[cfg(unix)]
    #[test]
    fn test_save_sets_owner_only_mode() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sample.toml");
        write_atomic(&path, b"a = 1\n", 0o600).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn test_load_malformed_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "not = [valid").unwrap();
        assert!(load::<Sample>(&path).is_err());
    }
}
