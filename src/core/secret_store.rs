//! Generation and persistence of installation credentials.
//!
//! Secrets are generated once per installation and written to a single
//! owner-only file. Every other component receives a [`SecretBundle`] by
//! reference and looks values up by name.

use crate::constants;
use crate::core::store;
use anyhow::{anyhow, bail, Context, Result};
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use zeroize::Zeroizing;

const FILE_HEADER: &str = "# Generated by hostforge. Owner-only; do not edit or regenerate.\n\
# Changing a value here does not rotate it inside running services.\n\n";

#[derive(Default, Serialize, Deserialize)]
struct SecretFile {
    #[serde(default)]
    secrets: BTreeMap<String, String>,
}

/// Loaded credential values keyed by name.
#[derive(Default)]
pub struct SecretBundle {
    values: BTreeMap<String, Zeroizing<String>>,
}

impl SecretBundle {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(|v| v.as_str())
    }

    /// Like [`get`](Self::get) but an error names the missing secret.
    pub fn require(&self, name: &str) -> Result<&str> {
        self.get(name)
            .ok_or_else(|| anyhow!("secret '{}' is not present in the secret store", name))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl std::fmt::Debug for SecretBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretBundle")
            .field("names", &self.values.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// What [`SecretStore::ensure`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsureAction {
    Loaded,
    Generated(usize),
    /// Existing values kept; these names were added.
    Extended(Vec<String>),
}

pub struct SecretStore {
    path: PathBuf,
}

impl SecretStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Load the persisted bundle, or fail if none exists.
    pub fn load(&self) -> Result<SecretBundle> {
        let file: SecretFile = store::load(&self.path)?
            .ok_or_else(|| anyhow!("secret store not found: {}", self.path.display()))?;
        Ok(into_bundle(file))
    }

    /// Make sure every `required` secret exists, generating only what is missing.
    ///
    /// An existing file is never regenerated; when nothing is missing it is not rewritten.
    pub fn ensure(&self, required: &[&str]) -> Result<(SecretBundle, EnsureAction)> {
        for name in required {
            validate_name(name)?;
        }

        let existing: Option<SecretFile> = store::load(&self.path)
            .with_context(|| format!("existing secret store {} is unreadable; refusing to regenerate", self.path.display()))?;

        let (mut file, fresh) = match existing {
            Some(file) => (file, false),
            None => (SecretFile::default(), true),
        };

        let mut added = Vec::new();
        for name in required {
            if !file.secrets.contains_key(*name) {
                file.secrets
                    .insert(name.to_string(), generate_secret(constants::SECRET_LENGTH));
                added.push(name.to_string());
            }
        }

        let action = if fresh {
            EnsureAction::Generated(added.len())
        } else if added.is_empty() {
            EnsureAction::Loaded
        } else {
            EnsureAction::Extended(added)
        };

        if action != EnsureAction::Loaded {
            store::save(&self.path, &file, FILE_HEADER, constants::STATE_FILE_MODE)
                .with_context(|| format!("persist secret store {}", self.path.display()))?;
        }

        match &action {
            EnsureAction::Loaded => info!(path = %self.path.display(), "secret store loaded unchanged"),
            EnsureAction::Generated(n) => info!(path = %self.path.display(), count = n, "secret store generated"),
            EnsureAction::Extended(names) => warn!(
                path = %self.path.display(),
                added = %names.join(","),
                "secret store extended with newly required secrets"
            ),
        }

        Ok((into_bundle(file), action))
    }
}

fn into_bundle(file: SecretFile) -> SecretBundle {
    SecretBundle {
        values: file
            .secrets
            .into_iter()
            .map(|(k, v)| (k, Zeroizing::new(v)))
            .collect(),
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("secret name cannot be empty");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        bail!("invalid secret name '{}': only [a-zA-Z0-9_-] allowed", name);
    }
    Ok(())
}

/// Random value from the OS CSPRNG, restricted to ASCII alphanumerics.
pub fn generate_secret(length: usize) -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const REQUIRED: &[&str] = &["postgres_password", "grafana_admin_password"];

    #[test]
    fn test_generate_secret_shape() {
        let s = generate_secret(constants::SECRET_LENGTH);
        assert_eq!(s.len(), 25);
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(s, generate_secret(constants::SECRET_LENGTH));
    }

    #[test]
    fn test_first_ensure_generates() {
        let dir = TempDir::new().unwrap();
        let store = SecretStore::new(dir.path().join("secrets.toml"));
        let (bundle, action) = store.ensure(REQUIRED).unwrap();
        assert_eq!(action, EnsureAction::Generated(2));
        assert_eq!(bundle.len(), 2);
        assert_eq!(bundle.require("postgres_password").unwrap().len(), 25);
    }

    #[test]
    fn test_second_ensure_is_byte_identical() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("secrets.toml");
        let store = SecretStore::new(&path);
        let (first, _) = store.ensure(REQUIRED).unwrap();
        let before = fs::read(&path).unwrap();

        let (second, action) = store.ensure(REQUIRED).unwrap();
        let after = fs::read(&path).unwrap();

        assert_eq!(action, EnsureAction::Loaded);
        assert_eq!(before, after);
        assert_eq!(first.get("postgres_password"), second.get("postgres_password"));
    }

    #[test]
    fn test_extend_preserves_existing_values() {
        let dir = TempDir::new().unwrap();
        let store = SecretStore::new(dir.path().join("secrets.toml"));
        let (first, _) = store.ensure(&["postgres_password"]).unwrap();
        let original = first.require("postgres_password").unwrap().to_string();

        let (second, action) = store.ensure(REQUIRED).unwrap();
        assert_eq!(
            action,
            EnsureAction::Extended(vec!["grafana_admin_password".to_string()])
        );
        assert_eq!(second.require("postgres_password").unwrap(), original);
        assert!(second.get("grafana_admin_password").is_some());
    }

    #[cfg(unix)]
    #[test]
    fn test_secret_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("secrets.toml");
        SecretStore::new(&path).ensure(REQUIRED).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn test_corrupt_file_is_not_overwritten() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("secrets.toml");
        fs::write(&path, "secrets = [broken").unwrap();
        let err = SecretStore::new(&path).ensure(REQUIRED).unwrap_err();
        assert!(format!("{:#}", err).contains("refusing to regenerate"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "secrets = [broken");
    }

    #[test]
    fn test_unwritable_path_fails() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "").unwrap();
        let store = SecretStore::new(blocker.join("secrets.toml"));
        assert!(store.ensure(REQUIRED).is_err());
    }

    #[test]
    fn test_invalid_name_rejected() {
        let dir = TempDir::new().unwrap();
        let store = SecretStore::new(dir.path().join("secrets.toml"));
        assert!(store.ensure(&["bad name"]).is_err());
        assert!(!store.exists());
    }

    #[test]
    fn test_debug_hides_values() {
        let dir = TempDir::new().unwrap();
        let store = SecretStore::new(dir.path().join("secrets.toml"));
        let (bundle, _) = store.ensure(REQUIRED).unwrap();
        let value = bundle.require("postgres_password").unwrap().to_string();
        assert!(!format!("{:?}", bundle).contains(&value));
    }
}
