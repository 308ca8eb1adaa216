//! On-disk identity persistence
//!
//! Two PEM files under the state directory: `client.crt` readable by
//! anyone, `client.key` owner-only.

use std::path::{Path, PathBuf};

use crate::error::IdentityError;

#[derive(Debug, Clone)]
pub struct IdentityStore {
    cert_path: PathBuf,
    key_path: PathBuf,
}

impl IdentityStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        let dir = state_dir.into();
        Self {
            cert_path: dir.join("client.crt"),
            key_path: dir.join("client.key"),
        }
    }

    pub fn cert_path(&self) -> &Path {
        &self.cert_path
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    /// Read the persisted pair. `None` when either file is missing.
    pub fn read(&self) -> Result<Option<(String, String)>, IdentityError> {
        let cert = match std::fs::read_to_string(&self.cert_path) {
            Ok(cert) => cert,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let key = match std::fs::read_to_string(&self.key_path) {
            Ok(key) => key,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some((cert, key)))
    }

    /// Persist a freshly issued pair, replacing any previous identity
    /// wholesale.
    pub fn write(&self, cert_pem: &str, key_pem: &str) -> Result<(), IdentityError> {
        if let Some(dir) = self.cert_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&self.cert_path, cert_pem)?;
        std::fs::write(&self.key_path, key_pem)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.cert_path, std::fs::Permissions::from_mode(0o644))?;
            std::fs::set_permissions(&self.key_path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_missing_pair() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = IdentityStore::new(dir.path());
        assert!(store.read().unwrap().is_none());
    }

    #[test]
    fn test_write_read_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = IdentityStore::new(dir.path());

        store.write("CERT", "KEY").unwrap();
        let (cert, key) = store.read().unwrap().unwrap();
        assert_eq!(cert, "CERT");
        assert_eq!(key, "KEY");
    }

    #[test]
    fn test_partial_pair_counts_as_missing() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("client.crt"), "CERT").unwrap();

        let store = IdentityStore::new(dir.path());
        assert!(store.read().unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_key_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let store = IdentityStore::new(dir.path());
        store.write("CERT", "KEY").unwrap();

        let mode = std::fs::metadata(store.key_path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
