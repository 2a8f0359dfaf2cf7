//! File-based token store.

use super::TokenStore;
use crate::auth::error::StoreError;
use crate::auth::tokens::TokenPair;
use std::path::{Path, PathBuf};
use tracing::instrument;

/// File permissions for the token file (Unix only): owner read/write.
#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

/// Directory permissions (Unix only): owner read/write/execute.
#[cfg(unix)]
const DIR_MODE: u32 = 0o700;

/// File-based token store.
///
/// Persists the pair as one JSON document with three keys
/// (`access_token`, `refresh_token`, `expires_at`). Writes go to a temp file
/// that is renamed over the target, so readers never see half a pair.
///
/// # Security
/// - The file is created with 0600 permissions on Unix
/// - Parent directories are created with 0700 permissions
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    /// Create a store backed by the given file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ensure the parent directory exists with correct permissions.
    fn ensure_dir(&self) -> Result<(), StoreError> {
        let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) else {
            return Ok(());
        };
        if dir.exists() {
            return Ok(());
        }

        std::fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(DIR_MODE);
            std::fs::set_permissions(dir, perms).map_err(|e| StoreError::io(dir, e))?;
        }
        Ok(())
    }
}

impl TokenStore for FileTokenStore {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    fn get(&self) -> Result<Option<TokenPair>, StoreError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };

        if content.trim().is_empty() {
            return Ok(None);
        }

        let pair: TokenPair = serde_json::from_str(&content)?;
        Ok(Some(pair))
    }

    #[instrument(skip_all, fields(path = %self.path.display()))]
    fn set(&self, pair: &TokenPair) -> Result<(), StoreError> {
        self.ensure_dir()?;

        let content = serde_json::to_string_pretty(pair)?;
        let temp_path = self.path.with_extension("tmp");

        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(FILE_MODE)
                .open(&temp_path)
                .map_err(|e| StoreError::io(&temp_path, e))?;
            file.write_all(content.as_bytes())
                .map_err(|e| StoreError::io(&temp_path, e))?;
            file.sync_all().map_err(|e| StoreError::io(&temp_path, e))?;
        }

        #[cfg(not(unix))]
        {
            std::fs::write(&temp_path, &content).map_err(|e| StoreError::io(&temp_path, e))?;
        }

        // Atomic rename
        if let Err(e) = std::fs::rename(&temp_path, &self.path) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(StoreError::io(&self.path, e));
        }

        Ok(())
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    fn clear(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&self.path, e)),
        }
    }

    fn exists(&self) -> Result<bool, StoreError> {
        Ok(self.get()?.is_some())
    }

    fn name(&self) -> &str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_set_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("session.json"));

        assert!(store.get().unwrap().is_none());
        assert!(!store.exists().unwrap());

        store
            .set(&TokenPair::with_expires_at("access", "refresh", Some(1_700_000_000)))
            .unwrap();

        let loaded = store.get().unwrap().unwrap();
        assert_eq!(loaded.access_token, "access");
        assert_eq!(loaded.refresh_token, "refresh");
        assert_eq!(loaded.expires_at, Some(1_700_000_000));
        assert!(store.exists().unwrap());
        assert!(!dir.path().join("session.tmp").exists());
    }

    #[test]
    fn test_file_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("nested/deeper/session.json"));
        store.set(&TokenPair::new("a", "r", None)).unwrap();
        assert!(store.exists().unwrap());
    }

    #[test]
    fn test_file_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("session.json"));
        store.set(&TokenPair::new("a", "r", None)).unwrap();
        store.clear().unwrap();
        assert!(store.get().unwrap().is_none());
        // Already gone.
        store.clear().unwrap();
    }

    #[test]
    fn test_file_empty_content_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "  \n").unwrap();
        let store = FileTokenStore::new(&path);
        assert!(store.get().unwrap().is_none());
    }

    #[test]
    fn test_file_corrupt_content_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{\"access_token\": \"only-half\"}").unwrap();
        let store = FileTokenStore::new(&path);
        assert!(matches!(store.get(), Err(StoreError::Serialization(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_file_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("session.json"));
        store.set(&TokenPair::new("a", "r", None)).unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, FILE_MODE);
    }
}
