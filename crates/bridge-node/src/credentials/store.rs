use chrono::{DateTime, Utc};
use common::{BridgeError, BridgeResult, Credential};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::storage;

/// File-backed cache of the vendor session.
#[derive(Clone, Debug)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `NotFound` when nothing is cached; `CredentialStore` when the file
    /// exists but cannot be parsed.
    pub async fn load(&self) -> BridgeResult<Credential> {
        let raw = match fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BridgeError::not_found(format!(
                    "no cached credential at {}",
                    self.path.display()
                )));
            }
            Err(e) => return Err(BridgeError::CredentialStore(format!("read {}: {e}", self.path.display()))),
        };

        let credential: Credential = serde_json::from_slice(&raw).map_err(|e| {
            BridgeError::CredentialStore(format!("corrupt credential file {}: {e}", self.path.display()))
        })?;
        debug!(path = %self.path.display(), expires_at = %credential.expires_at, "loaded cached credential");
        Ok(credential)
    }

    pub async fn save(&self, credential: &Credential) -> BridgeResult<()> {
        let data = serde_json::to_vec_pretty(credential)
            .map_err(|e| BridgeError::CredentialStore(format!("serialize credential: {e}")))?;
        storage::write_atomic_private(&self.path, &data)
            .await
            .map_err(|e| BridgeError::CredentialStore(format!("write {}: {e}", self.path.display())))?;
        info!(path = %self.path.display(), expires_at = %credential.expires_at, "credential saved");
        Ok(())
    }

    /// Forget the cached session so the next start performs a full login.
    pub async fn clear(&self) -> BridgeResult<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BridgeError::CredentialStore(format!("remove {}: {e}", self.path.display()))),
        }
    }

    pub fn is_expired(credential: &Credential, now: DateTime<Utc>) -> bool {
        common::credentials::is_expired(credential, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::new(dir.path().join("credentials.json"));
        assert!(matches!(store.load().await, Err(BridgeError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::new(dir.path().join("credentials.json"));
        let cred = Credential::new("tok-1", Utc::now() + Duration::hours(1))
            .with_refresh_token("r-1")
            .with_account(42, 7, "u011");

        store.save(&cred).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, cred);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_store_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.json");
        fs::write(&path, b"{not json").await.unwrap();
        let store = CredentialStore::new(&path);
        let err = store.load().await.unwrap_err();
        assert!(matches!(err, BridgeError::CredentialStore(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::new(dir.path().join("credentials.json"));
        store.save(&Credential::new("t", Utc::now())).await.unwrap();
        store.clear().await.unwrap();
        store.clear().await.unwrap();
        assert!(matches!(store.load().await, Err(BridgeError::NotFound(_))));
    }

    #[test]
    fn test_is_expired() {
        let now = Utc::now();
        assert!(CredentialStore::is_expired(&Credential::new("t", now - Duration::seconds(1)), now));
        assert!(!CredentialStore::is_expired(&Credential::new("t", now + Duration::seconds(1)), now));
    }
}
