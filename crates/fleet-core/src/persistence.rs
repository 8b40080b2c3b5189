//! The injected key/value persistence store.
//!
//! The breaker registry (C4) owns *when* to persist (debounce
//! scheduling) and *what* to persist (a JSON snapshot); the mechanics of
//! durably writing bytes under a key live behind this trait. One
//! concrete implementation, [`AtomicFilePersistence`], is bundled
//! because shipping a control-plane library with no usable default
//! store is an unfriendly place to start — it writes via a temp file
//! and rename, the same atomic-replace idiom the snapshot format calls
//! for, and keeps a small rotating set of backups.

use async_trait::async_trait;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no value stored for key {0:?}")]
    NotFound(String),
}

#[async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn save(&self, key: &str, value: Vec<u8>) -> Result<(), PersistenceError>;
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError>;
}

/// Writes each key to `<dir>/<key>.json` via a temp file plus rename,
/// keeping up to `backups` rotated copies (`<key>.json.1`, `.2`, ...).
pub struct AtomicFilePersistence {
    dir: PathBuf,
    backups: u8,
}

impl AtomicFilePersistence {
    pub fn new(dir: impl Into<PathBuf>, backups: u8) -> Self {
        Self {
            dir: dir.into(),
            backups,
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    fn backup_path(&self, key: &str, generation: u8) -> PathBuf {
        self.dir.join(format!("{key}.json.{generation}"))
    }

    async fn rotate_backups(&self, key: &str) -> Result<(), PersistenceError> {
        if self.backups == 0 {
            return Ok(());
        }
        for generation in (1..self.backups).rev() {
            let from = self.backup_path(key, generation);
            let to = self.backup_path(key, generation + 1);
            if tokio::fs::metadata(&from).await.is_ok() {
                let _ = tokio::fs::rename(&from, &to).await;
            }
        }
        let main = self.path_for(key);
        if tokio::fs::metadata(&main).await.is_ok() {
            let first_backup = self.backup_path(key, 1);
            let _ = tokio::fs::copy(&main, &first_backup).await;
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceStore for AtomicFilePersistence {
    async fn save(&self, key: &str, value: Vec<u8>) -> Result<(), PersistenceError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        self.rotate_backups(key).await?;

        let target = self.path_for(key);
        let tmp_path = self.dir.join(format!(".{key}.json.tmp"));
        tokio::fs::write(&tmp_path, &value).await?;
        tokio::fs::rename(&tmp_path, &target).await?;
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        let target = self.path_for(key);
        match tokio::fs::read(&target).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// An in-memory store, for tests that should not touch the filesystem.
pub struct InMemoryPersistence {
    entries: tokio::sync::Mutex<std::collections::HashMap<String, Vec<u8>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self {
            entries: tokio::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistenceStore for InMemoryPersistence {
    async fn save(&self, key: &str, value: Vec<u8>) -> Result<(), PersistenceError> {
        self.entries.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn atomic_file_round_trips_and_rotates_backups() {
        let dir = tempfile::tempdir().unwrap();
        let store = AtomicFilePersistence::new(dir.path(), 2);

        store.save("snap", b"v1".to_vec()).await.unwrap();
        store.save("snap", b"v2".to_vec()).await.unwrap();
        store.save("snap", b"v3".to_vec()).await.unwrap();

        let current = store.load("snap").await.unwrap().unwrap();
        assert_eq!(current, b"v3");

        let backup1 = tokio::fs::read(dir.path().join("snap.json.1")).await.unwrap();
        assert_eq!(backup1, b"v2");
        let backup2 = tokio::fs::read(dir.path().join("snap.json.2")).await.unwrap();
        assert_eq!(backup2, b"v1");
    }

    #[tokio::test]
    async fn missing_key_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = AtomicFilePersistence::new(dir.path(), 1);
        assert!(store.load("absent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn in_memory_store_round_trips() {
        let store = InMemoryPersistence::new();
        assert!(store.load("k").await.unwrap().is_none());
        store.save("k", b"hello".to_vec()).await.unwrap();
        assert_eq!(store.load("k").await.unwrap().unwrap(), b"hello");
    }
}
