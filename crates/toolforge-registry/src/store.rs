//! Durable manifest storage.
//!
//! A [`ManifestStore`] is a flat key/bytes map; keys are
//! `{tool_id}_v{version}` for manifests and `consensus/...` for score
//! records. The filesystem backend writes atomically (temp file + rename)
//! and persists before returning success, which is the entire durability
//! contract.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use toolforge::{ForgeError, Result};

/// Durable key/bytes store for manifests and consensus artifacts.
#[async_trait]
pub trait ManifestStore: Send + Sync {
    /// Persist bytes under a key, replacing any prior value.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Fetch bytes by key.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// List keys with a prefix, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// In-memory store for tests and ephemeral wiring.
#[derive(Default)]
pub struct InMemoryManifestStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryManifestStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ManifestStore for InMemoryManifestStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// Filesystem-backed store. One file per key under the root directory;
/// key path separators become subdirectories.
pub struct FilesystemManifestStore {
    root: PathBuf,
}

impl FilesystemManifestStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.split('/').any(|part| part == ".." || part.is_empty()) {
            return Err(ForgeError::InvalidInput(format!("invalid store key: {key}")));
        }
        Ok(self.root.join(format!("{key}.json")))
    }
}

#[async_trait]
impl ManifestStore for FilesystemManifestStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Atomic write: temp file then rename.
        let temp = path.with_extension("tmp");
        tokio::fs::write(&temp, bytes).await?;
        tokio::fs::rename(&temp, &path).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.is_dir() {
                    pending.push(path);
                    continue;
                }
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                if let Ok(rel) = path.strip_prefix(&self.root) {
                    let key = rel
                        .with_extension("")
                        .to_string_lossy()
                        .replace(std::path::MAIN_SEPARATOR, "/");
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}
