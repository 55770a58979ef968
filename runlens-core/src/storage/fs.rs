//! Directory-backed cache backend
//!
//! Each entry is two files named after the hex SHA-256 of its key:
//! `{hash}.blob` holds the payload and `{hash}.json` the key and creation
//! time. The metadata file is written last, so an entry without one is
//! treated as absent.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::error::Result;

use super::backend::{resolve_restore_key, CacheBackend, CacheEntry, EntryInfo};

const BLOB_EXT: &str = "blob";
const META_EXT: &str = "json";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryMeta {
    key: String,
    size_bytes: u64,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Backend rooted in the runlens state directory.
    pub fn default_location() -> Self {
        Self::new(crate::config::AnalyticsConfig::state_dir().join("cache"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn stem(key: &str) -> String {
        hex::encode(Sha256::digest(key.as_bytes()))
    }

    fn path(&self, key: &str, ext: &str) -> PathBuf {
        self.root.join(format!("{}.{}", Self::stem(key), ext))
    }

    /// Write through a temp file private to this call, then rename.
    async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
        let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
        let tmp = path.with_file_name(name);

        tokio::fs::write(&tmp, contents).await?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn read_meta(path: &Path) -> Result<EntryMeta> {
        let raw = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn all_entries(&self) -> Result<Vec<EntryInfo>> {
        let mut infos = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(infos),
            Err(e) => return Err(e.into()),
        };

        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some(META_EXT) {
                continue;
            }
            match Self::read_meta(&path).await {
                Ok(meta) => infos.push(EntryInfo {
                    key: meta.key,
                    size_bytes: meta.size_bytes,
                    created_at: meta.created_at,
                }),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Skipping unreadable cache entry"
                    );
                }
            }
        }

        infos.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(infos)
    }
}

#[async_trait]
impl CacheBackend for FsBackend {
    fn name(&self) -> &'static str {
        "fs"
    }

    async fn is_available(&self) -> bool {
        match tokio::fs::create_dir_all(&self.root).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(
                    root = %self.root.display(),
                    error = %e,
                    "Cache directory unusable"
                );
                false
            }
        }
    }

    async fn save(&self, key: &str, payload: &[u8]) -> Result<String> {
        tokio::fs::create_dir_all(&self.root).await?;
        let meta = EntryMeta {
            key: key.to_string(),
            size_bytes: payload.len() as u64,
            created_at: Utc::now(),
        };
        Self::write_atomic(&self.path(key, BLOB_EXT), payload).await?;
        Self::write_atomic(&self.path(key, META_EXT), &serde_json::to_vec(&meta)?).await?;
        Ok(Self::stem(key))
    }

    async fn restore(&self, key: &str, restore_keys: &[String]) -> Result<Option<CacheEntry>> {
        let candidates = self.all_entries().await?;
        let Some(matched) = resolve_restore_key(key, restore_keys, &candidates) else {
            return Ok(None);
        };
        let meta = Self::read_meta(&self.path(&matched, META_EXT)).await?;
        let payload = tokio::fs::read(self.path(&matched, BLOB_EXT)).await?;
        Ok(Some(CacheEntry {
            key: meta.key,
            payload,
            created_at: meta.created_at,
        }))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<EntryInfo>> {
        let mut infos = self.all_entries().await?;
        infos.retain(|info| info.key.starts_with(prefix));
        Ok(infos)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let meta = self.path(key, META_EXT);
        match tokio::fs::remove_file(&meta).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        if let Err(e) = tokio::fs::remove_file(self.path(key, BLOB_EXT)).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(e.into());
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_round_trip_on_disk() {
        let dir = TempDir::new().unwrap();
        let backend = FsBackend::new(dir.path().join("cache"));
        assert!(backend.is_available().await);

        let id = backend.save("octo-widgets-events-v1", b"[1,2]").await.unwrap();
        assert_eq!(id.len(), 64);

        let entry = backend
            .restore("octo-widgets-events-v1", &[])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.payload, b"[1,2]");

        // a second backend on the same directory sees the entry
        let reopened = FsBackend::new(dir.path().join("cache"));
        let listed = reopened.list("octo-").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].size_bytes, 5);
    }

    #[tokio::test]
    async fn test_missing_directory_lists_nothing() {
        let dir = TempDir::new().unwrap();
        let backend = FsBackend::new(dir.path().join("absent"));
        assert!(backend.list("").await.unwrap().is_empty());
        assert!(backend.restore("k", &["".to_string()]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let dir = TempDir::new().unwrap();
        let backend = FsBackend::new(dir.path());
        backend.save("k", b"v").await.unwrap();
        assert!(backend.delete("k").await.unwrap());
        assert!(!backend.delete("k").await.unwrap());
        assert!(backend.list("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_saves_of_one_key_stay_consistent() {
        let dir = TempDir::new().unwrap();
        let backend = FsBackend::new(dir.path());
        let small = vec![b'a'; 16];
        let large = vec![b'b'; 64 * 1024];

        for _ in 0..8 {
            let (a, b) = tokio::join!(backend.save("k", &small), backend.save("k", &large));
            a.unwrap();
            b.unwrap();

            let entry = backend.restore("k", &[]).await.unwrap().unwrap();
            assert!(entry.payload == small || entry.payload == large);
        }

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
        assert_eq!(backend.list("").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_metadata_is_skipped() {
        let dir = TempDir::new().unwrap();
        let backend = FsBackend::new(dir.path());
        backend.save("good", b"v").await.unwrap();
        std::fs::write(dir.path().join("garbage.json"), b"not json").unwrap();

        let listed = backend.list("").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].key, "good");
    }
}
