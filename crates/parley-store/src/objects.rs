//! Filesystem-backed object storage for message attachments.
//!
//! Objects are addressed by a relative key such as
//! `alice/1718000000000-holiday.jpg`; the first segment is the owner so
//! access can be checked by prefix. The content type of every object is kept
//! in a sidecar under `.meta/` next to the data. Stored objects are never
//! replaced.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, StoreError};

const META_DIR: &str = ".meta";

/// Numbered variants tried when a key is already taken.
const MAX_KEY_ATTEMPTS: u32 = 16;

/// Validate a relative object key and resolve it under `base`.
fn resolve_key(base: &Path, key: &str) -> Result<PathBuf> {
    if key.is_empty() {
        return Err(StoreError::InvalidPath("empty key".into()));
    }
    let mut resolved = base.to_path_buf();
    for component in Path::new(key).components() {
        match component {
            Component::Normal(seg) => {
                let seg_str = seg.to_string_lossy();
                if seg_str.starts_with('.') {
                    return Err(StoreError::InvalidPath(format!("hidden segment in {key}")));
                }
                resolved.push(seg);
            }
            _ => return Err(StoreError::InvalidPath(format!("path traversal in {key}"))),
        }
    }
    if !resolved.starts_with(base) || resolved == base {
        return Err(StoreError::InvalidPath(key.to_string()));
    }
    Ok(resolved)
}

/// `alice/1-cat.png` -> `alice/1-cat-2.png`
fn numbered_key(key: &str, n: u32) -> String {
    let (dir, name) = match key.rsplit_once('/') {
        Some((dir, name)) => (Some(dir), name),
        None => (None, key),
    };
    let name = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}-{n}.{ext}"),
        _ => format!("{name}-{n}"),
    };
    match dir {
        Some(dir) => format!("{dir}/{name}"),
        None => name,
    }
}

#[derive(Debug, Clone)]
pub struct ObjectStore {
    base_path: PathBuf,
    public_base_url: String,
    max_size: usize,
}

impl ObjectStore {
    pub async fn new(
        base_path: PathBuf,
        public_base_url: impl Into<String>,
        max_size: usize,
    ) -> Result<Self> {
        fs::create_dir_all(base_path.join(META_DIR))
            .await
            .map_err(|e| {
                StoreError::ObjectStorage(format!(
                    "Failed to create object directory '{}': {}",
                    base_path.display(),
                    e
                ))
            })?;

        info!(path = %base_path.display(), "Object store initialized");

        Ok(Self {
            base_path,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            max_size,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Public URL under which `key` is served.
    pub fn url_for(&self, key: &str) -> String {
        format!("{}/objects/{}", self.public_base_url, key)
    }

    /// Reverse of [`url_for`](Self::url_for).
    pub fn key_for_url<'a>(&self, url: &'a str) -> Option<&'a str> {
        url.strip_prefix(&self.public_base_url)?
            .strip_prefix("/objects/")
    }

    /// Durably write `data` under `key` and return its public URL.
    ///
    /// If `key` is taken the object lands under the first free numbered
    /// variant instead, and the returned URL names that key.
    pub async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<String> {
        if data.is_empty() {
            return Err(StoreError::ObjectRejected("Empty object".to_string()));
        }
        if data.len() > self.max_size {
            return Err(StoreError::ObjectRejected(format!(
                "Object too large: {} bytes (max {})",
                data.len(),
                self.max_size
            )));
        }

        let path = resolve_key(&self.base_path, key)?;
        let parent = path
            .parent()
            .ok_or_else(|| StoreError::InvalidPath(key.to_string()))?;
        fs::create_dir_all(parent).await?;

        // hidden temp name so a half-written object is never served
        let tmp = parent.join(format!(".{}.partial", Uuid::new_v4()));
        fs::write(&tmp, data)
            .await
            .map_err(|e| StoreError::ObjectStorage(format!("Failed to write {key}: {e}")))?;
        let committed = self.link_unused(&tmp, key).await;
        let _ = fs::remove_file(&tmp).await;
        let key = committed?;

        let meta = resolve_key(&self.base_path.join(META_DIR), &key)?;
        if let Some(parent) = meta.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&meta, content_type.as_bytes()).await?;

        debug!(key = %key, size = data.len(), content_type, "Stored object");
        Ok(self.url_for(&key))
    }

    /// Hard-link `tmp` to the first key that does not exist yet. Linking
    /// fails on an existing target, so concurrent writers never clobber
    /// each other.
    async fn link_unused(&self, tmp: &Path, key: &str) -> Result<String> {
        for attempt in 0..MAX_KEY_ATTEMPTS {
            let candidate = match attempt {
                0 => key.to_string(),
                n => numbered_key(key, n + 1),
            };
            let path = resolve_key(&self.base_path, &candidate)?;
            match fs::hard_link(tmp, &path).await {
                Ok(()) => return Ok(candidate),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!(key = %candidate, "Object key taken");
                }
                Err(e) => {
                    return Err(StoreError::ObjectStorage(format!(
                        "Failed to commit {candidate}: {e}"
                    )))
                }
            }
        }
        Err(StoreError::ObjectStorage(format!("No free key left for {key}")))
    }

    /// Object bytes and content type.
    pub async fn get(&self, key: &str) -> Result<(Vec<u8>, String)> {
        let path = resolve_key(&self.base_path, key)?;
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StoreError::NotFound);
        }

        let data = fs::read(&path)
            .await
            .map_err(|e| StoreError::ObjectStorage(format!("Failed to read {key}: {e}")))?;
        let meta = resolve_key(&self.base_path.join(META_DIR), key)?;
        let content_type = fs::read_to_string(&meta)
            .await
            .unwrap_or_else(|_| "application/octet-stream".to_string());

        debug!(key, size = data.len(), "Retrieved object");
        Ok((data, content_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_store() -> (ObjectStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = ObjectStore::new(dir.path().to_path_buf(), "http://localhost:8080/", 1024)
            .await
            .unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn put_and_get() {
        let (store, _dir) = test_store().await;

        let url = store
            .put("alice/1-cat.png", b"png-bytes", "image/png")
            .await
            .unwrap();
        assert_eq!(url, "http://localhost:8080/objects/alice/1-cat.png");
        assert_eq!(store.key_for_url(&url), Some("alice/1-cat.png"));

        let (data, content_type) = store.get("alice/1-cat.png").await.unwrap();
        assert_eq!(data, b"png-bytes");
        assert_eq!(content_type, "image/png");
    }

    #[tokio::test]
    async fn existing_object_is_never_replaced() {
        let (store, dir) = test_store().await;

        let first = store
            .put("alice/1700000000000-a.png", b"first", "image/png")
            .await
            .unwrap();
        let second = store
            .put("alice/1700000000000-a.png", b"second", "image/jpeg")
            .await
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(second, "http://localhost:8080/objects/alice/1700000000000-a-2.png");

        let (data, content_type) = store
            .get(store.key_for_url(&first).unwrap())
            .await
            .unwrap();
        assert_eq!(data, b"first");
        assert_eq!(content_type, "image/png");
        let (data, content_type) = store
            .get(store.key_for_url(&second).unwrap())
            .await
            .unwrap();
        assert_eq!(data, b"second");
        assert_eq!(content_type, "image/jpeg");

        // no temp files left behind
        let leftovers = std::fs::read_dir(dir.path().join("alice"))
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().ends_with(".partial"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn concurrent_puts_of_one_key_keep_both() {
        let (store, _dir) = test_store().await;
        let puts = (0..4u8)
            .map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                let url = store.put("bob/1-x.bin", &[i + 1], "application/octet-stream").await.unwrap();
                (url, i + 1)
            })
        })
        .collect::<Vec<_>>();

        let mut urls = Vec::new();
        for put in puts {
            let (url, byte) = put.await.unwrap();
            let (data, _) = store.get(store.key_for_url(&url).unwrap()).await.unwrap();
            assert_eq!(data, vec![byte]);
            urls.push(url);
        }
        urls.sort();
        urls.dedup();
        assert_eq!(urls.len(), 4);
    }

    #[test]
    fn numbered_keys_keep_the_extension() {
        assert_eq!(numbered_key("alice/1-cat.png", 2), "alice/1-cat-2.png");
        assert_eq!(numbered_key("alice/1-notes", 3), "alice/1-notes-3");
        assert_eq!(numbered_key("plain", 2), "plain-2");
    }

    #[tokio::test]
    async fn traversal_rejected() {
        let (store, _dir) = test_store().await;
        for key in ["../escape", "/abs/path", "alice/../../x", ".meta/alice", ""] {
            assert!(
                matches!(
                    store.put(key, b"x", "text/plain").await,
                    Err(StoreError::InvalidPath(_))
                ),
                "{key} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn size_limits() {
        let (store, _dir) = test_store().await;
        assert!(matches!(
            store.put("a/empty", b"", "text/plain").await,
            Err(StoreError::ObjectRejected(_))
        ));
        assert!(matches!(
            store.put("a/big", &vec![0u8; 2048], "application/octet-stream").await,
            Err(StoreError::ObjectRejected(_))
        ));
    }
}
