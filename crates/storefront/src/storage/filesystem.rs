//! Filesystem-backed object storage.
//!
//! Layout under the root:
//! ```text
//! {root}/
//!   {key}
//!   {key}.meta.json
//! ```
//!
//! Writes go to a temp file first and are renamed into place, so readers
//! never observe a half-written object.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use super::{ObjectStore, Result, StoredObject, validate_key};

const META_SUFFIX: &str = ".meta.json";

#[derive(Serialize, Deserialize)]
struct Metadata {
    content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cache_control: Option<String>,
}

/// Object store rooted at a local directory.
pub struct FilesystemStore {
    root: PathBuf,
}

impl FilesystemStore {
    /// Create a store, creating the root directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the directory cannot be created.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(suffix);
    PathBuf::from(os)
}

async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let temp = with_suffix(path, &format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
    fs::write(&temp, contents).await?;
    if let Err(e) = fs::rename(&temp, path).await {
        let _ = fs::remove_file(&temp).await;
        return Err(e.into());
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for FilesystemStore {
    async fn get(&self, key: &str) -> Result<Option<StoredObject>> {
        let path = self.path_for(key)?;

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let meta = match fs::read(with_suffix(&path, META_SUFFIX)).await {
            Ok(raw) => serde_json::from_slice::<Metadata>(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Metadata {
                content_type: "application/octet-stream".to_string(),
                cache_control: None,
            },
            Err(e) => return Err(e.into()),
        };

        Ok(Some(StoredObject {
            bytes,
            content_type: meta.content_type,
            cache_control: meta.cache_control,
        }))
    }

    async fn put(&self, key: &str, object: StoredObject) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let meta = serde_json::to_vec(&Metadata {
            content_type: object.content_type,
            cache_control: object.cache_control,
        })?;

        // Sidecar first: a reader that sees the object also sees its metadata.
        write_atomic(&with_suffix(&path, META_SUFFIX), &meta).await?;
        write_atomic(&path, &object.bytes).await?;

        debug!(key, size = object.bytes.len(), "Stored object");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::storage::StorageError;

    #[tokio::test]
    async fn test_put_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path()).await.unwrap();

        let object = StoredObject::new(vec![1, 2, 3], "image/webp")
            .with_cache_control("public, max-age=31536000, immutable");
        store
            .put("cache/linen-0011223344556677.webp", object.clone())
            .await
            .unwrap();

        let fetched = store
            .get("cache/linen-0011223344556677.webp")
            .await
            .unwrap();
        assert_eq!(fetched, Some(object));
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path()).await.unwrap();
        assert_eq!(store.get("originals/nope.jpg").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_overwrite_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path()).await.unwrap();

        store
            .put("originals/a.png", StoredObject::new(vec![1], "image/png"))
            .await
            .unwrap();
        store
            .put("originals/a.png", StoredObject::new(vec![2, 2], "image/png"))
            .await
            .unwrap();

        let fetched = store.get("originals/a.png").await.unwrap().unwrap();
        assert_eq!(fetched.bytes, vec![2, 2]);
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path()).await.unwrap();
        let err = store.get("../outside.jpg").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }
}
