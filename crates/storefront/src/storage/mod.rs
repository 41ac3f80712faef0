//! Object storage for image originals, derived variants and videos.
//!
//! Keys are relative, `/`-separated paths:
//!
//! ```text
//! originals/{timestamp}-{name}   uploaded images
//! videos/{timestamp}-{name}      uploaded videos, served verbatim
//! cache/{stem}-{hash}.{ext}      derived variants
//! ```
//!
//! ## Backends
//!
//! - [`FilesystemStore`] - Local directory, one file per key plus a metadata sidecar
//! - [`MemoryStore`] - In-process map with access counters (tests)

mod filesystem;
mod memory;

pub use filesystem::FilesystemStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur during object storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt object metadata: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Result type for object storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Bytes plus the HTTP metadata they are served with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub cache_control: Option<String>,
}

impl StoredObject {
    #[must_use]
    pub fn new(bytes: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            bytes,
            content_type: content_type.into(),
            cache_control: None,
        }
    }

    #[must_use]
    pub fn with_cache_control(mut self, value: impl Into<String>) -> Self {
        self.cache_control = Some(value.into());
        self
    }
}

/// Key/value blob storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object. A missing key is `Ok(None)`, not an error.
    async fn get(&self, key: &str) -> Result<Option<StoredObject>>;

    /// Store an object, replacing any existing one under the same key.
    async fn put(&self, key: &str, object: StoredObject) -> Result<()>;
}

/// Reject keys that could escape the storage root.
///
/// # Errors
///
/// Returns [`StorageError::InvalidKey`] for empty or absolute keys, keys with
/// empty, `.` or `..` segments, and keys containing backslashes or NUL.
pub fn validate_key(key: &str) -> Result<()> {
    let invalid = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.contains('\0')
        || key
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");

    if invalid {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("originals/1700000000000-linen.jpg").is_ok());
        assert!(validate_key("cache/linen-0123456789abcdef.webp").is_ok());

        for bad in [
            "",
            "/etc/passwd",
            "originals/../secrets",
            "..",
            "originals//x.jpg",
            "originals/./x.jpg",
            "originals\\x.jpg",
        ] {
            assert!(validate_key(bad).is_err(), "{bad} should be rejected");
        }
    }
}
