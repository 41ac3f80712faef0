//! Image lookup, derivation and upload.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use moka::future::Cache;
use tracing::{debug, info, instrument, warn};

use super::descriptor::{OutputFormat, TransformDescriptor, cache_key};
use super::transform::ImageTransformer;
use super::ImageError;
use crate::config::ImageConfig;
use crate::storage::{ObjectStore, StoredObject, validate_key};

/// Cache lifetime for derived variants; their keys never change meaning.
pub const IMMUTABLE_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

const ORIGINALS_PREFIX: &str = "originals";
const VIDEOS_PREFIX: &str = "videos";

/// Content types accepted by [`ImageService::upload`].
pub const ALLOWED_UPLOAD_TYPES: &[&str] = &[
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/webp",
    "image/gif",
    "video/mp4",
    "video/webm",
    "video/quicktime",
];

const MAX_FILE_NAME_LEN: usize = 100;

/// Where an upload was stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedAsset {
    /// Object key, e.g. `originals/1760000000000-linen.jpg`.
    pub path: String,
    pub is_video: bool,
}

impl UploadedAsset {
    /// Public URL under `base_url` that serves this asset.
    #[must_use]
    pub fn url(&self, base_url: &str) -> String {
        let suffix = if self.is_video { "?type=video" } else { "" };
        format!("{base_url}/images/{}{suffix}", self.path)
    }
}

/// `prefix/path`, unless `path` already starts with the prefix.
fn prefixed(prefix: &str, path: &str) -> String {
    let path = path.trim_start_matches('/');
    if path
        .strip_prefix(prefix)
        .is_some_and(|rest| rest.starts_with('/'))
    {
        path.to_string()
    } else {
        format!("{prefix}/{path}")
    }
}

/// Keep ASCII alphanumerics, dots and dashes; replace everything else.
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name).trim();
    let sanitized: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_FILE_NAME_LEN)
        .collect();

    if sanitized.chars().all(|c| c == '.' || c == '_') {
        "upload".to_string()
    } else {
        sanitized
    }
}

#[allow(clippy::ptr_arg)]
fn weigh(key: &String, object: &Arc<StoredObject>) -> u32 {
    u32::try_from(key.len() + object.bytes.len()).unwrap_or(u32::MAX)
}

/// Serves originals, derived variants and videos from object storage.
#[derive(Clone)]
pub struct ImageService {
    store: Arc<dyn ObjectStore>,
    transformer: Arc<dyn ImageTransformer>,
    hot: Cache<String, Arc<StoredObject>>,
    transform_timeout: Duration,
    upload_max_bytes: usize,
}

impl ImageService {
    #[must_use]
    pub fn new(
        store: Arc<dyn ObjectStore>,
        transformer: Arc<dyn ImageTransformer>,
        config: &ImageConfig,
    ) -> Self {
        let hot = Cache::builder()
            .weigher(weigh)
            .max_capacity(config.memory_cache_bytes)
            .build();

        Self {
            store,
            transformer,
            hot,
            transform_timeout: config.transform_timeout,
            upload_max_bytes: config.upload_max_bytes,
        }
    }

    #[must_use]
    pub const fn upload_max_bytes(&self) -> usize {
        self.upload_max_bytes
    }

    /// The variant of the original at `path` described by `descriptor`.
    ///
    /// Served from the hot cache or object storage when already derived;
    /// otherwise transformed, persisted, then returned.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError::NotFound`] when the original is missing,
    /// [`ImageError::Timeout`] when the transform exceeds its bound, and
    /// storage or decode errors otherwise.
    #[instrument(skip(self, descriptor), fields(key))]
    pub async fn derived(
        &self,
        path: &str,
        descriptor: TransformDescriptor,
    ) -> Result<StoredObject, ImageError> {
        let original_key = prefixed(ORIGINALS_PREFIX, path);
        validate_key(&original_key)?;
        let key = cache_key(&original_key, &descriptor);
        tracing::Span::current().record("key", key.as_str());

        if let Some(hit) = self.hot.get(&key).await {
            debug!("Hot cache hit");
            return Ok(StoredObject::clone(&hit));
        }

        if let Some(stored) = self.store.get(&key).await? {
            debug!("Storage cache hit");
            let object = StoredObject::new(stored.bytes, descriptor.format.content_type())
                .with_cache_control(IMMUTABLE_CACHE_CONTROL);
            self.hot.insert(key, Arc::new(object.clone())).await;
            return Ok(object);
        }

        let original = self
            .store
            .get(&original_key)
            .await?
            .ok_or_else(|| ImageError::NotFound(path.to_string()))?;

        // Detached so the variant is still persisted if the client goes away.
        let service = self.clone();
        tokio::spawn(async move { service.derive(key, original.bytes, descriptor).await })
            .await
            .map_err(|e| ImageError::Task(e.to_string()))?
    }

    async fn derive(
        &self,
        key: String,
        original: Vec<u8>,
        descriptor: TransformDescriptor,
    ) -> Result<StoredObject, ImageError> {
        let started = Instant::now();
        let transformer = Arc::clone(&self.transformer);
        let task = tokio::task::spawn_blocking(move || transformer.transform(&original, &descriptor));

        let bytes = tokio::time::timeout(self.transform_timeout, task)
            .await
            .map_err(|_| {
                warn!(key = %key, "Image transform timed out");
                ImageError::Timeout
            })?
            .map_err(|e| ImageError::Task(e.to_string()))??;

        let object = StoredObject::new(bytes, descriptor.format.content_type())
            .with_cache_control(IMMUTABLE_CACHE_CONTROL);
        self.store.put(&key, object.clone()).await?;
        self.hot.insert(key.clone(), Arc::new(object.clone())).await;

        info!(
            key = %key,
            size = object.bytes.len(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Derived image variant"
        );
        Ok(object)
    }

    /// A stored video, verbatim.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError::NotFound`] when no video exists at `path`.
    pub async fn video(&self, path: &str) -> Result<StoredObject, ImageError> {
        let key = prefixed(VIDEOS_PREFIX, path);
        validate_key(&key)?;
        self.store
            .get(&key)
            .await?
            .ok_or_else(|| ImageError::NotFound(path.to_string()))
    }

    /// Store an uploaded original.
    ///
    /// JPEG, PNG and WebP images are orientation-normalized and re-encoded
    /// without metadata. GIFs and videos are stored as sent.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError::TooLarge`] or [`ImageError::UnsupportedType`]
    /// for rejected uploads, and decode or storage errors otherwise.
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub async fn upload(
        &self,
        file_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadedAsset, ImageError> {
        if bytes.len() > self.upload_max_bytes {
            return Err(ImageError::TooLarge {
                size: bytes.len(),
                max: self.upload_max_bytes,
            });
        }

        let content_type = content_type.trim().to_ascii_lowercase();
        if !ALLOWED_UPLOAD_TYPES.contains(&content_type.as_str()) {
            return Err(ImageError::UnsupportedType(content_type));
        }

        let is_video = content_type.starts_with("video/");
        let (bytes, stored_type) = match OutputFormat::from_mime(&content_type) {
            Some(format) => {
                let transformer = Arc::clone(&self.transformer);
                let task =
                    tokio::task::spawn_blocking(move || transformer.normalize(&bytes, format));
                let normalized = tokio::time::timeout(self.transform_timeout, task)
                    .await
                    .map_err(|_| ImageError::Timeout)?
                    .map_err(|e| ImageError::Task(e.to_string()))??;
                (normalized, format.content_type().to_string())
            }
            None => (bytes, content_type),
        };

        let prefix = if is_video { VIDEOS_PREFIX } else { ORIGINALS_PREFIX };
        let path = format!(
            "{prefix}/{}-{}",
            Utc::now().timestamp_millis(),
            sanitize_file_name(file_name)
        );
        self.store
            .put(&path, StoredObject::new(bytes, stored_type))
            .await?;

        info!(path = %path, "Stored upload");
        Ok(UploadedAsset { path, is_video })
    }
}
