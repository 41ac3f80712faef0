//! Image derivation cache.
//!
//! Derived variants are content addressed: the object key is a pure function
//! of the original's path and the resolved [`TransformDescriptor`], so a
//! variant is transformed at most once and then served from storage.
//!
//! # Modules
//!
//! - [`descriptor`] - Query parsing, canonical descriptors and cache keys
//! - [`transform`] - Orientation, resize, crop and encoding
//! - [`service`] - Lookup, derivation, persistence and uploads

pub mod descriptor;
pub mod service;
pub mod transform;

pub use descriptor::{ImageQuery, OutputFormat, TransformDescriptor, cache_key};
pub use service::{ImageService, UploadedAsset};
pub use transform::{ImageTransformer, RasterTransformer};

use thiserror::Error;

use crate::storage::StorageError;

/// Errors from the image pipeline.
#[derive(Debug, Error)]
pub enum ImageError {
    /// The original (or video) does not exist.
    #[error("image not found: {0}")]
    NotFound(String),

    /// A query parameter is out of range or unknown.
    #[error("{0}")]
    InvalidParameter(String),

    /// Upload content type is not accepted.
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),

    /// Upload exceeds the size ceiling.
    #[error("file too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("image processing failed: {0}")]
    Decode(#[from] image::ImageError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("image transform timed out")]
    Timeout,

    /// The derivation task panicked or was cancelled.
    #[error("image task failed: {0}")]
    Task(String),
}

impl ImageError {
    /// Whether the request itself was at fault.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidParameter(_)
                | Self::UnsupportedType(_)
                | Self::TooLarge { .. }
                | Self::Storage(StorageError::InvalidKey(_))
        )
    }
}
