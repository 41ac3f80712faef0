//! Transformation descriptors and cache keys.
//!
//! A descriptor is built from request query parameters, with every default
//! resolved up front. Its canonical form feeds the cache key, so two
//! requests that mean the same derivation share one cached variant.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use sha2::{Digest, Sha256};

use super::ImageError;

/// Largest accepted width or height.
pub const MAX_DIMENSION: u32 = 4096;

/// Quality used when the request does not name one.
pub const DEFAULT_QUALITY: u8 = 80;

/// How the source aspect ratio maps onto the requested box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Fit {
    /// Fill the box, cropping overflow at the crop anchor.
    #[default]
    Cover,
    /// Fit inside the box, letterboxing with the background.
    Contain,
    /// Stretch to the exact box, ignoring aspect ratio.
    Fill,
    /// Fit inside the box; the output may be smaller than requested.
    Inside,
    /// Cover the box; the output may be larger than requested.
    Outside,
}

impl Fit {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cover => "cover",
            Self::Contain => "contain",
            Self::Fill => "fill",
            Self::Inside => "inside",
            Self::Outside => "outside",
        }
    }
}

impl FromStr for Fit {
    type Err = ImageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cover" => Ok(Self::Cover),
            "contain" => Ok(Self::Contain),
            "fill" => Ok(Self::Fill),
            "inside" => Ok(Self::Inside),
            "outside" => Ok(Self::Outside),
            other => Err(ImageError::InvalidParameter(format!("unknown fit: {other}"))),
        }
    }
}

/// Which part of the source survives a `cover` crop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CropAnchor {
    #[default]
    Center,
    /// Region with the most luminance information.
    Entropy,
    /// Region with the strongest edges.
    Attention,
}

impl CropAnchor {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Center => "center",
            Self::Entropy => "entropy",
            Self::Attention => "attention",
        }
    }
}

impl FromStr for CropAnchor {
    type Err = ImageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "center" | "centre" => Ok(Self::Center),
            "entropy" => Ok(Self::Entropy),
            "attention" => Ok(Self::Attention),
            other => Err(ImageError::InvalidParameter(format!(
                "unknown crop anchor: {other}"
            ))),
        }
    }
}

/// Encoded output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OutputFormat {
    #[default]
    WebP,
    Jpeg,
    Png,
}

impl OutputFormat {
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::WebP => "webp",
            Self::Jpeg => "jpg",
            Self::Png => "png",
        }
    }

    #[must_use]
    pub const fn content_type(self) -> &'static str {
        match self {
            Self::WebP => "image/webp",
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
        }
    }

    /// Format for an upload MIME type, if it is one we re-encode.
    #[must_use]
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "image/webp" => Some(Self::WebP),
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            _ => None,
        }
    }
}

impl FromStr for OutputFormat {
    type Err = ImageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "webp" => Ok(Self::WebP),
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "png" => Ok(Self::Png),
            other => Err(ImageError::InvalidParameter(format!(
                "unsupported format: {other}"
            ))),
        }
    }
}

/// RGBA letterbox fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Background(pub [u8; 4]);

impl Background {
    pub const WHITE: Self = Self([255, 255, 255, 255]);
}

impl Default for Background {
    fn default() -> Self {
        Self::WHITE
    }
}

impl fmt::Display for Background {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for Background {
    type Err = ImageError;

    /// Parse `#rrggbb` or `#rrggbbaa`; the `#` is optional.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ImageError::InvalidParameter(format!("invalid background: {s}"));
        let digits = s.trim().trim_start_matches('#');
        let bytes = hex::decode(digits).map_err(|_| invalid())?;
        match *bytes.as_slice() {
            [r, g, b] => Ok(Self([r, g, b, 255])),
            [r, g, b, a] => Ok(Self([r, g, b, a])),
            _ => Err(invalid()),
        }
    }
}

/// Raw query string of an image request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageQuery {
    pub w: Option<String>,
    pub h: Option<String>,
    pub fit: Option<String>,
    pub crop: Option<String>,
    pub q: Option<String>,
    pub fm: Option<String>,
    pub bg: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl ImageQuery {
    /// `type=video` requests bypass derivation.
    #[must_use]
    pub fn is_video(&self) -> bool {
        self.kind
            .as_deref()
            .is_some_and(|kind| kind.eq_ignore_ascii_case("video"))
    }
}

/// A fully resolved transformation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransformDescriptor {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fit: Fit,
    pub crop: CropAnchor,
    pub quality: u8,
    pub format: OutputFormat,
    pub background: Background,
}

impl Default for TransformDescriptor {
    fn default() -> Self {
        Self {
            width: None,
            height: None,
            fit: Fit::default(),
            crop: CropAnchor::default(),
            quality: DEFAULT_QUALITY,
            format: OutputFormat::default(),
            background: Background::default(),
        }
    }
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn parse_dimension(name: &str, value: Option<&String>) -> Result<Option<u32>, ImageError> {
    let Some(raw) = non_empty(value) else {
        return Ok(None);
    };
    match raw.parse::<u32>() {
        Ok(n) if (1..=MAX_DIMENSION).contains(&n) => Ok(Some(n)),
        _ => Err(ImageError::InvalidParameter(format!(
            "{name} must be between 1 and {MAX_DIMENSION}"
        ))),
    }
}

impl TransformDescriptor {
    /// Build a descriptor from query parameters.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError::InvalidParameter`] for out-of-range sizes or
    /// quality and for unknown fit, crop or format names.
    pub fn from_query(query: &ImageQuery) -> Result<Self, ImageError> {
        let quality = match non_empty(query.q.as_ref()) {
            None => DEFAULT_QUALITY,
            Some(raw) => match raw.parse::<u8>() {
                Ok(q) if (1..=100).contains(&q) => q,
                _ => {
                    return Err(ImageError::InvalidParameter(
                        "q must be between 1 and 100".to_string(),
                    ));
                }
            },
        };

        Ok(Self {
            width: parse_dimension("w", query.w.as_ref())?,
            height: parse_dimension("h", query.h.as_ref())?,
            fit: non_empty(query.fit.as_ref())
                .map(str::parse)
                .transpose()?
                .unwrap_or_default(),
            crop: non_empty(query.crop.as_ref())
                .map(str::parse)
                .transpose()?
                .unwrap_or_default(),
            quality,
            format: non_empty(query.fm.as_ref())
                .map(str::parse)
                .transpose()?
                .unwrap_or_default(),
            background: non_empty(query.bg.as_ref())
                .map(str::parse)
                .transpose()?
                .unwrap_or_default(),
        })
    }

    #[must_use]
    pub const fn resizes(&self) -> bool {
        self.width.is_some() || self.height.is_some()
    }

    /// Stable textual form; every field is present.
    #[must_use]
    pub fn canonical(&self) -> String {
        let dim = |d: Option<u32>| d.map_or_else(|| "auto".to_string(), |n| n.to_string());
        format!(
            "w={};h={};fit={};crop={};q={};fm={};bg={}",
            dim(self.width),
            dim(self.height),
            self.fit.as_str(),
            self.crop.as_str(),
            self.quality,
            self.format.extension(),
            self.background,
        )
    }
}

/// Object key of the derived variant of `original_path`.
///
/// `cache/{stem}-{hash}.{ext}` where `hash` is the first 16 hex characters
/// of SHA-256 over the path, a newline, and the canonical descriptor.
#[must_use]
pub fn cache_key(original_path: &str, descriptor: &TransformDescriptor) -> String {
    let mut hasher = Sha256::new();
    hasher.update(original_path.as_bytes());
    hasher.update(b"\n");
    hasher.update(descriptor.canonical().as_bytes());
    let digest = hex::encode(hasher.finalize());

    let file_name = original_path.rsplit('/').next().unwrap_or(original_path);
    let stem = file_name
        .rsplit_once('.')
        .map_or(file_name, |(stem, _)| stem)
        .trim();
    let stem = if stem.is_empty() { "image" } else { stem };

    format!(
        "cache/{stem}-{}.{}",
        digest.get(..16).unwrap_or(&digest),
        descriptor.format.extension()
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn query(pairs: &[(&str, &str)]) -> ImageQuery {
        let mut q = ImageQuery::default();
        for (k, v) in pairs {
            let v = Some((*v).to_string());
            match *k {
                "w" => q.w = v,
                "h" => q.h = v,
                "fit" => q.fit = v,
                "crop" => q.crop = v,
                "q" => q.q = v,
                "fm" => q.fm = v,
                "bg" => q.bg = v,
                "type" => q.kind = v,
                _ => unreachable!(),
            }
        }
        q
    }

    #[test]
    fn test_defaults_resolved() {
        let d = TransformDescriptor::from_query(&ImageQuery::default()).unwrap();
        assert_eq!(d, TransformDescriptor::default());
        assert_eq!(
            d.canonical(),
            "w=auto;h=auto;fit=cover;crop=center;q=80;fm=webp;bg=ffffffff"
        );
        assert!(!d.resizes());
    }

    #[test]
    fn test_explicit_defaults_share_key() {
        let implicit = TransformDescriptor::from_query(&query(&[("w", "400")])).unwrap();
        let explicit = TransformDescriptor::from_query(&query(&[
            ("w", "400"),
            ("fit", "cover"),
            ("crop", "centre"),
            ("q", "80"),
            ("fm", "webp"),
            ("bg", "#ffffff"),
        ]))
        .unwrap();
        assert_eq!(
            cache_key("originals/linen.jpg", &implicit),
            cache_key("originals/linen.jpg", &explicit)
        );
    }

    #[test]
    fn test_cache_key_shape_and_determinism() {
        let d = TransformDescriptor::from_query(&query(&[("w", "400"), ("fm", "jpg")])).unwrap();
        let key = cache_key("originals/1700000000000-linen.jpg", &d);
        assert_eq!(key, cache_key("originals/1700000000000-linen.jpg", &d));
        assert!(key.starts_with("cache/1700000000000-linen-"));
        assert!(key.ends_with(".jpg"));
        let hash = key
            .trim_start_matches("cache/1700000000000-linen-")
            .trim_end_matches(".jpg");
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_quality_changes_key() {
        let q80 = TransformDescriptor::from_query(&query(&[("w", "400")])).unwrap();
        let q81 = TransformDescriptor::from_query(&query(&[("w", "400"), ("q", "81")])).unwrap();
        assert_ne!(
            cache_key("originals/linen.jpg", &q80),
            cache_key("originals/linen.jpg", &q81)
        );
    }

    #[test]
    fn test_path_changes_key() {
        let d = TransformDescriptor::default();
        assert_ne!(
            cache_key("originals/a/linen.jpg", &d),
            cache_key("originals/b/linen.jpg", &d)
        );
    }

    #[test]
    fn test_invalid_parameters() {
        for pairs in [
            [("w", "0")],
            [("w", "5000")],
            [("h", "abc")],
            [("q", "0")],
            [("q", "101")],
            [("fit", "stretch")],
            [("crop", "north")],
            [("fm", "avif")],
            [("bg", "#12345")],
        ] {
            let err = TransformDescriptor::from_query(&query(&pairs)).unwrap_err();
            assert!(matches!(err, ImageError::InvalidParameter(_)), "{pairs:?}");
        }
    }

    #[test]
    fn test_background_parse() {
        assert_eq!(
            "#000000".parse::<Background>().unwrap(),
            Background([0, 0, 0, 255])
        );
        assert_eq!(
            "ff000080".parse::<Background>().unwrap(),
            Background([255, 0, 0, 128])
        );
    }

    #[test]
    fn test_video_flag() {
        assert!(query(&[("type", "video")]).is_video());
        assert!(!query(&[("type", "image")]).is_video());
        assert!(!ImageQuery::default().is_video());
    }
}
