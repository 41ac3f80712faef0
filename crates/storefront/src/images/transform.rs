//! Raster transformation: orient, resize, strip, encode.
//!
//! Every output is re-encoded from decoded pixels, so EXIF and all other
//! metadata never survive, whether or not a resize was requested.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, GrayImage, ImageDecoder, ImageReader, Rgba, RgbaImage};

use super::ImageError;
use super::descriptor::{
    Background, CropAnchor, Fit, MAX_DIMENSION, OutputFormat, TransformDescriptor,
};

const FILTER: FilterType = FilterType::Lanczos3;

/// JPEG quality for re-encoded uploads.
const UPLOAD_JPEG_QUALITY: u8 = 90;

/// Candidate windows evaluated for entropy and attention crops.
const CROP_CANDIDATES: u32 = 8;

/// Turns original bytes into derived bytes.
///
/// Implementations are synchronous and CPU bound; callers run them on the
/// blocking pool.
pub trait ImageTransformer: Send + Sync {
    /// Derive a variant of `original` as described.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError::Decode`] when the original cannot be decoded or
    /// the result cannot be encoded, and [`ImageError::InvalidParameter`]
    /// when the resulting size would exceed [`MAX_DIMENSION`] on a side.
    fn transform(
        &self,
        original: &[u8],
        descriptor: &TransformDescriptor,
    ) -> Result<Vec<u8>, ImageError>;

    /// Orientation-normalize an uploaded original and re-encode it in its
    /// own format without metadata.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError::Decode`] when the upload is not a decodable image.
    fn normalize(&self, original: &[u8], format: OutputFormat) -> Result<Vec<u8>, ImageError>;
}

/// [`ImageTransformer`] built on the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct RasterTransformer;

impl ImageTransformer for RasterTransformer {
    fn transform(
        &self,
        original: &[u8],
        descriptor: &TransformDescriptor,
    ) -> Result<Vec<u8>, ImageError> {
        let img = decode_oriented(original)?;
        let img = resize(img, descriptor)?;
        encode(&img, descriptor.format, descriptor.quality, descriptor.background)
    }

    fn normalize(&self, original: &[u8], format: OutputFormat) -> Result<Vec<u8>, ImageError> {
        let img = decode_oriented(original)?;
        encode(&img, format, UPLOAD_JPEG_QUALITY, Background::WHITE)
    }
}

/// Decode and apply the embedded orientation tag.
fn decode_oriented(bytes: &[u8]) -> Result<DynamicImage, ImageError> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(image::ImageError::IoError)?;
    let mut decoder = reader.into_decoder()?;
    let orientation = decoder.orientation()?;
    let mut img = DynamicImage::from_decoder(decoder)?;
    img.apply_orientation(orientation);
    Ok(img)
}

/// `value * num / den`, rounded, never below 1.
fn scale(value: u32, num: u32, den: u32) -> u32 {
    let den = u64::from(den.max(1));
    let scaled = (u64::from(value) * u64::from(num) + den / 2) / den;
    u32::try_from(scaled.max(1)).unwrap_or(u32::MAX)
}

/// `value * num / den`, rounded up.
fn scale_up(value: u32, num: u32, den: u32) -> u32 {
    let den = u64::from(den.max(1));
    let scaled = (u64::from(value) * u64::from(num)).div_ceil(den);
    u32::try_from(scaled.max(1)).unwrap_or(u32::MAX)
}

/// Smallest aspect-preserving size that covers `tw`x`th`.
fn cover_size(sw: u32, sh: u32, tw: u32, th: u32) -> (u32, u32) {
    if u64::from(tw) * u64::from(sh) >= u64::from(th) * u64::from(sw) {
        (tw, scale_up(sh, tw, sw).max(th))
    } else {
        (scale_up(sw, th, sh).max(tw), th)
    }
}

/// Source window with the `tw`:`th` aspect ratio that fits inside `sw`x`sh`.
fn cover_window(sw: u32, sh: u32, tw: u32, th: u32) -> (u32, u32) {
    if u64::from(sw) * u64::from(th) >= u64::from(tw) * u64::from(sh) {
        (scale(sh, tw, th).min(sw), sh)
    } else {
        (sw, scale(sw, th, tw).min(sh))
    }
}

fn bounded(w: u32, h: u32) -> Result<(u32, u32), ImageError> {
    if w > MAX_DIMENSION || h > MAX_DIMENSION {
        return Err(ImageError::InvalidParameter(format!(
            "resulting size {w}x{h} exceeds {MAX_DIMENSION} pixels per side"
        )));
    }
    Ok((w, h))
}

fn resize(img: DynamicImage, d: &TransformDescriptor) -> Result<DynamicImage, ImageError> {
    let (sw, sh) = img.dimensions();
    let (tw, th) = match (d.width, d.height) {
        (None, None) => return Ok(img),
        // A single dimension keeps the aspect ratio whatever the fit.
        (Some(w), None) => {
            let (w, h) = bounded(w, scale(sh, w, sw))?;
            return Ok(img.resize_exact(w, h, FILTER));
        }
        (None, Some(h)) => {
            let (w, h) = bounded(scale(sw, h, sh), h)?;
            return Ok(img.resize_exact(w, h, FILTER));
        }
        (Some(w), Some(h)) => (w, h),
    };

    Ok(match d.fit {
        Fit::Fill => img.resize_exact(tw, th, FILTER),
        Fit::Inside => img.resize(tw, th, FILTER),
        Fit::Outside => {
            let (w, h) = cover_size(sw, sh, tw, th);
            let (w, h) = bounded(w, h)?;
            img.resize_exact(w, h, FILTER)
        }
        // Crop in source space, then scale the window; nothing larger than
        // the target is ever allocated.
        Fit::Cover => {
            let (cw, ch) = cover_window(sw, sh, tw, th);
            let (x, y) = anchor_offset(&img.to_luma8(), cw, ch, d.crop);
            img.crop_imm(x, y, cw, ch).resize_exact(tw, th, FILTER)
        }
        Fit::Contain => letterbox(&img.resize(tw, th, FILTER), tw, th, d.background),
    })
}

/// Top-left corner of the `tw`x`th` window kept from `luma`.
fn anchor_offset(luma: &GrayImage, tw: u32, th: u32, anchor: CropAnchor) -> (u32, u32) {
    let dx = luma.width().saturating_sub(tw);
    let dy = luma.height().saturating_sub(th);

    let score: fn(&GrayImage, u32, u32, u32, u32) -> f64 = match anchor {
        CropAnchor::Center => return (dx / 2, dy / 2),
        CropAnchor::Entropy => entropy,
        CropAnchor::Attention => edge_energy,
    };

    let mut best = (dx / 2, dy / 2);
    let mut best_score = f64::NEG_INFINITY;
    for step in 0..=CROP_CANDIDATES {
        let x = dx * step / CROP_CANDIDATES;
        let y = dy * step / CROP_CANDIDATES;
        let s = score(luma, x, y, tw, th);
        if s > best_score {
            best_score = s;
            best = (x, y);
        }
    }
    best
}

/// Shannon entropy of the luminance histogram inside the window.
fn entropy(luma: &GrayImage, x: u32, y: u32, w: u32, h: u32) -> f64 {
    let mut histogram = [0u32; 256];
    let mut total = 0u32;
    for (_, _, pixel) in luma.view(x, y, w, h).pixels() {
        if let Some(bin) = histogram.get_mut(usize::from(pixel.0[0])) {
            *bin += 1;
        }
        total += 1;
    }
    if total == 0 {
        return 0.0;
    }

    let total = f64::from(total);
    histogram
        .iter()
        .filter(|&&count| count > 0)
        .map(|&count| {
            let p = f64::from(count) / total;
            -p * p.log2()
        })
        .sum()
}

/// Mean absolute luminance gradient inside the window.
fn edge_energy(luma: &GrayImage, x: u32, y: u32, w: u32, h: u32) -> f64 {
    let view = luma.view(x, y, w, h);
    let mut energy = 0u64;
    let mut samples = 0u64;
    for py in 0..h.saturating_sub(1) {
        for px in 0..w.saturating_sub(1) {
            let here = i32::from(view.get_pixel(px, py).0[0]);
            let right = i32::from(view.get_pixel(px + 1, py).0[0]);
            let below = i32::from(view.get_pixel(px, py + 1).0[0]);
            energy += u64::from((here - right).unsigned_abs() + (here - below).unsigned_abs());
            samples += 1;
        }
    }
    if samples == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let mean = energy as f64 / samples as f64;
    mean
}

fn letterbox(inner: &DynamicImage, tw: u32, th: u32, background: Background) -> DynamicImage {
    let mut canvas = RgbaImage::from_pixel(tw, th, Rgba(background.0));
    let x = i64::from(tw.saturating_sub(inner.width()) / 2);
    let y = i64::from(th.saturating_sub(inner.height()) / 2);
    imageops::overlay(&mut canvas, &inner.to_rgba8(), x, y);
    DynamicImage::ImageRgba8(canvas)
}

/// Composite over `background`, dropping alpha.
fn flatten(img: &DynamicImage, background: Background) -> DynamicImage {
    let [br, bg, bb, _] = background.0;
    let mut rgba = img.to_rgba8();
    for pixel in rgba.pixels_mut() {
        let [r, g, b, a] = pixel.0;
        let blend = |c: u8, back: u8| {
            let a = u16::from(a);
            let v = (u16::from(c) * a + u16::from(back) * (255 - a) + 127) / 255;
            u8::try_from(v).unwrap_or(u8::MAX)
        };
        pixel.0 = [blend(r, br), blend(g, bg), blend(b, bb), 255];
    }
    DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(rgba).to_rgb8())
}

/// zlib level for a 1..=100 quality: higher quality, lower level.
#[must_use]
pub fn png_compression_level(quality: u8) -> u8 {
    let quality = u32::from(quality.clamp(1, 100));
    let level = ((100 - quality) * 9 + 50) / 100;
    u8::try_from(level).unwrap_or(9)
}

fn png_compression(quality: u8) -> CompressionType {
    match png_compression_level(quality) {
        0..=2 => CompressionType::Fast,
        3..=6 => CompressionType::Default,
        _ => CompressionType::Best,
    }
}

fn encode(
    img: &DynamicImage,
    format: OutputFormat,
    quality: u8,
    background: Background,
) -> Result<Vec<u8>, ImageError> {
    let mut out = Vec::new();
    match format {
        OutputFormat::Jpeg => {
            flatten(img, background)
                .write_with_encoder(JpegEncoder::new_with_quality(&mut out, quality))?;
        }
        OutputFormat::Png => {
            DynamicImage::ImageRgba8(img.to_rgba8()).write_with_encoder(
                PngEncoder::new_with_quality(&mut out, png_compression(quality), PngFilter::Adaptive),
            )?;
        }
        // The encoder is lossless only; quality still distinguishes cache keys.
        OutputFormat::WebP => {
            DynamicImage::ImageRgba8(img.to_rgba8())
                .write_with_encoder(WebPEncoder::new_lossless(&mut out))?;
        }
    }
    Ok(out)
}

/// Wraps a transformer and counts how often each method runs.
#[cfg(any(test, feature = "test-util"))]
#[derive(Debug, Default)]
pub struct CountingTransformer<T = RasterTransformer> {
    inner: T,
    transforms: std::sync::atomic::AtomicUsize,
    normalizations: std::sync::atomic::AtomicUsize,
    delay: Option<std::time::Duration>,
}

#[cfg(any(test, feature = "test-util"))]
impl<T: ImageTransformer> CountingTransformer<T> {
    #[must_use]
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            transforms: std::sync::atomic::AtomicUsize::new(0),
            normalizations: std::sync::atomic::AtomicUsize::new(0),
            delay: None,
        }
    }

    /// Sleep this long inside every transform.
    #[must_use]
    pub const fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    #[must_use]
    pub fn transforms(&self) -> usize {
        self.transforms.load(std::sync::atomic::Ordering::SeqCst)
    }

    #[must_use]
    pub fn normalizations(&self) -> usize {
        self.normalizations.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(any(test, feature = "test-util"))]
impl<T: ImageTransformer> ImageTransformer for CountingTransformer<T> {
    fn transform(
        &self,
        original: &[u8],
        descriptor: &TransformDescriptor,
    ) -> Result<Vec<u8>, ImageError> {
        self.transforms
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.inner.transform(original, descriptor)
    }

    fn normalize(&self, original: &[u8], format: OutputFormat) -> Result<Vec<u8>, ImageError> {
        self.normalizations
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.inner.normalize(original, format)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::{ImageFormat, Luma, Rgb, RgbImage};

    use super::*;

    /// 40x20 PNG: textured left half, flat right half.
    fn sample_png() -> Vec<u8> {
        let img = RgbImage::from_fn(40, 20, |x, y| {
            if x < 20 {
                let v = u8::try_from((x * 37 + y * 91) % 256).unwrap();
                Rgb([v, v, v])
            } else {
                Rgb([200, 30, 30])
            }
        });
        let mut out = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    fn descriptor(width: Option<u32>, height: Option<u32>, fit: Fit) -> TransformDescriptor {
        TransformDescriptor {
            width,
            height,
            fit,
            format: OutputFormat::Png,
            ..TransformDescriptor::default()
        }
    }

    fn dimensions(bytes: &[u8]) -> (u32, u32) {
        image::load_from_memory(bytes).unwrap().dimensions()
    }

    #[test]
    fn test_fit_geometry() {
        let original = sample_png();
        let t = RasterTransformer;
        let cases = [
            (Fit::Cover, (10, 10)),
            (Fit::Contain, (10, 10)),
            (Fit::Fill, (10, 10)),
            (Fit::Inside, (10, 5)),
            (Fit::Outside, (20, 10)),
        ];
        for (fit, expected) in cases {
            let out = t
                .transform(&original, &descriptor(Some(10), Some(10), fit))
                .unwrap();
            assert_eq!(dimensions(&out), expected, "{fit:?}");
        }
    }

    #[test]
    fn test_single_dimension_keeps_aspect() {
        let original = sample_png();
        let out = RasterTransformer
            .transform(&original, &descriptor(Some(20), None, Fit::Cover))
            .unwrap();
        assert_eq!(dimensions(&out), (20, 10));

        let out = RasterTransformer
            .transform(&original, &descriptor(None, Some(5), Fit::Fill))
            .unwrap();
        assert_eq!(dimensions(&out), (10, 5));
    }

    #[test]
    fn test_no_resize_still_reencodes() {
        let original = sample_png();
        let d = TransformDescriptor {
            format: OutputFormat::WebP,
            ..TransformDescriptor::default()
        };
        let out = RasterTransformer.transform(&original, &d).unwrap();
        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::WebP);
        assert_eq!(dimensions(&out), (40, 20));
    }

    #[test]
    fn test_transform_is_deterministic() {
        let original = sample_png();
        for format in [OutputFormat::WebP, OutputFormat::Jpeg, OutputFormat::Png] {
            let d = TransformDescriptor {
                width: Some(16),
                height: Some(16),
                format,
                ..TransformDescriptor::default()
            };
            let a = RasterTransformer.transform(&original, &d).unwrap();
            let b = RasterTransformer.transform(&original, &d).unwrap();
            assert_eq!(a, b, "{format:?}");
        }
    }

    #[test]
    fn test_webp_is_lossless_at_any_quality() {
        let original = sample_png();
        let source = image::load_from_memory(&original).unwrap().to_rgba8();
        let encode_at = |quality| {
            let d = TransformDescriptor {
                quality,
                format: OutputFormat::WebP,
                ..TransformDescriptor::default()
            };
            RasterTransformer.transform(&original, &d).unwrap()
        };

        let low = encode_at(10);
        assert_eq!(low, encode_at(95));
        assert_eq!(image::load_from_memory(&low).unwrap().to_rgba8(), source);
    }

    #[test]
    fn test_jpeg_output() {
        let d = TransformDescriptor {
            width: Some(8),
            format: OutputFormat::Jpeg,
            ..TransformDescriptor::default()
        };
        let out = RasterTransformer.transform(&sample_png(), &d).unwrap();
        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn test_undecodable_original() {
        let err = RasterTransformer
            .transform(b"not an image", &TransformDescriptor::default())
            .unwrap_err();
        assert!(matches!(err, ImageError::Decode(_)));
    }

    #[test]
    fn test_normalize_keeps_format() {
        let out = RasterTransformer
            .normalize(&sample_png(), OutputFormat::Png)
            .unwrap();
        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Png);
        assert_eq!(dimensions(&out), (40, 20));
    }

    #[test]
    fn test_png_compression_level_inverted() {
        assert_eq!(png_compression_level(100), 0);
        assert_eq!(png_compression_level(1), 9);
        assert_eq!(png_compression_level(80), 2);
        assert!(png_compression_level(30) > png_compression_level(70));
    }

    #[test]
    fn test_cover_size() {
        assert_eq!(cover_size(40, 20, 10, 10), (20, 10));
        assert_eq!(cover_size(20, 40, 10, 10), (10, 20));
        assert_eq!(cover_size(30, 30, 10, 20), (20, 20));
    }

    #[test]
    fn test_cover_window() {
        assert_eq!(cover_window(40, 20, 10, 10), (20, 20));
        assert_eq!(cover_window(20, 40, 10, 10), (20, 20));
        assert_eq!(cover_window(2, 1000, 4096, 4096), (2, 2));
        assert_eq!(cover_window(30, 30, 10, 20), (15, 30));
    }

    #[test]
    fn test_thin_original_cover_stays_at_target_size() {
        let thin = DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 1000, Rgb([10, 20, 30])));
        let out = resize(thin, &descriptor(Some(4096), Some(4096), Fit::Cover)).unwrap();
        assert_eq!(out.dimensions(), (4096, 4096));
    }

    #[test]
    fn test_oversized_intermediate_rejected() {
        let thin = DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 1000, Rgb([10, 20, 30])));
        let err = resize(thin, &descriptor(Some(4096), Some(4096), Fit::Outside)).unwrap_err();
        assert!(matches!(err, ImageError::InvalidParameter(_)));

        let sliver = DynamicImage::ImageRgb8(RgbImage::from_pixel(1, 4096, Rgb([10, 20, 30])));
        let err = resize(sliver.clone(), &descriptor(Some(4096), None, Fit::Cover)).unwrap_err();
        assert!(matches!(err, ImageError::InvalidParameter(_)));
        let out = resize(sliver, &descriptor(None, Some(64), Fit::Cover)).unwrap();
        assert_eq!(out.dimensions(), (1, 64));
    }

    #[test]
    fn test_smart_crop_prefers_detail() {
        // Flat left half, textured right half.
        let luma = GrayImage::from_fn(40, 20, |x, y| {
            if x < 20 {
                Luma([128])
            } else {
                Luma([u8::try_from((x * 37 + y * 91) % 256).unwrap()])
            }
        });
        assert_eq!(anchor_offset(&luma, 20, 20, CropAnchor::Center), (10, 0));
        assert_eq!(anchor_offset(&luma, 20, 20, CropAnchor::Entropy), (20, 0));
        assert_eq!(anchor_offset(&luma, 20, 20, CropAnchor::Attention), (20, 0));
    }
}
