//! Thumbnail generation.
//!
//! A thumbnail is produced by fetching the source object, decoding it,
//! flattening any transparency onto white, shrinking it to fit a bounding
//! box and re-encoding it as JPEG.  The pixel work sits behind the
//! [`ImageCodec`] trait and runs on the blocking thread pool.

use bytes::Bytes;
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use jpeg_encoder::{ColorType, Encoder};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::errors::{StorageError, StorageResult};
use crate::keys;
use crate::storage::backend::{ObjectBackend, PutObjectRequest};

/// JPEG quality used for every thumbnail.
pub const JPEG_QUALITY: u8 = 85;

/// Content type of generated thumbnails.
pub const THUMBNAIL_CONTENT_TYPE: &str = "image/jpeg";

/// Metadata key recording the source object key.
pub const META_ORIGINAL_IMAGE: &str = "original-image";
/// Metadata key recording the requested bounding box, `{w}x{h}`.
pub const META_THUMBNAIL_SIZE: &str = "thumbnail-size";

/// Turns encoded image bytes into encoded thumbnail bytes.
pub trait ImageCodec: Send + Sync + 'static {
    /// Decode `data`, fit it within `max_width`×`max_height` and
    /// re-encode it as an opaque JPEG.
    fn thumbnail(&self, data: &[u8], max_width: u32, max_height: u32) -> StorageResult<Vec<u8>>;
}

/// [`ImageCodec`] built on the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegThumbnailCodec;

impl ImageCodec for JpegThumbnailCodec {
    fn thumbnail(&self, data: &[u8], max_width: u32, max_height: u32) -> StorageResult<Vec<u8>> {
        let decoded =
            image::load_from_memory(data).map_err(|e| StorageError::Decode(e.to_string()))?;
        debug!(
            "Decoded image {}x{} color={:?}",
            decoded.width(),
            decoded.height(),
            decoded.color()
        );
        let flat = flatten_onto_white(decoded);
        let (w, h) = fit_within(flat.width(), flat.height(), max_width, max_height);
        let resized = if (w, h) == flat.dimensions() {
            flat
        } else {
            image::imageops::resize(&flat, w, h, FilterType::Lanczos3)
        };
        encode_jpeg(&resized, JPEG_QUALITY)
    }
}

/// Composite an image onto an opaque white canvas.
///
/// Images with an alpha channel are blended using alpha as the mask;
/// opaque images are converted as-is.
pub fn flatten_onto_white(image: DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }
    let rgba = image.to_rgba8();
    let mut canvas = RgbImage::from_pixel(rgba.width(), rgba.height(), Rgb([255, 255, 255]));
    for (dst, src) in canvas.pixels_mut().zip(rgba.pixels()) {
        let [r, g, b, a] = src.0;
        let alpha = u32::from(a);
        let blend = |c: u8| ((u32::from(c) * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        *dst = Rgb([blend(r), blend(g), blend(b)]);
    }
    canvas
}

/// Largest size with the same aspect ratio that fits the bounding box.
///
/// Never upscales: an image already inside the box keeps its size.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width <= max_width && height <= max_height {
        return (width, height);
    }
    let scale = f64::min(
        f64::from(max_width) / f64::from(width),
        f64::from(max_height) / f64::from(height),
    );
    let w = ((f64::from(width) * scale).round() as u32).clamp(1, max_width.max(1));
    let h = ((f64::from(height) * scale).round() as u32).clamp(1, max_height.max(1));
    (w, h)
}

/// Encode an RGB image as JPEG with optimized Huffman tables.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> StorageResult<Vec<u8>> {
    let too_large = || {
        StorageError::Validation(format!(
            "thumbnail {}x{} exceeds JPEG dimension limits",
            image.width(),
            image.height()
        ))
    };
    let width = u16::try_from(image.width()).map_err(|_| too_large())?;
    let height = u16::try_from(image.height()).map_err(|_| too_large())?;

    let mut out = Vec::new();
    let mut encoder = Encoder::new(&mut out, quality);
    encoder.set_optimized_huffman_tables(true);
    encoder
        .encode(image.as_raw(), width, height, ColorType::Rgb)
        .map_err(|e| StorageError::Decode(e.to_string()))?;
    Ok(out)
}

/// Bounding box and key prefix for one thumbnail run.
#[derive(Debug, Clone)]
pub struct ThumbnailSpec {
    pub max_width: u32,
    pub max_height: u32,
    pub prefix: String,
}

impl From<&crate::config::ThumbnailConfig> for ThumbnailSpec {
    fn from(config: &crate::config::ThumbnailConfig) -> Self {
        Self {
            max_width: config.max_width,
            max_height: config.max_height,
            prefix: config.prefix.clone(),
        }
    }
}

/// Render and store the thumbnail of `source_key`, returning its key.
pub async fn generate_thumbnail(
    backend: &dyn ObjectBackend,
    codec: Arc<dyn ImageCodec>,
    bucket: &str,
    source_key: &str,
    spec: &ThumbnailSpec,
) -> StorageResult<String> {
    if spec.max_width == 0 || spec.max_height == 0 {
        return Err(StorageError::Validation(format!(
            "thumbnail bounds must be positive, got {}x{}",
            spec.max_width, spec.max_height
        )));
    }

    let source = backend.get_object(bucket, source_key).await?;

    let (max_w, max_h) = (spec.max_width, spec.max_height);
    let data = source.data;
    let jpeg = tokio::task::spawn_blocking(move || codec.thumbnail(&data, max_w, max_h))
        .await
        .map_err(|e| StorageError::Decode(format!("thumbnail task failed: {e}")))??;

    let thumbnail_key = keys::thumbnail_key(source_key, &spec.prefix);
    let metadata = HashMap::from([
        (META_ORIGINAL_IMAGE.to_string(), source_key.to_string()),
        (META_THUMBNAIL_SIZE.to_string(), format!("{max_w}x{max_h}")),
    ]);

    backend
        .put_object(PutObjectRequest {
            bucket: bucket.to_string(),
            key: thumbnail_key.clone(),
            body: Bytes::from(jpeg),
            content_type: THUMBNAIL_CONTENT_TYPE.to_string(),
            metadata,
        })
        .await?;

    info!(
        "Thumbnail stored: source={} thumbnail={} bounds={}x{}",
        source_key, thumbnail_key, max_w, max_h
    );
    Ok(thumbnail_key)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{ImageFormat, LumaA, Rgba, RgbaImage};
    use std::io::Cursor;

    /// PNG bytes of a `w`×`h` image: left half opaque red, right half transparent.
    pub(crate) fn png_with_transparency(w: u32, h: u32) -> Vec<u8> {
        let img = RgbaImage::from_fn(w, h, |x, _| {
            if x < w / 2 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 0, 0])
            }
        });
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_fit_within_downscales_landscape() {
        assert_eq!(fit_within(400, 300, 200, 200), (200, 150));
    }

    #[test]
    fn test_fit_within_downscales_portrait() {
        assert_eq!(fit_within(300, 600, 200, 200), (100, 200));
    }

    #[test]
    fn test_fit_within_never_upscales() {
        assert_eq!(fit_within(50, 40, 200, 200), (50, 40));
        assert_eq!(fit_within(200, 200, 200, 200), (200, 200));
    }

    #[test]
    fn test_fit_within_extreme_aspect_keeps_one_pixel() {
        assert_eq!(fit_within(10_000, 1, 100, 100), (100, 1));
    }

    #[test]
    fn test_flatten_transparent_becomes_white() {
        let img = RgbaImage::from_pixel(2, 1, Rgba([0, 0, 0, 0]));
        let flat = flatten_onto_white(DynamicImage::ImageRgba8(img));
        assert_eq!(flat.get_pixel(0, 0), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_flatten_half_alpha_blends() {
        let img = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 128]));
        let flat = flatten_onto_white(DynamicImage::ImageRgba8(img));
        let Rgb([r, g, b]) = *flat.get_pixel(0, 0);
        assert!((126..=128).contains(&r));
        assert_eq!(r, g);
        assert_eq!(g, b);
    }

    #[test]
    fn test_flatten_opaque_unchanged() {
        let img = RgbImage::from_pixel(1, 1, Rgb([10, 20, 30]));
        let flat = flatten_onto_white(DynamicImage::ImageRgb8(img));
        assert_eq!(flat.get_pixel(0, 0), &Rgb([10, 20, 30]));
    }

    #[test]
    fn test_codec_produces_bounded_jpeg() {
        let png = png_with_transparency(400, 300);
        let jpeg = JpegThumbnailCodec.thumbnail(&png, 200, 200).unwrap();
        assert_eq!(
            image::guess_format(&jpeg).unwrap(),
            ImageFormat::Jpeg
        );
        let out = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((out.width(), out.height()), (200, 150));

        // Transparent right half was flattened onto white.
        let rgb = out.to_rgb8();
        let Rgb([r, g, b]) = *rgb.get_pixel(190, 75);
        assert!(r > 240 && g > 240 && b > 240);
    }

    fn encode(img: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, format).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_codec_flattens_palette_gif() {
        let img = RgbaImage::from_fn(20, 10, |x, _| {
            if x < 10 {
                Rgba([0, 0, 255, 255])
            } else {
                Rgba([0, 0, 0, 0])
            }
        });
        let gif = encode(DynamicImage::ImageRgba8(img), ImageFormat::Gif);
        assert_eq!(image::guess_format(&gif).unwrap(), ImageFormat::Gif);

        let jpeg = JpegThumbnailCodec.thumbnail(&gif, 200, 200).unwrap();
        let out = image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg)
            .unwrap()
            .to_rgb8();
        assert_eq!(out.dimensions(), (20, 10));

        let Rgb([r, _, b]) = *out.get_pixel(3, 5);
        assert!(b > 200 && r < 60);
        let Rgb([r, g, b]) = *out.get_pixel(16, 5);
        assert!(r > 240 && g > 240 && b > 240);
    }

    #[test]
    fn test_codec_flattens_grey_with_alpha() {
        let img = image::GrayAlphaImage::from_fn(20, 10, |x, _| {
            if x < 10 {
                LumaA([40, 255])
            } else {
                LumaA([0, 0])
            }
        });
        let png = encode(DynamicImage::ImageLumaA8(img), ImageFormat::Png);
        assert!(image::load_from_memory(&png).unwrap().color().has_alpha());

        let jpeg = JpegThumbnailCodec.thumbnail(&png, 200, 200).unwrap();
        assert_eq!(image::guess_format(&jpeg).unwrap(), ImageFormat::Jpeg);
        let out = image::load_from_memory(&jpeg).unwrap().to_rgb8();

        let Rgb([r, _, _]) = *out.get_pixel(3, 5);
        assert!(r < 80);
        let Rgb([r, g, b]) = *out.get_pixel(16, 5);
        assert!(r > 240 && g > 240 && b > 240);
    }

    #[test]
    fn test_encode_jpeg_round_trips_dimensions() {
        let img = RgbImage::from_pixel(33, 17, Rgb([90, 160, 30]));
        let jpeg = encode_jpeg(&img, JPEG_QUALITY).unwrap();
        let out = image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg).unwrap();
        assert_eq!((out.width(), out.height()), (33, 17));
    }

    #[test]
    fn test_encode_jpeg_rejects_oversized_dimensions() {
        let img = RgbImage::new(70_000, 1);
        let err = encode_jpeg(&img, JPEG_QUALITY).unwrap_err();
        assert_eq!(err.code(), "ValidationError");
    }

    #[test]
    fn test_codec_rejects_garbage() {
        let err = JpegThumbnailCodec
            .thumbnail(b"definitely not an image", 200, 200)
            .unwrap_err();
        assert_eq!(err.code(), "DecodeError");
    }
}
