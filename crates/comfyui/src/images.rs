//! Collect and encode the images a finished workflow produced.
//!
//! Extraction is all-or-nothing: the first image that cannot be fetched,
//! decoded, or re-encoded fails the whole call and no partial list is
//! returned.

use std::io::Cursor;

use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ImageReader};
use imagegen_core::input::{ImageFormat, ReturnFormat, DEFAULT_QUALITY};
use serde::Serialize;

use crate::backend::ComfyUIBackend;
use crate::executor::ExecutorError;
use crate::history::{HistoryEntry, ImageDescriptor};

/// How each produced image is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    pub return_format: ReturnFormat,
    /// Target encoding for inlined images.
    pub image_format: ImageFormat,
    /// JPEG and WebP quality, `1..=100`. Ignored by PNG.
    pub quality: u8,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            return_format: ReturnFormat::Base64,
            image_format: ImageFormat::Png,
            quality: DEFAULT_QUALITY,
        }
    }
}

/// One produced image as returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncodedImage {
    /// Base64 of the encoded bytes, for `return_format = base64`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Backend view URL, for `return_format = url`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub format: String,
    pub width: u32,
    pub height: u32,
    pub filename: String,
}

/// Fetch and encode every image in `entry`, in node ID order.
pub async fn extract_images<B: ComfyUIBackend>(
    backend: &B,
    entry: &HistoryEntry,
    options: &EncodeOptions,
) -> Result<Vec<EncodedImage>, ExecutorError> {
    let mut images = Vec::with_capacity(entry.image_count());

    for (node_id, output) in entry.ordered_outputs() {
        for descriptor in &output.images {
            let image = extract_one(backend, descriptor, options)
                .await
                .map_err(|e| {
                    tracing::error!(
                        node_id = %node_id,
                        filename = %descriptor.filename,
                        error = %e,
                        "Failed to extract image",
                    );
                    e
                })?;
            images.push(image);
        }
    }

    tracing::info!(num_images = images.len(), "Extracted images from history");
    Ok(images)
}

async fn extract_one<B: ComfyUIBackend>(
    backend: &B,
    descriptor: &ImageDescriptor,
    options: &EncodeOptions,
) -> Result<EncodedImage, ExecutorError> {
    if descriptor.filename.is_empty() {
        return Err(ExecutorError::Extraction(
            "image descriptor has no filename".to_string(),
        ));
    }

    let bytes = backend
        .get_image(descriptor)
        .await
        .map_err(|e| ExecutorError::Extraction(format!("{}: {e}", descriptor.filename)))?;

    match options.return_format {
        ReturnFormat::Base64 => encode_image(&bytes, &descriptor.filename, options),
        ReturnFormat::Url => {
            let (format, width, height) = probe_image(&bytes)
                .map_err(|e| ExecutorError::Extraction(format!("{}: {e}", descriptor.filename)))?;
            let url = backend
                .view_url(descriptor)
                .map_err(|e| ExecutorError::Extraction(e.to_string()))?;
            Ok(EncodedImage {
                data: None,
                url: Some(url),
                format,
                width,
                height,
                filename: descriptor.filename.clone(),
            })
        }
    }
}

/// Decode `bytes` and re-encode them as `options.image_format`, inlined as
/// base64.
pub fn encode_image(
    bytes: &[u8],
    filename: &str,
    options: &EncodeOptions,
) -> Result<EncodedImage, ExecutorError> {
    let fail = |e: image::ImageError| ExecutorError::Extraction(format!("{filename}: {e}"));

    let decoded = image::load_from_memory(bytes).map_err(fail)?;
    let (width, height) = (decoded.width(), decoded.height());

    let mut encoded = Vec::new();
    match options.image_format {
        ImageFormat::Png => decoded
            .write_with_encoder(PngEncoder::new(&mut encoded))
            .map_err(fail)?,
        ImageFormat::Jpeg => {
            let quality = options.quality.clamp(1, 100);
            jpeg_compatible(decoded)
                .write_with_encoder(JpegEncoder::new_with_quality(&mut encoded, quality))
                .map_err(fail)?
        }
        ImageFormat::Webp => {
            let rgba = decoded.to_rgba8();
            let quality = f32::from(options.quality.clamp(1, 100));
            let webp = webp::Encoder::from_rgba(&rgba, width, height).encode(quality);
            encoded.extend_from_slice(&webp);
        }
    }

    Ok(EncodedImage {
        data: Some(base64::engine::general_purpose::STANDARD.encode(&encoded)),
        url: None,
        format: options.image_format.as_str().to_string(),
        width,
        height,
        filename: filename.to_string(),
    })
}

/// Source format name and dimensions, read from the header only.
pub fn probe_image(bytes: &[u8]) -> Result<(String, u32, u32), image::ImageError> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    let format = reader
        .format()
        .map(format_name)
        .unwrap_or_else(|| "png".to_string());
    let (width, height) = reader.into_dimensions()?;
    Ok((format, width, height))
}

fn format_name(format: image::ImageFormat) -> String {
    match format {
        image::ImageFormat::Png => "png".to_string(),
        image::ImageFormat::Jpeg => "jpeg".to_string(),
        image::ImageFormat::WebP => "webp".to_string(),
        other => format!("{other:?}").to_ascii_lowercase(),
    }
}

/// JPEG has no alpha channel and no 16-bit support.
fn jpeg_compatible(image: DynamicImage) -> DynamicImage {
    match image {
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => image,
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([200, 40, 10, 128]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_with_encoder(PngEncoder::new(&mut bytes))
            .unwrap();
        bytes
    }

    fn decode_b64(image: &EncodedImage) -> Vec<u8> {
        base64::engine::general_purpose::STANDARD
            .decode(image.data.as_ref().unwrap())
            .unwrap()
    }

    #[test]
    fn png_round_trip_keeps_dimensions() {
        let out = encode_image(&png_bytes(16, 8), "a.png", &EncodeOptions::default()).unwrap();
        assert_eq!((out.width, out.height), (16, 8));
        assert_eq!(out.format, "png");
        assert_eq!(out.filename, "a.png");
        assert!(out.url.is_none());
        let decoded = image::load_from_memory(&decode_b64(&out)).unwrap();
        assert_eq!(decoded.width(), 16);
    }

    #[test]
    fn jpeg_from_rgba_source_is_flattened() {
        let options = EncodeOptions {
            image_format: ImageFormat::Jpeg,
            quality: 80,
            ..Default::default()
        };
        let out = encode_image(&png_bytes(10, 10), "a.png", &options).unwrap();
        assert_eq!(out.format, "jpeg");
        let bytes = decode_b64(&out);
        assert_eq!(image::guess_format(&bytes).unwrap(), image::ImageFormat::Jpeg);
    }

    #[test]
    fn webp_is_encoded() {
        let options = EncodeOptions {
            image_format: ImageFormat::Webp,
            ..Default::default()
        };
        let out = encode_image(&png_bytes(4, 4), "a.png", &options).unwrap();
        assert_eq!(out.format, "webp");
        assert_eq!(
            image::guess_format(&decode_b64(&out)).unwrap(),
            image::ImageFormat::WebP
        );
    }

    fn gradient_png(size: u32) -> Vec<u8> {
        let img = RgbaImage::from_fn(size, size, |x, y| {
            Rgba([(x * 4) as u8, (y * 4) as u8, ((x + y) * 2) as u8, 255])
        });
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_with_encoder(PngEncoder::new(&mut bytes))
            .unwrap();
        bytes
    }

    #[test]
    fn webp_honours_quality() {
        let encode = |quality| {
            let options = EncodeOptions {
                image_format: ImageFormat::Webp,
                quality,
                ..Default::default()
            };
            decode_b64(&encode_image(&gradient_png(64), "g.png", &options).unwrap())
        };

        let low = encode(10);
        let high = encode(95);
        assert_ne!(low, high);
        assert!(low.len() < high.len(), "q10 {} bytes, q95 {} bytes", low.len(), high.len());
        let decoded = image::load_from_memory(&low).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 64));
    }

    #[test]
    fn garbage_bytes_are_an_extraction_error() {
        let err = encode_image(b"not an image", "broken.png", &EncodeOptions::default()).unwrap_err();
        assert!(matches!(err, ExecutorError::Extraction(msg) if msg.contains("broken.png")));
    }

    #[test]
    fn probe_reads_header() {
        assert_eq!(probe_image(&png_bytes(32, 24)).unwrap(), ("png".to_string(), 32, 24));
    }

    #[test]
    fn url_mode_serializes_without_data() {
        let image = EncodedImage {
            data: None,
            url: Some("http://x/view".into()),
            format: "png".into(),
            width: 1,
            height: 1,
            filename: "a.png".into(),
        };
        let json = serde_json::to_value(&image).unwrap();
        assert!(json.get("data").is_none());
        assert_eq!(json["url"], "http://x/view");
    }
}
