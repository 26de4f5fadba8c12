//! Variant processing: decode, bounded resize, JPEG re-encode.
//!
//! Input bytes may arrive in any supported container (JPEG, PNG, WebP, GIF,
//! TIFF, BMP); the format is sniffed from the bytes rather than trusted from
//! the upload. Output is always progressive JPEG at the variant's quality,
//! with chroma kept at full resolution.

use crate::variants::VariantSpec;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use jpeg_encoder::{ColorType, Encoder, SamplingFactor};
use std::io::Cursor;
use thiserror::Error;

/// Content type of every processed buffer.
pub const OUTPUT_CONTENT_TYPE: &str = "image/jpeg";

/// Decoders retried in order when the sniffed format fails to decode.
const FALLBACK_FORMATS: [ImageFormat; 6] = [
    ImageFormat::Jpeg,
    ImageFormat::Png,
    ImageFormat::WebP,
    ImageFormat::Gif,
    ImageFormat::Tiff,
    ImageFormat::Bmp,
];

/// Errors that can occur while deriving a variant.
///
/// Decode failures are terminal for the upload: malformed input does not
/// become correct on retry, so callers must not wrap processing in the
/// storage retry path.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("failed to decode source image: {0}")]
    Decode(String),

    #[error("failed to encode output image: {0}")]
    Encode(String),
}

/// Derive one variant from raw source bytes.
///
/// If the variant carries bounds and the source exceeds them on either axis,
/// the image is resized to fit within the bounds preserving aspect ratio
/// (Lanczos3). A source already within bounds is never upscaled. The result
/// is re-encoded from full RGB regardless of the input format, as
/// progressive JPEG with 4:4:4 sampling so no chroma resolution is lost.
pub fn process_variant(data: &[u8], spec: &VariantSpec) -> Result<Vec<u8>, ProcessingError> {
    let mut img = decode_source(data)?;

    if let (Some(max_width), Some(max_height)) = (spec.max_width, spec.max_height) {
        if img.width() > max_width || img.height() > max_height {
            img = img.resize(max_width, max_height, FilterType::Lanczos3);
        }
    }

    // JPEG has no alpha channel; flatten to RGB before encoding
    let rgb = img.into_rgb8();
    encode_jpeg(&rgb, spec.quality)
}

/// Decode source bytes, sniffing the container from magic bytes.
///
/// A source whose header defeats sniffing is retried against each enabled
/// decoder before giving up, so a defective container does not abort the
/// upload when the pixel data is still readable. Trailing garbage after the
/// image data is ignored by the decoders themselves. Only bytes no decoder
/// can read raise [`ProcessingError::Decode`].
fn decode_source(data: &[u8]) -> Result<DynamicImage, ProcessingError> {
    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| ProcessingError::Decode(e.to_string()))?;

    let primary = match reader.decode() {
        Ok(img) => return Ok(img),
        Err(e) => e,
    };

    for format in FALLBACK_FORMATS {
        let mut reader = ImageReader::new(Cursor::new(data));
        reader.set_format(format);
        if let Ok(img) = reader.decode() {
            return Ok(img);
        }
    }

    Err(ProcessingError::Decode(primary.to_string()))
}

/// Encode an RGB image as progressive JPEG with 4:4:4 sampling, so no
/// chroma resolution is lost to subsampling.
///
/// Goes through `jpeg_encoder` rather than the `image` crate's encoder,
/// which only emits baseline scans with subsampled chroma.
fn encode_jpeg(rgb: &image::RgbImage, quality: u8) -> Result<Vec<u8>, ProcessingError> {
    let width = u16::try_from(rgb.width())
        .map_err(|_| ProcessingError::Encode(format!("width {} exceeds JPEG limit", rgb.width())))?;
    let height = u16::try_from(rgb.height()).map_err(|_| {
        ProcessingError::Encode(format!("height {} exceeds JPEG limit", rgb.height()))
    })?;

    let mut output = Vec::new();
    let mut encoder = Encoder::new(&mut output, quality);
    encoder.set_sampling_factor(SamplingFactor::F_1_1);
    encoder.set_progressive(true);
    encoder
        .encode(rgb.as_raw(), width, height, ColorType::Rgb)
        .map_err(|e| ProcessingError::Encode(e.to_string()))?;

    Ok(output)
}
