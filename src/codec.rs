use crate::detection::BoundingBox;
use image::{imageops::FilterType, ImageFormat, ImageReader, RgbImage};
use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Frame byte buffer is empty")]
    EmptyInput,
    #[error("Failed to decode frame: {0}")]
    Decode(#[source] image::ImageError),
    #[error("Failed to encode frame: {0}")]
    Encode(#[source] image::ImageError),
}

/// Decodes an encoded image buffer into an RGB raster frame. The format is
/// sniffed from the bytes, so anything the `image` crate recognises (JPEG,
/// PNG, ...) is accepted at any resolution.
pub fn decode(bytes: &[u8]) -> Result<RgbImage, CodecError> {
    if bytes.is_empty() {
        return Err(CodecError::EmptyInput);
    }

    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| CodecError::Decode(image::ImageError::IoError(e)))?;

    let img = reader.decode().map_err(CodecError::Decode)?;
    Ok(img.to_rgb8())
}

/// Serialises a raster frame back to JPEG bytes. Deterministic for a given
/// input frame.
pub fn encode(frame: &RgbImage) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::new();
    frame
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
        .map_err(CodecError::Encode)?;
    Ok(buf)
}

/// Bilinear resize to exactly `target_w` x `target_h`. Aspect ratio is not
/// preserved; the classifier expects a fixed input shape.
pub fn resize(frame: &RgbImage, target_w: u32, target_h: u32) -> RgbImage {
    image::imageops::resize(frame, target_w, target_h, FilterType::Triangle)
}

/// Extracts the sub-region bounded by `bbox`, clamped to the frame bounds.
/// Returns `None` when the clamped region is degenerate (zero width or
/// height); such regions must never reach the classifier.
pub fn crop(frame: &RgbImage, bbox: &BoundingBox) -> Option<RgbImage> {
    let xmin = bbox.xmin.min(frame.width());
    let ymin = bbox.ymin.min(frame.height());
    let xmax = bbox.xmax.min(frame.width());
    let ymax = bbox.ymax.min(frame.height());

    if xmax <= xmin || ymax <= ymin {
        return None;
    }

    let view = image::imageops::crop_imm(frame, xmin, ymin, xmax - xmin, ymax - ymin);
    Some(view.to_image())
}
