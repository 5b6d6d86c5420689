//! Plan image decoding and normalisation.

use crate::services::providers::MessagePart;
use base64::{engine::general_purpose::STANDARD, Engine};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, RgbImage};
use std::io::Cursor;
use thiserror::Error;

/// JPEG quality used when images are encoded for the model.
const JPEG_QUALITY: u8 = 90;

/// Longer side of the thumbnails shown on the page.
pub const PREVIEW_DIMENSION: u32 = 480;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("{0}: unsupported file type (expected PNG or JPEG)")]
    UnsupportedFormat(String),

    #[error("{name}: could not decode image: {reason}")]
    Decode { name: String, reason: String },

    #[error("failed to encode image: {0}")]
    Encode(String),
}

/// An RGB image whose longer side fits the configured cap.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pixels: RgbImage,
}

impl PreparedImage {
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    fn encode_jpeg(&self) -> Result<Vec<u8>, ImageError> {
        let mut buffer = Vec::new();
        JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY)
            .encode_image(&self.pixels)
            .map_err(|e| ImageError::Encode(e.to_string()))?;
        Ok(buffer)
    }

    /// Base64 JPEG message part for the model.
    pub fn to_inline_part(&self) -> Result<MessagePart, ImageError> {
        Ok(MessagePart::InlineImage {
            mime_type: "image/jpeg".to_string(),
            data: STANDARD.encode(self.encode_jpeg()?),
        })
    }
}

/// Small PNG `data:` URL for displaying an upload on the page.
pub fn preview_data_url(image: &DynamicImage, max_side: u32) -> Result<String, ImageError> {
    let thumbnail = image.thumbnail(max_side, max_side).to_rgb8();
    let mut bytes = Vec::new();
    thumbnail
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|e| ImageError::Encode(e.to_string()))?;
    Ok(format!("data:image/png;base64,{}", STANDARD.encode(bytes)))
}

/// Target size for an image whose longer side must not exceed `max_dimension`.
///
/// Sizes already within the cap are returned unchanged. Otherwise the longer
/// side becomes exactly `max_dimension` and the shorter side is scaled down
/// proportionally (floored, at least 1).
pub fn scaled_dimensions(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    let longer = width.max(height);
    if longer <= max_dimension || longer == 0 {
        return (width, height);
    }

    let scale = |side: u32| -> u32 {
        let scaled = u64::from(side) * u64::from(max_dimension) / u64::from(longer);
        (scaled as u32).max(1)
    };

    if width >= height {
        (max_dimension, scale(height))
    } else {
        (scale(width), max_dimension)
    }
}

/// Convert to 3-channel RGB and cap the longer side at `max_dimension`
/// with Lanczos resampling.
pub fn prepare_image(image: &DynamicImage, max_dimension: u32) -> PreparedImage {
    let (width, height) = scaled_dimensions(image.width(), image.height(), max_dimension);

    let pixels = if (width, height) == (image.width(), image.height()) {
        image.to_rgb8()
    } else {
        tracing::debug!(
            from_width = image.width(),
            from_height = image.height(),
            to_width = width,
            to_height = height,
            "Downscaling plan image"
        );
        image
            .resize_exact(width, height, FilterType::Lanczos3)
            .to_rgb8()
    };

    PreparedImage { pixels }
}

/// Whether an upload looks like a plan image, by extension or declared content type.
pub fn is_supported_upload(file_name: &str, content_type: Option<&str>) -> bool {
    let lower = file_name.to_ascii_lowercase();
    let by_extension = [".png", ".jpg", ".jpeg"]
        .iter()
        .any(|extension| lower.ends_with(extension));
    let by_content_type = matches!(content_type, Some("image/png" | "image/jpeg" | "image/jpg"));
    by_extension || by_content_type
}

/// Decode an uploaded file, accepting PNG and JPEG content only.
pub fn decode_upload(bytes: &[u8], file_name: &str) -> Result<DynamicImage, ImageError> {
    let format = image::guess_format(bytes)
        .map_err(|_| ImageError::UnsupportedFormat(file_name.to_string()))?;
    if !matches!(format, ImageFormat::Png | ImageFormat::Jpeg) {
        return Err(ImageError::UnsupportedFormat(file_name.to_string()));
    }

    image::load_from_memory_with_format(bytes, format).map_err(|e| ImageError::Decode {
        name: file_name.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgba, RgbaImage};

    fn png_bytes(image: &DynamicImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_dimensions_within_cap_are_unchanged() {
        assert_eq!(scaled_dimensions(4096, 4096, 4096), (4096, 4096));
        assert_eq!(scaled_dimensions(800, 600, 4096), (800, 600));
    }

    #[test]
    fn test_oversized_landscape_is_capped() {
        assert_eq!(scaled_dimensions(8000, 6000, 4096), (4096, 3072));
    }

    #[test]
    fn test_oversized_portrait_keeps_ratio() {
        assert_eq!(scaled_dimensions(3000, 9000, 4096), (1365, 4096));
    }

    #[test]
    fn test_grayscale_becomes_rgb() {
        let gray = DynamicImage::ImageLuma8(GrayImage::from_pixel(20, 10, Luma([128])));

        let prepared = prepare_image(&gray, 4096);

        assert_eq!((prepared.width(), prepared.height()), (20, 10));
        assert_eq!(prepared.pixels().get_pixel(0, 0).0, [128, 128, 128]);
    }

    #[test]
    fn test_resize_uses_cap() {
        let rgba = DynamicImage::ImageRgba8(RgbaImage::from_pixel(80, 60, Rgba([10, 20, 30, 255])));

        let prepared = prepare_image(&rgba, 40);

        assert_eq!((prepared.width(), prepared.height()), (40, 30));
    }

    #[test]
    fn test_image_wider_than_default_cap_is_downscaled_to_rgb() {
        let wide = DynamicImage::ImageLumaA8(image::GrayAlphaImage::from_pixel(
            4500,
            300,
            image::LumaA([200, 255]),
        ));

        let prepared = prepare_image(&wide, crate::config::DEFAULT_MAX_IMAGE_DIMENSION);

        assert_eq!((prepared.width(), prepared.height()), (4096, 273));
        assert_eq!(prepared.pixels().as_raw().len(), 4096 * 273 * 3);
        assert_eq!(prepared.pixels().get_pixel(2048, 136).0, [200, 200, 200]);
    }

    #[test]
    fn test_inline_part_is_jpeg() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(8, 8));
        let part = prepare_image(&image, 4096).to_inline_part().unwrap();

        match part {
            MessagePart::InlineImage { mime_type, data } => {
                assert_eq!(mime_type, "image/jpeg");
                let bytes = STANDARD.decode(data).unwrap();
                assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Jpeg);
            }
            other => panic!("unexpected part: {:?}", other),
        }
    }

    #[test]
    fn test_preview_is_small_png() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(1000, 500));
        let url = preview_data_url(&image, 100).unwrap();

        let encoded = url.strip_prefix("data:image/png;base64,").unwrap();
        let preview = image::load_from_memory(&STANDARD.decode(encoded).unwrap()).unwrap();
        assert_eq!((preview.width(), preview.height()), (100, 50));
    }

    #[test]
    fn test_supported_upload_types() {
        assert!(is_supported_upload("Plan.PNG", None));
        assert!(is_supported_upload("scan.jpeg", Some("application/octet-stream")));
        assert!(is_supported_upload("blob", Some("image/jpeg")));
        assert!(!is_supported_upload("plan.gif", Some("image/gif")));
        assert!(!is_supported_upload("notes.pdf", None));
    }

    #[test]
    fn test_decode_upload_checks_content() {
        let bytes = png_bytes(&DynamicImage::ImageRgb8(RgbImage::new(4, 3)));

        let decoded = decode_upload(&bytes, "plan.png").unwrap();
        assert_eq!((decoded.width(), decoded.height()), (4, 3));

        assert!(matches!(
            decode_upload(b"not an image", "plan.jpg"),
            Err(ImageError::UnsupportedFormat(_))
        ));
    }
}
