use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};

use super::MediaError;
use crate::models::Position;

/// Upload bytes ready for storage at a position's exact target size.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
    pub resized: bool,
}

impl PreparedImage {
    pub fn content_type(&self) -> &'static str {
        self.format.to_mime_type()
    }

    pub fn extension(&self) -> &'static str {
        match self.format {
            ImageFormat::Png => "png",
            ImageFormat::WebP => "webp",
            _ => "jpg",
        }
    }
}

pub fn sniff_format(bytes: &[u8]) -> Result<ImageFormat, MediaError> {
    match image::guess_format(bytes) {
        Ok(format @ (ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::WebP)) => Ok(format),
        _ => Err(MediaError::UnsupportedFormat),
    }
}

/// Scales the upload to exactly the position's box, ignoring aspect ratio.
/// Uploads that already match are passed through byte for byte.
pub fn fit_to_position(bytes: &[u8], position: &Position) -> Result<PreparedImage, MediaError> {
    let format = sniff_format(bytes)?;
    let decoded = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| MediaError::Decode(e.to_string()))?;

    let (width, height) = decoded.dimensions();
    if (width, height) == (position.width, position.height) {
        return Ok(PreparedImage {
            bytes: bytes.to_vec(),
            format,
            resized: false,
        });
    }

    log::debug!(
        "resizing {}x{} upload to {}x{} for position {}",
        width,
        height,
        position.width,
        position.height,
        position.name
    );
    let resized = decoded.resize_exact(position.width, position.height, FilterType::Triangle);
    Ok(PreparedImage {
        bytes: encode(&resized, format)?,
        format,
        resized: true,
    })
}

pub(crate) fn encode(img: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>, MediaError> {
    let mut out = Cursor::new(Vec::new());
    let result = match format {
        // jpeg has no alpha channel
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(img.to_rgb8()).write_to(&mut out, format),
        _ => img.write_to(&mut out, format),
    };
    result.map_err(|e| MediaError::Encode(e.to_string()))?;
    Ok(out.into_inner())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    pub(crate) fn png_of(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)));
        encode(&img, ImageFormat::Png).unwrap()
    }

    fn position(width: u32, height: u32) -> Position {
        Position {
            id: 1,
            shape_id: 1,
            name: "left".into(),
            is_owner: true,
            width,
            height,
            row: 0,
            column: 0,
        }
    }

    #[test]
    fn matching_dimensions_pass_through_unchanged() {
        let bytes = png_of(40, 30, [10, 20, 30]);
        let prepared = fit_to_position(&bytes, &position(40, 30)).unwrap();
        assert!(!prepared.resized);
        assert_eq!(prepared.bytes, bytes);
        assert_eq!(prepared.content_type(), "image/png");
    }

    #[test]
    fn other_dimensions_are_scaled_to_the_exact_box() {
        let bytes = png_of(100, 50, [200, 0, 0]);
        let prepared = fit_to_position(&bytes, &position(30, 60)).unwrap();
        assert!(prepared.resized);

        let reloaded = image::load_from_memory(&prepared.bytes).unwrap();
        assert_eq!(reloaded.dimensions(), (30, 60));
        assert_eq!(prepared.format, ImageFormat::Png);
    }

    #[test]
    fn non_images_are_rejected() {
        let err = fit_to_position(b"definitely not an image", &position(10, 10)).unwrap_err();
        assert!(matches!(err, MediaError::UnsupportedFormat));
    }
}
