//! Validated RGB input raster.

use image::{DynamicImage, RgbImage};
use mesh_types::VertexColor;

use crate::error::{ScanError, ScanResult};

/// An 8-bit RGB image that is known to have non-zero area.
///
/// Every pipeline stage takes a `ScanImage` rather than a raw buffer, so
/// the emptiness and channel-count checks happen once, before any job is
/// dispatched.
///
/// # Example
///
/// ```
/// use mesh_scan::ScanImage;
///
/// let pixels = vec![0u8; 4 * 2 * 3];
/// let image = ScanImage::from_raw(4, 2, 3, pixels).unwrap();
/// assert_eq!((image.width(), image.height()), (4, 2));
///
/// assert!(ScanImage::from_raw(0, 2, 3, Vec::new()).is_err());
/// assert!(ScanImage::from_raw(1, 1, 4, vec![0; 4]).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct ScanImage {
    rgb: RgbImage,
}

impl ScanImage {
    /// Wraps an RGB buffer.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::InvalidImage`] if the image has zero area.
    pub fn from_rgb(rgb: RgbImage) -> ScanResult<Self> {
        if rgb.width() == 0 || rgb.height() == 0 {
            return Err(ScanError::invalid_image(format!(
                "image has zero area ({}x{})",
                rgb.width(),
                rgb.height()
            )));
        }
        Ok(Self { rgb })
    }

    /// Builds an image from interleaved samples.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::InvalidImage`] if `channels` is not 3, the
    /// buffer length does not match the dimensions, or the area is zero.
    pub fn from_raw(width: u32, height: u32, channels: u8, data: Vec<u8>) -> ScanResult<Self> {
        if channels != 3 {
            return Err(ScanError::invalid_image(format!(
                "expected 3 channels, got {channels}"
            )));
        }
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(ScanError::invalid_image(format!(
                "buffer holds {} bytes, {width}x{height} RGB needs {expected}",
                data.len()
            )));
        }
        let rgb = RgbImage::from_raw(width, height, data)
            .ok_or_else(|| ScanError::invalid_image("buffer does not match dimensions"))?;
        Self::from_rgb(rgb)
    }

    /// Converts any decoded image to 8-bit RGB, dropping alpha.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::InvalidImage`] if the image has zero area.
    pub fn from_dynamic(image: &DynamicImage) -> ScanResult<Self> {
        Self::from_rgb(image.to_rgb8())
    }

    /// Decodes an encoded image (PNG, JPEG) from memory.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::InvalidImage`] if the bytes cannot be decoded
    /// or the decoded image has zero area.
    pub fn decode(bytes: &[u8]) -> ScanResult<Self> {
        let decoded = image::load_from_memory(bytes)
            .map_err(|e| ScanError::invalid_image(format!("cannot decode image: {e}")))?;
        Self::from_dynamic(&decoded)
    }

    /// Image width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.rgb.width()
    }

    /// Image height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.rgb.height()
    }

    /// Colour of the pixel at column `x`, row `y`.
    ///
    /// # Panics
    ///
    /// Panics if the coordinates are outside the image.
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> VertexColor {
        let [r, g, b] = self.rgb.get_pixel(x, y).0;
        VertexColor::new(r, g, b)
    }

    /// The underlying RGB buffer.
    #[must_use]
    pub fn as_rgb(&self) -> &RgbImage {
        &self.rgb
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn pixel_reads_rgb() {
        let mut rgb = RgbImage::new(2, 2);
        rgb.put_pixel(1, 0, Rgb([10, 20, 30]));
        let image = ScanImage::from_rgb(rgb).unwrap();
        assert_eq!(image.pixel(1, 0), VertexColor::new(10, 20, 30));
        assert_eq!(image.pixel(0, 1), VertexColor::BLACK);
    }

    #[test]
    fn rejects_wrong_buffer_length() {
        let result = ScanImage::from_raw(2, 2, 3, vec![0; 5]);
        assert!(matches!(result, Err(ScanError::InvalidImage { .. })));
    }

    #[test]
    fn rejects_zero_area() {
        let result = ScanImage::from_rgb(RgbImage::new(5, 0));
        assert!(matches!(result, Err(ScanError::InvalidImage { .. })));
    }

    #[test]
    fn decode_rejects_garbage() {
        let result = ScanImage::decode(b"definitely not a png");
        assert!(matches!(result, Err(ScanError::InvalidImage { .. })));
    }

    #[test]
    fn decode_png_roundtrip() {
        let mut rgb = RgbImage::new(3, 2);
        rgb.put_pixel(2, 1, Rgb([200, 100, 50]));
        let mut bytes = std::io::Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(rgb)
            .write_to(&mut bytes, image::ImageFormat::Png)
            .unwrap();

        let image = ScanImage::decode(bytes.get_ref()).unwrap();
        assert_eq!((image.width(), image.height()), (3, 2));
        assert_eq!(image.pixel(2, 1), VertexColor::new(200, 100, 50));
    }
}
