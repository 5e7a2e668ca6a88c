//! Image I/O operations service
//!
//! This module separates encoding, decoding and file I/O from the pipeline logic,
//! making the system more testable and maintainable.

use crate::{
    config::OutputFormat,
    error::{ComposeError, Result},
    services::OutputFormatHandler,
};
use image::{codecs::jpeg::JpegEncoder, DynamicImage, ImageFormat, ImageReader};
use std::{io::Cursor, path::Path};

/// Service for handling image encode/decode and file operations
pub struct ImageIOService;

impl ImageIOService {
    /// Detect the encoding and pixel dimensions without decoding the pixel data
    ///
    /// # Errors
    /// - Unknown encoding
    /// - Corrupt image header
    pub fn probe(bytes: &[u8]) -> Result<(ImageFormat, (u32, u32))> {
        let format = image::guess_format(bytes)?;
        let dimensions = ImageReader::with_format(Cursor::new(bytes), format).into_dimensions()?;
        log::debug!(
            "Probed {:?} image {}x{} ({} bytes)",
            format,
            dimensions.0,
            dimensions.1,
            bytes.len()
        );
        Ok((format, dimensions))
    }

    /// Decode encoded bytes in a known format
    ///
    /// # Errors
    /// - Corrupt image data
    pub fn decode(bytes: &[u8], format: ImageFormat) -> Result<DynamicImage> {
        Ok(image::load_from_memory_with_format(bytes, format)?)
    }

    /// Encode an image in the requested output format
    ///
    /// # Arguments
    /// * `image` - Image to encode
    /// * `format` - Target output format
    /// * `quality` - JPEG quality (0-100), ignored by lossless formats
    ///
    /// # Errors
    /// - Encoder failures (e.g. `WebP` without the `webp-support` feature)
    ///
    /// # Examples
    /// ```rust
    /// use prodapic::{services::ImageIOService, config::OutputFormat};
    /// use image::DynamicImage;
    ///
    /// let image = DynamicImage::new_rgba8(8, 8);
    /// let png = ImageIOService::encode(&image, OutputFormat::Png, 90)?;
    /// assert!(!png.is_empty());
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn encode(image: &DynamicImage, format: OutputFormat, quality: u8) -> Result<Vec<u8>> {
        OutputFormatHandler::validate_for_composite(format);
        let converted = OutputFormatHandler::convert_format(image, format);

        let mut buffer = Vec::new();
        match format {
            OutputFormat::Jpeg => {
                let mut cursor = Cursor::new(&mut buffer);
                let mut encoder = JpegEncoder::new_with_quality(&mut cursor, quality.min(100));
                encoder.encode_image(&converted.to_rgb8())?;
            },
            OutputFormat::Png | OutputFormat::WebP => {
                let mut cursor = Cursor::new(&mut buffer);
                converted.write_to(&mut cursor, format.image_format())?;
            },
        }
        Ok(buffer)
    }

    /// Write already-encoded bytes to disk, creating parent directories
    ///
    /// # Errors
    /// - Directory creation or file write failures
    pub fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                ComposeError::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to create output directory '{}': {}", parent.display(), e),
                ))
            })?;
        }

        std::fs::write(path, bytes).map_err(|e| {
            ComposeError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to write '{}': {}", path.display(), e),
            ))
        })?;
        log::debug!("Wrote {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }

    /// Pick an output format from a file name, if the extension is recognised
    #[must_use]
    pub fn format_for_path(path: &Path) -> Option<OutputFormat> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "png" => Some(OutputFormat::Png),
            "jpg" | "jpeg" => Some(OutputFormat::Jpeg),
            "webp" => Some(OutputFormat::WebP),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgba, RgbaImage};

    #[test]
    fn test_probe_reads_header_dimensions() {
        let image = DynamicImage::ImageRgba8(RgbaImage::new(12, 5));
        let bytes = ImageIOService::encode(&image, OutputFormat::Png, 90).unwrap();
        let (format, dims) = ImageIOService::probe(&bytes).unwrap();
        assert_eq!(format, ImageFormat::Png);
        assert_eq!(dims, (12, 5));
    }

    #[test]
    fn test_probe_rejects_truncated_png() {
        let image = DynamicImage::ImageRgba8(RgbaImage::new(4, 4));
        let bytes = ImageIOService::encode(&image, OutputFormat::Png, 90).unwrap();
        assert!(ImageIOService::probe(&bytes[..10]).is_err());
    }

    #[test]
    fn test_jpeg_encoding_drops_alpha() {
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(6, 6, Rgba([200, 10, 10, 128])));
        let bytes = ImageIOService::encode(&image, OutputFormat::Jpeg, 80).unwrap();
        let decoded = ImageIOService::decode(&bytes, ImageFormat::Jpeg).unwrap();
        assert_eq!(decoded.dimensions(), (6, 6));
        assert!(!decoded.color().has_alpha());
    }

    #[test]
    fn test_write_bytes_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/out.bin");
        ImageIOService::write_bytes(&path, b"abc").unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"abc");
    }

    #[test]
    fn test_format_for_path() {
        assert_eq!(
            ImageIOService::format_for_path(Path::new("a/b.JPG")),
            Some(OutputFormat::Jpeg)
        );
        assert_eq!(
            ImageIOService::format_for_path(Path::new("x.webp")),
            Some(OutputFormat::WebP)
        );
        assert_eq!(ImageIOService::format_for_path(Path::new("noext")), None);
        assert_eq!(ImageIOService::format_for_path(Path::new("x.gif")), None);
    }
}
