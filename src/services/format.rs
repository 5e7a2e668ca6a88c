//! Output format handling service
//!
//! This module separates output format conversion logic from the compositor,
//! making the system more testable and maintainable.

use crate::config::OutputFormat;
use image::DynamicImage;

/// Service for handling output format conversions
pub struct OutputFormatHandler;

impl OutputFormatHandler {
    /// Convert an image to the pixel layout the output format stores
    ///
    /// JPEG has no alpha channel, so alpha is dropped. The other formats keep RGBA.
    ///
    /// # Examples
    /// ```rust
    /// use prodapic::{services::OutputFormatHandler, config::OutputFormat};
    /// use image::DynamicImage;
    ///
    /// let rgba = DynamicImage::new_rgba8(4, 4);
    /// let rgb = OutputFormatHandler::convert_format(&rgba, OutputFormat::Jpeg);
    /// assert!(!rgb.color().has_alpha());
    /// ```
    #[must_use]
    pub fn convert_format(image: &DynamicImage, format: OutputFormat) -> DynamicImage {
        match format {
            OutputFormat::Png | OutputFormat::WebP => DynamicImage::ImageRgba8(image.to_rgba8()),
            OutputFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8()),
        }
    }

    /// Get the appropriate file extension for a given output format
    ///
    /// # Examples
    /// ```rust
    /// use prodapic::{services::OutputFormatHandler, config::OutputFormat};
    ///
    /// assert_eq!(OutputFormatHandler::get_extension(OutputFormat::Png), "png");
    /// assert_eq!(OutputFormatHandler::get_extension(OutputFormat::Jpeg), "jpg");
    /// ```
    #[must_use]
    pub fn get_extension(format: OutputFormat) -> &'static str {
        match format {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
            OutputFormat::WebP => "webp",
        }
    }

    /// Check if a format supports transparency (alpha channel)
    #[must_use]
    pub fn supports_transparency(format: OutputFormat) -> bool {
        match format {
            OutputFormat::Png | OutputFormat::WebP => true,
            OutputFormat::Jpeg => false,
        }
    }

    /// Note formats that flatten transparency.
    ///
    /// Composites are opaque anyway; only exported subjects lose their matte.
    pub fn validate_for_composite(format: OutputFormat) {
        if !Self::supports_transparency(format) {
            log::debug!(
                "Output format {:?} does not support transparency; alpha will be discarded",
                format
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgba, RgbaImage};

    #[test]
    fn test_convert_format_keeps_alpha_for_png() {
        let rgba = DynamicImage::ImageRgba8(RgbaImage::from_pixel(2, 2, Rgba([1, 2, 3, 4])));
        let png = OutputFormatHandler::convert_format(&rgba, OutputFormat::Png);
        assert_eq!(png.get_pixel(0, 0), Rgba([1, 2, 3, 4]));

        let jpeg = OutputFormatHandler::convert_format(&rgba, OutputFormat::Jpeg);
        assert!(!jpeg.color().has_alpha());
        assert_eq!(jpeg.dimensions(), (2, 2));
    }

    #[test]
    fn test_extensions_and_transparency() {
        assert_eq!(OutputFormatHandler::get_extension(OutputFormat::WebP), "webp");
        assert!(OutputFormatHandler::supports_transparency(OutputFormat::Png));
        assert!(OutputFormatHandler::supports_transparency(OutputFormat::WebP));
        assert!(!OutputFormatHandler::supports_transparency(OutputFormat::Jpeg));
    }
}
