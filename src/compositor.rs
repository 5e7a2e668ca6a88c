//! Raster compositing of a matted subject over a generated background
//!
//! The canvas takes the background's exact pixel size. The subject is fitted, aspect ratio
//! preserved, into a box of `scale × canvas` and centered, then blended source-over.

use crate::{
    config::{OutputFormat, DEFAULT_SCALE},
    error::{ComposeError, Result},
    types::ImageAsset,
};
use image::{imageops, DynamicImage};
use tracing::{debug, instrument};

/// Reason reported when either input has a zero-length side
pub const DEGENERATE_INPUT: &str = "degenerate-input";

/// Reason reported for a scale outside `(0, 1]`
pub const INVALID_SCALE: &str = "invalid-scale";

/// Geometry inputs for one composition
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositionParameters {
    /// Canvas size, equal to the background's size
    pub canvas: (u32, u32),
    /// Subject size before scaling
    pub subject: (u32, u32),
    /// Bounding box size relative to the canvas
    pub scale: f64,
}

/// Where the subject lands on the canvas
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubjectPlacement {
    /// Left edge (exact)
    pub x: f64,
    /// Top edge (exact)
    pub y: f64,
    /// Rendered width (exact)
    pub width: f64,
    /// Rendered height (exact)
    pub height: f64,
}

/// Whole-pixel rectangle the subject is rasterized into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    /// True when the bounding box is under one pixel on either side
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl CompositionParameters {
    #[must_use]
    pub fn new(canvas: (u32, u32), subject: (u32, u32), scale: f64) -> Self {
        Self {
            canvas,
            subject,
            scale,
        }
    }

    /// Reject zero-sized inputs and scales outside `(0, 1]`
    ///
    /// # Errors
    /// - `CompositionError{degenerate-input}` for a zero width or height
    /// - `CompositionError{invalid-scale}` for a bad scale
    pub fn validate(&self) -> Result<()> {
        let (cw, ch) = self.canvas;
        let (sw, sh) = self.subject;
        if cw == 0 || ch == 0 || sw == 0 || sh == 0 {
            return Err(ComposeError::composition(DEGENERATE_INPUT));
        }
        if !(self.scale > 0.0 && self.scale <= 1.0) {
            return Err(ComposeError::composition(INVALID_SCALE));
        }
        Ok(())
    }

    /// The `scale × canvas` box the subject must fit in
    #[must_use]
    pub fn bounding_box(&self) -> (f64, f64) {
        (
            f64::from(self.canvas.0) * self.scale,
            f64::from(self.canvas.1) * self.scale,
        )
    }

    /// Exact placement of the subject
    ///
    /// # Errors
    /// - See [`CompositionParameters::validate`]
    pub fn placement(&self) -> Result<SubjectPlacement> {
        self.validate()?;

        let (box_w, box_h) = self.bounding_box();
        let (sw, sh) = (f64::from(self.subject.0), f64::from(self.subject.1));
        let fit = (box_w / sw).min(box_h / sh);
        let width = sw * fit;
        let height = sh * fit;

        Ok(SubjectPlacement {
            x: (f64::from(self.canvas.0) - width) / 2.0,
            y: (f64::from(self.canvas.1) - height) / 2.0,
            width,
            height,
        })
    }

    /// Placement snapped to whole pixels, never larger than the bounding box
    ///
    /// A side whose bounding box is under one pixel snaps to zero and the rect is empty;
    /// otherwise each side is at least one pixel.
    ///
    /// # Errors
    /// - See [`CompositionParameters::validate`]
    pub fn pixel_rect(&self) -> Result<PixelRect> {
        let placement = self.placement()?;
        let (box_w, box_h) = self.bounding_box();

        let snap = |exact: f64, limit: f64| -> u32 {
            let ceiling = limit.floor();
            if ceiling < 1.0 {
                return 0;
            }
            exact.round().clamp(1.0, ceiling) as u32
        };
        let width = snap(placement.width, box_w);
        let height = snap(placement.height, box_h);

        Ok(PixelRect {
            x: (self.canvas.0 - width) / 2,
            y: (self.canvas.1 - height) / 2,
            width,
            height,
        })
    }
}

/// Pure compositor with a fixed output encoding
#[derive(Debug, Clone, Copy)]
pub struct RasterCompositor {
    output_format: OutputFormat,
    quality: u8,
}

impl Default for RasterCompositor {
    fn default() -> Self {
        Self::new(OutputFormat::Png, 90)
    }
}

impl RasterCompositor {
    #[must_use]
    pub fn new(output_format: OutputFormat, quality: u8) -> Self {
        Self {
            output_format,
            quality: quality.min(100),
        }
    }

    /// Blend `subject` over `background` and encode the result
    ///
    /// # Errors
    /// - `CompositionError` for degenerate inputs or a bad scale
    /// - Decode errors for corrupt input bytes
    /// - Encoder errors for the output format
    #[instrument(skip_all, fields(
        background = ?background.dimensions(),
        subject = ?subject.dimensions(),
        scale
    ))]
    pub fn compose(
        &self,
        background: &ImageAsset,
        subject: &ImageAsset,
        scale: f64,
    ) -> Result<ImageAsset> {
        if background.is_degenerate() || subject.is_degenerate() {
            return Err(ComposeError::composition(DEGENERATE_INPUT));
        }

        let background_image = background.decode()?;
        let subject_image = subject.decode()?;
        let composed = self.compose_images(&background_image, &subject_image, scale)?;
        ImageAsset::from_image(&composed, self.output_format, self.quality)
    }

    /// Blend already-decoded images
    ///
    /// # Errors
    /// - `CompositionError` for degenerate inputs or a bad scale
    pub fn compose_images(
        &self,
        background: &DynamicImage,
        subject: &DynamicImage,
        scale: f64,
    ) -> Result<DynamicImage> {
        let params = CompositionParameters::new(
            (background.width(), background.height()),
            (subject.width(), subject.height()),
            scale,
        );
        let rect = params.pixel_rect()?;
        debug!(?rect, "Placing subject");

        // Layer 0: the canvas is the background at its own size.
        let mut canvas = background.to_rgba8();
        if rect.is_empty() {
            debug!("Subject box under one pixel, background left as is");
            return Ok(DynamicImage::ImageRgba8(canvas));
        }

        // Layer 1: subject, source-over.
        let resized = imageops::resize(
            &subject.to_rgba8(),
            rect.width,
            rect.height,
            imageops::FilterType::Triangle,
        );
        imageops::overlay(&mut canvas, &resized, i64::from(rect.x), i64::from(rect.y));

        Ok(DynamicImage::ImageRgba8(canvas))
    }
}

/// Compose with the default PNG encoder
///
/// # Errors
/// - See [`RasterCompositor::compose`]
pub fn compose(background: &ImageAsset, subject: &ImageAsset, scale: f64) -> Result<ImageAsset> {
    RasterCompositor::default().compose(background, subject, scale)
}

/// Compose at the default scale of 0.5
///
/// # Errors
/// - See [`RasterCompositor::compose`]
pub fn compose_default(background: &ImageAsset, subject: &ImageAsset) -> Result<ImageAsset> {
    compose(background, subject, DEFAULT_SCALE)
}
