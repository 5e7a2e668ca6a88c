//! Core types flowing through the composition pipeline

use crate::{
    config::OutputFormat,
    error::{ComposeError, Result},
    services::ImageIOService,
};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use std::{path::Path, str::FromStr, sync::Arc};

/// Identifier of one pipeline run. Strictly increasing per controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(u64);

impl RunId {
    #[must_use]
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }

    #[must_use]
    pub(crate) fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An encoded raster image together with its decoded pixel dimensions.
///
/// Assets are immutable; the encoded bytes are shared, so cloning is cheap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAsset {
    bytes: Arc<[u8]>,
    format: ImageFormat,
    width: u32,
    height: u32,
}

impl ImageAsset {
    /// Wrap encoded bytes, sniffing the format and reading the dimensions from the header
    ///
    /// # Errors
    /// - Unknown or unsupported encoding
    /// - Corrupt image header
    pub fn from_encoded(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        let (format, (width, height)) = ImageIOService::probe(&bytes)?;
        Ok(Self {
            bytes: bytes.into(),
            format,
            width,
            height,
        })
    }

    /// Encode a decoded image into a new asset
    ///
    /// # Errors
    /// - Encoder failures for the requested format
    pub fn from_image(image: &DynamicImage, format: OutputFormat, quality: u8) -> Result<Self> {
        let bytes = ImageIOService::encode(image, format, quality)?;
        Ok(Self {
            bytes: bytes.into(),
            format: format.image_format(),
            width: image.width(),
            height: image.height(),
        })
    }

    /// Assemble an asset from parts whose consistency the caller vouches for.
    ///
    /// Used for assets produced by collaborators that already know their geometry.
    #[must_use]
    pub fn from_parts(bytes: Vec<u8>, format: ImageFormat, width: u32, height: u32) -> Self {
        Self {
            bytes: bytes.into(),
            format,
            width,
            height,
        }
    }

    /// Read an asset from disk
    ///
    /// # Errors
    /// - File I/O errors
    /// - Unknown or corrupt encoding
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            ComposeError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read '{}': {}", path.display(), e),
            ))
        })?;
        Self::from_encoded(bytes)
    }

    /// Decode the pixels
    ///
    /// # Errors
    /// - Corrupt image data
    pub fn decode(&self) -> Result<DynamicImage> {
        ImageIOService::decode(&self.bytes, self.format)
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn format(&self) -> ImageFormat {
        self.format
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// True when either side is zero pixels long
    #[must_use]
    pub fn is_degenerate(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    #[must_use]
    pub fn mime_type(&self) -> &'static str {
        self.format.to_mime_type()
    }

    #[must_use]
    pub fn file_extension(&self) -> &'static str {
        self.format.extensions_str().first().copied().unwrap_or("bin")
    }

    /// Render the asset as a `data:` URL for inline display or download links
    #[must_use]
    pub fn to_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime_type(),
            BASE64_STANDARD.encode(&self.bytes)
        )
    }

    /// Write the encoded bytes unchanged to `path`
    ///
    /// # Errors
    /// - File I/O errors
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        ImageIOService::write_bytes(path.as_ref(), &self.bytes)
    }
}

/// Background family selected by the user; drives prompt framing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundFamily {
    #[default]
    Product,
    Lifestyle,
    Seasonal,
}

impl BackgroundFamily {
    pub const ALL: [BackgroundFamily; 3] = [Self::Product, Self::Lifestyle, Self::Seasonal];
}

impl std::fmt::Display for BackgroundFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Product => write!(f, "product"),
            Self::Lifestyle => write!(f, "lifestyle"),
            Self::Seasonal => write!(f, "seasonal"),
        }
    }
}

impl FromStr for BackgroundFamily {
    type Err = ComposeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "product" => Ok(Self::Product),
            "lifestyle" => Ok(Self::Lifestyle),
            "seasonal" => Ok(Self::Seasonal),
            other => Err(ComposeError::invalid_config(format!(
                "Unknown background family '{}'. Expected product, lifestyle or seasonal",
                other
            ))),
        }
    }
}

/// Address used when the request carries no forwarding headers
pub const FALLBACK_NETWORK_ADDRESS: &str = "0.0.0.0";

/// Who is asking for a background generation
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CallerContext {
    /// Network address the request arrived from
    pub network_address: String,
    /// Stable identity of a signed-in user
    pub identity: Option<String>,
    /// Personal API key supplied by the user
    pub credential: Option<String>,
}

impl CallerContext {
    #[must_use]
    pub fn new<S: Into<String>>(network_address: S) -> Self {
        Self {
            network_address: network_address.into(),
            identity: None,
            credential: None,
        }
    }

    #[must_use]
    pub fn with_identity<S: Into<String>>(mut self, identity: S) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Attach a personal credential. Blank keys are treated as absent.
    #[must_use]
    pub fn with_credential<S: Into<String>>(mut self, credential: S) -> Self {
        let credential = credential.into();
        self.credential = if credential.trim().is_empty() {
            None
        } else {
            Some(credential)
        };
        self
    }

    #[must_use]
    pub fn has_credential(&self) -> bool {
        self.credential.is_some()
    }

    /// Derive the caller address from proxy headers.
    ///
    /// Takes the first `x-forwarded-for` entry, then `x-real-ip`, then falls back to `0.0.0.0`.
    pub fn network_address_from_headers<'a, I>(headers: I) -> String
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut real_ip = None;
        for (name, value) in headers {
            if name.eq_ignore_ascii_case("x-forwarded-for") {
                if let Some(first) = value.split(',').next().map(str::trim) {
                    if !first.is_empty() {
                        return first.to_string();
                    }
                }
            } else if name.eq_ignore_ascii_case("x-real-ip") && real_ip.is_none() {
                real_ip = Some(value.trim().to_string());
            }
        }
        real_ip
            .filter(|ip| !ip.is_empty())
            .unwrap_or_else(|| FALLBACK_NETWORK_ADDRESS.to_string())
    }
}
