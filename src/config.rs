//! Configuration types for the composition pipeline

use crate::error::{ComposeError, Result};
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

/// Default subject size relative to the canvas
pub const DEFAULT_SCALE: f64 = 0.5;

/// Default images API endpoint
pub const DEFAULT_GENERATION_ENDPOINT: &str = "https://api.together.xyz/v1/images/generations";

/// Default text-to-image model
pub const DEFAULT_GENERATION_MODEL: &str = "black-forest-labs/FLUX.1-schnell";

/// Observability proxy base URL used when a Helicone key is configured
pub const HELICONE_GENERATION_ENDPOINT: &str = "https://together.helicone.ai/v1/images/generations";

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Output image format options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    /// PNG with alpha channel transparency
    #[default]
    Png,
    /// JPEG (no transparency)
    Jpeg,
    /// Lossless WebP with alpha channel transparency
    WebP,
}

impl OutputFormat {
    /// The `image` crate format this output is written as
    #[must_use]
    pub fn image_format(self) -> ImageFormat {
        match self {
            Self::Png => ImageFormat::Png,
            Self::Jpeg => ImageFormat::Jpeg,
            Self::WebP => ImageFormat::WebP,
        }
    }
}

/// Capacity and window length of one quota scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeLimit {
    /// Generations allowed per window
    pub capacity: u32,
    /// Window length in seconds
    pub window_secs: u64,
}

impl ScopeLimit {
    #[must_use]
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self {
            capacity,
            window_secs: window.as_secs(),
        }
    }

    #[must_use]
    pub fn days(capacity: u32, days: u64) -> Self {
        Self {
            capacity,
            window_secs: days * SECONDS_PER_DAY,
        }
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Rate-limit policy for callers without a personal credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaPolicy {
    /// When false every request is allowed and no counters are touched
    pub enabled: bool,
    /// Namespace prepended to every counter key
    pub key_prefix: String,
    /// Limit per network address
    pub anonymous: ScopeLimit,
    /// Limit per signed-in identity
    pub identified: ScopeLimit,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            key_prefix: "prodapic".to_string(),
            anonymous: ScopeLimit::days(3, 60),
            identified: ScopeLimit::days(3, 30),
        }
    }
}

/// Observability proxy placed in front of the generation service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservabilityProxy {
    /// Proxy endpoint replacing the direct generation endpoint
    pub endpoint: String,
    /// Key sent as `Helicone-Auth: Bearer <key>`
    #[serde(default, skip_serializing)]
    pub auth_key: String,
}

impl ObservabilityProxy {
    #[must_use]
    pub fn helicone<S: Into<String>>(auth_key: S) -> Self {
        Self {
            endpoint: HELICONE_GENERATION_ENDPOINT.to_string(),
            auth_key: auth_key.into(),
        }
    }
}

/// Settings for the text-to-image service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationSettings {
    /// Images API endpoint
    pub endpoint: String,
    /// Model identifier
    pub model: String,
    /// Requested output width in pixels
    pub width: u32,
    /// Requested output height in pixels
    pub height: u32,
    /// Diffusion steps
    pub steps: u32,
    /// Default credential, overridden by a caller's personal key
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Optional observability proxy
    #[serde(default)]
    pub observability: Option<ObservabilityProxy>,
    /// Client-side request timeout in seconds (0 = none)
    pub timeout_secs: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_GENERATION_ENDPOINT.to_string(),
            model: DEFAULT_GENERATION_MODEL.to_string(),
            width: 1024,
            height: 768,
            steps: 3,
            api_key: None,
            observability: None,
            timeout_secs: 120,
        }
    }
}

/// Settings for the background removal service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalSettings {
    /// Endpoint accepting an image body and answering with a matted PNG
    pub endpoint: Option<String>,
    /// Bearer credential for the removal service
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Client-side request timeout in seconds (0 = none)
    pub timeout_secs: u64,
}

impl Default for RemovalSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            timeout_secs: 300,
        }
    }
}

pub(crate) fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Configuration for the composition pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Subject bounding box relative to the canvas, in `(0, 1]`
    pub scale: f64,

    /// Encoding of produced composites
    pub output_format: OutputFormat,

    /// JPEG quality (0-100, only used for JPEG output)
    pub jpeg_quality: u8,

    /// Prepend the background family framing to user prompts
    pub enrich_prompts: bool,

    /// Text-to-image service settings
    pub generation: GenerationSettings,

    /// Background removal service settings
    pub removal: RemovalSettings,

    /// Quota policy for callers without a personal credential
    pub quota: QuotaPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            scale: DEFAULT_SCALE,
            output_format: OutputFormat::default(),
            jpeg_quality: 90,
            enrich_prompts: true,
            generation: GenerationSettings::default(),
            removal: RemovalSettings::default(),
            quota: QuotaPolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Create a new configuration builder for fluent API construction
    ///
    /// # Examples
    ///
    /// ```rust
    /// use prodapic::{PipelineConfig, OutputFormat};
    ///
    /// let config = PipelineConfig::builder()
    ///     .scale(0.6)
    ///     .output_format(OutputFormat::Jpeg)
    ///     .jpeg_quality(95)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.scale, 0.6);
    /// ```
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Load configuration from a JSON file
    ///
    /// # Errors
    /// - File I/O errors
    /// - Malformed JSON
    /// - Validation failures
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ComposeError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read config '{}': {}", path.display(), e),
            ))
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            ComposeError::invalid_config(format!("Malformed config '{}': {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Default configuration overlaid with credentials from the environment.
    ///
    /// Reads `PRODAPIC_API_KEY` (falling back to `TOGETHER_API_KEY`), `PRODAPIC_REMOVAL_URL`,
    /// `PRODAPIC_REMOVAL_API_KEY` and `HELICONE_API_KEY`.
    ///
    /// # Errors
    /// - Validation failures
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    fn apply_env<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty("PRODAPIC_API_KEY").or_else(|| non_empty("TOGETHER_API_KEY")) {
            self.generation.api_key = Some(key);
        }
        if let Some(url) = non_empty("PRODAPIC_REMOVAL_URL") {
            self.removal.endpoint = Some(url);
        }
        if let Some(key) = non_empty("PRODAPIC_REMOVAL_API_KEY") {
            self.removal.api_key = Some(key);
        }
        if let Some(key) = non_empty("HELICONE_API_KEY") {
            self.generation.observability = Some(ObservabilityProxy::helicone(key));
        }
    }

    /// Validate all configuration parameters
    ///
    /// # Validation Rules
    ///
    /// - Scale: `(0, 1]`
    /// - JPEG quality: 0-100 (inclusive)
    /// - Generation width/height: non-zero
    /// - Quota windows: non-zero when quotas are enabled
    ///
    /// # Errors
    /// - Any rule above is violated
    pub fn validate(&self) -> Result<()> {
        if !(self.scale > 0.0 && self.scale <= 1.0) {
            return Err(ComposeError::config_value_error(
                "scale",
                self.scale,
                "(0, 1]",
                Some(DEFAULT_SCALE),
            ));
        }

        if self.jpeg_quality > 100 {
            return Err(ComposeError::config_value_error(
                "JPEG quality",
                self.jpeg_quality,
                "0-100",
                Some(90),
            ));
        }

        if self.generation.width == 0 || self.generation.height == 0 {
            return Err(ComposeError::invalid_config(format!(
                "Generation size must be non-zero, got {}x{}",
                self.generation.width, self.generation.height
            )));
        }

        if self.generation.endpoint.trim().is_empty() {
            return Err(ComposeError::invalid_config(
                "Generation endpoint must not be empty",
            ));
        }

        if self.quota.enabled {
            for (name, limit) in [
                ("anonymous", self.quota.anonymous),
                ("identified", self.quota.identified),
            ] {
                if limit.window_secs == 0 {
                    return Err(ComposeError::invalid_config(format!(
                        "Quota window for the {} scope must be non-zero",
                        name
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Builder for `PipelineConfig`
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// Set the subject scale factor
    #[must_use]
    pub fn scale(mut self, scale: f64) -> Self {
        self.config.scale = scale;
        self
    }

    /// Set output format
    #[must_use]
    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.config.output_format = format;
        self
    }

    /// Set JPEG quality
    #[must_use]
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.jpeg_quality = quality.min(100);
        self
    }

    /// Enable or disable prompt enrichment
    #[must_use]
    pub fn enrich_prompts(mut self, enrich: bool) -> Self {
        self.config.enrich_prompts = enrich;
        self
    }

    /// Replace the generation settings
    #[must_use]
    pub fn generation(mut self, settings: GenerationSettings) -> Self {
        self.config.generation = settings;
        self
    }

    /// Set the default generation credential
    #[must_use]
    pub fn generation_api_key<S: Into<String>>(mut self, key: S) -> Self {
        self.config.generation.api_key = Some(key.into());
        self
    }

    /// Replace the removal settings
    #[must_use]
    pub fn removal(mut self, settings: RemovalSettings) -> Self {
        self.config.removal = settings;
        self
    }

    /// Set the removal service endpoint
    #[must_use]
    pub fn removal_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.config.removal.endpoint = Some(endpoint.into());
        self
    }

    /// Replace the quota policy
    #[must_use]
    pub fn quota(mut self, policy: QuotaPolicy) -> Self {
        self.config.quota = policy;
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// - Scale outside `(0, 1]`
    /// - Zero generation size or empty endpoint
    /// - Zero quota window while quotas are enabled
    pub fn build(self) -> Result<PipelineConfig> {
        let config = self.config;
        config.validate()?;
        Ok(config)
    }
}
