//! Background generation adapter
//!
//! Sends an enriched prompt to a text-to-image API and decodes the returned image. A personal
//! credential on the request replaces the configured default key.

use crate::{
    config::{timeout_from_secs, GenerationSettings},
    error::{ComposeError, Result},
    removal::truncate,
    types::ImageAsset,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

const MAX_ERROR_BODY: usize = 512;

/// One generation call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    /// Prompt after enrichment, never blank
    pub prompt: String,
    /// Personal key overriding the default credential
    pub credential: Option<String>,
}

impl GenerationRequest {
    /// # Errors
    /// - `ComposeError::InvalidPrompt` for a blank prompt
    pub fn new<S: Into<String>>(prompt: S) -> Result<Self> {
        let prompt = prompt.into();
        crate::prompt::validate_prompt(&prompt)?;
        Ok(Self {
            prompt,
            credential: None,
        })
    }

    #[must_use]
    pub fn with_credential(mut self, credential: Option<String>) -> Self {
        self.credential = credential.filter(|c| !c.trim().is_empty());
        self
    }

    #[must_use]
    pub fn uses_personal_credential(&self) -> bool {
        self.credential.is_some()
    }
}

/// Something that can turn a prompt into a background image
#[async_trait]
pub trait BackgroundGenerator: Send + Sync {
    /// # Errors
    /// - `ComposeError::Generation` with the upstream status class
    async fn generate(&self, request: &GenerationRequest) -> Result<ImageAsset>;
}

#[derive(Debug, Serialize)]
struct ImagesRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    width: u32,
    height: u32,
    steps: u32,
    response_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    b64_json: Option<String>,
}

/// Generation service reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpBackgroundGenerator {
    client: Client,
    settings: GenerationSettings,
}

impl HttpBackgroundGenerator {
    /// # Errors
    /// - HTTP client construction failures
    pub fn new(settings: GenerationSettings) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout_from_secs(settings.timeout_secs) {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ComposeError::network_error("Failed to create HTTP client", e))?;
        Ok(Self { client, settings })
    }

    /// Endpoint the request goes to, the proxy's when one is configured
    #[must_use]
    pub fn endpoint(&self) -> &str {
        self.settings
            .observability
            .as_ref()
            .map_or(self.settings.endpoint.as_str(), |proxy| proxy.endpoint.as_str())
    }

    fn credential_for<'a>(&'a self, request: &'a GenerationRequest) -> Result<&'a str> {
        request
            .credential
            .as_deref()
            .or(self.settings.api_key.as_deref())
            .ok_or_else(|| {
                ComposeError::invalid_config(
                    "No generation API key configured and no personal key supplied",
                )
            })
    }

    fn decode_response(body: &[u8]) -> Result<ImageAsset> {
        let parsed: ImagesResponse = serde_json::from_slice(body).map_err(|e| {
            ComposeError::generation_transport(format!("malformed response: {}", e))
        })?;
        let encoded = parsed
            .data
            .into_iter()
            .find_map(|d| d.b64_json)
            .ok_or_else(|| ComposeError::generation_transport("response contained no image"))?;
        let bytes = BASE64_STANDARD.decode(encoded.trim()).map_err(|e| {
            ComposeError::generation_transport(format!("invalid base64 image: {}", e))
        })?;
        let asset = ImageAsset::from_encoded(bytes).map_err(|e| {
            ComposeError::generation_transport(format!("unreadable generated image: {}", e))
        })?;
        if asset.is_degenerate() {
            return Err(ComposeError::generation_transport("generated image is empty"));
        }
        Ok(asset)
    }
}

#[async_trait]
impl BackgroundGenerator for HttpBackgroundGenerator {
    #[instrument(skip_all, fields(
        model = %self.settings.model,
        byok = request.uses_personal_credential()
    ))]
    async fn generate(&self, request: &GenerationRequest) -> Result<ImageAsset> {
        let credential = self.credential_for(request)?;
        let body = ImagesRequest {
            model: &self.settings.model,
            prompt: &request.prompt,
            width: self.settings.width,
            height: self.settings.height,
            steps: self.settings.steps,
            response_format: "base64",
        };

        let mut http = self
            .client
            .post(self.endpoint())
            .bearer_auth(credential)
            .json(&body);
        if let Some(proxy) = &self.settings.observability {
            http = http
                .header("Helicone-Auth", format!("Bearer {}", proxy.auth_key))
                .header(
                    "Helicone-Property-BYOK",
                    if request.uses_personal_credential() {
                        "true"
                    } else {
                        "false"
                    },
                );
        }

        let response = http
            .send()
            .await
            .map_err(|e| ComposeError::generation_transport(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ComposeError::generation(
                status.as_u16(),
                truncate(&text, MAX_ERROR_BODY),
            ));
        }

        let bytes = response.bytes().await.map_err(|e| {
            ComposeError::generation_transport(format!("failed to read response: {}", e))
        })?;
        let asset = Self::decode_response(&bytes)?;
        debug!(width = asset.width(), height = asset.height(), "Background generated");
        Ok(asset)
    }
}
