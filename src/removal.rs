//! Background removal adapter
//!
//! Turns an uploaded photo into an alpha-matted subject by delegating to an external service.
//! The adapter never retries; a failed call surfaces as [`ComposeError::Removal`].

use crate::{
    config::{timeout_from_secs, RemovalSettings},
    error::{ComposeError, Result},
    types::ImageAsset,
};
use async_trait::async_trait;
use reqwest::{header, Client};
use tracing::{debug, instrument};

/// Upper bound on how much of an error body is carried into the error message
const MAX_ERROR_BODY: usize = 512;

/// Something that can isolate the subject of a photo
#[async_trait]
pub trait BackgroundRemover: Send + Sync {
    /// Produce a subject-only image with a transparent background
    ///
    /// # Errors
    /// - `ComposeError::Removal` when the service fails or rejects the input
    async fn remove(&self, image: &ImageAsset) -> Result<ImageAsset>;
}

/// Removal service reached over HTTP
///
/// The request body is the encoded upload with its own content type. The response body is
/// expected to be the matted image, typically PNG.
#[derive(Debug, Clone)]
pub struct HttpBackgroundRemover {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpBackgroundRemover {
    /// Build a remover from settings
    ///
    /// # Errors
    /// - No endpoint configured
    /// - HTTP client construction failures
    pub fn new(settings: &RemovalSettings) -> Result<Self> {
        let endpoint = settings
            .endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| {
                ComposeError::invalid_config("Background removal endpoint is not configured")
            })?
            .to_string();

        let mut builder = Client::builder();
        if let Some(timeout) = timeout_from_secs(settings.timeout_secs) {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ComposeError::network_error("Failed to create HTTP client", e))?;

        Ok(Self {
            client,
            endpoint,
            api_key: settings.api_key.clone(),
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl BackgroundRemover for HttpBackgroundRemover {
    #[instrument(skip_all, fields(endpoint = %self.endpoint, bytes = image.bytes().len()))]
    async fn remove(&self, image: &ImageAsset) -> Result<ImageAsset> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header(header::CONTENT_TYPE, image.mime_type())
            .header(header::ACCEPT, "image/png")
            .body(image.bytes().to_vec());
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ComposeError::removal(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ComposeError::removal_status(
                status.as_u16(),
                format!("service returned {}: {}", status, truncate(&body, MAX_ERROR_BODY)),
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ComposeError::removal(format!("failed to read response: {}", e)))?;
        debug!(bytes = bytes.len(), "Removal response received");

        let subject = ImageAsset::from_encoded(bytes.to_vec())
            .map_err(|e| ComposeError::removal(format!("service returned an unreadable image: {}", e)))?;
        if subject.is_degenerate() {
            return Err(ComposeError::removal("service returned an empty image"));
        }
        Ok(subject)
    }
}

pub(crate) fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.get(..end).unwrap_or(text)
}
