//! Error types for the composition pipeline

use crate::types::RunId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, ComposeError>;

/// Which quota counter refused a generation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaScope {
    /// Counter keyed by the caller's network address
    Anonymous,
    /// Counter keyed by the caller's stable identity
    Identified,
}

impl std::fmt::Display for QuotaScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anonymous => write!(f, "anonymous"),
            Self::Identified => write!(f, "identified"),
        }
    }
}

/// Status class reported by the generation service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamClass {
    /// 4xx-equivalent: the request itself was refused
    Client,
    /// 5xx-equivalent or transport failure: retry later
    Server,
}

impl UpstreamClass {
    /// Classify an HTTP-like status code
    #[must_use]
    pub fn from_status(status: u16) -> Self {
        if (400..500).contains(&status) {
            Self::Client
        } else {
            Self::Server
        }
    }
}

impl std::fmt::Display for UpstreamClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
        }
    }
}

/// What the caller should do about a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Try a different prompt or image
    Input,
    /// Try again later
    Transient,
    /// Out of credits until the window resets or a personal credential is supplied
    QuotaExhausted,
    /// The request does not fit the controller's current state
    Conflict,
}

/// Comprehensive error types for pipeline operations
#[derive(Error, Debug)]
pub enum ComposeError {
    /// Uploaded bytes could not be read as an image
    #[error("Upload error: {0}")]
    Upload(String),

    /// Background removal service failed or rejected the input
    #[error("Background removal failed ({class} error): {reason}")]
    Removal {
        class: UpstreamClass,
        status: Option<u16>,
        reason: String,
    },

    /// A quota scope is exhausted for this caller
    #[error("No generation credits left in the {scope} scope")]
    QuotaDenied { scope: QuotaScope },

    /// Background generation service failed or rejected the prompt
    #[error("Background generation failed ({class} error, status {status:?}): {message}")]
    Generation {
        class: UpstreamClass,
        status: Option<u16>,
        message: String,
    },

    /// Compositing inputs have degenerate geometry
    #[error("Composition error: {reason}")]
    Composition { reason: String },

    /// A generation is already in flight for the active run
    #[error("Pipeline is busy generating a background")]
    Busy,

    /// Operation is not valid in the controller's current stage
    #[error("Invalid pipeline state: {0}")]
    InvalidState(String),

    /// Prompt is unusable
    #[error("Invalid prompt: {0}")]
    InvalidPrompt(String),

    /// The identified quota scope needs a stable identity
    #[error("A signed-in identity is required to generate without a personal API key")]
    MissingIdentity,

    /// Result belonged to a run that has since been replaced
    #[error("Run {run} was superseded by run {active}")]
    Superseded { run: RunId, active: RunId },

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding or encoding errors
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Transport-level failures talking to an external service
    #[error("Network error: {0}")]
    Network(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ComposeError {
    /// Create a new upload error
    pub fn upload<S: Into<String>>(msg: S) -> Self {
        Self::Upload(msg.into())
    }

    /// Create a removal error for a failure that never produced a status
    pub fn removal<S: Into<String>>(reason: S) -> Self {
        Self::Removal {
            class: UpstreamClass::Server,
            status: None,
            reason: reason.into(),
        }
    }

    /// Create a removal error from the service's own status code
    pub fn removal_status<S: Into<String>>(status: u16, reason: S) -> Self {
        Self::Removal {
            class: UpstreamClass::from_status(status),
            status: Some(status),
            reason: reason.into(),
        }
    }

    /// Create a generation error from an upstream status code
    pub fn generation<S: Into<String>>(status: u16, message: S) -> Self {
        Self::Generation {
            class: UpstreamClass::from_status(status),
            status: Some(status),
            message: message.into(),
        }
    }

    /// Create a generation error for a failure that never produced a status
    pub fn generation_transport<S: Into<String>>(message: S) -> Self {
        Self::Generation {
            class: UpstreamClass::Server,
            status: None,
            message: message.into(),
        }
    }

    /// Create a new composition error
    pub fn composition<S: Into<String>>(reason: S) -> Self {
        Self::Composition {
            reason: reason.into(),
        }
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new invalid state error
    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create a new network error with operation context
    pub fn network_error<E: std::fmt::Display>(operation: &str, error: E) -> Self {
        Self::Network(format!("{}: {}", operation, error))
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
        recommended: Option<T>,
    ) -> Self {
        let recommendation = match recommended {
            Some(rec) => format!(" Recommended: {}", rec),
            None => String::new(),
        };

        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {}).{}",
            parameter, value, valid_range, recommendation
        ))
    }

    /// Classify the error for the caller
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Upload(_)
            | Self::InvalidPrompt(_)
            | Self::Composition { .. }
            | Self::Image(_)
            | Self::InvalidConfig(_)
            | Self::MissingIdentity => ErrorClass::Input,
            Self::Generation { class, .. } | Self::Removal { class, .. } => match class {
                UpstreamClass::Client => ErrorClass::Input,
                UpstreamClass::Server => ErrorClass::Transient,
            },
            Self::Io(_) | Self::Network(_) | Self::Internal(_) => ErrorClass::Transient,
            Self::QuotaDenied { .. } => ErrorClass::QuotaExhausted,
            Self::Busy | Self::InvalidState(_) | Self::Superseded { .. } => ErrorClass::Conflict,
        }
    }

    /// Whether a later caller-initiated retry may succeed without changing the input
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}
