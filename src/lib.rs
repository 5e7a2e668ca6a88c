#![allow(clippy::missing_errors_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # Prodapic
//!
//! Product photo composition: isolate the subject of a photo, generate a fresh background from
//! a text prompt, and rasterize the two into one image.
//!
//! ## Features
//!
//! - **Pipeline controller**: upload → remove background → prompt → generate → compose, with
//!   stale-result protection across runs and a busy signal for overlapping generations
//! - **Quota gate**: fixed-window credits per network address and per identity, skipped for
//!   callers who bring their own API key
//! - **Deterministic compositor**: subject fitted into a centered box, source-over blending
//! - **Pluggable services**: removal and generation sit behind async traits with HTTP defaults
//! - **CLI Integration**: Optional command-line interface (enable with `cli` feature)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use prodapic::{
//!     BackgroundFamily, CallerContext, HttpBackgroundGenerator, HttpBackgroundRemover,
//!     PipelineConfig, PipelineController,
//! };
//! use std::sync::Arc;
//!
//! # async fn example(photo: Vec<u8>) -> anyhow::Result<()> {
//! let config = PipelineConfig::from_env()?;
//! let pipeline = PipelineController::builder(config.clone())
//!     .remover(Arc::new(HttpBackgroundRemover::new(&config.removal)?))
//!     .generator(Arc::new(HttpBackgroundGenerator::new(config.generation.clone())?))
//!     .build()?;
//!
//! pipeline.upload(photo).await?;
//! let caller = CallerContext::new("203.0.113.7").with_identity("user_42");
//! let composite = pipeline
//!     .generate("white marble countertop", BackgroundFamily::Product, &caller)
//!     .await?;
//! composite.save("composite.png")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Compositing only
//!
//! ```rust,no_run
//! use prodapic::{compose, ImageAsset};
//!
//! # fn example() -> prodapic::Result<()> {
//! let background = ImageAsset::load("background.png")?;
//! let subject = ImageAsset::load("subject.png")?;
//! compose(&background, &subject, 0.5)?.save("out.png")?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `cli` (default): Command-line interface, progress spinner and subscriber setup
//! - `webp-support` (default): WebP input and output
//! - `tracing-json`: JSON log lines from the CLI
//! - `tracing-files`: CLI logging to a file

#[cfg(feature = "cli")]
pub mod cli;
pub mod compositor;
pub mod config;
pub mod error;
pub mod generation;
pub mod pipeline;
pub mod prompt;
pub mod quota;
pub mod removal;
pub mod services;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;

// Public API exports
pub use compositor::{
    compose, compose_default, CompositionParameters, PixelRect, RasterCompositor,
    SubjectPlacement,
};
pub use config::{
    GenerationSettings, ObservabilityProxy, OutputFormat, PipelineConfig, PipelineConfigBuilder,
    QuotaPolicy, RemovalSettings, ScopeLimit,
};
pub use error::{ComposeError, ErrorClass, QuotaScope, Result, UpstreamClass};
pub use generation::{BackgroundGenerator, GenerationRequest, HttpBackgroundGenerator};
pub use pipeline::{
    CompletedRun, FailureReport, PipelineController, PipelineControllerBuilder, PipelineSnapshot,
};
pub use quota::{
    Admission, CreditLedger, InMemoryCreditLedger, InMemoryQuotaStore, QuotaDecision, QuotaGate,
    QuotaStore,
};
pub use removal::{BackgroundRemover, HttpBackgroundRemover};
pub use services::{
    ConsoleProgressReporter, ImageIOService, NoOpProgressReporter, OutputFormatHandler,
    PipelineStage, ProgressReporter, ProgressTracker, ProgressUpdate,
};
pub use types::{BackgroundFamily, CallerContext, ImageAsset, RunId};

#[cfg(feature = "cli")]
pub use tracing_config::{spans, TracingConfig, TracingFormat, TracingGuard, TracingOutput};
