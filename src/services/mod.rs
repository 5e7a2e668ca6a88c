//! Service layer
//!
//! This module contains service types that separate infrastructure concerns
//! (encoding, file I/O, progress reporting) from the pipeline logic.

pub mod format;
pub mod io;
pub mod progress;

pub use format::OutputFormatHandler;
pub use io::ImageIOService;
pub use progress::{
    ConsoleProgressReporter, NoOpProgressReporter, PipelineStage, ProgressReporter,
    ProgressTracker, ProgressUpdate,
};
