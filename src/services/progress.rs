//! Progress reporting service
//!
//! This module separates progress reporting concerns from the pipeline state machine,
//! allowing different frontends to implement their own progress handling.

use crate::types::RunId;
use instant::Instant;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Stages of one pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Nothing uploaded yet
    Idle,
    /// Source image accepted for a fresh run
    Uploaded,
    /// Waiting on the background removal service
    RemovingBackground,
    /// Subject isolated; waiting for a prompt
    AwaitingPrompt,
    /// Waiting on quota and the generation service
    GeneratingBackground,
    /// Rasterizing the composite
    Composing,
    /// Composite available
    Complete,
    /// Run failed
    Errored,
}

impl PipelineStage {
    /// Get a human-readable description of the stage
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            PipelineStage::Idle => "Waiting for an upload",
            PipelineStage::Uploaded => "Image uploaded",
            PipelineStage::RemovingBackground => "Removing background...",
            PipelineStage::AwaitingPrompt => "Ready for a background prompt",
            PipelineStage::GeneratingBackground => "Generating new background...",
            PipelineStage::Composing => "Combining images...",
            PipelineStage::Complete => "Complete!",
            PipelineStage::Errored => "Failed",
        }
    }

    /// Get the typical progress percentage for this stage
    #[must_use]
    pub fn progress_percentage(&self) -> u8 {
        match self {
            PipelineStage::Idle | PipelineStage::Errored => 0,
            PipelineStage::Uploaded => 10,
            PipelineStage::RemovingBackground => 25,
            PipelineStage::AwaitingPrompt => 40,
            PipelineStage::GeneratingBackground => 50,
            PipelineStage::Composing => 75,
            PipelineStage::Complete => 100,
        }
    }

    /// `Complete` and `Errored` end a run
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStage::Complete | PipelineStage::Errored)
    }

    /// Stages that wait on an outstanding external call or the compositor
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            PipelineStage::Uploaded
                | PipelineStage::RemovingBackground
                | PipelineStage::GeneratingBackground
                | PipelineStage::Composing
        )
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PipelineStage::Idle => "idle",
            PipelineStage::Uploaded => "uploaded",
            PipelineStage::RemovingBackground => "removing_background",
            PipelineStage::AwaitingPrompt => "awaiting_prompt",
            PipelineStage::GeneratingBackground => "generating_background",
            PipelineStage::Composing => "composing",
            PipelineStage::Complete => "complete",
            PipelineStage::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Progress update containing stage and timing information
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    /// Run the update belongs to
    pub run_id: RunId,
    /// Current stage
    pub stage: PipelineStage,
    /// Progress percentage (0-100)
    pub progress: u8,
    /// Human-readable stage description
    pub description: String,
    /// Elapsed time since the run started (milliseconds)
    pub elapsed_ms: u64,
}

impl ProgressUpdate {
    /// Create a new progress update
    #[must_use]
    pub fn new(run_id: RunId, stage: PipelineStage, start_time: Instant) -> Self {
        Self {
            run_id,
            progress: stage.progress_percentage(),
            description: stage.description().to_string(),
            elapsed_ms: start_time.elapsed().as_millis() as u64,
            stage,
        }
    }
}

/// Trait for reporting progress of pipeline runs
pub trait ProgressReporter: Send + Sync {
    /// Report a stage transition
    fn report_progress(&self, update: ProgressUpdate);

    /// Report that a run produced its composite
    fn report_completion(&self, run_id: RunId, elapsed_ms: u64);

    /// Report that a run failed at `stage`
    fn report_error(&self, run_id: RunId, stage: PipelineStage, error: &str);
}

/// No-op progress reporter that discards all progress updates
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    fn report_progress(&self, _update: ProgressUpdate) {
        // Intentionally empty - discards progress updates
    }

    fn report_completion(&self, _run_id: RunId, _elapsed_ms: u64) {
        // Intentionally empty - discards completion notification
    }

    fn report_error(&self, _run_id: RunId, _stage: PipelineStage, _error: &str) {
        // Intentionally empty - discards error reports
    }
}

/// Console progress reporter that logs progress through the `log` facade
pub struct ConsoleProgressReporter {
    verbose: bool,
}

impl ConsoleProgressReporter {
    /// Create a new console progress reporter
    ///
    /// # Arguments
    /// * `verbose` - Whether to show elapsed time and run ids
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressReporter for ConsoleProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        if self.verbose {
            log::info!(
                "[run {}] [{}%] {} ({}ms elapsed)",
                update.run_id,
                update.progress,
                update.description,
                update.elapsed_ms
            );
        } else {
            log::info!("[{}%] {}", update.progress, update.description);
        }
    }

    fn report_completion(&self, run_id: RunId, elapsed_ms: u64) {
        if self.verbose {
            log::info!("✅ Run {} completed in {}ms", run_id, elapsed_ms);
        } else {
            log::info!("✅ Composite ready in {}ms", elapsed_ms);
        }
    }

    fn report_error(&self, run_id: RunId, stage: PipelineStage, error: &str) {
        log::error!("❌ Run {} failed while {}: {}", run_id, stage, error);
    }
}

/// Progress tracker that manages timing and progress reporting for the active run
pub struct ProgressTracker {
    reporter: Arc<dyn ProgressReporter>,
    start_time: Instant,
    current: Option<(RunId, PipelineStage)>,
}

impl ProgressTracker {
    /// Create a new progress tracker with the specified reporter
    #[must_use]
    pub fn new(reporter: Arc<dyn ProgressReporter>) -> Self {
        Self {
            reporter,
            start_time: Instant::now(),
            current: None,
        }
    }

    /// Create a progress tracker with no-op reporter (for testing/disabled progress)
    #[must_use]
    pub fn no_op() -> Self {
        Self::new(Arc::new(NoOpProgressReporter))
    }

    /// Create a progress tracker with console reporter
    #[must_use]
    pub fn console(verbose: bool) -> Self {
        Self::new(Arc::new(ConsoleProgressReporter::new(verbose)))
    }

    /// Reset the clock for a new run
    pub fn start_run(&mut self, run_id: RunId) {
        self.begin_run_at(run_id, PipelineStage::Uploaded);
    }

    /// Reset the clock for a run that starts part-way through the flow
    pub fn begin_run_at(&mut self, run_id: RunId, stage: PipelineStage) {
        self.start_time = Instant::now();
        self.report_stage(run_id, stage);
    }

    /// Report progress for a specific stage
    pub fn report_stage(&mut self, run_id: RunId, stage: PipelineStage) {
        self.current = Some((run_id, stage));
        let update = ProgressUpdate::new(run_id, stage, self.start_time);
        self.reporter.report_progress(update);
    }

    /// Report completion of the current run
    pub fn report_completion(&mut self, run_id: RunId) {
        self.report_stage(run_id, PipelineStage::Complete);
        self.reporter.report_completion(run_id, self.elapsed_ms());
    }

    /// Report an error at the stage the run was last seen in
    pub fn report_error(&mut self, run_id: RunId, error: &str) {
        let stage = match self.current {
            Some((current_run, stage)) if current_run == run_id => stage,
            _ => PipelineStage::Idle,
        };
        self.reporter.report_error(run_id, stage, error);
        self.report_stage(run_id, PipelineStage::Errored);
    }

    /// Get the elapsed time since the current run started
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    /// Get the last reported stage
    #[must_use]
    pub fn current_stage(&self) -> Option<PipelineStage> {
        self.current.map(|(_, stage)| stage)
    }
}
