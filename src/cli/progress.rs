//! Terminal spinner fed by pipeline progress updates

use crate::{
    services::{PipelineStage, ProgressReporter, ProgressUpdate},
    types::RunId,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Shows the active stage and overall percentage on a single spinner line
#[derive(Debug)]
pub struct SpinnerProgressReporter {
    bar: ProgressBar,
}

impl SpinnerProgressReporter {
    #[must_use]
    pub fn new() -> Self {
        Self::with_bar(ProgressBar::new(100))
    }

    /// Reporter that renders nowhere, for non-interactive runs
    #[must_use]
    pub fn hidden() -> Self {
        Self::with_bar(ProgressBar::hidden())
    }

    fn with_bar(bar: ProgressBar) -> Self {
        if let Ok(style) =
            ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {pos:>3}% {msg}")
        {
            bar.set_style(style);
        }
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }
}

impl Default for SpinnerProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for SpinnerProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        if update.stage == PipelineStage::Errored {
            return;
        }
        self.bar.set_position(u64::from(update.progress));
        self.bar.set_message(update.description);
    }

    fn report_completion(&self, run_id: RunId, elapsed_ms: u64) {
        self.bar.finish_with_message(format!(
            "✅ Run {} complete in {:.2}s",
            run_id,
            elapsed_ms as f64 / 1000.0
        ));
    }

    fn report_error(&self, run_id: RunId, stage: PipelineStage, error: &str) {
        self.bar
            .abandon_with_message(format!("❌ Run {} failed while {}: {}", run_id, stage, error));
    }
}
