//! Pipeline controller
//!
//! Sequences upload, background removal, background generation and compositing for one
//! session. Every run gets a fresh [`RunId`]; asynchronous results that come back for a run
//! that is no longer active are discarded and reported to their caller as
//! [`ComposeError::Superseded`].
//!
//! The controller is cheap to clone and all clones share one session. State lives behind a
//! plain mutex that is never held across an `.await`.

use crate::{
    compositor::RasterCompositor,
    config::PipelineConfig,
    error::{ComposeError, ErrorClass, Result},
    generation::{BackgroundGenerator, GenerationRequest},
    prompt::{enhance_prompt, validate_prompt},
    quota::{Admission, QuotaGate},
    removal::BackgroundRemover,
    services::{PipelineStage, ProgressReporter, ProgressTracker},
    types::{BackgroundFamily, CallerContext, ImageAsset, RunId},
};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, instrument, warn};

/// Why a run ended in `Errored`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReport {
    /// Stage the run was in when it failed
    pub stage: PipelineStage,
    pub class: ErrorClass,
    pub message: String,
}

/// One finished composite in the session history
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedRun {
    pub run_id: RunId,
    pub family: BackgroundFamily,
    pub prompt: String,
    pub composite: ImageAsset,
    pub completed_at: DateTime<Utc>,
}

/// Point-in-time view of the active run
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSnapshot {
    /// `None` until the first upload
    pub run_id: Option<RunId>,
    pub stage: PipelineStage,
    pub family: BackgroundFamily,
    pub prompt: Option<String>,
    pub source: Option<ImageAsset>,
    pub subject: Option<ImageAsset>,
    pub background: Option<ImageAsset>,
    pub composite: Option<ImageAsset>,
    pub failure: Option<FailureReport>,
}

#[derive(Debug, Clone)]
struct PipelineRun {
    run_id: RunId,
    stage: PipelineStage,
    source: ImageAsset,
    family: BackgroundFamily,
    prompt: Option<String>,
    subject: Option<ImageAsset>,
    background: Option<ImageAsset>,
    composite: Option<ImageAsset>,
    failure: Option<FailureReport>,
}

impl PipelineRun {
    fn new(run_id: RunId, source: ImageAsset) -> Self {
        Self {
            run_id,
            stage: PipelineStage::Uploaded,
            source,
            family: BackgroundFamily::default(),
            prompt: None,
            subject: None,
            background: None,
            composite: None,
            failure: None,
        }
    }
}

struct SessionState {
    last_run: RunId,
    active: Option<PipelineRun>,
    history: Vec<CompletedRun>,
    progress: ProgressTracker,
}

impl SessionState {
    fn next_run_id(&mut self) -> RunId {
        self.last_run = self.last_run.next();
        self.last_run
    }

    fn active_run_id(&self) -> Option<RunId> {
        self.active.as_ref().map(|run| run.run_id)
    }

    /// The active run if it is still `run_id`, otherwise the staleness error
    fn current_mut(&mut self, run_id: RunId) -> Result<&mut PipelineRun> {
        match self.active.as_mut() {
            Some(run) if run.run_id == run_id => Ok(run),
            Some(run) => Err(ComposeError::Superseded {
                run: run_id,
                active: run.run_id,
            }),
            None => Err(ComposeError::invalid_state("no active run")),
        }
    }

    fn set_stage(&mut self, run_id: RunId, stage: PipelineStage) -> Result<()> {
        self.current_mut(run_id)?.stage = stage;
        self.progress.report_stage(run_id, stage);
        info!(run = %run_id, %stage, "Stage transition");
        Ok(())
    }

    /// Move `run_id` to `Errored` if it is still active and hand back the error to surface
    fn fail(&mut self, run_id: RunId, err: ComposeError) -> ComposeError {
        let run = match self.current_mut(run_id) {
            Ok(run) => run,
            Err(stale) => {
                warn!(run = %run_id, error = %err, "Discarding failure of superseded run");
                return stale;
            },
        };
        let stage = run.stage;
        run.failure = Some(FailureReport {
            stage,
            class: err.class(),
            message: err.to_string(),
        });
        run.stage = PipelineStage::Errored;
        self.progress.report_error(run_id, &err.to_string());
        error!(run = %run_id, %stage, error = %err, "Run failed");
        err
    }
}

struct Inner {
    config: PipelineConfig,
    remover: Arc<dyn BackgroundRemover>,
    generator: Arc<dyn BackgroundGenerator>,
    gate: QuotaGate,
    compositor: RasterCompositor,
    state: Mutex<SessionState>,
}

/// Orchestrates one user session through the composition pipeline
#[derive(Clone)]
pub struct PipelineController {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PipelineController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineController")
            .field("config", &self.inner.config)
            .field("gate", &self.inner.gate)
            .finish_non_exhaustive()
    }
}

impl PipelineController {
    #[must_use]
    pub fn builder(config: PipelineConfig) -> PipelineControllerBuilder {
        PipelineControllerBuilder::new(config)
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    fn state(&self) -> Result<MutexGuard<'_, SessionState>> {
        self.inner
            .state
            .lock()
            .map_err(|_| ComposeError::internal("pipeline state lock poisoned"))
    }

    /// Accept a new photo and run background removal on it
    ///
    /// Starts a new run regardless of what the previous run is doing. Returns once removal
    /// has finished for this run.
    ///
    /// # Errors
    /// - `ComposeError::Upload` for unreadable bytes (no run is started)
    /// - `ComposeError::Removal` when the removal service fails (run is `Errored`)
    /// - `ComposeError::Superseded` when a newer run started while removal was outstanding
    #[instrument(skip_all, fields(bytes = bytes.len()))]
    pub async fn upload(&self, bytes: Vec<u8>) -> Result<RunId> {
        let source = ImageAsset::from_encoded(bytes)
            .map_err(|e| ComposeError::upload(format!("unreadable image: {}", e)))?;
        if source.is_degenerate() {
            return Err(ComposeError::upload("image has no pixels"));
        }
        self.start_removal(source).await
    }

    /// Start a new run from the current source photo
    ///
    /// # Errors
    /// - `ComposeError::InvalidState` when nothing has been uploaded
    /// - Same as [`PipelineController::upload`] otherwise
    #[instrument(skip_all)]
    pub async fn regenerate(&self) -> Result<RunId> {
        let source = {
            let state = self.state()?;
            state
                .active
                .as_ref()
                .map(|run| run.source.clone())
                .ok_or_else(|| ComposeError::invalid_state("nothing has been uploaded"))?
        };
        self.start_removal(source).await
    }

    async fn start_removal(&self, source: ImageAsset) -> Result<RunId> {
        let run_id = {
            let mut state = self.state()?;
            let run_id = state.next_run_id();
            if let Some(previous) = state.active_run_id() {
                debug!(previous = %previous, run = %run_id, "Replacing active run");
            }
            state.active = Some(PipelineRun::new(run_id, source.clone()));
            state.progress.start_run(run_id);
            info!(run = %run_id, dimensions = ?source.dimensions(), "Run started");
            state.set_stage(run_id, PipelineStage::RemovingBackground)?;
            run_id
        };

        let outcome = self.inner.remover.remove(&source).await;

        let mut state = self.state()?;
        match outcome {
            Ok(subject) => {
                let run = state.current_mut(run_id).map_err(|stale| {
                    warn!(run = %run_id, "Discarding removal result of superseded run");
                    stale
                })?;
                run.subject = Some(subject);
                state.set_stage(run_id, PipelineStage::AwaitingPrompt)?;
                Ok(run_id)
            },
            Err(e) => Err(state.fail(run_id, e)),
        }
    }

    /// Generate a background for the isolated subject and compose the final image
    ///
    /// Valid from `AwaitingPrompt`. From `Complete` or `Errored` with a subject on hand it
    /// starts a new run that reuses the source and subject.
    ///
    /// # Errors
    /// - `ComposeError::InvalidPrompt` for a blank prompt (state untouched)
    /// - `ComposeError::Busy` while a generation or composition is outstanding
    /// - `ComposeError::InvalidState` before a subject is available
    /// - `ComposeError::QuotaDenied` / `ComposeError::MissingIdentity` from the quota gate
    /// - `ComposeError::Generation` / `ComposeError::Composition` from the later stages
    /// - `ComposeError::Superseded` when a newer run started in the meantime
    ///
    /// A credit taken by the quota gate stays spent if the run is superseded afterwards, even
    /// when the generator is never called.
    #[instrument(skip_all, fields(%family, byok = caller.has_credential()))]
    pub async fn generate(
        &self,
        prompt: &str,
        family: BackgroundFamily,
        caller: &CallerContext,
    ) -> Result<ImageAsset> {
        let prompt = validate_prompt(prompt)?.to_string();
        let run_id = self.begin_generation(&prompt, family)?;

        let enriched = if self.inner.config.enrich_prompts {
            enhance_prompt(&prompt, family, true)
        } else {
            prompt.clone()
        };

        match self.inner.gate.authorize(caller).await {
            Ok(Admission::Allowed { remaining }) => {
                debug!(run = %run_id, remaining, "Quota allowed");
            },
            Ok(admission) => debug!(run = %run_id, ?admission, "Quota not metered"),
            Err(e) => return Err(self.state()?.fail(run_id, e)),
        }

        if let Err(stale) = self.state()?.current_mut(run_id) {
            warn!(run = %run_id, "Run superseded during quota check, skipping generation");
            return Err(stale);
        }

        let request = GenerationRequest {
            prompt: enriched,
            credential: caller.credential.clone(),
        };
        let outcome = self.inner.generator.generate(&request).await;

        let subject = {
            let mut state = self.state()?;
            let background = match outcome {
                Ok(background) => background,
                Err(e) => return Err(state.fail(run_id, e)),
            };
            let run = state.current_mut(run_id).map_err(|stale| {
                warn!(run = %run_id, "Discarding generated background of superseded run");
                stale
            })?;
            run.background = Some(background.clone());
            let subject = run.subject.clone();
            state.set_stage(run_id, PipelineStage::Composing)?;
            subject.map(|subject| (background, subject))
        };
        let Some((background, subject)) = subject else {
            return Err(self.state()?.fail(
                run_id,
                ComposeError::internal("subject missing for composition"),
            ));
        };

        let composed =
            self.inner
                .compositor
                .compose(&background, &subject, self.inner.config.scale);

        let mut state = self.state()?;
        let composite = match composed {
            Ok(composite) => composite,
            Err(e) => return Err(state.fail(run_id, e)),
        };
        let run = state.current_mut(run_id).map_err(|stale| {
            warn!(run = %run_id, "Discarding composite of superseded run");
            stale
        })?;
        run.composite = Some(composite.clone());
        run.stage = PipelineStage::Complete;
        let completed = CompletedRun {
            run_id,
            family,
            prompt,
            composite: composite.clone(),
            completed_at: Utc::now(),
        };
        state.history.push(completed);
        state.progress.report_completion(run_id);
        info!(run = %run_id, dimensions = ?composite.dimensions(), "Run complete");
        Ok(composite)
    }

    /// Claim the active run for a generation, or start a follow-up run
    fn begin_generation(&self, prompt: &str, family: BackgroundFamily) -> Result<RunId> {
        let mut state = self.state()?;
        let (run_id, stage, subject, source) = match state.active.as_ref() {
            None => return Err(ComposeError::invalid_state("nothing has been uploaded")),
            Some(run) => (
                run.run_id,
                run.stage,
                run.subject.clone(),
                run.source.clone(),
            ),
        };

        let run_id = match stage {
            PipelineStage::GeneratingBackground | PipelineStage::Composing => {
                return Err(ComposeError::Busy)
            },
            PipelineStage::Idle | PipelineStage::Uploaded | PipelineStage::RemovingBackground => {
                return Err(ComposeError::invalid_state(format!(
                    "cannot generate while {}",
                    stage
                )))
            },
            PipelineStage::AwaitingPrompt => run_id,
            PipelineStage::Complete | PipelineStage::Errored => {
                let Some(subject) = subject else {
                    return Err(ComposeError::invalid_state(
                        "no subject available, upload or regenerate first",
                    ));
                };
                let next = state.next_run_id();
                let mut run = PipelineRun::new(next, source);
                run.subject = Some(subject);
                run.stage = PipelineStage::AwaitingPrompt;
                state.active = Some(run);
                state.progress.begin_run_at(next, PipelineStage::AwaitingPrompt);
                info!(previous = %run_id, run = %next, "Follow-up run started");
                next
            },
        };

        let run = state.current_mut(run_id)?;
        run.prompt = Some(prompt.to_string());
        run.family = family;
        state.set_stage(run_id, PipelineStage::GeneratingBackground)?;
        Ok(run_id)
    }

    /// Current state of the active run
    ///
    /// # Errors
    /// - Poisoned state lock
    pub fn snapshot(&self) -> Result<PipelineSnapshot> {
        let state = self.state()?;
        Ok(match &state.active {
            None => PipelineSnapshot {
                run_id: None,
                stage: PipelineStage::Idle,
                family: BackgroundFamily::default(),
                prompt: None,
                source: None,
                subject: None,
                background: None,
                composite: None,
                failure: None,
            },
            Some(run) => PipelineSnapshot {
                run_id: Some(run.run_id),
                stage: run.stage,
                family: run.family,
                prompt: run.prompt.clone(),
                source: Some(run.source.clone()),
                subject: run.subject.clone(),
                background: run.background.clone(),
                composite: run.composite.clone(),
                failure: run.failure.clone(),
            },
        })
    }

    /// Stage of the active run, `Idle` before the first upload
    ///
    /// # Errors
    /// - Poisoned state lock
    pub fn stage(&self) -> Result<PipelineStage> {
        Ok(self
            .state()?
            .active
            .as_ref()
            .map_or(PipelineStage::Idle, |run| run.stage))
    }

    /// Completed composites in completion order
    ///
    /// # Errors
    /// - Poisoned state lock
    pub fn history(&self) -> Result<Vec<CompletedRun>> {
        Ok(self.state()?.history.clone())
    }

    /// Most recently completed composite
    ///
    /// # Errors
    /// - Poisoned state lock
    pub fn active_composite(&self) -> Result<Option<ImageAsset>> {
        Ok(self
            .state()?
            .history
            .last()
            .map(|entry| entry.composite.clone()))
    }

    /// Persisted credit count for a signed-in identity
    ///
    /// # Errors
    /// - Ledger failures
    pub async fn remaining_credits(&self, identity: &str) -> Result<Option<u32>> {
        self.inner.gate.remaining_credits(identity).await
    }
}

/// Builder for [`PipelineController`]
pub struct PipelineControllerBuilder {
    config: PipelineConfig,
    remover: Option<Arc<dyn BackgroundRemover>>,
    generator: Option<Arc<dyn BackgroundGenerator>>,
    gate: Option<QuotaGate>,
    reporter: Option<Arc<dyn ProgressReporter>>,
}

impl PipelineControllerBuilder {
    fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            remover: None,
            generator: None,
            gate: None,
            reporter: None,
        }
    }

    #[must_use]
    pub fn remover(mut self, remover: Arc<dyn BackgroundRemover>) -> Self {
        self.remover = Some(remover);
        self
    }

    #[must_use]
    pub fn generator(mut self, generator: Arc<dyn BackgroundGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Defaults to an in-memory gate using the configured policy
    #[must_use]
    pub fn quota_gate(mut self, gate: QuotaGate) -> Self {
        self.gate = Some(gate);
        self
    }

    #[must_use]
    pub fn progress_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// # Errors
    /// - Invalid configuration
    /// - Missing remover or generator
    pub fn build(self) -> Result<PipelineController> {
        self.config.validate()?;
        let remover = self
            .remover
            .ok_or_else(|| ComposeError::invalid_config("a background remover is required"))?;
        let generator = self
            .generator
            .ok_or_else(|| ComposeError::invalid_config("a background generator is required"))?;
        let gate = self
            .gate
            .unwrap_or_else(|| QuotaGate::in_memory(self.config.quota.clone()));
        let progress = self
            .reporter
            .map_or_else(ProgressTracker::no_op, ProgressTracker::new);
        let compositor = RasterCompositor::new(self.config.output_format, self.config.jpeg_quality);

        Ok(PipelineController {
            inner: Arc::new(Inner {
                config: self.config,
                remover,
                generator,
                gate,
                compositor,
                state: Mutex::new(SessionState {
                    last_run: RunId::new(0),
                    active: None,
                    history: Vec::new(),
                    progress,
                }),
            }),
        })
    }
}
