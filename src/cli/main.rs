//! Prodapic CLI
//!
//! `compose` runs the compositor on two local images. `run` drives the full pipeline against
//! the configured removal and generation services.

use super::{config::CliConfigBuilder, progress::SpinnerProgressReporter};
use crate::{
    compositor::RasterCompositor,
    generation::HttpBackgroundGenerator,
    pipeline::PipelineController,
    removal::HttpBackgroundRemover,
    tracing_config::{spans, TracingConfig, TracingFormat, TracingGuard},
    types::{BackgroundFamily, CallerContext, ImageAsset},
    OutputFormat,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::{path::PathBuf, sync::Arc};
use tracing::{info, Instrument};

/// Product photo composition
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "prodapic")]
pub struct Cli {
    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// JSON pipeline configuration [default: built from environment variables]
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Composite a subject image over a background image
    Compose(ComposeArgs),
    /// Remove the background of a photo, generate a new one and composite them
    Run(RunArgs),
}

#[derive(Parser, Debug)]
pub struct ComposeArgs {
    /// Background image; sets the canvas size
    #[arg(long, value_name = "PATH")]
    pub background: PathBuf,

    /// Alpha-matted subject image
    #[arg(long, value_name = "PATH")]
    pub subject: PathBuf,

    /// Subject bounding box relative to the canvas (0, 1]
    #[arg(long)]
    pub scale: Option<f64>,

    /// Output file
    #[arg(short, long, value_name = "OUTPUT")]
    pub output: PathBuf,

    /// Output format [default: from the output extension, else png]
    #[arg(short, long, value_enum)]
    pub format: Option<CliOutputFormat>,

    /// JPEG quality (0-100)
    #[arg(long, default_value_t = 90)]
    pub jpeg_quality: u8,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Product photo
    #[arg(short, long, value_name = "PATH")]
    pub input: PathBuf,

    /// Background description
    #[arg(short, long)]
    pub prompt: String,

    /// Background family used to frame the prompt
    #[arg(long, value_enum, default_value_t = CliFamily::Product)]
    pub family: CliFamily,

    /// Personal generation API key; skips the quota gate
    #[arg(long, env = "PRODAPIC_PERSONAL_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Background removal service URL
    #[arg(long, value_name = "URL")]
    pub removal_url: Option<String>,

    /// Identity counted by the identified quota scope
    #[arg(long, default_value = "local-user")]
    pub identity: String,

    /// Network address counted by the anonymous quota scope
    #[arg(long, default_value = crate::types::FALLBACK_NETWORK_ADDRESS)]
    pub address: String,

    /// Send the prompt as typed, without family framing
    #[arg(long)]
    pub no_enrich: bool,

    /// Subject bounding box relative to the canvas (0, 1]
    #[arg(long)]
    pub scale: Option<f64>,

    /// Output file
    #[arg(short, long, value_name = "OUTPUT")]
    pub output: PathBuf,

    /// Output format [default: from the output extension, else png]
    #[arg(short, long, value_enum)]
    pub format: Option<CliOutputFormat>,

    /// Also write the isolated subject here
    #[arg(long, value_name = "PATH")]
    pub save_subject: Option<PathBuf>,

    /// Also write the generated background here
    #[arg(long, value_name = "PATH")]
    pub save_background: Option<PathBuf>,

    /// Hide the progress spinner
    #[arg(long)]
    pub quiet: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliOutputFormat {
    Png,
    Jpeg,
    Webp,
}

impl From<CliOutputFormat> for OutputFormat {
    fn from(format: CliOutputFormat) -> Self {
        match format {
            CliOutputFormat::Png => OutputFormat::Png,
            CliOutputFormat::Jpeg => OutputFormat::Jpeg,
            CliOutputFormat::Webp => OutputFormat::WebP,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliFamily {
    Product,
    Lifestyle,
    Seasonal,
}

impl From<CliFamily> for BackgroundFamily {
    fn from(family: CliFamily) -> Self {
        match family {
            CliFamily::Product => BackgroundFamily::Product,
            CliFamily::Lifestyle => BackgroundFamily::Lifestyle,
            CliFamily::Seasonal => BackgroundFamily::Seasonal,
        }
    }
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();
    let session_id = uuid::Uuid::new_v4().to_string();
    let _guard = init_tracing(cli.verbose, &session_id)?;

    let command = match &cli.command {
        Command::Compose(_) => "compose",
        Command::Run(_) => "run",
    };
    let span = spans::session(&session_id, command);

    match &cli.command {
        Command::Compose(args) => {
            let _entered = span.entered();
            run_compose(&cli, args)
        },
        Command::Run(args) => run_pipeline(&cli, args).instrument(span).await,
    }
}

fn init_tracing(verbose: u8, session_id: &str) -> Result<TracingGuard> {
    TracingConfig::new()
        .with_verbosity(verbose)
        .with_format(TracingFormat::Console)
        .with_session_id(session_id)
        .init()
        .context("Failed to initialize tracing subscriber")
}

fn run_compose(cli: &Cli, args: &ComposeArgs) -> Result<()> {
    let base = CliConfigBuilder::base_config(cli.config.as_deref())?;
    let config = CliConfigBuilder::from_compose_args(args, base)?;

    let background = ImageAsset::load(&args.background).with_context(|| {
        format!("Failed to load background '{}'", args.background.display())
    })?;
    let subject = ImageAsset::load(&args.subject)
        .with_context(|| format!("Failed to load subject '{}'", args.subject.display()))?;

    let compositor = RasterCompositor::new(config.output_format, config.jpeg_quality);
    let composite = {
        let _span = spans::file_processing(&args.output).entered();
        compositor
            .compose(&background, &subject, config.scale)
            .context("Composition failed")?
    };
    composite
        .save(&args.output)
        .with_context(|| format!("Failed to write '{}'", args.output.display()))?;

    info!(
        output = %args.output.display(),
        width = composite.width(),
        height = composite.height(),
        "Composite written"
    );
    Ok(())
}

async fn run_pipeline(cli: &Cli, args: &RunArgs) -> Result<()> {
    let base = CliConfigBuilder::base_config(cli.config.as_deref())?;
    let config = CliConfigBuilder::from_run_args(args, base)?;

    let remover = HttpBackgroundRemover::new(&config.removal)
        .context("Background removal needs --removal-url or PRODAPIC_REMOVAL_URL")?;
    let generator = HttpBackgroundGenerator::new(config.generation.clone())
        .context("Failed to set up the generation client")?;
    let reporter = if args.quiet {
        SpinnerProgressReporter::hidden()
    } else {
        SpinnerProgressReporter::new()
    };

    let pipeline = PipelineController::builder(config)
        .remover(Arc::new(remover))
        .generator(Arc::new(generator))
        .progress_reporter(Arc::new(reporter))
        .build()
        .context("Invalid pipeline configuration")?;

    let photo = tokio::fs::read(&args.input)
        .await
        .with_context(|| format!("Failed to read '{}'", args.input.display()))?;
    let run = pipeline.upload(photo).await.context("Upload failed")?;
    info!(run = %run, input = %args.input.display(), "Subject isolated");

    let mut caller =
        CallerContext::new(args.address.clone()).with_identity(args.identity.clone());
    if let Some(key) = &args.api_key {
        caller = caller.with_credential(key.clone());
    }

    let composite = pipeline
        .generate(&args.prompt, args.family.into(), &caller)
        .await
        .context("Background generation failed")?;
    composite
        .save(&args.output)
        .with_context(|| format!("Failed to write '{}'", args.output.display()))?;

    let snapshot = pipeline.snapshot()?;
    if let (Some(path), Some(subject)) = (&args.save_subject, &snapshot.subject) {
        subject
            .save(path)
            .with_context(|| format!("Failed to write '{}'", path.display()))?;
    }
    if let (Some(path), Some(background)) = (&args.save_background, &snapshot.background) {
        background
            .save(path)
            .with_context(|| format!("Failed to write '{}'", path.display()))?;
    }

    if !caller.has_credential() {
        if let Some(remaining) = pipeline.remaining_credits(&args.identity).await? {
            info!(remaining, "Generation credits left");
        }
    }
    info!(output = %args.output.display(), "Composite written");
    Ok(())
}
