//! Turns parsed CLI arguments into a `PipelineConfig`

use crate::cli::main_impl::{ComposeArgs, RunArgs};
use crate::{
    config::{OutputFormat, PipelineConfig},
    services::ImageIOService,
};
use anyhow::{Context, Result};
use std::path::Path;

pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Config file when given, otherwise defaults plus environment variables
    pub(crate) fn base_config(path: Option<&Path>) -> Result<PipelineConfig> {
        match path {
            Some(path) => PipelineConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config '{}'", path.display())),
            None => PipelineConfig::from_env().context("Invalid environment configuration"),
        }
    }

    /// Explicit `--format`, then the output extension, then PNG
    pub(crate) fn resolve_output_format(
        explicit: Option<OutputFormat>,
        output: &Path,
    ) -> OutputFormat {
        explicit
            .or_else(|| ImageIOService::format_for_path(output))
            .unwrap_or_default()
    }

    pub(crate) fn from_compose_args(
        args: &ComposeArgs,
        mut config: PipelineConfig,
    ) -> Result<PipelineConfig> {
        if let Some(scale) = args.scale {
            config.scale = scale;
        }
        config.output_format =
            Self::resolve_output_format(args.format.map(Into::into), &args.output);
        config.jpeg_quality = args.jpeg_quality;
        config.validate().context("Invalid compose arguments")?;
        Ok(config)
    }

    pub(crate) fn from_run_args(args: &RunArgs, mut config: PipelineConfig) -> Result<PipelineConfig> {
        if let Some(scale) = args.scale {
            config.scale = scale;
        }
        if let Some(url) = &args.removal_url {
            config.removal.endpoint = Some(url.clone());
        }
        if args.no_enrich {
            config.enrich_prompts = false;
        }
        config.output_format =
            Self::resolve_output_format(args.format.map(Into::into), &args.output);
        config.validate().context("Invalid run arguments")?;
        Ok(config)
    }
}
