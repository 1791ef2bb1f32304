//! Command handlers
//!
//! Each handler returns the process exit code. Inputs and credentials are
//! resolved before the engine is contacted, so a missing lockfile or token
//! fails without Docker running.

use super::commands::{
    BuildArgs, ConfigArgs, PipelineArgs, ProdArgs, PublishArgs, ServeArgs,
};
use super::output::{OutputFormat, OutputFormatter, StaticOutputSummary};
use crate::config::{CacheStrategy, SitepackConfig};
use crate::engine::DockerEngine;
use crate::pipeline::Pipeline;
use crate::progress::LoggingHandler;
use crate::secret::{RegistryCredential, DEFAULT_TOKEN_ENV};
use crate::source::{InputFile, ProjectInputs};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

fn exit_code(result: Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            error!("{:#}", e);
            1
        }
    }
}

fn print(output: String) {
    print!("{}", output);
    if !output.ends_with('\n') {
        println!();
    }
}

/// Layers CLI flags over file and environment configuration.
fn resolve_config(
    common: &PipelineArgs,
    config_file: Option<&Path>,
    caddyfile: Option<&PathBuf>,
) -> Result<SitepackConfig> {
    let mut config = SitepackConfig::load(&common.source, config_file)
        .context("Failed to load configuration")?;

    if let Some(manifest) = &common.manifest {
        config.manifest = manifest.clone();
    }
    if let Some(lockfile) = &common.lockfile {
        config.lockfile = lockfile.clone();
    }
    if let Some(caddyfile) = caddyfile {
        config.caddyfile = caddyfile.clone();
    }
    if common.no_reuse {
        config.reuse_environment = false;
    }
    if common.fixed_cache {
        config.cache_strategy = CacheStrategy::Fixed;
    }

    config.validate().context("Invalid configuration")?;
    debug!(config = ?config, "Resolved configuration");
    Ok(config)
}

async fn pipeline(
    config: SitepackConfig,
    inputs: ProjectInputs,
) -> Result<Pipeline<DockerEngine>> {
    let engine = DockerEngine::connect(config.engine_timeout_secs)
        .await
        .context("Failed to connect to the container engine")?;
    Ok(Pipeline::new(Arc::new(engine), config, inputs).with_progress(Arc::new(LoggingHandler)))
}

fn load_inputs(config: &SitepackConfig) -> Result<ProjectInputs> {
    ProjectInputs::load(config).context("Failed to load project inputs")
}

fn load_caddyfile(config: &SitepackConfig) -> Result<InputFile> {
    InputFile::read(&config.caddyfile_path()).context("Failed to load server config")
}

pub async fn handle_build_env(args: &PipelineArgs, config_file: Option<&Path>) -> i32 {
    exit_code(
        async {
            let config = resolve_config(args, config_file, None)?;
            let inputs = load_inputs(&config)?;
            let env = pipeline(config, inputs).await?.build_env().await?;
            print(OutputFormatter::new(args.format.into()).format_environment(&env)?);
            Ok::<(), anyhow::Error>(())
        }
        .await,
    )
}

pub async fn handle_build(args: &BuildArgs, config_file: Option<&Path>) -> i32 {
    exit_code(
        async {
            let config = resolve_config(&args.common, config_file, None)?;
            let inputs = load_inputs(&config)?;
            let output = pipeline(config, inputs).await?.build().await?;

            let mut summary = StaticOutputSummary::new(&output);
            if let Some(dir) = &args.export {
                output.export(dir)?;
                summary.exported_to = Some(dir.display().to_string());
            }
            if let Some(path) = &args.archive {
                output.export_archive(path)?;
                summary.archive = Some(path.display().to_string());
            }

            print(OutputFormatter::new(args.common.format.into()).format_static_output(&summary)?);
            Ok::<(), anyhow::Error>(())
        }
        .await,
    )
}

pub async fn handle_prod(args: &ProdArgs, config_file: Option<&Path>) -> i32 {
    exit_code(
        async {
            let config = resolve_config(&args.common, config_file, args.caddyfile.as_ref())?;
            let inputs = load_inputs(&config)?;
            let caddyfile = load_caddyfile(&config)?;
            let image = pipeline(config, inputs)
                .await?
                .with_caddyfile(caddyfile)
                .prod()
                .await?;
            print(OutputFormatter::new(args.common.format.into()).format_packaged(&image)?);
            Ok::<(), anyhow::Error>(())
        }
        .await,
    )
}

fn resolve_credential(args: &PublishArgs) -> Result<RegistryCredential> {
    let credential = match (&args.token_file, &args.token_env) {
        (Some(path), _) => RegistryCredential::from_file(path)?,
        (None, Some(var)) => RegistryCredential::from_env(var)?,
        (None, None) => RegistryCredential::from_env(DEFAULT_TOKEN_ENV)?,
    };
    Ok(credential)
}

pub async fn handle_publish(args: &PublishArgs, config_file: Option<&Path>) -> i32 {
    exit_code(
        async {
            let mut config =
                resolve_config(&args.common, config_file, args.caddyfile.as_ref())?;
            if let Some(tag) = &args.tag {
                config.tag = tag.clone();
                config.validate().context("Invalid configuration")?;
            }
            let credential =
                resolve_credential(args).context("Registry credential unavailable")?;
            let inputs = load_inputs(&config)?;
            let caddyfile = load_caddyfile(&config)?;

            let published = pipeline(config, inputs)
                .await?
                .with_caddyfile(caddyfile)
                .publish(&credential)
                .await?;
            print(OutputFormatter::new(args.common.format.into()).format_published(&published)?);
            Ok::<(), anyhow::Error>(())
        }
        .await,
    )
}

pub async fn handle_serve(args: &ServeArgs, config_file: Option<&Path>) -> i32 {
    exit_code(
        async {
            let config = resolve_config(&args.common, config_file, args.caddyfile.as_ref())?;
            let inputs = load_inputs(&config)?;
            let caddyfile = load_caddyfile(&config)?;

            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "Failed to listen for Ctrl-C");
                }
            };
            pipeline(config, inputs)
                .await?
                .with_caddyfile(caddyfile)
                .serve(args.port, shutdown)
                .await?;
            info!("Server stopped");
            Ok::<(), anyhow::Error>(())
        }
        .await,
    )
}

pub fn handle_config(args: &ConfigArgs, config_file: Option<&Path>) -> i32 {
    exit_code((|| -> Result<()> {
        let config = SitepackConfig::load(&args.source, config_file)
            .context("Failed to load configuration")?;
        let format: OutputFormat = args.format.into();
        print(OutputFormatter::new(format).format_config(&config)?);
        config.validate().context("Invalid configuration")?;
        Ok(())
    })())
}
