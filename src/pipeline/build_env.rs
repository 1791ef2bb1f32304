//! Dependency install stage.

use super::cache::{cache_volume_name, environment_key, short_key, CACHE_MOUNT};
use super::container::{container_name, ensure_image, remove_quietly, run_to_completion};
use super::PipelineError;
use crate::config::SitepackConfig;
use crate::engine::{ContainerEngine, ContainerSpec, VolumeMount};
use crate::progress::Stage;
use crate::source::archive::{ArchiveBuilder, FILE_MODE};
use crate::source::ProjectInputs;
use serde::Serialize;
use tracing::{debug, info};

/// Working directory of every build container.
pub const WORKDIR: &str = "/app";

/// Production install that refuses to touch the lockfile.
pub const INSTALL_COMMAND: &[&str] = &["bun", "install", "--frozen-lockfile", "--production"];

/// Local repository environment images are tagged into.
pub const ENV_REPOSITORY: &str = "sitepack-env";

/// An image with the project's production dependencies installed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildEnvironment {
    /// Local image reference, `sitepack-env:<key16>`
    pub image: String,
    pub env_key: String,
    pub cache_volume: String,
    /// True when an existing image was returned without installing
    pub reused: bool,
}

pub async fn build_environment<E>(
    engine: &E,
    config: &SitepackConfig,
    inputs: &ProjectInputs,
) -> Result<BuildEnvironment, PipelineError>
where
    E: ContainerEngine + ?Sized,
{
    let env_key = environment_key(
        &config.build_image,
        &inputs.manifest,
        &inputs.lockfile,
        INSTALL_COMMAND,
    );
    let image = format!("{}:{}", ENV_REPOSITORY, short_key(&env_key));
    let cache_volume = cache_volume_name(config.cache_strategy, &inputs.lockfile);

    if config.reuse_environment && engine.image_exists(&image).await? {
        info!(image = %image, "Reusing build environment");
        return Ok(BuildEnvironment {
            image,
            env_key,
            cache_volume,
            reused: true,
        });
    }

    ensure_image(engine, &config.build_image).await?;
    engine.ensure_volume(&cache_volume).await?;

    let spec = ContainerSpec {
        name: container_name(Stage::BuildEnv),
        image: config.build_image.clone(),
        working_dir: Some(WORKDIR.to_string()),
        cmd: INSTALL_COMMAND.iter().map(|s| s.to_string()).collect(),
        volumes: vec![VolumeMount {
            volume: cache_volume.clone(),
            target: CACHE_MOUNT.to_string(),
        }],
        ..Default::default()
    };

    let mut archive = ArchiveBuilder::with_root(WORKDIR).map_err(PipelineError::archive)?;
    for input in [&inputs.manifest, &inputs.lockfile] {
        archive
            .add_file(&input.name, FILE_MODE, input.contents.clone())
            .map_err(PipelineError::archive)?;
    }
    let archive = archive.finish().map_err(PipelineError::archive)?;

    info!(
        image = %config.build_image,
        cache_volume = %cache_volume,
        command = %INSTALL_COMMAND.join(" "),
        "Installing dependencies"
    );

    let container = engine.create_container(&spec).await?;
    debug!(container = %container, name = %spec.name, "Created install container");

    let result = async {
        engine.upload(&container, "/", archive).await?;
        run_to_completion(engine, Stage::BuildEnv, &container).await?;
        engine.commit(&container, &image).await?;
        Ok::<_, PipelineError>(())
    }
    .await;
    remove_quietly(engine, &container).await;
    result?;

    info!(image = %image, "Build environment ready");
    Ok(BuildEnvironment {
        image,
        env_key,
        cache_volume,
        reused: false,
    })
}
