use super::build_env::{build_environment, BuildEnvironment};
use super::package::{package, PackagedImage};
use super::publish::{publish, PublishedImage};
use super::serve::serve;
use super::static_build::{build_static, StaticOutput};
use super::PipelineError;
use crate::config::SitepackConfig;
use crate::engine::ContainerEngine;
use crate::progress::{NoOpHandler, ProgressEvent, ProgressHandler, Stage};
use crate::secret::RegistryCredential;
use crate::source::{InputFile, LoadError, ProjectInputs};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Outputs that may come from a cache hit.
trait StageOutput {
    fn reused(&self) -> bool {
        false
    }
}

impl StageOutput for BuildEnvironment {
    fn reused(&self) -> bool {
        self.reused
    }
}

impl StageOutput for PackagedImage {
    fn reused(&self) -> bool {
        self.reused
    }
}

impl StageOutput for StaticOutput {}
impl StageOutput for PublishedImage {}
impl StageOutput for () {}

/// Runs the stages in order over one set of captured inputs.
///
/// Each public operation runs every stage it depends on first, so
/// `publish` performs build-env, build, prod and publish.
pub struct Pipeline<E: ContainerEngine> {
    engine: Arc<E>,
    config: SitepackConfig,
    inputs: ProjectInputs,
    caddyfile: Option<InputFile>,
    progress: Arc<dyn ProgressHandler>,
}

impl<E: ContainerEngine> Pipeline<E> {
    pub fn new(engine: Arc<E>, config: SitepackConfig, inputs: ProjectInputs) -> Self {
        Self {
            engine,
            config,
            inputs,
            caddyfile: None,
            progress: Arc::new(NoOpHandler),
        }
    }

    /// Server config installed by `prod`.
    pub fn with_caddyfile(mut self, caddyfile: InputFile) -> Self {
        self.caddyfile = Some(caddyfile);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressHandler>) -> Self {
        self.progress = progress;
        self
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn config(&self) -> &SitepackConfig {
        &self.config
    }

    pub fn inputs(&self) -> &ProjectInputs {
        &self.inputs
    }

    async fn stage<T, F>(&self, stage: Stage, work: F) -> Result<T, PipelineError>
    where
        T: StageOutput,
        F: Future<Output = Result<T, PipelineError>>,
    {
        self.progress
            .on_progress(&ProgressEvent::StageStarted { stage });
        let start = Instant::now();

        match work.await {
            Ok(output) => {
                self.progress.on_progress(&ProgressEvent::StageCompleted {
                    stage,
                    duration: start.elapsed(),
                    reused: output.reused(),
                });
                Ok(output)
            }
            Err(e) => {
                self.progress.on_progress(&ProgressEvent::StageFailed {
                    stage,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn started(&self) -> Instant {
        self.progress.on_progress(&ProgressEvent::Started {
            project: self.config.project_dir.display().to_string(),
        });
        Instant::now()
    }

    fn completed(&self, stages: usize, start: Instant) {
        self.progress.on_progress(&ProgressEvent::Completed {
            stages,
            total_time: start.elapsed(),
        });
    }

    fn require_caddyfile(&self) -> Result<&InputFile, PipelineError> {
        self.caddyfile.as_ref().ok_or_else(|| {
            LoadError::MissingInput {
                name: "Caddyfile".to_string(),
                path: self.config.caddyfile_path(),
            }
            .into()
        })
    }

    async fn run_build_env(&self) -> Result<BuildEnvironment, PipelineError> {
        self.stage(
            Stage::BuildEnv,
            build_environment(self.engine.as_ref(), &self.config, &self.inputs),
        )
        .await
    }

    async fn run_build(&self) -> Result<StaticOutput, PipelineError> {
        let env = self.run_build_env().await?;
        debug!(image = %env.image, reused = env.reused, "Build environment resolved");
        self.stage(
            Stage::Build,
            build_static(self.engine.as_ref(), &env, &self.inputs),
        )
        .await
    }

    async fn run_prod(&self) -> Result<PackagedImage, PipelineError> {
        let caddyfile = self.require_caddyfile()?;
        let output = self.run_build().await?;
        self.stage(
            Stage::Prod,
            package(self.engine.as_ref(), &self.config, &output, caddyfile),
        )
        .await
    }

    /// Installs production dependencies into a build environment image.
    pub async fn build_env(&self) -> Result<BuildEnvironment, PipelineError> {
        let start = self.started();
        let env = self.run_build_env().await?;
        self.completed(1, start);
        Ok(env)
    }

    /// Builds the static site.
    pub async fn build(&self) -> Result<StaticOutput, PipelineError> {
        let start = self.started();
        let output = self.run_build().await?;
        self.completed(2, start);
        Ok(output)
    }

    /// Packages the site into the web server image.
    ///
    /// Fails before any engine call when no Caddyfile was supplied.
    pub async fn prod(&self) -> Result<PackagedImage, PipelineError> {
        let start = self.started();
        let image = self.run_prod().await?;
        self.completed(3, start);
        Ok(image)
    }

    /// Packages and pushes the image to the configured repository.
    pub async fn publish(
        &self,
        credential: &RegistryCredential,
    ) -> Result<PublishedImage, PipelineError> {
        let start = self.started();
        let image = self.run_prod().await?;
        let published = self
            .stage(
                Stage::Publish,
                publish(self.engine.as_ref(), &self.config, &image, credential),
            )
            .await?;
        self.completed(4, start);
        Ok(published)
    }

    /// Packages the image and serves it on `127.0.0.1:<host_port>` until
    /// `shutdown` resolves.
    pub async fn serve<F>(&self, host_port: u16, shutdown: F) -> Result<(), PipelineError>
    where
        F: Future<Output = ()> + Send,
    {
        let start = self.started();
        let image = self.run_prod().await?;
        info!(image = %image.image, host_port, "Starting local server");
        self.stage(
            Stage::Serve,
            serve(self.engine.as_ref(), &self.config, &image, host_port, shutdown),
        )
        .await?;
        self.completed(4, start);
        Ok(())
    }
}
