//! sitepack - containerised build and publish pipeline for a static blog
//!
//! The pipeline installs a site's production dependencies inside a runtime
//! image, runs its static build, packages the output into a web server image
//! exposing a single port, and optionally pushes that image to a registry.
//! All heavy lifting is done by a container engine; this crate captures the
//! inputs, keys the caches, sequences the stages and hands artifacts between
//! them.
//!
//! # Core Concepts
//!
//! - **Project inputs**: the manifest, lockfile and allow-listed source tree,
//!   captured once before the engine is contacted
//! - **Build environment**: an image with dependencies installed, keyed on
//!   the manifest and lockfile content
//! - **Static output**: the generated site, held in canonical tar form
//! - **Packaged image**: the server image with the site and its config baked in
//!
//! # Example Usage
//!
//! ```no_run
//! use sitepack::{DockerEngine, Pipeline, ProjectInputs, SitepackConfig};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = SitepackConfig::load(Path::new("."), None)?;
//! let inputs = ProjectInputs::load(&config)?;
//! let engine = DockerEngine::connect(config.engine_timeout_secs).await?;
//!
//! let output = Pipeline::new(Arc::new(engine), config, inputs).build().await?;
//! println!("built {} files, {}", output.len(), output.digest());
//! # Ok(())
//! # }
//! ```
//!
//! # Project Structure
//!
//! - [`source`]: input capture and deterministic archives
//! - [`engine`]: the container engine seam, Docker and in-memory implementations
//! - [`pipeline`]: the stages and their orchestrator
//! - [`secret`]: registry credential handling

pub mod cli;
pub mod config;
pub mod engine;
pub mod pipeline;
pub mod progress;
pub mod secret;
pub mod source;
pub mod util;

pub use config::{CacheStrategy, ConfigError, SitepackConfig};
pub use engine::{ContainerEngine, DockerEngine, EngineError, MockEngine};
pub use pipeline::{
    BuildEnvironment, PackagedImage, Pipeline, PipelineError, PublishedImage, StaticOutput,
};
pub use progress::{LoggingHandler, NoOpHandler, ProgressEvent, ProgressHandler, Stage};
pub use secret::{CredentialError, RegistryCredential};
pub use source::{InputFile, LoadError, ProjectInputs, SourceTree};
pub use util::{init_from_env, init_logging, LoggingConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_exists() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_name_is_sitepack() {
        assert_eq!(NAME, "sitepack");
    }
}
