//! Build, package and publish stages
//!
//! Each stage is a free function over a [`ContainerEngine`]; [`Pipeline`]
//! sequences them and reports progress.

pub mod build_env;
pub mod cache;
mod container;
pub mod orchestrator;
pub mod package;
pub mod publish;
pub mod serve;
pub mod static_build;

pub use build_env::BuildEnvironment;
pub use orchestrator::Pipeline;
pub use package::PackagedImage;
pub use publish::PublishedImage;
pub use static_build::StaticOutput;

use crate::config::ConfigError;
use crate::engine::EngineError;
use crate::progress::Stage;
use crate::secret::CredentialError;
use crate::source::LoadError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The stage's command ran and exited non-zero; `output` is the
    /// container's combined output, verbatim.
    #[error("{stage} command exited with code {exit_code}\n{output}")]
    CommandFailed {
        stage: Stage,
        exit_code: i64,
        output: String,
    },

    #[error("{stage} produced no output at {path}")]
    MissingOutput { stage: Stage, path: String },

    #[error("Image {image} exposes {found:?}, expected exactly [\"{expected}\"]")]
    PortMismatch {
        image: String,
        expected: String,
        found: Vec<String>,
    },

    #[error(transparent)]
    MissingCredential(#[from] CredentialError),

    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Failed to write {path}: {error}")]
    Write { path: String, error: String },
}

impl PipelineError {
    pub(crate) fn archive(error: anyhow::Error) -> Self {
        PipelineError::Archive(format!("{:#}", error))
    }
}
