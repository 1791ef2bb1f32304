//! Container engine abstraction
//!
//! The pipeline never talks to Docker directly; it drives a
//! [`ContainerEngine`]. [`DockerEngine`] implements it over the Docker
//! Engine API, [`MockEngine`] records calls for tests.

mod docker;
mod mock;

pub use docker::DockerEngine;
pub use mock::{CommandOutcome, EngineCall, MockEngine};

use crate::secret::RegistryCredential;
use async_trait::async_trait;
use futures_util::Stream;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::pin::Pin;

/// Represents different engine failure possibilities. Messages from the
/// engine are carried verbatim.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Could not reach the engine at all.
    #[error("could not connect to container engine; {0}")]
    Connection(String),

    /// Image requested by name could not be found or pulled.
    #[error("image not found; {0}")]
    NoSuchImage(String),

    /// Container or in-container path could not be found.
    #[error("not found; {0}")]
    NotFound(String),

    /// The registry rejected an authentication or push.
    #[error("registry error; {0}")]
    Registry(String),

    /// Any other engine API failure.
    #[error("container engine error; {0}")]
    Api(String),
}

/// A named volume mounted into a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub volume: String,
    pub target: String,
}

/// Publishes a container port on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortPublish {
    pub container_port: u16,
    pub host_ip: String,
    pub host_port: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    /// A unique name to identify the container with.
    pub name: String,
    /// Image reference the container is created from.
    pub image: String,
    pub working_dir: Option<String>,
    /// Replaces the image's cmd; empty keeps the image default.
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    pub volumes: Vec<VolumeMount>,
    pub ports: Vec<PortPublish>,
}

/// The parts of an image's runtime config sitepack carries forward.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageConfig {
    pub id: String,
    pub cmd: Vec<String>,
    pub entrypoint: Vec<String>,
    pub env: Vec<String>,
    pub working_dir: Option<String>,
    pub user: Option<String>,
    pub labels: BTreeMap<String, String>,
    /// Keys in engine form, e.g. `1313/tcp`.
    pub exposed_ports: BTreeSet<String>,
}

/// Represents a single log line from a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogLine {
    Stdout(String),
    Stderr(String),
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLine::Stdout(line) | LogLine::Stderr(line) => f.write_str(line),
        }
    }
}

/// Credentials for one push. `Debug` stays redacted through the credential.
#[derive(Debug, Clone, Copy)]
pub struct RegistryAuth<'a> {
    pub server: &'a str,
    pub username: &'a str,
    pub credential: &'a RegistryCredential,
}

pub type LogStream = Pin<Box<dyn Stream<Item = Result<LogLine, EngineError>> + Send>>;

/// The engine operations the pipeline stages are built from.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// True when the image is present locally.
    async fn image_exists(&self, reference: &str) -> Result<bool, EngineError>;

    /// Pulls an image from its registry.
    async fn pull_image(&self, reference: &str) -> Result<(), EngineError>;

    async fn inspect_image(&self, reference: &str) -> Result<ImageConfig, EngineError>;

    /// Creates the named volume if it does not exist yet.
    async fn ensure_volume(&self, name: &str) -> Result<(), EngineError>;

    /// Creates (but does not start) a container; returns its id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError>;

    /// Extracts a tar archive into the container at `dest`.
    async fn upload(&self, container: &str, dest: &str, archive: Vec<u8>)
        -> Result<(), EngineError>;

    async fn start(&self, container: &str) -> Result<(), EngineError>;

    /// Blocks until the container exits; returns its exit code.
    async fn wait(&self, container: &str) -> Result<i64, EngineError>;

    /// All output the container has produced so far.
    async fn logs(&self, container: &str) -> Result<Vec<LogLine>, EngineError>;

    /// Live output until the container stops.
    fn follow_logs(&self, container: &str) -> LogStream;

    /// Tar archive of `path` inside the container.
    async fn download(&self, container: &str, path: &str) -> Result<Vec<u8>, EngineError>;

    /// Tar archive of the container's whole filesystem.
    async fn export(&self, container: &str) -> Result<Vec<u8>, EngineError>;

    /// Creates a single-layer image from a filesystem tar, applying
    /// Dockerfile-style config `changes`.
    async fn import(
        &self,
        rootfs: Vec<u8>,
        reference: &str,
        changes: &[String],
    ) -> Result<(), EngineError>;

    /// Snapshots a container into an image.
    async fn commit(&self, container: &str, reference: &str) -> Result<(), EngineError>;

    async fn tag(&self, source: &str, repository: &str, tag: &str) -> Result<(), EngineError>;

    /// Pushes `repository:tag`; returns the engine's status lines.
    async fn push(
        &self,
        repository: &str,
        tag: &str,
        auth: RegistryAuth<'_>,
    ) -> Result<Vec<String>, EngineError>;

    async fn stop(&self, container: &str, timeout_secs: i64) -> Result<(), EngineError>;

    async fn remove_container(&self, container: &str) -> Result<(), EngineError>;
}

/// Splits `name[:tag]` into repository and tag, defaulting to `latest`.
/// A colon inside a registry host (`host:5000/img`) is not a tag separator.
pub fn split_reference(reference: &str) -> (&str, &str) {
    let reference = reference.split('@').next().unwrap_or(reference);
    match reference.rfind(':') {
        Some(idx) if !reference[idx + 1..].contains('/') => {
            (&reference[..idx], &reference[idx + 1..])
        }
        _ => (reference, "latest"),
    }
}
