use super::{
    split_reference, ContainerEngine, ContainerSpec, EngineError, ImageConfig, LogLine, LogStream,
    RegistryAuth,
};
use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use bollard::container::{
    Config, CreateContainerOptions, DownloadFromContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
    UploadToContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::{CommitContainerOptions, CreateImageOptions, PushImageOptions, TagImageOptions};
use bollard::models::{HostConfig, Mount, MountTypeEnum, PortBinding};
use bollard::volume::CreateVolumeOptions;
use futures_util::stream::{StreamExt, TryStreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument, trace};

/// [`ContainerEngine`] backed by a local Docker-compatible daemon.
#[derive(Debug, Clone)]
pub struct DockerEngine {
    client: bollard::Docker,
}

impl DockerEngine {
    /// Connects using `DOCKER_HOST` or the platform socket and checks that
    /// the daemon answers.
    #[instrument(fields(origin = "engine::docker"))]
    pub async fn connect(timeout_secs: u64) -> Result<Self, EngineError> {
        let client = bollard::Docker::connect_with_local_defaults().map_err(|e| {
            EngineError::Connection(format!(
                "{}; Make sure the Docker daemon is installed and running.",
                e
            ))
        })?;
        let client = client.with_timeout(Duration::from_secs(timeout_secs));

        // Check that we can actually get a connection.
        let version = client.version().await.map_err(|e| {
            EngineError::Connection(format!(
                "{}; Make sure the Docker daemon is installed and running.",
                e
            ))
        })?;

        debug!(
            version = version.version.unwrap_or_default(),
            api_version = version.api_version.unwrap_or_default(),
            "Docker engine connected"
        );

        Ok(Self { client })
    }
}

fn api_error(context: &str, err: BollardError) -> EngineError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => EngineError::NotFound(format!("{}: {}", context, message)),
        other => EngineError::Api(format!("{}: {}", context, other)),
    }
}

/// Progress streams report failures in-band; pick them out whatever the
/// model type calls the field.
fn stream_error<T: Serialize>(info: &T) -> Option<String> {
    let value = serde_json::to_value(info).ok()?;
    if let Some(message) = value.get("error").and_then(|v| v.as_str()) {
        return Some(message.to_string());
    }
    value
        .get("errorDetail")
        .and_then(|d| d.get("message"))
        .and_then(|m| m.as_str())
        .map(|m| m.to_string())
}

fn status_line<T: Serialize>(info: &T) -> Option<String> {
    let value = serde_json::to_value(info).ok()?;
    value
        .get("status")
        .and_then(|s| s.as_str())
        .map(|s| s.to_string())
}

/// Options for creating an image from a filesystem tar sent in the body.
fn import_options<'a>(reference: &str, changes: &'a [String]) -> CreateImageOptions<'a, String> {
    let (repository, tag) = split_reference(reference);
    CreateImageOptions {
        from_src: "-".to_string(),
        repo: repository.to_string(),
        tag: tag.to_string(),
        changes: changes.iter().map(String::as_str).collect(),
        ..Default::default()
    }
}

fn log_line(output: LogOutput) -> Option<LogLine> {
    match output {
        LogOutput::StdOut { message } | LogOutput::Console { message } => Some(LogLine::Stdout(
            String::from_utf8_lossy(&message).trim_end().to_string(),
        )),
        LogOutput::StdErr { message } => Some(LogLine::Stderr(
            String::from_utf8_lossy(&message).trim_end().to_string(),
        )),
        LogOutput::StdIn { .. } => None,
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn image_exists(&self, reference: &str) -> Result<bool, EngineError> {
        match self.client.inspect_image(reference).await {
            Ok(_) => Ok(true),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(api_error("inspect image", e)),
        }
    }

    async fn pull_image(&self, reference: &str) -> Result<(), EngineError> {
        let (repository, tag) = split_reference(reference);
        debug!(image = reference, "Pulling image");

        let mut stream = Box::pin(self.client.create_image(
            Some(CreateImageOptions {
                from_image: repository.to_string(),
                tag: tag.to_string(),
                ..Default::default()
            }),
            None,
            None,
        ));

        while let Some(info) = stream.next().await {
            let info = info.map_err(|e| EngineError::NoSuchImage(format!("{}: {}", reference, e)))?;
            if let Some(message) = stream_error(&info) {
                return Err(EngineError::NoSuchImage(format!("{}: {}", reference, message)));
            }
            if let Some(status) = status_line(&info) {
                trace!(image = reference, status = %status, "Pull progress");
            }
        }

        Ok(())
    }

    async fn inspect_image(&self, reference: &str) -> Result<ImageConfig, EngineError> {
        let image = self
            .client
            .inspect_image(reference)
            .await
            .map_err(|e| match e {
                BollardError::DockerResponseServerError {
                    status_code: 404,
                    message,
                } => EngineError::NoSuchImage(format!("{}: {}", reference, message)),
                other => api_error("inspect image", other),
            })?;

        let mut config = ImageConfig {
            id: image.id.unwrap_or_default(),
            ..Default::default()
        };

        if let Some(container_config) = image.config {
            config.cmd = container_config.cmd.unwrap_or_default();
            config.entrypoint = container_config.entrypoint.unwrap_or_default();
            config.env = container_config.env.unwrap_or_default();
            config.working_dir = container_config.working_dir.filter(|w| !w.is_empty());
            config.user = container_config.user.filter(|u| !u.is_empty());
            config.labels = container_config
                .labels
                .unwrap_or_default()
                .into_iter()
                .collect();
            config.exposed_ports = container_config
                .exposed_ports
                .map(|ports| ports.keys().cloned().collect())
                .unwrap_or_default();
        }

        Ok(config)
    }

    async fn ensure_volume(&self, name: &str) -> Result<(), EngineError> {
        self.client
            .create_volume(CreateVolumeOptions {
                name: name.to_string(),
                ..Default::default()
            })
            .await
            .map_err(|e| api_error("create volume", e))?;
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        let mounts: Vec<Mount> = spec
            .volumes
            .iter()
            .map(|m| Mount {
                target: Some(m.target.clone()),
                source: Some(m.volume.clone()),
                typ: Some(MountTypeEnum::VOLUME),
                ..Default::default()
            })
            .collect();

        let mut exposed_ports = HashMap::new();
        let mut port_bindings = HashMap::new();
        for port in &spec.ports {
            let key = format!("{}/tcp", port.container_port);
            exposed_ports.insert(key.clone(), HashMap::new());
            port_bindings.insert(
                key,
                Some(vec![PortBinding {
                    host_ip: Some(port.host_ip.clone()),
                    host_port: Some(port.host_port.to_string()),
                }]),
            );
        }

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: (!spec.cmd.is_empty()).then(|| spec.cmd.clone()),
            env: (!spec.env.is_empty()).then(|| spec.env.clone()),
            working_dir: spec.working_dir.clone(),
            exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
            host_config: Some(HostConfig {
                mounts: (!mounts.is_empty()).then_some(mounts),
                port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
                ..Default::default()
            }),
            ..Default::default()
        };

        let created = self
            .client
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| api_error("create container", e))?;

        for warning in &created.warnings {
            debug!(container = %spec.name, warning = %warning, "Engine warning");
        }

        Ok(created.id)
    }

    async fn upload(
        &self,
        container: &str,
        dest: &str,
        archive: Vec<u8>,
    ) -> Result<(), EngineError> {
        trace!(container, dest, bytes = archive.len(), "Uploading archive");
        self.client
            .upload_to_container(
                container,
                Some(UploadToContainerOptions {
                    path: dest.to_string(),
                    ..Default::default()
                }),
                bytes::Bytes::from(archive),
            )
            .await
            .map_err(|e| api_error("upload to container", e))
    }

    async fn start(&self, container: &str) -> Result<(), EngineError> {
        self.client
            .start_container(container, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| api_error("start container", e))
    }

    async fn wait(&self, container: &str) -> Result<i64, EngineError> {
        let mut stream = Box::pin(
            self.client
                .wait_container(container, None::<WaitContainerOptions<String>>),
        );

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // Non-zero exits arrive as an error carrying the code.
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(api_error("wait for container", e)),
            None => Err(EngineError::Api(format!(
                "wait for container: no status reported for {}",
                container
            ))),
        }
    }

    async fn logs(&self, container: &str) -> Result<Vec<LogLine>, EngineError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            ..Default::default()
        };

        let outputs: Vec<LogOutput> = self
            .client
            .logs(container, Some(options))
            .try_collect()
            .await
            .map_err(|e| api_error("read container logs", e))?;

        Ok(outputs.into_iter().filter_map(log_line).collect())
    }

    fn follow_logs(&self, container: &str) -> LogStream {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };

        let logs = self
            .client
            .logs(container, Some(options))
            .map_err(|e| EngineError::NotFound(e.to_string()))
            .try_filter_map(|output| async move { Ok::<_, EngineError>(log_line(output)) });

        Box::pin(logs)
    }

    async fn download(&self, container: &str, path: &str) -> Result<Vec<u8>, EngineError> {
        let chunks: Vec<bytes::Bytes> = self
            .client
            .download_from_container(
                container,
                Some(DownloadFromContainerOptions {
                    path: path.to_string(),
                }),
            )
            .try_collect()
            .await
            .map_err(|e| api_error(&format!("download {}", path), e))?;

        Ok(chunks.concat())
    }

    async fn export(&self, container: &str) -> Result<Vec<u8>, EngineError> {
        let chunks: Vec<bytes::Bytes> = self
            .client
            .export_container(container)
            .try_collect()
            .await
            .map_err(|e| api_error("export container", e))?;

        Ok(chunks.concat())
    }

    async fn import(
        &self,
        rootfs: Vec<u8>,
        reference: &str,
        changes: &[String],
    ) -> Result<(), EngineError> {
        debug!(image = reference, changes = changes.len(), "Importing image");

        let mut stream = Box::pin(self.client.create_image(
            Some(import_options(reference, changes)),
            Some(bytes::Bytes::from(rootfs)),
            None,
        ));

        while let Some(info) = stream.next().await {
            let info = info.map_err(|e| api_error("import image", e))?;
            if let Some(message) = stream_error(&info) {
                return Err(EngineError::Api(format!("import image: {}", message)));
            }
        }

        Ok(())
    }

    async fn commit(&self, container: &str, reference: &str) -> Result<(), EngineError> {
        let (repository, tag) = split_reference(reference);
        self.client
            .commit_container(
                CommitContainerOptions {
                    container: container.to_string(),
                    repo: repository.to_string(),
                    tag: tag.to_string(),
                    pause: true,
                    ..Default::default()
                },
                Config::<String>::default(),
            )
            .await
            .map_err(|e| api_error("commit container", e))?;
        Ok(())
    }

    async fn tag(&self, source: &str, repository: &str, tag: &str) -> Result<(), EngineError> {
        self.client
            .tag_image(
                source,
                Some(TagImageOptions {
                    repo: repository.to_string(),
                    tag: tag.to_string(),
                }),
            )
            .await
            .map_err(|e| api_error("tag image", e))
    }

    async fn push(
        &self,
        repository: &str,
        tag: &str,
        auth: RegistryAuth<'_>,
    ) -> Result<Vec<String>, EngineError> {
        let credentials = DockerCredentials {
            username: Some(auth.username.to_string()),
            password: Some(auth.credential.expose().to_string()),
            serveraddress: Some(auth.server.to_string()),
            ..Default::default()
        };

        let mut stream = Box::pin(self.client.push_image(
            repository,
            Some(PushImageOptions {
                tag: tag.to_string(),
            }),
            Some(credentials),
        ));

        let mut statuses = Vec::new();
        while let Some(info) = stream.next().await {
            let info = info.map_err(|e| EngineError::Registry(e.to_string()))?;
            if let Some(message) = stream_error(&info) {
                return Err(EngineError::Registry(message));
            }
            if let Some(status) = status_line(&info) {
                trace!(repository, status = %status, "Push progress");
                statuses.push(status);
            }
        }

        Ok(statuses)
    }

    async fn stop(&self, container: &str, timeout_secs: i64) -> Result<(), EngineError> {
        self.client
            .stop_container(container, Some(StopContainerOptions { t: timeout_secs }))
            .await
            .map_err(|e| api_error("stop container", e))
    }

    async fn remove_container(&self, container: &str) -> Result<(), EngineError> {
        self.client
            .remove_container(
                container,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| api_error("remove container", e))
    }
}
