//! In-memory engine for tests
//!
//! `MockEngine` keeps a tiny model of images, containers and volumes as maps
//! of absolute paths to bytes, so pipeline tests can assert on what ended up
//! in an image rather than only on which calls were made.

use super::{
    ContainerEngine, ContainerSpec, EngineError, ImageConfig, LogLine, LogStream,
    RegistryAuth,
};
use crate::source::archive::{read_archive, sha256_hex, ArchiveBuilder, ArchiveEntry, FILE_MODE};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

/// Every engine operation, in the order it was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    ImageExists(String),
    PullImage(String),
    InspectImage(String),
    EnsureVolume(String),
    CreateContainer(ContainerSpec),
    Upload {
        container: String,
        dest: String,
        paths: Vec<String>,
    },
    Start(String),
    Wait(String),
    Logs(String),
    Download {
        container: String,
        path: String,
    },
    Export(String),
    Import {
        reference: String,
        changes: Vec<String>,
    },
    Commit {
        container: String,
        reference: String,
    },
    Tag {
        source: String,
        repository: String,
        tag: String,
    },
    Push {
        repository: String,
        tag: String,
        server: String,
        username: String,
    },
    Stop(String),
    RemoveContainer(String),
}

/// What happens when a container with a given command is started.
#[derive(Debug, Clone, Default)]
pub struct CommandOutcome {
    pub exit_code: i64,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    /// Files written by the command, absolute paths.
    pub writes: Vec<(String, Vec<u8>)>,
}

impl CommandOutcome {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn failure(exit_code: i64, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stderr: vec![stderr.into()],
            ..Default::default()
        }
    }

    pub fn with_stdout(mut self, line: impl Into<String>) -> Self {
        self.stdout.push(line.into());
        self
    }

    pub fn writes_file(mut self, path: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        self.writes.push((path.into(), contents.into()));
        self
    }
}

#[derive(Debug, Clone, Default)]
struct MockImage {
    config: ImageConfig,
    files: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug, Clone)]
struct MockContainer {
    spec: ContainerSpec,
    files: BTreeMap<String, Vec<u8>>,
    exit_code: Option<i64>,
    logs: Vec<LogLine>,
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<EngineCall>,
    local: HashMap<String, MockImage>,
    remote: HashMap<String, MockImage>,
    containers: HashMap<String, MockContainer>,
    volumes: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
    commands: Vec<(Vec<String>, CommandOutcome)>,
    push_rejection: Option<String>,
    pushed: BTreeMap<String, String>,
    next_id: usize,
}

/// Scripted, recording [`ContainerEngine`].
#[derive(Debug, Default)]
pub struct MockEngine {
    state: Mutex<State>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// An image the engine can pull but does not have yet.
    pub fn with_remote_image(self, reference: &str, config: ImageConfig) -> Self {
        self.lock().remote.insert(
            reference.to_string(),
            MockImage {
                config,
                files: BTreeMap::new(),
            },
        );
        self
    }

    /// An image already present locally.
    pub fn with_local_image(self, reference: &str, config: ImageConfig) -> Self {
        self.lock().local.insert(
            reference.to_string(),
            MockImage {
                config,
                files: BTreeMap::new(),
            },
        );
        self
    }

    /// Scripts the outcome for containers whose cmd starts with `cmd`.
    pub fn on_command(self, cmd: &[&str], outcome: CommandOutcome) -> Self {
        self.lock()
            .commands
            .push((cmd.iter().map(|s| s.to_string()).collect(), outcome));
        self
    }

    /// Makes every push fail with `message`, as a registry would for a bad token.
    pub fn reject_push(self, message: &str) -> Self {
        self.lock().push_rejection = Some(message.to_string());
        self
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn has_image(&self, reference: &str) -> bool {
        self.lock().local.contains_key(reference)
    }

    pub fn image_config(&self, reference: &str) -> Option<ImageConfig> {
        self.lock().local.get(reference).map(|i| i.config.clone())
    }

    /// Files of a local image, keyed by absolute path.
    pub fn image_files(&self, reference: &str) -> Option<BTreeMap<String, Vec<u8>>> {
        self.lock().local.get(reference).map(|i| i.files.clone())
    }

    pub fn volumes(&self) -> Vec<String> {
        self.lock().volumes.keys().cloned().collect()
    }

    pub fn volume_files(&self, name: &str) -> Option<BTreeMap<String, Vec<u8>>> {
        self.lock().volumes.get(name).cloned()
    }

    /// Containers created and not yet removed.
    pub fn live_containers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().containers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// `repository:tag` → digest for every successful push.
    pub fn pushed(&self) -> BTreeMap<String, String> {
        self.lock().pushed.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn join_path(dest: &str, relative: &str) -> String {
    let dest = dest.trim_end_matches('/');
    format!("{}/{}", dest, relative.trim_start_matches('/'))
}

fn under(path: &str, dir: &str) -> bool {
    let dir = dir.trim_end_matches('/');
    path.starts_with(&format!("{}/", dir))
}

fn unquote(raw: &str) -> String {
    if raw.starts_with('"') {
        serde_json::from_str::<String>(raw).unwrap_or_else(|_| raw.to_string())
    } else {
        raw.to_string()
    }
}

/// Interprets the Dockerfile-style instructions accepted by `import`.
fn parse_changes(changes: &[String]) -> Result<ImageConfig, EngineError> {
    let mut config = ImageConfig::default();
    for change in changes {
        let (instruction, rest) = change
            .split_once(' ')
            .ok_or_else(|| EngineError::Api(format!("invalid change: {}", change)))?;
        let rest = rest.trim();
        let invalid = |e: serde_json::Error| EngineError::Api(format!("{}: {}", change, e));
        match instruction {
            "CMD" => config.cmd = serde_json::from_str(rest).map_err(invalid)?,
            "ENTRYPOINT" => config.entrypoint = serde_json::from_str(rest).map_err(invalid)?,
            "ENV" => {
                let (key, value) = rest
                    .split_once('=')
                    .ok_or_else(|| EngineError::Api(format!("invalid change: {}", change)))?;
                config.env.push(format!("{}={}", key, unquote(value)));
            }
            "LABEL" => {
                let (key, value) = rest
                    .split_once('=')
                    .ok_or_else(|| EngineError::Api(format!("invalid change: {}", change)))?;
                config.labels.insert(unquote(key), unquote(value));
            }
            "EXPOSE" => {
                for port in rest.split_whitespace() {
                    let port = if port.contains('/') {
                        port.to_string()
                    } else {
                        format!("{}/tcp", port)
                    };
                    config.exposed_ports.insert(port);
                }
            }
            "WORKDIR" => config.working_dir = Some(rest.to_string()),
            "USER" => config.user = Some(rest.to_string()),
            other => {
                return Err(EngineError::Api(format!(
                    "unsupported change instruction: {}",
                    other
                )))
            }
        }
    }
    Ok(config)
}

#[async_trait]
impl ContainerEngine for MockEngine {
    async fn image_exists(&self, reference: &str) -> Result<bool, EngineError> {
        let mut state = self.lock();
        state.calls.push(EngineCall::ImageExists(reference.to_string()));
        Ok(state.local.contains_key(reference))
    }

    async fn pull_image(&self, reference: &str) -> Result<(), EngineError> {
        let mut state = self.lock();
        state.calls.push(EngineCall::PullImage(reference.to_string()));
        let image = state
            .remote
            .get(reference)
            .cloned()
            .ok_or_else(|| EngineError::NoSuchImage(format!("{}: manifest unknown", reference)))?;
        state.local.insert(reference.to_string(), image);
        Ok(())
    }

    async fn inspect_image(&self, reference: &str) -> Result<ImageConfig, EngineError> {
        let mut state = self.lock();
        state.calls.push(EngineCall::InspectImage(reference.to_string()));
        state
            .local
            .get(reference)
            .map(|i| i.config.clone())
            .ok_or_else(|| EngineError::NoSuchImage(reference.to_string()))
    }

    async fn ensure_volume(&self, name: &str) -> Result<(), EngineError> {
        let mut state = self.lock();
        state.calls.push(EngineCall::EnsureVolume(name.to_string()));
        state.volumes.entry(name.to_string()).or_default();
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        let mut state = self.lock();
        state.calls.push(EngineCall::CreateContainer(spec.clone()));
        let image = state
            .local
            .get(&spec.image)
            .cloned()
            .ok_or_else(|| EngineError::NoSuchImage(spec.image.clone()))?;

        state.next_id += 1;
        let id = format!("mock-{}", state.next_id);
        state.containers.insert(
            id.clone(),
            MockContainer {
                spec: spec.clone(),
                files: image.files,
                exit_code: None,
                logs: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn upload(
        &self,
        container: &str,
        dest: &str,
        archive: Vec<u8>,
    ) -> Result<(), EngineError> {
        let entries =
            read_archive(&archive, None).map_err(|e| EngineError::Api(e.to_string()))?;
        let mut state = self.lock();
        state.calls.push(EngineCall::Upload {
            container: container.to_string(),
            dest: dest.to_string(),
            paths: entries.iter().map(|e| e.path().to_string()).collect(),
        });

        let target = state
            .containers
            .get_mut(container)
            .ok_or_else(|| EngineError::NotFound(container.to_string()))?;
        for entry in entries {
            if let ArchiveEntry::File { path, contents, .. } = entry {
                target.files.insert(join_path(dest, &path), contents);
            }
        }
        Ok(())
    }

    async fn start(&self, container: &str) -> Result<(), EngineError> {
        let mut state = self.lock();
        state.calls.push(EngineCall::Start(container.to_string()));

        let cmd = state
            .containers
            .get(container)
            .ok_or_else(|| EngineError::NotFound(container.to_string()))?
            .spec
            .cmd
            .clone();
        let outcome = state
            .commands
            .iter()
            .find(|(prefix, _)| cmd.starts_with(prefix))
            .map(|(_, outcome)| outcome.clone())
            .unwrap_or_default();

        let mut target = state
            .containers
            .get(container)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(container.to_string()))?;
        for (path, contents) in &outcome.writes {
            match target
                .spec
                .volumes
                .iter()
                .find(|m| under(path, &m.target))
            {
                Some(mount) => {
                    state
                        .volumes
                        .entry(mount.volume.clone())
                        .or_default()
                        .insert(path.clone(), contents.clone());
                }
                None => {
                    target.files.insert(path.clone(), contents.clone());
                }
            }
        }
        target.logs = outcome
            .stdout
            .iter()
            .cloned()
            .map(LogLine::Stdout)
            .chain(outcome.stderr.iter().cloned().map(LogLine::Stderr))
            .collect();
        target.exit_code = Some(outcome.exit_code);
        state.containers.insert(container.to_string(), target);
        Ok(())
    }

    async fn wait(&self, container: &str) -> Result<i64, EngineError> {
        let mut state = self.lock();
        state.calls.push(EngineCall::Wait(container.to_string()));
        let target = state
            .containers
            .get(container)
            .ok_or_else(|| EngineError::NotFound(container.to_string()))?;
        target
            .exit_code
            .ok_or_else(|| EngineError::Api(format!("container {} was never started", container)))
    }

    async fn logs(&self, container: &str) -> Result<Vec<LogLine>, EngineError> {
        let mut state = self.lock();
        state.calls.push(EngineCall::Logs(container.to_string()));
        state
            .containers
            .get(container)
            .map(|c| c.logs.clone())
            .ok_or_else(|| EngineError::NotFound(container.to_string()))
    }

    fn follow_logs(&self, container: &str) -> LogStream {
        let lines = self
            .lock()
            .containers
            .get(container)
            .map(|c| c.logs.clone())
            .unwrap_or_default();
        Box::pin(futures_util::stream::iter(lines.into_iter().map(Ok)))
    }

    async fn download(&self, container: &str, path: &str) -> Result<Vec<u8>, EngineError> {
        let mut state = self.lock();
        state.calls.push(EngineCall::Download {
            container: container.to_string(),
            path: path.to_string(),
        });
        let target = state
            .containers
            .get(container)
            .ok_or_else(|| EngineError::NotFound(container.to_string()))?;

        // Like the engine, entries are rooted at the basename of `path`.
        let base = path.trim_end_matches('/');
        let name = base.rsplit('/').next().unwrap_or(base);
        let mut builder = ArchiveBuilder::new();
        builder
            .add_dir(name)
            .map_err(|e| EngineError::Api(e.to_string()))?;
        let mut found = false;
        for (file, contents) in &target.files {
            if under(file, base) {
                found = true;
                let relative = &file[base.len() + 1..];
                builder
                    .add_file(&format!("{}/{}", name, relative), FILE_MODE, contents.clone())
                    .map_err(|e| EngineError::Api(e.to_string()))?;
            }
        }
        if !found {
            return Err(EngineError::NotFound(format!(
                "download {}: Could not find the file {} in container {}",
                path, path, container
            )));
        }
        builder.finish().map_err(|e| EngineError::Api(e.to_string()))
    }

    async fn export(&self, container: &str) -> Result<Vec<u8>, EngineError> {
        let mut state = self.lock();
        state.calls.push(EngineCall::Export(container.to_string()));
        let target = state
            .containers
            .get(container)
            .ok_or_else(|| EngineError::NotFound(container.to_string()))?;

        let mut builder = ArchiveBuilder::new();
        for (file, contents) in &target.files {
            builder
                .add_file(file, FILE_MODE, contents.clone())
                .map_err(|e| EngineError::Api(e.to_string()))?;
        }
        builder.finish().map_err(|e| EngineError::Api(e.to_string()))
    }

    async fn import(
        &self,
        rootfs: Vec<u8>,
        reference: &str,
        changes: &[String],
    ) -> Result<(), EngineError> {
        let entries = read_archive(&rootfs, None).map_err(|e| EngineError::Api(e.to_string()))?;
        let mut config = parse_changes(changes)?;
        config.id = format!("sha256:{}", sha256_hex(&rootfs));

        let mut state = self.lock();
        state.calls.push(EngineCall::Import {
            reference: reference.to_string(),
            changes: changes.to_vec(),
        });

        let files = entries
            .into_iter()
            .filter_map(|e| match e {
                ArchiveEntry::File { path, contents, .. } => Some((format!("/{}", path), contents)),
                // Links are not modelled; the mock filesystem holds file bytes only.
                ArchiveEntry::Directory { .. } | ArchiveEntry::Symlink { .. } => None,
            })
            .collect();
        state
            .local
            .insert(reference.to_string(), MockImage { config, files });
        Ok(())
    }

    async fn commit(&self, container: &str, reference: &str) -> Result<(), EngineError> {
        let mut state = self.lock();
        state.calls.push(EngineCall::Commit {
            container: container.to_string(),
            reference: reference.to_string(),
        });
        let target = state
            .containers
            .get(container)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(container.to_string()))?;
        let mut config = state
            .local
            .get(&target.spec.image)
            .map(|i| i.config.clone())
            .unwrap_or_default();
        config.id = format!("sha256:{}", sha256_hex(format!("{:?}", target.files).as_bytes()));

        // Volume contents are not part of the container filesystem.
        let files = target
            .files
            .into_iter()
            .filter(|(path, _)| !target.spec.volumes.iter().any(|m| under(path, &m.target)))
            .collect();
        state
            .local
            .insert(reference.to_string(), MockImage { config, files });
        Ok(())
    }

    async fn tag(&self, source: &str, repository: &str, tag: &str) -> Result<(), EngineError> {
        let mut state = self.lock();
        state.calls.push(EngineCall::Tag {
            source: source.to_string(),
            repository: repository.to_string(),
            tag: tag.to_string(),
        });
        let image = state
            .local
            .get(source)
            .cloned()
            .ok_or_else(|| EngineError::NoSuchImage(source.to_string()))?;
        state.local.insert(format!("{}:{}", repository, tag), image);
        Ok(())
    }

    async fn push(
        &self,
        repository: &str,
        tag: &str,
        auth: RegistryAuth<'_>,
    ) -> Result<Vec<String>, EngineError> {
        let mut state = self.lock();
        state.calls.push(EngineCall::Push {
            repository: repository.to_string(),
            tag: tag.to_string(),
            server: auth.server.to_string(),
            username: auth.username.to_string(),
        });

        if let Some(message) = &state.push_rejection {
            return Err(EngineError::Registry(message.clone()));
        }

        let reference = format!("{}:{}", repository, tag);
        let image = state
            .local
            .get(&reference)
            .cloned()
            .ok_or_else(|| EngineError::NoSuchImage(reference.clone()))?;
        let digest = format!(
            "sha256:{}",
            sha256_hex(format!("{:?}{:?}", image.config, image.files).as_bytes())
        );
        state.pushed.insert(reference, digest.clone());

        Ok(vec![
            format!("The push refers to repository [{}]", repository),
            "Pushed".to_string(),
            format!("{}: digest: {} size: 1234", tag, digest),
        ])
    }

    async fn stop(&self, container: &str, _timeout_secs: i64) -> Result<(), EngineError> {
        let mut state = self.lock();
        state.calls.push(EngineCall::Stop(container.to_string()));
        if state.containers.contains_key(container) {
            Ok(())
        } else {
            Err(EngineError::NotFound(container.to_string()))
        }
    }

    async fn remove_container(&self, container: &str) -> Result<(), EngineError> {
        let mut state = self.lock();
        state
            .calls
            .push(EngineCall::RemoveContainer(container.to_string()));
        state
            .containers
            .remove(container)
            .map(|_| ())
            .ok_or_else(|| EngineError::NotFound(container.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_parse_changes() {
        let changes = vec![
            r#"CMD ["caddy","run"]"#.to_string(),
            r#"ENV PATH="/usr/bin:/bin""#.to_string(),
            r#"LABEL org.opencontainers.image.source="https://example.com""#.to_string(),
            "EXPOSE 1313/tcp".to_string(),
            "WORKDIR /srv".to_string(),
        ];
        let config = parse_changes(&changes).unwrap();
        assert_eq!(config.cmd, vec!["caddy", "run"]);
        assert_eq!(config.env, vec!["PATH=/usr/bin:/bin"]);
        assert_eq!(
            config.labels.get("org.opencontainers.image.source"),
            Some(&"https://example.com".to_string())
        );
        assert_eq!(
            config.exposed_ports,
            BTreeSet::from(["1313/tcp".to_string()])
        );
        assert_eq!(config.working_dir, Some("/srv".to_string()));
    }

    #[test]
    fn test_parse_changes_rejects_unknown_instruction() {
        assert!(parse_changes(&["RUN rm -rf /".to_string()]).is_err());
    }

    #[tokio::test]
    async fn test_pull_unknown_image_fails() {
        let engine = MockEngine::new();
        let result = engine.pull_image("nope:1").await;
        assert!(matches!(result, Err(EngineError::NoSuchImage(_))));
    }

    #[tokio::test]
    async fn test_command_writes_land_in_volume_or_container() {
        let engine = MockEngine::new()
            .with_local_image("base", ImageConfig::default())
            .on_command(
                &["install"],
                CommandOutcome::success()
                    .writes_file("/cache/pkg.tgz", "cached")
                    .writes_file("/app/node_modules/a.js", "module"),
            );

        let spec = ContainerSpec {
            name: "c".to_string(),
            image: "base".to_string(),
            cmd: vec!["install".to_string()],
            volumes: vec![crate::engine::VolumeMount {
                volume: "cache-vol".to_string(),
                target: "/cache".to_string(),
            }],
            ..Default::default()
        };
        let id = engine.create_container(&spec).await.unwrap();
        engine.start(&id).await.unwrap();
        assert_eq!(engine.wait(&id).await.unwrap(), 0);
        engine.commit(&id, "committed:1").await.unwrap();

        let files = engine.image_files("committed:1").unwrap();
        assert!(files.contains_key("/app/node_modules/a.js"));
        assert!(!files.contains_key("/cache/pkg.tgz"));
        assert!(engine
            .volume_files("cache-vol")
            .unwrap()
            .contains_key("/cache/pkg.tgz"));
    }
}
