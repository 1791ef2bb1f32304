//! Packaging stage: the static site inside the web server image.

use super::cache::{production_key, short_key};
use super::container::{container_name, ensure_image, remove_quietly};
use super::static_build::StaticOutput;
use super::PipelineError;
use crate::config::SitepackConfig;
use crate::engine::{ContainerEngine, ContainerSpec, ImageConfig};
use crate::progress::Stage;
use crate::source::archive::{ArchiveBuilder, FILE_MODE};
use crate::source::InputFile;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

pub const CADDYFILE_PATH: &str = "/etc/caddy/Caddyfile";
pub const SITE_ROOT: &str = "/var/www/html";
pub const SOURCE_LABEL: &str = "org.opencontainers.image.source";

/// Local repository packaged images are tagged into.
pub const PROD_REPOSITORY: &str = "sitepack-prod";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackagedImage {
    /// Local image reference, `sitepack-prod:<key16>`
    pub image: String,
    pub id: String,
    pub exposed_ports: Vec<String>,
    /// Digest of the static output baked into the image
    pub site_digest: String,
    pub reused: bool,
}

/// Engine form of the single exposed port.
pub fn port_key(port: u16) -> String {
    format!("{}/tcp", port)
}

/// Config applied when importing the flattened filesystem.
///
/// Carries over the base image's runtime settings and labels, replaces its
/// exposed ports with `port` alone and sets the source label.
pub fn import_changes(base: &ImageConfig, port: u16, source_label: &str) -> Vec<String> {
    let mut changes = Vec::new();

    if !base.entrypoint.is_empty() {
        changes.push(format!("ENTRYPOINT {}", Value::from(base.entrypoint.clone())));
    }
    if !base.cmd.is_empty() {
        changes.push(format!("CMD {}", Value::from(base.cmd.clone())));
    }
    for var in &base.env {
        if let Some((key, value)) = var.split_once('=') {
            changes.push(format!("ENV {}={}", key, Value::from(value)));
        }
    }
    if let Some(dir) = base.working_dir.as_deref().filter(|d| !d.is_empty()) {
        changes.push(format!("WORKDIR {}", dir));
    }
    if let Some(user) = base.user.as_deref().filter(|u| !u.is_empty()) {
        changes.push(format!("USER {}", user));
    }

    let mut labels = base.labels.clone();
    labels.insert(SOURCE_LABEL.to_string(), source_label.to_string());
    for (key, value) in &labels {
        changes.push(format!("LABEL {}={}", key, Value::from(value.as_str())));
    }

    changes.push(format!("EXPOSE {}", port_key(port)));
    changes
}

pub async fn package<E>(
    engine: &E,
    config: &SitepackConfig,
    output: &StaticOutput,
    caddyfile: &InputFile,
) -> Result<PackagedImage, PipelineError>
where
    E: ContainerEngine + ?Sized,
{
    let key = production_key(
        &config.server_image,
        output.digest(),
        caddyfile,
        config.port,
        &config.source_label,
    );
    let image = format!("{}:{}", PROD_REPOSITORY, short_key(&key));

    if config.reuse_environment && engine.image_exists(&image).await? {
        let existing = engine.inspect_image(&image).await?;
        info!(image = %image, "Reusing packaged image");
        return verified(config, image, existing, output, true);
    }

    ensure_image(engine, &config.server_image).await?;
    let base = engine.inspect_image(&config.server_image).await?;
    let changes = import_changes(&base, config.port, &config.source_label);

    let (caddy_dir, caddy_name) = CADDYFILE_PATH
        .rsplit_once('/')
        .unwrap_or(("/etc/caddy", "Caddyfile"));
    let mut server_config = ArchiveBuilder::with_root(caddy_dir).map_err(PipelineError::archive)?;
    server_config
        .add_file(caddy_name, FILE_MODE, caddyfile.contents.clone())
        .map_err(PipelineError::archive)?;
    let server_config = server_config.finish().map_err(PipelineError::archive)?;
    let site = output.archive_at(SITE_ROOT)?;

    let spec = ContainerSpec {
        name: container_name(Stage::Prod),
        image: config.server_image.clone(),
        ..Default::default()
    };

    info!(
        base = %config.server_image,
        files = output.len(),
        port = config.port,
        "Packaging site"
    );

    let container = engine.create_container(&spec).await?;
    debug!(container = %container, name = %spec.name, "Created packaging container");

    let result = async {
        engine.upload(&container, "/", server_config).await?;
        engine.upload(&container, "/", site).await?;
        let rootfs = engine.export(&container).await?;
        Ok::<_, PipelineError>(rootfs)
    }
    .await;
    remove_quietly(engine, &container).await;
    let rootfs = result?;

    debug!(bytes = rootfs.len(), changes = ?changes, "Importing flattened image");
    engine.import(rootfs, &image, &changes).await?;

    let imported = engine.inspect_image(&image).await?;
    let packaged = verified(config, image, imported, output, false)?;
    info!(image = %packaged.image, "Packaged image ready");
    Ok(packaged)
}

fn verified(
    config: &SitepackConfig,
    image: String,
    inspected: ImageConfig,
    output: &StaticOutput,
    reused: bool,
) -> Result<PackagedImage, PipelineError> {
    let expected = port_key(config.port);
    let exposed_ports: Vec<String> = inspected.exposed_ports.into_iter().collect();
    if exposed_ports != [expected.clone()] {
        return Err(PipelineError::PortMismatch {
            image,
            expected,
            found: exposed_ports,
        });
    }

    Ok(PackagedImage {
        image,
        id: inspected.id,
        exposed_ports,
        site_digest: output.digest().to_string(),
        reused,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};

    fn caddy_config() -> ImageConfig {
        ImageConfig {
            id: "sha256:caddy".to_string(),
            cmd: vec![
                "caddy".to_string(),
                "run".to_string(),
                "--config".to_string(),
                "/etc/caddy/Caddyfile".to_string(),
            ],
            entrypoint: Vec::new(),
            env: vec!["XDG_DATA_HOME=/data".to_string()],
            working_dir: Some("/srv".to_string()),
            user: None,
            labels: BTreeMap::from([(
                "org.opencontainers.image.title".to_string(),
                "Caddy".to_string(),
            )]),
            exposed_ports: BTreeSet::from([
                "80/tcp".to_string(),
                "443/tcp".to_string(),
                "443/udp".to_string(),
                "2019/tcp".to_string(),
            ]),
        }
    }

    #[test]
    fn test_import_changes_expose_only_one_port() {
        let changes = import_changes(&caddy_config(), 1313, "https://example.com/blog");
        let exposes: Vec<&String> = changes.iter().filter(|c| c.starts_with("EXPOSE")).collect();
        assert_eq!(exposes, vec!["EXPOSE 1313/tcp"]);
    }

    #[test]
    fn test_import_changes_carry_runtime_config() {
        let changes = import_changes(&caddy_config(), 1313, "https://example.com/blog");
        assert!(changes.contains(&r#"CMD ["caddy","run","--config","/etc/caddy/Caddyfile"]"#.to_string()));
        assert!(changes.contains(&r#"ENV XDG_DATA_HOME="/data""#.to_string()));
        assert!(changes.contains(&"WORKDIR /srv".to_string()));
        assert!(changes.contains(&r#"LABEL org.opencontainers.image.title="Caddy""#.to_string()));
        assert!(changes.contains(
            &r#"LABEL org.opencontainers.image.source="https://example.com/blog""#.to_string()
        ));
        assert!(!changes.iter().any(|c| c.starts_with("ENTRYPOINT")));
        assert!(!changes.iter().any(|c| c.starts_with("USER")));
    }

    #[test]
    fn test_source_label_overrides_base_label() {
        let mut base = caddy_config();
        base.labels
            .insert(SOURCE_LABEL.to_string(), "https://github.com/caddyserver".to_string());
        let changes = import_changes(&base, 1313, "https://example.com/blog");
        let sources: Vec<&String> = changes
            .iter()
            .filter(|c| c.contains(SOURCE_LABEL))
            .collect();
        assert_eq!(sources.len(), 1);
        assert!(sources[0].ends_with(r#""https://example.com/blog""#));
    }

    #[test]
    fn test_port_key() {
        assert_eq!(port_key(1313), "1313/tcp");
    }
}
