//! Publish stage: tag and push the packaged image.

use super::package::PackagedImage;
use super::PipelineError;
use crate::config::SitepackConfig;
use crate::engine::{ContainerEngine, EngineError, RegistryAuth};
use crate::secret::RegistryCredential;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedImage {
    pub repository: String,
    pub tag: String,
    /// `sha256:<hex>` as reported by the registry
    pub digest: String,
    /// Immutable reference, `repository@digest`
    pub reference: String,
}

/// Finds the manifest digest for `tag` in push status lines of the form
/// `<tag>: digest: sha256:<hex> size: <n>`.
pub fn parse_push_digest(lines: &[String], tag: &str) -> Option<String> {
    let digest_re = Regex::new(r"^(\S+): digest: (sha256:[0-9a-f]{64}) size: \d+")
        .expect("valid regex");
    lines.iter().find_map(|line| {
        let caps = digest_re.captures(line.trim())?;
        (&caps[1] == tag).then(|| caps[2].to_string())
    })
}

pub async fn publish<E>(
    engine: &E,
    config: &SitepackConfig,
    image: &PackagedImage,
    credential: &RegistryCredential,
) -> Result<PublishedImage, PipelineError>
where
    E: ContainerEngine + ?Sized,
{
    let repository = config.repository.as_str();
    let tag = config.tag.as_str();

    engine.tag(&image.image, repository, tag).await?;
    info!(
        image = %image.image,
        target = %format!("{}:{}", repository, tag),
        registry = %config.registry,
        user = %config.registry_user,
        "Pushing image"
    );

    let auth = RegistryAuth {
        server: &config.registry,
        username: &config.registry_user,
        credential,
    };
    let status = match engine.push(repository, tag, auth).await {
        Ok(status) => status,
        Err(EngineError::Registry(message)) | Err(EngineError::Api(message)) => {
            return Err(PipelineError::PublishFailed(message))
        }
        Err(e) => return Err(e.into()),
    };
    for line in &status {
        debug!("{}", line);
    }

    let digest = parse_push_digest(&status, tag).ok_or_else(|| {
        PipelineError::PublishFailed(format!(
            "registry did not report a digest for {}:{}",
            repository, tag
        ))
    })?;
    let reference = format!("{}@{}", repository, digest);

    info!(reference = %reference, "Published image");
    Ok(PublishedImage {
        repository: repository.to_string(),
        tag: tag.to_string(),
        digest,
        reference,
    })
}
