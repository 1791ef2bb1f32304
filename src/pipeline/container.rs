//! Helpers shared by the stages for one-shot containers.

use super::PipelineError;
use crate::engine::{ContainerEngine, LogLine};
use crate::progress::Stage;
use tracing::{debug, info, warn};

/// Unique container name for one stage run.
pub(crate) fn container_name(stage: Stage) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("sitepack-{}-{}", stage, &id[..12])
}

/// Pulls `reference` unless the engine already has it.
pub(crate) async fn ensure_image<E>(engine: &E, reference: &str) -> Result<(), PipelineError>
where
    E: ContainerEngine + ?Sized,
{
    if engine.image_exists(reference).await? {
        debug!(image = %reference, "Image present locally");
        return Ok(());
    }
    info!(image = %reference, "Pulling image");
    engine.pull_image(reference).await?;
    Ok(())
}

/// Starts a created container and waits for it, forwarding its output at
/// debug level. A non-zero exit becomes `CommandFailed`.
pub(crate) async fn run_to_completion<E>(
    engine: &E,
    stage: Stage,
    container: &str,
) -> Result<Vec<LogLine>, PipelineError>
where
    E: ContainerEngine + ?Sized,
{
    engine.start(container).await?;
    let exit_code = engine.wait(container).await?;
    let lines = engine.logs(container).await?;

    for line in &lines {
        match line {
            LogLine::Stdout(text) => debug!(stage = %stage, "{}", text),
            LogLine::Stderr(text) => debug!(stage = %stage, stream = "stderr", "{}", text),
        }
    }

    if exit_code != 0 {
        let output = lines
            .iter()
            .map(|l| l.to_string())
            .collect::<Vec<_>>()
            .join("\n");
        return Err(PipelineError::CommandFailed {
            stage,
            exit_code,
            output,
        });
    }
    Ok(lines)
}

/// Removes a container, logging instead of failing.
pub(crate) async fn remove_quietly<E>(engine: &E, container: &str)
where
    E: ContainerEngine + ?Sized,
{
    if let Err(e) = engine.remove_container(container).await {
        warn!(container = %container, error = %e, "Failed to remove container");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_name_is_unique() {
        let a = container_name(Stage::Build);
        let b = container_name(Stage::Build);
        assert!(a.starts_with("sitepack-build-"));
        assert_eq!(a.len(), "sitepack-build-".len() + 12);
        assert_ne!(a, b);
    }
}
