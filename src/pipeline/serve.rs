//! Runs the packaged image locally.

use super::container::{container_name, remove_quietly};
use super::package::PackagedImage;
use super::PipelineError;
use crate::config::SitepackConfig;
use crate::engine::{ContainerEngine, ContainerSpec, LogLine, PortPublish};
use crate::progress::Stage;
use futures_util::StreamExt;
use std::future::Future;
use tracing::{info, warn};

pub const SERVE_HOST: &str = "127.0.0.1";
const STOP_TIMEOUT_SECS: i64 = 10;

/// Serves `image` on `127.0.0.1:<host_port>` until `shutdown` resolves or
/// the server exits on its own. The container is always removed.
pub async fn serve<E, F>(
    engine: &E,
    config: &SitepackConfig,
    image: &PackagedImage,
    host_port: u16,
    shutdown: F,
) -> Result<(), PipelineError>
where
    E: ContainerEngine + ?Sized,
    F: Future<Output = ()> + Send,
{
    let spec = ContainerSpec {
        name: container_name(Stage::Serve),
        image: image.image.clone(),
        ports: vec![PortPublish {
            container_port: config.port,
            host_ip: SERVE_HOST.to_string(),
            host_port,
        }],
        ..Default::default()
    };

    let container = engine.create_container(&spec).await?;
    if let Err(e) = engine.start(&container).await {
        remove_quietly(engine, &container).await;
        return Err(e.into());
    }
    info!(
        image = %image.image,
        url = %format!("http://{}:{}", SERVE_HOST, host_port),
        "Serving site, press Ctrl-C to stop"
    );

    let mut logs = engine.follow_logs(&container);
    let forward = tokio::spawn(async move {
        while let Some(line) = logs.next().await {
            match line {
                Ok(LogLine::Stdout(text)) => info!(target: "sitepack::server", "{}", text),
                Ok(LogLine::Stderr(text)) => info!(target: "sitepack::server", "{}", text),
                Err(e) => {
                    warn!(error = %e, "Log stream ended");
                    break;
                }
            }
        }
    });

    let outcome = tokio::select! {
        biased;
        _ = shutdown => {
            info!("Stopping server");
            engine.stop(&container, STOP_TIMEOUT_SECS).await.map(|_| None)
        }
        exited = engine.wait(&container) => exited.map(Some),
    };

    forward.abort();

    let failed = match &outcome {
        Ok(Some(exit_code)) if *exit_code != 0 => Some(*exit_code),
        _ => None,
    };
    let output = match failed {
        Some(_) => engine
            .logs(&container)
            .await
            .map(|lines| {
                lines
                    .iter()
                    .map(|l| l.to_string())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default(),
        None => String::new(),
    };
    remove_quietly(engine, &container).await;

    outcome?;
    match failed {
        Some(exit_code) => Err(PipelineError::CommandFailed {
            stage: Stage::Serve,
            exit_code,
            output,
        }),
        None => Ok(()),
    }
}
