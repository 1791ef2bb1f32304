//! Logging-based progress handler

use super::{ProgressEvent, ProgressHandler};
use tracing::{info, warn};

/// Handler that logs progress events using tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl ProgressHandler for LoggingHandler {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Started { project } => {
                info!(project = %project, "Starting pipeline");
            }
            ProgressEvent::StageStarted { stage } => {
                info!(stage = %stage, "Starting stage");
            }
            ProgressEvent::StageCompleted {
                stage,
                duration,
                reused,
            } => {
                if *reused {
                    info!(stage = %stage, "Stage reused cached result");
                } else {
                    info!(
                        stage = %stage,
                        duration_ms = duration.as_millis(),
                        "Stage complete"
                    );
                }
            }
            ProgressEvent::StageFailed { stage, error } => {
                warn!(stage = %stage, error = %error, "Stage failed");
            }
            ProgressEvent::Completed { stages, total_time } => {
                info!(
                    stages,
                    total_time_ms = total_time.as_millis(),
                    "Pipeline complete"
                );
            }
        }
    }
}
