//! Progress handler trait and events

use std::fmt;
use std::time::Duration;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    BuildEnv,
    Build,
    Prod,
    Publish,
    Serve,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::BuildEnv => "build-env",
            Stage::Build => "build",
            Stage::Prod => "prod",
            Stage::Publish => "publish",
            Stage::Serve => "serve",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Events emitted while the pipeline runs
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Pipeline run started
    Started { project: String },

    StageStarted { stage: Stage },

    /// Stage finished; `reused` means a cached artifact was returned
    /// without running anything.
    StageCompleted {
        stage: Stage,
        duration: Duration,
        reused: bool,
    },

    StageFailed { stage: Stage, error: String },

    /// Pipeline finished successfully
    Completed { stages: usize, total_time: Duration },
}

/// Trait for handling progress events during a pipeline run
pub trait ProgressHandler: Send + Sync {
    /// Called when a progress event occurs
    fn on_progress(&self, event: &ProgressEvent);
}

/// No-op handler that ignores all events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHandler;

impl ProgressHandler for NoOpHandler {
    fn on_progress(&self, _event: &ProgressEvent) {
        // Intentionally empty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingHandler {
        count: Arc<AtomicUsize>,
    }

    impl ProgressHandler for CountingHandler {
        fn on_progress(&self, _event: &ProgressEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_noop_handler() {
        let handler = NoOpHandler;
        handler.on_progress(&ProgressEvent::Started {
            project: "/test".to_string(),
        });
    }

    #[test]
    fn test_progress_events() {
        let count = Arc::new(AtomicUsize::new(0));
        let handler = CountingHandler {
            count: count.clone(),
        };

        handler.on_progress(&ProgressEvent::StageStarted {
            stage: Stage::BuildEnv,
        });
        handler.on_progress(&ProgressEvent::StageCompleted {
            stage: Stage::BuildEnv,
            duration: Duration::from_millis(50),
            reused: false,
        });
        handler.on_progress(&ProgressEvent::Completed {
            stages: 1,
            total_time: Duration::from_secs(5),
        });

        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::BuildEnv.to_string(), "build-env");
        assert_eq!(Stage::Prod.to_string(), "prod");
    }
}
