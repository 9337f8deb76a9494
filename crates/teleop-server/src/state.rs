use crate::dispatch::DispatchEngine;
use crate::registry::ConnectionRegistry;
use std::sync::Arc;
use teleop_core::action::ActionRepository;
use teleop_core::config::Config;
use teleop_core::motion::MotionRepository;
use teleop_core::recording::RecordingLog;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub engine: Arc<DispatchEngine>,
    pub actions: Arc<ActionRepository>,
    pub motions: Arc<MotionRepository>,
    pub recording: Arc<RecordingLog>,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        let actions = Arc::new(ActionRepository::new());
        let motions = Arc::new(MotionRepository::new());
        let recording = Arc::new(RecordingLog::new());
        let registry = Arc::new(ConnectionRegistry::new(
            config,
            actions.clone(),
            motions.clone(),
            recording.clone(),
        ));
        let engine = Arc::new(DispatchEngine::new(
            actions.clone(),
            motions.clone(),
            recording.clone(),
            config.override_window(),
        ));

        // Guard: only spawn the sweep when inside a Tokio runtime (skipped
        // in sync unit tests).
        if tokio::runtime::Handle::try_current().is_ok() {
            registry.start_idle_sweep();
        }

        Self {
            registry,
            engine,
            actions,
            motions,
            recording,
        }
    }
}
