use std::sync::Arc;

use diarization_application::orchestrator::{Caches, EngineFactory};
use diarization_configuration::RunConfig;
use tokio::sync::Semaphore;

/// Shared, process-wide state handed to every handler. The three caches and
/// the admission semaphore outlive any single run; `engine_factory` is the
/// only way handlers reach the concrete `infra-*` adapters, keeping `http`
/// decoupled from them (§9 "Dynamic dispatch over pipeline mode").
#[derive(Clone)]
pub struct AppState {
    pub caches: Arc<Caches>,
    pub engine_factory: Arc<dyn EngineFactory>,
    pub config: Arc<RunConfig>,
    /// Bounds concurrent runs per vendor token class (§5: "N bounded by a
    /// semaphore; default to 1 per vendor token class").
    pub admission: Arc<Semaphore>,
}

impl AppState {
    pub fn new(caches: Arc<Caches>, engine_factory: Arc<dyn EngineFactory>, config: Arc<RunConfig>, max_concurrent_runs: usize) -> Self {
        Self { caches, engine_factory, config, admission: Arc::new(Semaphore::new(max_concurrent_runs.max(1))) }
    }
}
