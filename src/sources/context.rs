use crate::caching::CacheLayer;
use crate::config::source_registry::SourceConfig;
use crate::config::Settings;
use crate::fetch::{BulkFetcher, FetchEngine};
use crate::orchestrator::cancellation::CancellationToken;
use crate::orchestrator::pause::PauseGate;
use crate::progress::ProgressTracker;
use crate::sources::error::DriverError;
use std::sync::Arc;

/// Per-run context handed to a driver: the shared services plus this
/// source's config, cancellation token and pause gate. Drivers receive
/// everything through here; there are no process-global handles.
pub struct DriverContext {
    pub config: SourceConfig,
    pub settings: Arc<Settings>,
    pub engine: Arc<FetchEngine>,
    pub bulk: Arc<BulkFetcher>,
    pub cache: Arc<CacheLayer>,
    pub tracker: Arc<ProgressTracker>,
    pub cancel: CancellationToken,
    pub pause: PauseGate,
}

impl DriverContext {
    /// Worker pool size for per-gene drivers: one worker per request/sec,
    /// at least two.
    pub fn workers(&self) -> usize {
        (self.config.rate_limit_per_sec as usize).max(2)
    }

    /// Suspension-point check: honors pause, then cancellation.
    pub fn checkpoint(&self) -> Result<(), DriverError> {
        if !self.pause.wait_while_paused(&self.cancel) {
            return Err(DriverError::Cancelled);
        }
        if self.cancel.is_cancelled() {
            return Err(DriverError::Cancelled);
        }
        Ok(())
    }

    /// Forwards the configured API key from the environment, when present.
    pub fn api_key(&self) -> Option<String> {
        let var = self.config.api_key_env.as_deref()?;
        std::env::var(var).ok().filter(|k| !k.is_empty())
    }
}
