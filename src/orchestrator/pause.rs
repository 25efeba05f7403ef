use crate::orchestrator::cancellation::CancellationToken;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

/// Pause/resume gate shared between the orchestrator and a running
/// driver's workers. Workers park on the gate between genes.
#[derive(Clone, Default)]
pub struct PauseGate {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl PauseGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        *self.inner.0.lock() = true;
    }

    pub fn resume(&self) {
        let mut paused = self.inner.0.lock();
        *paused = false;
        self.inner.1.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Blocks while paused. Returns `false` when the wait ended because of
    /// cancellation rather than a resume.
    pub fn wait_while_paused(&self, token: &CancellationToken) -> bool {
        let mut paused = self.inner.0.lock();
        while *paused {
            if token.is_cancelled() {
                return false;
            }
            self.inner
                .1
                .wait_for(&mut paused, Duration::from_millis(100));
        }
        !token.is_cancelled()
    }
}
