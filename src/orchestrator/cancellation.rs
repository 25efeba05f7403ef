use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Cooperative cancellation token, observed at every suspension point:
/// HTTP calls, rate-limiter waits, store writes and cache reads. Cloning is
/// cheap and all clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration` in small slices, returning early with `false`
    /// when cancelled. Returns `true` when the full wait elapsed.
    pub fn sleep(&self, duration: Duration) -> bool {
        let slice = Duration::from_millis(50);
        let mut waited = Duration::ZERO;
        while waited < duration {
            if self.is_cancelled() {
                return false;
            }
            let step = slice.min(duration - waited);
            thread::sleep(step);
            waited += step;
        }
        !self.is_cancelled()
    }
}
