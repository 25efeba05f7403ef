use crate::fetch::error::FetchError;
use crate::orchestrator::cancellation::CancellationToken;
use log::debug;
use ratelimit::Ratelimiter;
use std::collections::HashMap;
use std::time::Duration;

/// One token bucket per source, refilled at the configured requests/sec
/// with burst capacity equal to the per-second rate.
pub struct RateLimiterRegistry {
    limiters: HashMap<String, Ratelimiter>,
}

impl RateLimiterRegistry {
    pub fn new() -> Self {
        RateLimiterRegistry {
            limiters: HashMap::new(),
        }
    }

    pub fn register(&mut self, source: &str, requests_per_sec: u64) {
        let rate = requests_per_sec.max(1);
        let limiter = Ratelimiter::builder(rate, Duration::from_secs(1))
            .max_tokens(rate)
            .initial_available(rate)
            .build()
            .expect("Building rate limiter failed");
        self.limiters.insert(source.to_string(), limiter);
    }

    /// Blocks until a token for `source` is available. Waits observe the
    /// cancellation token.
    pub fn acquire(&self, source: &str, token: &CancellationToken) -> Result<(), FetchError> {
        let limiter = self
            .limiters
            .get(source)
            .ok_or_else(|| FetchError::UnknownSource(source.to_string()))?;

        loop {
            if token.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            match limiter.try_wait() {
                Ok(()) => return Ok(()),
                Err(wait) => {
                    debug!("Waiting {wait:?} for {source} rate limit");
                    if !token.sleep(wait) {
                        return Err(FetchError::Cancelled);
                    }
                }
            }
        }
    }

    pub fn is_registered(&self, source: &str) -> bool {
        self.limiters.contains_key(source)
    }
}

impl Default for RateLimiterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
