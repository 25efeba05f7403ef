use rand::Rng;
use std::time::Duration;

pub const BASE_DELAY: Duration = Duration::from_secs(1);
pub const MAX_DELAY: Duration = Duration::from_secs(60);

/// Exponential backoff with jitter: `min(base * 2^attempt, cap) + jitter`
/// where jitter is uniform in `[0, base)`. `attempt` is zero-based.
pub fn backoff_delay(attempt: u32) -> Duration {
    let exponential = BASE_DELAY
        .checked_mul(2u32.saturating_pow(attempt))
        .unwrap_or(MAX_DELAY)
        .min(MAX_DELAY);
    let jitter_ms = rand::thread_rng().gen_range(0..BASE_DELAY.as_millis() as u64);
    exponential + Duration::from_millis(jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 1)]
    #[case(1, 2)]
    #[case(2, 4)]
    #[case(5, 32)]
    #[case(6, 60)]
    #[case(30, 60)]
    fn test_backoff_bounds(#[case] attempt: u32, #[case] expected_secs: u64) {
        let delay = backoff_delay(attempt);
        let floor = Duration::from_secs(expected_secs);
        assert!(delay >= floor, "attempt {attempt}: {delay:?} < {floor:?}");
        assert!(delay < floor + BASE_DELAY);
    }
}
