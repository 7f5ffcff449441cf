use backon::{BackoffBuilder, ExponentialBuilder};
use parking_lot::Mutex;
use std::{collections::HashMap, time::Duration};

/// First retry delay of a failing instance
pub const BASE_DELAY: Duration = Duration::from_millis(5);
/// Ceiling of the per-instance retry delay
pub const MAX_DELAY: Duration = Duration::from_secs(1000);

/// Per-instance exponential retry delays
///
/// Every failure of a key doubles its next delay, starting at [`BASE_DELAY`] and capped
/// at [`MAX_DELAY`]. A successful pass resets the key.
pub struct Retries {
    failures: Mutex<HashMap<String, u32>>,
    backoff: ExponentialBuilder,
}

impl Default for Retries {
    fn default() -> Self {
        Self {
            failures: Mutex::new(HashMap::new()),
            backoff: ExponentialBuilder::default()
                .with_min_delay(BASE_DELAY)
                .with_max_delay(MAX_DELAY)
                .with_factor(2.0)
                .without_max_times(),
        }
    }
}

impl Retries {
    /// Record a failure of `key` and return the delay before its next pass
    pub fn next_delay(&self, key: &str) -> Duration {
        let failures = {
            let mut failures = self.failures.lock();
            let count = failures.entry(key.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        self.delay_for(failures)
    }

    fn delay_for(&self, failures: u32) -> Duration {
        // 5ms * 2^18 already exceeds the ceiling
        let step = failures.saturating_sub(1).min(18) as usize;
        self.backoff.build().nth(step).unwrap_or(MAX_DELAY)
    }

    /// Failures of `key` since it last succeeded
    pub fn failures(&self, key: &str) -> u32 {
        self.failures.lock().get(key).copied().unwrap_or(0)
    }

    /// Forget the failures of `key`
    pub fn reset(&self, key: &str) {
        self.failures.lock().remove(key);
    }
}
