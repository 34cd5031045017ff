//! Retry admission policy

use crate::config::RelayerConfig;
use crate::store::StorePayload;

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Decade backoff: a record retried `n` times waits `base * 10^n`, capped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_retries: u32,
    /// Longest a single relay attempt may run before it counts as a retryable error
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RelayerConfig) -> Self {
        Self {
            base: Duration::from_millis(config.backoff_base_ms),
            cap: Duration::from_millis(config.backoff_max_ms),
            max_retries: config.max_retries,
            attempt_timeout: config.relay_timeout(),
        }
    }

    /// Time a record must rest after its last attempt. Never-tried records wait zero.
    pub fn wait_for(&self, retries: u32) -> Duration {
        if retries == 0 {
            return Duration::ZERO;
        }
        let base_ms = self.base.as_millis() as u64;
        10u64
            .checked_pow(retries)
            .and_then(|factor| base_ms.checked_mul(factor))
            .map(Duration::from_millis)
            .map_or(self.cap, |wait| wait.min(self.cap))
    }

    /// Whether the backoff window for this record has elapsed at `now`
    pub fn is_ready(&self, payload: &StorePayload, now: DateTime<Utc>) -> bool {
        let wait = self.wait_for(payload.retries);
        if wait.is_zero() {
            return true;
        }
        match (now - payload.timestamp).to_std() {
            Ok(elapsed) => elapsed >= wait,
            // timestamp in the future
            Err(_) => false,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(4 * 60 * 60),
            max_retries: 10,
            attempt_timeout: Duration::from_secs(600),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Status;

    #[test]
    fn test_wait_is_monotonic_and_capped() {
        let policy = RetryPolicy::default();
        let waits: Vec<_> = (0..=40).map(|n| policy.wait_for(n)).collect();

        assert!(waits.windows(2).all(|w| w[0] <= w[1]));
        assert!(waits.iter().all(|w| *w <= policy.cap));
        assert_eq!(waits[0], Duration::ZERO);
        assert_eq!(waits[1], Duration::from_secs(10));
        assert_eq!(waits[3], Duration::from_secs(1_000));
        // 100000s clipped to four hours
        assert_eq!(waits[5], Duration::from_secs(14_400));
        assert_eq!(waits[40], Duration::from_secs(14_400));
    }

    #[test]
    fn test_ready_after_window() {
        let policy = RetryPolicy::default();
        let then = Utc::now();
        let mut payload = StorePayload::new("aa".into(), then);
        assert!(policy.is_ready(&payload, then));

        payload.status = Status::Error;
        payload.retries = 1;
        assert!(!policy.is_ready(&payload, then + chrono::Duration::seconds(9)));
        assert!(policy.is_ready(&payload, then + chrono::Duration::seconds(10)));
        assert!(!policy.is_ready(&payload, then - chrono::Duration::seconds(60)));
    }
}
