use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ClientError;

/// Bounded exponential delay curve: `initial_ms * factor^step`, clamped to
/// `max_ms`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backoff {
    /// Delay for step 0; also the floor of the curve.
    pub initial_ms: u64,
    /// Multiplier per step.
    pub factor: f64,
    /// Upper bound for computed delays.
    pub max_ms: u64,
}

impl Backoff {
    /// Creates a curve starting at `initial_ms` and capped at `max_ms`.
    pub fn new(initial_ms: u64, factor: f64, max_ms: u64) -> Self {
        Self {
            initial_ms,
            factor,
            max_ms,
        }
    }

    /// Fixed delay, mostly useful in tests.
    pub fn constant(delay_ms: u64) -> Self {
        Self::new(delay_ms, 1.0, delay_ms)
    }

    /// Delay for the given zero-based step.
    pub fn delay(&self, step: u32) -> Duration {
        let exp = self.factor.powi(step.min(i32::MAX as u32) as i32);
        let raw = self.initial_ms as f64 * exp;
        let ms = if raw.is_finite() && raw >= 0.0 {
            (raw.round() as u64).min(self.max_ms)
        } else {
            self.max_ms
        };
        Duration::from_millis(ms.max(self.initial_ms.min(self.max_ms)))
    }

    fn validate(&self, name: &str) -> Result<(), ClientError> {
        if self.initial_ms == 0 {
            return Err(ClientError::Config(format!(
                "{name}.initial_ms must be greater than 0"
            )));
        }
        if !self.factor.is_finite() || self.factor < 1.0 {
            return Err(ClientError::Config(format!(
                "{name}.factor must be a finite value >= 1.0"
            )));
        }
        if self.max_ms < self.initial_ms {
            return Err(ClientError::Config(format!(
                "{name}.max_ms must not be lower than initial_ms"
            )));
        }
        Ok(())
    }
}

/// 2^(1/5): the poll delay doubles every five empty polls.
const POLL_FACTOR: f64 = 1.148_698_354_997_035;

fn default_poll() -> Backoff {
    Backoff::new(500, POLL_FACTOR, 2_000)
}

fn default_retry() -> Backoff {
    Backoff::new(1_000, 2.0, 30_000)
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_chunk_size() -> usize {
    64 * 1024
}

const fn default_strip_framing() -> bool {
    true
}

/// Polling and retry settings used by [`LogReader`](crate::LogReader).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogPollPolicy {
    /// Wait between empty fetches while the job is still running.
    #[serde(default = "default_poll")]
    pub poll: Backoff,
    /// Wait between attempts after a transient fetch failure.
    #[serde(default = "default_retry")]
    pub retry: Backoff,
    /// Additional attempts after the first failed fetch.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Maximum bytes requested per fetch.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Drop the STX/ETX markers that frame remote logs.
    #[serde(default = "default_strip_framing")]
    pub strip_framing: bool,
}

impl Default for LogPollPolicy {
    fn default() -> Self {
        Self {
            poll: default_poll(),
            retry: default_retry(),
            max_retries: default_max_retries(),
            chunk_size: default_chunk_size(),
            strip_framing: default_strip_framing(),
        }
    }
}

impl LogPollPolicy {
    /// Sets the wait curve between empty fetches.
    pub fn poll(mut self, poll: Backoff) -> Self {
        self.poll = poll;
        self
    }

    /// Sets the wait curve between transient failures.
    pub fn retry(mut self, retry: Backoff) -> Self {
        self.retry = retry;
        self
    }

    /// Sets how many times a transient failure is retried.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the `limit` sent with each fetch.
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Enables or disables STX/ETX stripping.
    pub fn strip_framing(mut self, strip: bool) -> Self {
        self.strip_framing = strip;
        self
    }

    /// Whether another retry fits the budget.
    pub fn can_retry(&self, retries_done: u32) -> bool {
        retries_done < self.max_retries
    }

    /// Wait after `empty_polls` consecutive empty fetches.
    pub fn poll_delay(&self, empty_polls: u32) -> Duration {
        self.poll.delay(empty_polls)
    }

    /// Wait before the next retry.
    pub fn retry_delay(&self, retries_done: u32) -> Duration {
        self.retry.delay(retries_done)
    }

    /// Rejects zero delays, shrinking curves and a zero chunk size.
    pub fn validate(&self) -> Result<(), ClientError> {
        self.poll.validate("poll")?;
        self.retry.validate("retry")?;
        if self.chunk_size == 0 {
            return Err(ClientError::Config(
                "chunk_size must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_delay_grows_from_floor_to_cap() {
        let policy = LogPollPolicy::default();
        assert_eq!(policy.poll_delay(0), Duration::from_millis(500));
        assert_eq!(policy.poll_delay(5), Duration::from_millis(1_000));
        assert_eq!(policy.poll_delay(10), Duration::from_millis(2_000));
        assert_eq!(policy.poll_delay(500), Duration::from_millis(2_000));
        for step in 0..20 {
            assert!(policy.poll_delay(step) <= policy.poll_delay(step + 1));
        }
    }

    #[test]
    fn retry_delay_is_exponential_with_cap() {
        let policy = LogPollPolicy::default().retry(Backoff::new(100, 2.0, 250));
        assert_eq!(policy.retry_delay(0).as_millis(), 100);
        assert_eq!(policy.retry_delay(1).as_millis(), 200);
        assert_eq!(policy.retry_delay(2).as_millis(), 250);
    }

    #[test]
    fn retry_budget_is_bounded() {
        let policy = LogPollPolicy::default().max_retries(2);
        assert!(policy.can_retry(0));
        assert!(policy.can_retry(1));
        assert!(!policy.can_retry(2));
    }

    #[test]
    fn partial_policy_deserializes_with_defaults() {
        let policy: LogPollPolicy =
            serde_json::from_value(serde_json::json!({ "max_retries": 7 })).expect("policy");
        assert_eq!(policy.max_retries, 7);
        assert_eq!(policy.chunk_size, 64 * 1024);
        assert!(policy.strip_framing);
    }

    #[test]
    fn validate_rejects_shrinking_or_empty_settings() {
        assert!(LogPollPolicy::default().validate().is_ok());
        assert!(
            LogPollPolicy::default()
                .poll(Backoff::new(500, 0.5, 2_000))
                .validate()
                .is_err()
        );
        assert!(LogPollPolicy::default().chunk_size(0).validate().is_err());
        assert!(
            LogPollPolicy::default()
                .retry(Backoff::new(0, 2.0, 10))
                .validate()
                .is_err()
        );
    }
}
