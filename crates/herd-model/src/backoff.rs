use serde::{Deserialize, Serialize};

/// Randomisation applied on top of the computed delay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JitterStrategy {
    /// Exact computed delay.
    #[default]
    None,
    /// Uniform in `[0, delay]`.
    Full,
}

/// Delay policy between attempts of a retried operation.
///
/// The delay of attempt `n` (0-based) is `first_ms * factor^n`, capped by `max_ms`.
/// Retrying stops when either `max_attempts` or `max_elapsed_ms` is exhausted; a policy without both retries forever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackoffStrategy {
    pub jitter: JitterStrategy,
    pub first_ms: u64,
    pub max_ms: u64,
    pub factor: f64,
    /// Total number of attempts, the first one included.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    /// Budget for the time spent sleeping between attempts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_elapsed_ms: Option<u64>,
}

impl BackoffStrategy {
    /// Same delay between every attempt.
    pub fn fixed(delay_ms: u64, max_attempts: u32) -> Self {
        Self {
            jitter: JitterStrategy::None,
            first_ms: delay_ms,
            max_ms: delay_ms,
            factor: 1.0,
            max_attempts: Some(max_attempts),
            max_elapsed_ms: None,
        }
    }

    /// Doubling delay starting at `first_ms`, capped by `max_ms`, bounded by `max_elapsed_ms` in total.
    pub fn exponential(first_ms: u64, max_ms: u64, max_elapsed_ms: u64) -> Self {
        Self {
            jitter: JitterStrategy::Full,
            first_ms,
            max_ms,
            factor: 2.0,
            max_attempts: None,
            max_elapsed_ms: Some(max_elapsed_ms),
        }
    }

    /// Delay before retry `attempt` (0-based) without jitter.
    pub fn base_delay_ms(&self, attempt: u32) -> u64 {
        let factor = self.factor.max(1.0);
        let raw = self.first_ms as f64 * factor.powi(attempt.min(64) as i32);
        if raw.is_finite() {
            (raw as u64).min(self.max_ms)
        } else {
            self.max_ms
        }
    }

    /// Whether another attempt may follow `attempts_done` attempts and `elapsed_ms` of waiting.
    pub fn allows(&self, attempts_done: u32, elapsed_ms: u64) -> bool {
        if self.max_attempts.is_some_and(|max| attempts_done >= max) {
            return false;
        }
        if self.max_elapsed_ms.is_some_and(|max| elapsed_ms >= max) {
            return false;
        }
        true
    }
}
