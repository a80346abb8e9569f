//! Retry backoff policies.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Backoff shape between attempts. After the k-th failure (k starting at 1)
/// the next attempt waits:
///
/// - `exponential`: `min(base * 2^(k-1), max)`
/// - `linear`: `min(base * k, max)`
/// - `fibonacci`: `min(base * fib(k+1), max)` with `fib(1) = fib(2) = 1`
///
/// plus uniform jitter in `[0, delay / 10]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    #[default]
    Exponential,
    Linear,
    Fibonacci,
}

impl FromStr for RetryPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exponential" => Ok(RetryPolicy::Exponential),
            "linear" => Ok(RetryPolicy::Linear),
            "fibonacci" => Ok(RetryPolicy::Fibonacci),
            other => Err(format!("unknown retry policy: {other}")),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following the `failures`-th failure.
    pub fn delay(&self, failures: u32, base: Duration, max: Duration) -> Duration {
        let failures = failures.max(1);
        let base_ms = base.as_millis() as u64;
        let multiplier = match self {
            RetryPolicy::Exponential => 1u64 << (failures - 1).min(32),
            RetryPolicy::Linear => u64::from(failures),
            RetryPolicy::Fibonacci => fib(u64::from(failures) + 1),
        };
        let delay_ms = base_ms.saturating_mul(multiplier);
        Duration::from_millis(delay_ms).min(max)
    }

    /// The delay with uniform jitter in `[0, delay / 10]` added.
    pub fn jittered(&self, failures: u32, base: Duration, max: Duration) -> Duration {
        let delay = self.delay(failures, base, max);
        let jitter_cap = delay.as_millis() as u64 / 10;
        if jitter_cap == 0 {
            return delay;
        }
        let mut rng = rand::thread_rng();
        delay + Duration::from_millis(rng.gen_range(0..=jitter_cap))
    }
}

fn fib(n: u64) -> u64 {
    let (mut a, mut b) = (0u64, 1u64);
    for _ in 0..n {
        let next = a.saturating_add(b);
        a = b;
        b = next;
    }
    a
}

// ============================================================================
// TESTS
// ============================================================================
