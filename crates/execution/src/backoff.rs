// In crates/execution/src/backoff.rs

use crate::Result;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Exponential backoff with jitter for idempotent exchange reads.
///
/// Formula: min(max_delay, base * 2^attempt) +/- jitter_factor of that delay
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    max_delay: Duration,
    jitter_factor: f64,
    attempt: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
            jitter_factor: 0.2,
            attempt: 0,
        }
    }
}

impl ExponentialBackoff {
    /// `jitter_factor` is clamped to `0.0..=1.0`.
    pub fn new(base: Duration, max_delay: Duration, jitter_factor: f64) -> Self {
        Self {
            base,
            max_delay,
            jitter_factor: jitter_factor.clamp(0.0, 1.0),
            attempt: 0,
        }
    }

    /// Calculate the next delay and increment the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let exp_delay = self.base.saturating_mul(2u32.saturating_pow(self.attempt));
        let capped = exp_delay.min(self.max_delay);
        self.attempt = self.attempt.saturating_add(1);

        let spread = capped.as_secs_f64() * self.jitter_factor;
        if spread <= 0.0 {
            return capped;
        }
        let jitter = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_secs_f64((capped.as_secs_f64() + jitter).max(0.0))
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Runs `op` until it succeeds, fails with a non-transient error, or
/// `max_attempts` calls have been made.
///
/// Never wrap order placement in this: a timed-out order may still have filled.
pub async fn retry<T, F, Fut>(
    operation: &str,
    mut backoff: ExponentialBackoff,
    max_attempts: u32,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut calls = 0;
    loop {
        calls += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && calls < max_attempts => {
                let delay = backoff.next_delay();
                tracing::warn!(
                    operation,
                    attempt = calls,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient exchange error, retrying."
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn rate_limited() -> Error {
        Error::ApiClientError(api_client::Error::ApiError {
            code: -1003,
            msg: "Too many requests".into(),
        })
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(5), 0.0);
        let delays: Vec<_> = (0..5).map(|_| backoff.next_delay()).collect();
        assert_eq!(
            delays,
            vec![1, 2, 4, 5, 5].into_iter().map(Duration::from_secs).collect::<Vec<_>>()
        );
        assert_eq!(backoff.attempt(), 5);
    }

    #[test]
    fn jitter_spreads_delays_within_bounds() {
        let delays: Vec<Duration> = (0..32)
            .map(|_| ExponentialBackoff::new(Duration::from_secs(2), Duration::from_secs(10), 0.25).next_delay())
            .collect();
        assert!(delays.iter().all(|d| *d >= Duration::from_millis(1500) && *d <= Duration::from_millis(2500)));
        assert!(delays.iter().any(|d| *d != delays[0]));
    }

    #[test]
    fn jitter_never_exceeds_the_configured_fraction_of_the_cap() {
        let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(4), 5.0);
        for _ in 0..6 {
            assert!(backoff.next_delay() <= Duration::from_secs(8));
        }
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let backoff = ExponentialBackoff::new(Duration::from_millis(1), Duration::from_millis(2), 0.1);
        let value = retry("get_order_status", backoff, 5, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { if n < 2 { Err(rate_limited()) } else { Ok(7) } }
        })
        .await
        .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let calls = AtomicU32::new(0);
        let backoff = ExponentialBackoff::new(Duration::from_millis(1), Duration::from_millis(1), 0.1);
        let result: Result<()> = retry("get_order_status", backoff, 3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(rate_limited()) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry("get_order_status", ExponentialBackoff::default(), 5, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::UnknownOrder(1)) }
        })
        .await;
        assert!(matches!(result, Err(Error::UnknownOrder(1))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
