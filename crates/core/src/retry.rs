use std::{future::Future, time::Duration};

use anyhow::Result;

/// Bounded exponential backoff shared by every retry loop in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first.
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that retries without sleeping.
    pub const fn immediate(attempts: u32) -> Self {
        Self { attempts, base_delay: Duration::ZERO, max_delay: Duration::ZERO, factor: 1.0 }
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.factor.powi(exponent);
        Duration::try_from_secs_f64(secs.min(self.max_delay.as_secs_f64())).unwrap_or(self.max_delay)
    }

    /// Run `op` until it succeeds or the attempt ceiling is reached, returning the last error.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.attempts => {
                    tracing::warn!("{what} failed after {attempt} attempts: {e:?}");
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.delay(attempt);
                    tracing::info!(
                        "{what} failed (attempt {}/{}), retrying in {}ms: {e:#}",
                        attempt,
                        self.attempts,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use anyhow::anyhow;

    use super::*;

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy {
            attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            factor: 2.0,
        };
        let cases = [(1, 100), (2, 200), (3, 350), (4, 350), (10, 350)];
        for (attempt, millis) in cases {
            assert_eq!(policy.delay(attempt), Duration::from_millis(millis), "attempt {attempt}");
        }
    }

    #[test]
    fn test_delay_never_panics_on_bad_factor() {
        let max_delay = Duration::from_secs(1);
        for factor in [-3.0, f64::NAN] {
            let policy = RetryPolicy { attempts: 3, base_delay: Duration::from_millis(100), max_delay, factor };
            for attempt in 1..=3 {
                assert!(policy.delay(attempt) <= max_delay, "factor {factor} attempt {attempt}");
            }
        }
    }

    #[tokio::test]
    async fn test_run_stops_at_ceiling() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = RetryPolicy::immediate(5)
            .run("always failing", |_| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(anyhow!("nope"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_run_returns_first_success() {
        let result = RetryPolicy::immediate(5)
            .run("flaky", |attempt| async move {
                if attempt < 3 { Err(anyhow!("attempt {attempt}")) } else { Ok(attempt) }
            })
            .await
            .unwrap();
        assert_eq!(result, 3);
    }
}
