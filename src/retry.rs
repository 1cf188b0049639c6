//! Reusable retry strategy for single HTTP attempts.
//!
//! An operation reports each failed attempt as an [`AttemptError`]. Rate-limit
//! responses wait a fixed pause (or the server's `Retry-After`, whichever is
//! longer) and leave the exponential backoff untouched; every other failure
//! waits `backoff_base * 2^n`, where `n` counts earlier transient failures.
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::debug;

#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("rate limited (retry-after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    #[error("http status {0}")]
    Status(u16),
    #[error("network: {0}")]
    Network(#[from] reqwest::Error),
    #[error("decode: {0}")]
    Decode(#[from] serde_json::Error),
}

impl AttemptError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, AttemptError::RateLimited { .. })
    }
}

#[derive(Debug)]
pub enum RetryOutcome<T> {
    Done(T),
    Exhausted { attempts: u32, last_error: AttemptError },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub rate_limit_pause: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff_base: Duration::from_secs(1),
            rate_limit_pause: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `transient_failures`-th (0-based) non rate-limit failure.
    pub fn backoff_delay(&self, transient_failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(transient_failures);
        self.backoff_base.saturating_mul(factor)
    }

    fn rate_limit_delay(&self, retry_after: Option<Duration>) -> Duration {
        match retry_after {
            Some(ra) if ra > self.rate_limit_pause => ra,
            _ => self.rate_limit_pause,
        }
    }

    /// Run `op` until it succeeds or the attempt budget is spent.
    /// `op` receives the 0-based attempt number.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut transient_failures: u32 = 0;
        let mut attempt: u32 = 0;
        loop {
            let err = match op(attempt).await {
                Ok(value) => return RetryOutcome::Done(value),
                Err(err) => err,
            };
            attempt += 1;
            if attempt >= max_attempts {
                return RetryOutcome::Exhausted {
                    attempts: attempt,
                    last_error: err,
                };
            }
            let delay = match &err {
                AttemptError::RateLimited { retry_after } => self.rate_limit_delay(*retry_after),
                _ => {
                    let d = self.backoff_delay(transient_failures);
                    transient_failures += 1;
                    d
                }
            };
            debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying after failure");
            sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn backoff_doubles_per_transient_failure() {
        let p = RetryPolicy::default();
        assert_eq!(p.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(p.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(p.backoff_delay(3), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_waits_the_long_pause_before_next_attempt() {
        let started = Instant::now();
        let seen: Arc<Mutex<Vec<Duration>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_c = seen.clone();
        let out = policy(2)
            .run(|attempt| {
                let seen = seen_c.clone();
                async move {
                    seen.lock().unwrap().push(started.elapsed());
                    if attempt == 0 {
                        Err(AttemptError::RateLimited { retry_after: None })
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;
        assert!(matches!(out, RetryOutcome::Done(1)));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[1] - seen[0] >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_does_not_advance_backoff_exponent() {
        let started = Instant::now();
        let seen: Arc<Mutex<Vec<Duration>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_c = seen.clone();
        let out = policy(4)
            .run(|attempt| {
                let seen = seen_c.clone();
                async move {
                    seen.lock().unwrap().push(started.elapsed());
                    match attempt {
                        0 => Err(AttemptError::RateLimited { retry_after: None }),
                        1 => Err(AttemptError::Status(503)),
                        2 => Err(AttemptError::Status(503)),
                        _ => Ok(()),
                    }
                }
            })
            .await;
        assert!(matches!(out, RetryOutcome::Done(())));
        let seen = seen.lock().unwrap();
        // 30s pause, then 1s (first transient), then 2s (second transient)
        let gaps: Vec<u64> = seen.windows(2).map(|w| (w[1] - w[0]).as_secs()).collect();
        assert_eq!(gaps, vec![30, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn longer_retry_after_header_wins() {
        let started = Instant::now();
        let last = Arc::new(Mutex::new(Duration::ZERO));
        let last_c = last.clone();
        let _ = policy(2)
            .run(|attempt| {
                let last = last_c.clone();
                async move {
                    *last.lock().unwrap() = started.elapsed();
                    if attempt == 0 {
                        Err::<(), _>(AttemptError::RateLimited {
                            retry_after: Some(Duration::from_secs(45)),
                        })
                    } else {
                        Ok(())
                    }
                }
            })
            .await;
        assert!(*last.lock().unwrap() >= Duration::from_secs(45));
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_is_reported_not_raised() {
        let calls = Arc::new(Mutex::new(0u32));
        let calls_c = calls.clone();
        let out: RetryOutcome<()> = policy(2)
            .run(|_| {
                let calls = calls_c.clone();
                async move {
                    *calls.lock().unwrap() += 1;
                    Err(AttemptError::Status(500))
                }
            })
            .await;
        match out {
            RetryOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 2);
                assert!(matches!(last_error, AttemptError::Status(500)));
            }
            RetryOutcome::Done(_) => panic!("expected exhaustion"),
        }
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_attempts_still_tries_once() {
        let out = policy(0).run(|_| async { Ok::<_, AttemptError>(7) }).await;
        assert!(matches!(out, RetryOutcome::Done(7)));
    }
}
