use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitSettings {
    pub requests_per_second: u32,
    pub burst: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            requests_per_second: 1,
            burst: 1,
        }
    }
}

impl RateLimitSettings {
    fn quota(&self) -> Quota {
        let rps = NonZeroU32::new(self.requests_per_second.max(1)).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(self.burst.max(1)).unwrap_or(NonZeroU32::MIN);
        Quota::per_second(rps).allow_burst(burst)
    }
}

/// Token bucket gating every outbound request. Clones share one bucket, so all
/// workers draw from the same budget.
#[derive(Clone)]
pub struct RequestThrottle {
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl RequestThrottle {
    pub fn new(settings: RateLimitSettings) -> Self {
        let limiter = RateLimiter::direct(settings.quota());
        Self {
            limiter: Arc::new(limiter),
        }
    }

    /// Wait until a token is available and consume it.
    pub async fn wait(&self) {
        self.limiter.until_ready().await;
    }
}

#[cfg(test)]
mod tests {
    use super::{RateLimitSettings, RequestThrottle};
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn throttle_spaces_requests_after_burst() {
        let settings = RateLimitSettings {
            requests_per_second: 20,
            burst: 1,
        };
        let throttle = RequestThrottle::new(settings);

        // First call consumes the burst token immediately.
        throttle.wait().await;

        let start = Instant::now();
        throttle.wait().await;
        throttle.wait().await;
        let elapsed = start.elapsed();

        // Two more tokens at 20/s need roughly 100ms.
        assert!(
            elapsed >= Duration::from_millis(80),
            "expected wait of at least 80ms, but got {:?}",
            elapsed
        );
    }

    #[tokio::test]
    async fn clones_share_one_bucket() {
        let throttle = RequestThrottle::new(RateLimitSettings {
            requests_per_second: 10,
            burst: 1,
        });
        let other = throttle.clone();

        throttle.wait().await;
        let start = Instant::now();
        other.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(60));
    }
}
