//! Process-wide rate governor shared by every fetcher
//!
//! Call spacing comes from a single-cell GCRA limiter, so calls from all
//! workers land at least `min_interval` apart. A throttling signal from any
//! worker sets a shared pause that every caller waits out before its next
//! slot.

use governor::{clock::DefaultClock, Quota, RateLimiter};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

type DirectRateLimiter =
    RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, DefaultClock>;

/// Thread-safe call-rate ceiling, injected into each fetcher as `Arc<RateGovernor>`
pub struct RateGovernor {
    /// `None` when calls are not spaced at all
    limiter: Option<DirectRateLimiter>,
    paused_until: Mutex<Option<Instant>>,
    calls: AtomicU64,
    throttles: AtomicU64,
}

/// Counters observed by the governor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GovernorStats {
    pub calls: u64,
    pub throttles: u64,
}

impl RateGovernor {
    pub fn new(min_interval: Duration) -> Self {
        RateGovernor {
            limiter: Quota::with_period(min_interval).map(RateLimiter::direct),
            paused_until: Mutex::new(None),
            calls: AtomicU64::new(0),
            throttles: AtomicU64::new(0),
        }
    }

    /// A governor that never waits unless throttled
    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO)
    }

    fn pause_deadline(&self) -> Option<Instant> {
        let guard = self.paused_until.lock().unwrap_or_else(|e| e.into_inner());
        (*guard).filter(|at| *at > Instant::now())
    }

    /// Wait out any shared pause, then for the next call slot
    pub async fn acquire(&self) {
        while let Some(resume_at) = self.pause_deadline() {
            sleep_until(resume_at).await;
        }

        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Pause every caller for at least `pause` after a throttling signal
    pub fn throttle(&self, pause: Duration) {
        self.throttles.fetch_add(1, Ordering::Relaxed);
        let resume_at = Instant::now() + pause;
        let mut guard = self.paused_until.lock().unwrap_or_else(|e| e.into_inner());
        if (*guard).map_or(true, |current| resume_at > current) {
            *guard = Some(resume_at);
            debug!("Provider throttled, pausing all fetches for {:?}", pause);
        }
    }

    pub fn stats(&self) -> GovernorStats {
        GovernorStats {
            calls: self.calls.load(Ordering::Relaxed),
            throttles: self.throttles.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for RateGovernor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateGovernor")
            .field("spaced", &self.limiter.is_some())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    // The limiter runs on the wall clock, so spacing tests use real time
    #[tokio::test]
    async fn test_slots_are_spaced() {
        let governor = RateGovernor::new(Duration::from_millis(40));
        let start = std::time::Instant::now();

        governor.acquire().await;
        governor.acquire().await;
        governor.acquire().await;

        assert!(start.elapsed() >= Duration::from_millis(75));
        assert_eq!(governor.stats().calls, 3);
    }

    #[tokio::test]
    async fn test_shared_across_tasks() {
        let governor = Arc::new(RateGovernor::new(Duration::from_millis(30)));
        let start = std::time::Instant::now();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let g = governor.clone();
            handles.push(tokio::spawn(async move { g.acquire().await }));
        }
        for h in handles {
            h.await.unwrap();
        }

        // Four calls need three full intervals no matter which task made them
        assert!(start.elapsed() >= Duration::from_millis(85));
        assert_eq!(governor.stats().calls, 4);
    }

    #[tokio::test]
    async fn test_unlimited_does_not_wait() {
        let governor = RateGovernor::unlimited();
        let start = std::time::Instant::now();

        for _ in 0..100 {
            governor.acquire().await;
        }

        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(governor.stats().calls, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_delays_next_call() {
        let governor = RateGovernor::unlimited();
        let start = Instant::now();

        governor.throttle(Duration::from_secs(2));
        governor.acquire().await;

        assert!(Instant::now() - start >= Duration::from_secs(2));
        assert_eq!(governor.stats().throttles, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shorter_throttle_keeps_longer_pause() {
        let governor = Arc::new(RateGovernor::unlimited());
        let start = Instant::now();

        governor.throttle(Duration::from_secs(3));
        governor.throttle(Duration::from_millis(500));

        let g = governor.clone();
        tokio::spawn(async move { g.acquire().await }).await.unwrap();

        assert!(Instant::now() - start >= Duration::from_secs(3));
        assert_eq!(governor.stats().throttles, 2);
    }
}
