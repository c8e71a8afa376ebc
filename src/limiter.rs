//! Request spacing per endpoint group
//!
//! A [`RateLimiter`] enforces a minimum interval between outbound requests.
//! Waiters queue on a fair async mutex, so they are released one at a time in
//! arrival order. [`RateLimiters`] keeps one limiter per endpoint group (the
//! target host) so unrelated hosts never wait on each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use reqwest::Url;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use crate::clock::SharedClock;

/// Group count above which idle groups are dropped when a new one is added
pub const PRUNE_THRESHOLD: usize = 64;

/// Timestamp of the last request that passed through a limiter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateWindow {
    pub last_request_at: Option<Instant>,
}

/// Minimum-interval limiter for a single endpoint group
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    // tokio's mutex is fair: waiters acquire in FIFO order
    window: AsyncMutex<RateWindow>,
    clock: SharedClock,
}

impl RateLimiter {
    pub fn new(min_interval: Duration, clock: SharedClock) -> Self {
        Self {
            min_interval,
            window: AsyncMutex::new(RateWindow::default()),
            clock,
        }
    }

    /// Waits until the interval since the previous request has elapsed, then
    /// records now as the latest request
    ///
    /// The window lock is held across the wait so a second caller re-checks
    /// the window only after the first has stamped it.
    pub async fn acquire(&self) {
        let mut window = self.window.lock().await;

        if let Some(last) = window.last_request_at {
            let elapsed = self.clock.now().saturating_duration_since(last);
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!(wait_ms = wait.as_millis() as u64, "Rate limiter delaying request");
                tokio::time::sleep(wait).await;
            }
        }

        window.last_request_at = Some(self.clock.now());
    }

    /// Snapshot of the current window
    pub async fn window(&self) -> RateWindow {
        *self.window.lock().await
    }

    /// Whether a fresh limiter would behave the same: nobody holds or waits
    /// on the window and the last request is at least one interval old
    fn is_idle(&self) -> bool {
        let Ok(window) = self.window.try_lock() else {
            return false;
        };
        window.last_request_at.map_or(true, |last| {
            self.clock.now().saturating_duration_since(last) >= self.min_interval
        })
    }
}

/// One [`RateLimiter`] per endpoint group, created on first use
#[derive(Debug)]
pub struct RateLimiters {
    min_interval: Duration,
    clock: SharedClock,
    groups: Mutex<HashMap<String, Arc<RateLimiter>>>,
}

impl RateLimiters {
    pub fn new(min_interval: Duration, clock: SharedClock) -> Self {
        Self {
            min_interval,
            clock,
            groups: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the shared limiter for `group`
    ///
    /// Once more than [`PRUNE_THRESHOLD`] groups exist, adding another first
    /// drops the idle ones. A limiter still referenced elsewhere is never idle.
    pub fn for_group(&self, group: &str) -> Arc<RateLimiter> {
        let mut groups = self.groups.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(limiter) = groups.get(group) {
            return Arc::clone(limiter);
        }

        if groups.len() >= PRUNE_THRESHOLD {
            let before = groups.len();
            groups.retain(|_, limiter| Arc::strong_count(limiter) > 1 || !limiter.is_idle());
            debug!(
                pruned = before - groups.len(),
                remaining = groups.len(),
                "Pruned idle rate limit groups"
            );
        }

        let limiter = Arc::new(RateLimiter::new(self.min_interval, self.clock.clone()));
        groups.insert(group.to_string(), Arc::clone(&limiter));
        limiter
    }

    /// Returns the limiter for the host `url` targets
    pub fn for_url(&self, url: &Url) -> Arc<RateLimiter> {
        self.for_group(&endpoint_group(url))
    }

    /// Number of groups currently tracked
    pub fn group_count(&self) -> usize {
        self.groups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Endpoint group for a URL: its host, plus the port when one is explicit
pub fn endpoint_group(url: &Url) -> String {
    match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{}:{}", host, port),
        (Some(host), None) => host.to_string(),
        (None, _) => url.scheme().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{system_clock, ManualClock};
    use std::time::Instant as StdInstant;

    #[tokio::test]
    async fn test_first_acquire_does_not_wait() {
        let limiter = RateLimiter::new(Duration::from_secs(60), system_clock());

        let start = StdInstant::now();
        limiter.acquire().await;

        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(limiter.window().await.last_request_at.is_some());
    }

    #[tokio::test]
    async fn test_sequential_acquires_are_spaced() {
        let interval = Duration::from_millis(40);
        let limiter = RateLimiter::new(interval, system_clock());

        let start = StdInstant::now();
        for _ in 0..4 {
            limiter.acquire().await;
        }

        assert!(
            start.elapsed() >= interval * 3,
            "4 acquires should take at least 3 intervals, took {:?}",
            start.elapsed()
        );
    }

    #[tokio::test]
    async fn test_concurrent_acquires_are_serialized() {
        let interval = Duration::from_millis(30);
        let limiter = Arc::new(RateLimiter::new(interval, system_clock()));

        let start = StdInstant::now();
        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.acquire().await })
            })
            .collect();
        for result in futures::future::join_all(tasks).await {
            result.expect("acquire task panicked");
        }

        assert!(start.elapsed() >= interval * 3);
    }

    #[tokio::test]
    async fn test_window_records_clock_time() {
        let clock = ManualClock::new();
        let limiter = RateLimiter::new(Duration::ZERO, Arc::new(clock.clone()));

        limiter.acquire().await;
        let first = limiter.window().await.last_request_at.expect("window stamped");

        clock.advance(Duration::from_secs(5));
        limiter.acquire().await;
        let second = limiter.window().await.last_request_at.expect("window stamped");

        assert_eq!(second - first, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_groups_do_not_share_windows() {
        let limiters = RateLimiters::new(Duration::from_secs(60), system_clock());

        let start = StdInstant::now();
        limiters.for_group("api.example.com").acquire().await;
        limiters.for_group("images.example.com").acquire().await;

        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(limiters.group_count(), 2);
    }

    #[tokio::test]
    async fn test_waiters_released_in_arrival_order() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(50), system_clock()));
        let order = Arc::new(Mutex::new(Vec::new()));
        limiter.acquire().await;

        let mut tasks = Vec::new();
        for i in 0..5usize {
            let limiter = limiter.clone();
            let order = order.clone();
            tasks.push(tokio::spawn(async move {
                limiter.acquire().await;
                order.lock().expect("order lock").push(i);
            }));
            // Let this waiter queue before the next one arrives
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        for result in futures::future::join_all(tasks).await {
            result.expect("acquire task panicked");
        }

        assert_eq!(*order.lock().expect("order lock"), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_idle_groups_are_pruned() {
        let limiters = RateLimiters::new(Duration::ZERO, system_clock());
        for i in 0..(PRUNE_THRESHOLD * 3) {
            limiters.for_group(&format!("host-{}", i)).acquire().await;
        }
        assert!(limiters.group_count() <= PRUNE_THRESHOLD);
    }

    #[tokio::test]
    async fn test_busy_groups_survive_pruning() {
        let clock = ManualClock::new();
        let limiters = RateLimiters::new(Duration::from_secs(3600), Arc::new(clock.clone()));

        limiters.for_group("hot").acquire().await;
        let held = limiters.for_group("held");
        for i in 0..(PRUNE_THRESHOLD * 2) {
            limiters.for_group(&format!("cold-{}", i));
        }

        // Still inside its interval, so the stamp must not be forgotten
        let hot = limiters.for_group("hot");
        assert!(hot.window().await.last_request_at.is_some());
        assert!(Arc::ptr_eq(&held, &limiters.for_group("held")));
    }

    #[test]
    fn test_same_group_returns_same_limiter() {
        let limiters = RateLimiters::new(Duration::from_millis(100), system_clock());
        let a = limiters.for_group("api.example.com");
        let b = limiters.for_group("api.example.com");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_endpoint_group_uses_host_and_port() {
        let url = Url::parse("https://api.example.com/cards/random").expect("valid url");
        assert_eq!(endpoint_group(&url), "api.example.com");

        let url = Url::parse("http://127.0.0.1:8080/cards").expect("valid url");
        assert_eq!(endpoint_group(&url), "127.0.0.1:8080");
    }
}
