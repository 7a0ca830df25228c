// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Sliding-window rate limiting.
//!
//! These limits are a first line of defense that spares the backend obvious
//! floods from one client. They are not a security boundary.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Attempt timestamps for one key inside a sliding window.
///
/// After [`trim`](Self::trim) every retained timestamp `t` satisfies
/// `now - window < t <= now`.
#[derive(Debug, Clone)]
pub struct RateWindow {
    attempts: VecDeque<Instant>,
    max_attempts: usize,
    window: Duration,
}

impl RateWindow {
    pub fn new(max_attempts: usize, window: Duration) -> Self {
        Self {
            attempts: VecDeque::with_capacity(max_attempts),
            max_attempts,
            window,
        }
    }

    /// Drop attempts that have aged out of the window.
    pub fn trim(&mut self, now: Instant) {
        while let Some(&oldest) = self.attempts.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.attempts.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn record(&mut self, now: Instant) {
        self.trim(now);
        self.attempts.push_back(now);
    }

    pub fn is_blocked(&mut self, now: Instant) -> bool {
        self.trim(now);
        self.attempts.len() >= self.max_attempts
    }

    /// Time until enough attempts age out to allow one more.
    pub fn retry_after(&mut self, now: Instant) -> Option<Duration> {
        if !self.is_blocked(now) {
            return None;
        }
        let excess = self.attempts.len().saturating_sub(self.max_attempts);
        match self.attempts.get(excess) {
            Some(&oldest) => Some((oldest + self.window).saturating_duration_since(now)),
            // Only reachable with a zero limit, which never frees a slot.
            None => Some(self.window),
        }
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    pub fn clear(&mut self) {
        self.attempts.clear();
    }
}

/// Per-identifier sliding-window limiter.
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    windows: DashMap<String, RateWindow>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: DashMap::new(),
        }
    }

    /// Record a request for `identifier` if it is within the limit.
    ///
    /// Returns `false` (and records nothing) when the window is full.
    pub fn allow(&self, identifier: &str) -> bool {
        self.allow_at(identifier, Instant::now())
    }

    pub fn allow_at(&self, identifier: &str, now: Instant) -> bool {
        let mut window = self
            .windows
            .entry(identifier.to_string())
            .or_insert_with(|| RateWindow::new(self.max_requests, self.window));

        if window.is_blocked(now) {
            tracing::debug!(identifier, "Rate limit reached");
            return false;
        }
        window.record(now);
        true
    }

    /// Time until `identifier` may make another request, if it is blocked.
    pub fn retry_after(&self, identifier: &str) -> Option<Duration> {
        self.windows
            .get_mut(identifier)
            .and_then(|mut window| window.retry_after(Instant::now()))
    }

    pub fn reset(&self, identifier: &str) {
        self.windows.remove(identifier);
    }

    /// Evict aged-out attempts and forget identifiers with none left.
    pub fn cleanup(&self) {
        self.cleanup_at(Instant::now());
    }

    pub fn cleanup_at(&self, now: Instant) {
        self.windows.retain(|_, window| {
            window.trim(now);
            !window.is_empty()
        });
    }

    /// Number of identifiers currently tracked.
    pub fn tracked_identifiers(&self) -> usize {
        self.windows.len()
    }

    /// Run [`cleanup`](Self::cleanup) every `interval` until `cancel` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        limiter.cleanup();
                        tracing::trace!(
                            tracked = limiter.tracked_identifiers(),
                            "Rate limiter sweep"
                        );
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_five_per_second() {
        let limiter = RateLimiter::new(5, Duration::from_millis(1000));
        let start = Instant::now();

        for i in 0..5 {
            assert!(limiter.allow_at("client", start + Duration::from_millis(i * 10)));
        }
        assert!(!limiter.allow_at("client", start + Duration::from_millis(100)));
        // Other identifiers are unaffected.
        assert!(limiter.allow_at("other", start + Duration::from_millis(100)));
        // The first attempt ages out at exactly one window.
        assert!(limiter.allow_at("client", start + Duration::from_millis(1000)));
    }

    #[test]
    fn test_blocked_attempts_are_not_recorded() {
        let limiter = RateLimiter::new(2, Duration::from_secs(10));
        let start = Instant::now();

        assert!(limiter.allow_at("k", start));
        assert!(limiter.allow_at("k", start + Duration::from_secs(1)));
        for s in 2..9 {
            assert!(!limiter.allow_at("k", start + Duration::from_secs(s)));
        }
        // Only the two allowed attempts count; the first expires at t=10.
        assert!(limiter.allow_at("k", start + Duration::from_secs(10)));
    }

    #[test]
    fn test_window_retry_after() {
        let start = Instant::now();
        let mut window = RateWindow::new(2, Duration::from_secs(60));
        window.record(start);
        window.record(start + Duration::from_secs(10));

        let now = start + Duration::from_secs(20);
        assert_eq!(window.retry_after(now), Some(Duration::from_secs(40)));

        window.trim(start + Duration::from_secs(60));
        assert_eq!(window.len(), 1);
        assert_eq!(window.retry_after(start + Duration::from_secs(60)), None);
    }

    #[test]
    fn test_zero_limit_blocks_without_panicking() {
        let limiter = RateLimiter::new(0, Duration::from_secs(1));
        assert!(!limiter.allow("k"));
        assert_eq!(limiter.retry_after("k"), Some(Duration::from_secs(1)));

        let start = Instant::now();
        let mut window = RateWindow::new(0, Duration::from_secs(60));
        window.record(start);
        assert_eq!(
            window.retry_after(start + Duration::from_secs(15)),
            Some(Duration::from_secs(60))
        );
    }

    #[test]
    fn test_cleanup_forgets_idle_identifiers() {
        let limiter = RateLimiter::new(3, Duration::from_secs(1));
        let start = Instant::now();
        limiter.allow_at("a", start);
        limiter.allow_at("b", start + Duration::from_millis(900));
        assert_eq!(limiter.tracked_identifiers(), 2);

        limiter.cleanup_at(start + Duration::from_millis(1500));
        assert_eq!(limiter.tracked_identifiers(), 1);

        limiter.reset("b");
        assert_eq!(limiter.tracked_identifiers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_stops_on_cancel() {
        let limiter = Arc::new(RateLimiter::new(1, Duration::from_secs(1)));
        assert!(limiter.allow("client"));

        let cancel = CancellationToken::new();
        let handle = limiter.spawn_sweeper(Duration::from_secs(5), cancel.clone());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(limiter.tracked_identifiers(), 0);

        cancel.cancel();
        handle.await.unwrap();
    }
}
