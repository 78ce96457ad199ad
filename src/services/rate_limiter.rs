//! Sliding-window rate limiting
//!
//! Login attempts are limited per username (5 failures per 15 minutes) and
//! per client address (10 requests per minute). Password reset requests share
//! the same mechanism keyed by email.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::hash::Hash;
use std::net::IpAddr;
use tokio::sync::RwLock;

/// Counts events per key inside a trailing time window.
pub struct SlidingWindow<K> {
    window: Duration,
    max: usize,
    hits: RwLock<HashMap<K, Vec<DateTime<Utc>>>>,
}

impl<K: Eq + Hash + Clone> SlidingWindow<K> {
    pub fn new(window: Duration, max: usize) -> Self {
        Self {
            window,
            max,
            hits: RwLock::new(HashMap::new()),
        }
    }

    pub async fn is_limited(&self, key: &K) -> bool {
        self.is_limited_at(key, Utc::now()).await
    }

    async fn is_limited_at(&self, key: &K, now: DateTime<Utc>) -> bool {
        let cutoff = now - self.window;
        let mut hits = self.hits.write().await;
        match hits.get_mut(key) {
            Some(times) => {
                times.retain(|time| *time > cutoff);
                times.len() >= self.max
            }
            None => false,
        }
    }

    pub async fn record(&self, key: K) {
        self.record_at(key, Utc::now()).await
    }

    async fn record_at(&self, key: K, now: DateTime<Utc>) {
        self.hits.write().await.entry(key).or_default().push(now);
    }

    pub async fn clear(&self, key: &K) {
        self.hits.write().await.remove(key);
    }

    /// Drop keys whose events all fell out of the window
    pub async fn cleanup(&self) -> usize {
        let cutoff = Utc::now() - self.window;
        let mut hits = self.hits.write().await;
        let before = hits.len();
        hits.retain(|_, times| {
            times.retain(|time| *time > cutoff);
            !times.is_empty()
        });
        before - hits.len()
    }

    pub async fn tracked_keys(&self) -> usize {
        self.hits.read().await.len()
    }
}

/// Login and password-reset throttling
pub struct LoginRateLimiter {
    usernames: SlidingWindow<String>,
    ips: SlidingWindow<IpAddr>,
    resets: SlidingWindow<String>,
}

impl LoginRateLimiter {
    pub fn new() -> Self {
        Self {
            usernames: SlidingWindow::new(Duration::minutes(15), 5),
            ips: SlidingWindow::new(Duration::minutes(1), 10),
            resets: SlidingWindow::new(Duration::hours(1), 3),
        }
    }

    pub async fn is_username_limited(&self, username: &str) -> bool {
        self.usernames.is_limited(&username.to_lowercase()).await
    }

    pub async fn record_failed_attempt(&self, username: &str) {
        self.usernames.record(username.to_lowercase()).await
    }

    /// Successful login forgets previous failures
    pub async fn clear_username_attempts(&self, username: &str) {
        self.usernames.clear(&username.to_lowercase()).await
    }

    pub async fn is_ip_limited(&self, ip: IpAddr) -> bool {
        self.ips.is_limited(&ip).await
    }

    pub async fn record_ip_request(&self, ip: IpAddr) {
        self.ips.record(ip).await
    }

    pub async fn is_reset_limited(&self, email: &str) -> bool {
        self.resets.is_limited(&email.to_lowercase()).await
    }

    pub async fn record_reset_request(&self, email: &str) {
        self.resets.record(email.to_lowercase()).await
    }

    pub async fn cleanup(&self) {
        let removed = self.usernames.cleanup().await + self.ips.cleanup().await + self.resets.cleanup().await;
        if removed > 0 {
            tracing::debug!("Rate limiter dropped {} stale entries", removed);
        }
    }
}

impl Default for LoginRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[tokio::test]
    async fn test_username_rate_limit() {
        let limiter = LoginRateLimiter::new();

        for _ in 0..4 {
            assert!(!limiter.is_username_limited("testuser").await);
            limiter.record_failed_attempt("testuser").await;
        }
        limiter.record_failed_attempt("testuser").await;
        assert!(limiter.is_username_limited("testuser").await);

        limiter.clear_username_attempts("testuser").await;
        assert!(!limiter.is_username_limited("testuser").await);
    }

    #[tokio::test]
    async fn test_ip_rate_limit() {
        let limiter = LoginRateLimiter::new();
        let ip = IpAddr::from_str("127.0.0.1").unwrap();

        for _ in 0..10 {
            assert!(!limiter.is_ip_limited(ip).await);
            limiter.record_ip_request(ip).await;
        }
        assert!(limiter.is_ip_limited(ip).await);
    }

    #[tokio::test]
    async fn test_case_insensitive_keys() {
        let limiter = LoginRateLimiter::new();

        for name in ["TestUser", "testuser", "TESTUSER", "testUser", "testuser"] {
            limiter.record_failed_attempt(name).await;
        }
        assert!(limiter.is_username_limited("TestUser").await);

        for _ in 0..3 {
            limiter.record_reset_request("Alice@Example.com").await;
        }
        assert!(limiter.is_reset_limited("alice@example.com").await);
    }

    #[tokio::test]
    async fn test_window_expiry_and_cleanup() {
        let window = SlidingWindow::new(Duration::minutes(1), 2);
        let old = Utc::now() - Duration::minutes(5);

        window.record_at("a", old).await;
        window.record_at("a", old).await;
        assert!(!window.is_limited(&"a").await);

        window.record_at("b", old).await;
        window.record("c").await;
        assert_eq!(window.cleanup().await, 2);
        assert_eq!(window.tracked_keys().await, 1);
    }
}
