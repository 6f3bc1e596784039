use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

pub const MAX_REQUESTS_PER_WINDOW: usize = 10;
pub const WINDOW_SECONDS: i64 = 60;

/// Sliding-window admission control, keyed by client IP.
///
/// Admits at most `max_requests` calls per key in any trailing window.
/// Expired timestamps are discarded on every check, so a rejected client
/// recovers as soon as its oldest admit ages past the window. Rejected
/// calls record nothing.
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    admits: Mutex<HashMap<String, Vec<DateTime<Utc>>>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window_seconds: i64) -> Self {
        Self {
            max_requests,
            window: Duration::seconds(window_seconds),
            admits: Mutex::new(HashMap::new()),
        }
    }

    pub async fn allow(&self, client_key: &str) -> bool {
        self.allow_at(client_key, Utc::now()).await
    }

    pub async fn allow_at(&self, client_key: &str, now: DateTime<Utc>) -> bool {
        let window_start = now - self.window;
        let mut admits = self.admits.lock().await;
        let timestamps = admits.entry(client_key.to_string()).or_default();
        timestamps.retain(|timestamp| *timestamp > window_start);

        if timestamps.len() >= self.max_requests {
            return false;
        }

        timestamps.push(now);
        true
    }

    /// Drops keys whose every admit has aged out of the window. Correctness
    /// does not depend on this; it bounds the map in long-running processes.
    pub async fn evict_idle(&self) {
        self.evict_idle_at(Utc::now()).await;
    }

    pub async fn evict_idle_at(&self, now: DateTime<Utc>) {
        let window_start = now - self.window;
        let mut admits = self.admits.lock().await;
        admits.retain(|_, timestamps| {
            timestamps.retain(|timestamp| *timestamp > window_start);
            !timestamps.is_empty()
        });
    }

    pub async fn tracked_keys(&self) -> usize {
        self.admits.lock().await.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(MAX_REQUESTS_PER_WINDOW, WINDOW_SECONDS)
    }
}
