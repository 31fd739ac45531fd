use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};

/// Rate limiter for preventing alert spam
///
/// Keeps a sliding window of recent sends per key and allows at most
/// `max_per_window` sends per key inside the window.
#[derive(Debug)]
pub struct RateLimiter {
    max_per_window: usize,
    window: Duration,
    recent: HashMap<String, VecDeque<DateTime<Utc>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        // One alert per glacier and type per day
        Self::new(1, Duration::hours(24))
    }
}

impl RateLimiter {
    pub fn new(max_per_window: usize, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            recent: HashMap::new(),
        }
    }

    /// Check whether `key` may send now
    pub fn can_send(&mut self, key: &str) -> bool {
        self.can_send_at(key, Utc::now())
    }

    pub fn can_send_at(&mut self, key: &str, now: DateTime<Utc>) -> bool {
        self.cleanup(key, now);
        self.recent.get(key).map_or(0, VecDeque::len) < self.max_per_window
    }

    /// Record a send for `key` at the current time
    pub fn record(&mut self, key: &str) {
        self.record_at(key, Utc::now());
    }

    /// Record a send at a specific time
    pub fn record_at(&mut self, key: &str, timestamp: DateTime<Utc>) {
        self.recent
            .entry(key.to_string())
            .or_default()
            .push_back(timestamp);
    }

    /// Check and record in one step; returns false when rate limited
    pub fn try_acquire(&mut self, key: &str) -> bool {
        let now = Utc::now();
        if self.can_send_at(key, now) {
            self.record_at(key, now);
            true
        } else {
            false
        }
    }

    /// Sends recorded for `key` in the current window
    pub fn current_count(&mut self, key: &str) -> usize {
        self.cleanup(key, Utc::now());
        self.recent.get(key).map_or(0, VecDeque::len)
    }

    /// Drop entries older than the window; forget keys with nothing left
    fn cleanup(&mut self, key: &str, now: DateTime<Utc>) {
        let cutoff = now - self.window;
        let empty = match self.recent.get_mut(key) {
            Some(times) => {
                // Entries may arrive out of order
                times.retain(|&time| time > cutoff);
                times.is_empty()
            }
            None => false,
        };
        if empty {
            self.recent.remove(key);
        }
    }
}
