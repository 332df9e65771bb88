use std::collections::VecDeque;
use std::time::{Duration, Instant};

const WINDOW_SECS: u64 = 60;

/// Sliding-window message rate limiter for a single connection.
///
/// Tracks individual message timestamps rather than a fixed window that
/// resets at interval boundaries, so a burst straddling a window edge
/// cannot double the allowed rate. The window never holds more entries
/// than the configured rate, because messages over the limit are refused
/// before being recorded.
#[derive(Debug, Default)]
pub struct RateLimiter {
    window: VecDeque<Instant>,
}

impl RateLimiter {
    /// Creates an empty limiter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            window: VecDeque::with_capacity(32),
        }
    }

    fn expire_old_entries(&mut self, now: Instant) {
        let window = Duration::from_secs(WINDOW_SECS);
        while let Some(entry) = self.window.front() {
            if now.duration_since(*entry) >= window {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Checks the limit and records the message in a single pass.
    /// Returns `true` if the message is allowed, `false` if rate-limited.
    pub fn check_and_record(&mut self, msg_rate: u32) -> bool {
        let now = Instant::now();
        self.expire_old_entries(now);

        if self.window.len() >= msg_rate as usize {
            return false;
        }
        self.window.push_back(now);
        true
    }
}
