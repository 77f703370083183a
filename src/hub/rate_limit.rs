use std::time::{Duration, Instant};

pub const DEFAULT_EPHEMERAL_INTERVAL: Duration = Duration::from_millis(500);

/// Minimum-interval gate for ephemeral events written by one session.
///
/// Owned by the session's outbound loop, so it needs no locking.
#[derive(Debug)]
pub struct EphemeralRateLimiter {
    min_interval: Duration,
    last_sent: Option<Instant>,
}

impl EphemeralRateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_sent: None,
        }
    }

    pub fn check(&mut self) -> bool {
        self.check_at(Instant::now())
    }

    /// Records a send at `now` and returns true if the interval has elapsed
    /// since the last allowed send. Denied events do not reset the window.
    pub fn check_at(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_sent {
            if now.saturating_duration_since(last) < self.min_interval {
                return false;
            }
        }
        self.last_sent = Some(now);
        true
    }
}

impl Default for EphemeralRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_EPHEMERAL_INTERVAL)
    }
}
