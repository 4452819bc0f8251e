//! Outgoing message pacing.
//!
//! Telegram limits bots both globally and per chat. Every send waits for
//! the global interval and for the interval since the last send to the
//! same chat, and a flood wait pauses everything.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Minimum gap between messages to one chat.
pub const PER_CHAT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
struct SendLog {
    last_any: Option<Instant>,
    per_chat: HashMap<i64, Instant>,
    /// Nothing may be sent before this instant.
    blocked_until: Option<Instant>,
}

/// Rate limiter that enforces minimum intervals between sends.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    chat_interval: Duration,
    log: Mutex<SendLog>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(min_interval: Duration, chat_interval: Duration) -> Self {
        Self {
            min_interval,
            chat_interval,
            log: Mutex::new(SendLog::default()),
        }
    }

    #[must_use]
    pub fn from_millis(min_interval_ms: u64) -> Self {
        Self::new(Duration::from_millis(min_interval_ms), PER_CHAT_INTERVAL)
    }

    fn wait_needed(&self, log: &SendLog, chat_id: i64, now: Instant) -> Duration {
        let remaining = |since: Option<Instant>, interval: Duration| {
            since.map_or(Duration::ZERO, |at| interval.saturating_sub(now.saturating_duration_since(at)))
        };
        let blocked = log
            .blocked_until
            .map_or(Duration::ZERO, |until| until.saturating_duration_since(now));
        remaining(log.last_any, self.min_interval)
            .max(remaining(log.per_chat.get(&chat_id).copied(), self.chat_interval))
            .max(blocked)
    }

    /// Waits until a send to `chat_id` is allowed, then records it.
    ///
    /// Returns the duration waited (0 if no wait was needed).
    pub async fn wait_and_acquire(&self, chat_id: i64) -> Duration {
        let mut log = self.log.lock().await;

        let wait = self.wait_needed(&log, chat_id, Instant::now());
        if !wait.is_zero() {
            debug!("Rate limiter: waiting {:?} before sending to {}", wait, chat_id);
            tokio::time::sleep(wait).await;
        }

        let now = Instant::now();
        log.last_any = Some(now);
        log.per_chat.insert(chat_id, now);
        // Bound the map; entries older than the interval carry no information.
        if log.per_chat.len() > 1024 {
            let interval = self.chat_interval;
            log.per_chat.retain(|_, at| now.saturating_duration_since(*at) < interval);
        }
        wait
    }

    /// Returns the time remaining until a send to `chat_id` is allowed.
    pub async fn time_until_allowed(&self, chat_id: i64) -> Duration {
        let log = self.log.lock().await;
        self.wait_needed(&log, chat_id, Instant::now())
    }

    /// Blocks all sends for the flood wait Telegram asked for.
    pub async fn handle_flood_wait(&self, wait_seconds: u32) {
        warn!("Received flood wait from Telegram: {} seconds", wait_seconds);
        let mut log = self.log.lock().await;
        let until = Instant::now() + Duration::from_secs(u64::from(wait_seconds));
        log.blocked_until = Some(log.blocked_until.map_or(until, |b| b.max(until)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_send_is_immediate() {
        let limiter = RateLimiter::from_millis(1000);
        assert_eq!(limiter.time_until_allowed(1).await, Duration::ZERO);
        assert_eq!(limiter.wait_and_acquire(1).await, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_per_chat_interval() {
        let limiter = RateLimiter::new(Duration::ZERO, Duration::from_secs(60));
        limiter.wait_and_acquire(1).await;

        assert!(limiter.time_until_allowed(1).await > Duration::from_secs(59));
        assert_eq!(limiter.time_until_allowed(2).await, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_global_interval_waits() {
        let limiter = RateLimiter::new(Duration::from_millis(50), Duration::ZERO);
        limiter.wait_and_acquire(1).await;
        let waited = limiter.wait_and_acquire(2).await;
        assert!(waited > Duration::ZERO);
    }

    #[tokio::test]
    async fn test_flood_wait_blocks_all_chats() {
        let limiter = RateLimiter::from_millis(0);
        limiter.handle_flood_wait(30).await;
        assert!(limiter.time_until_allowed(7).await > Duration::from_secs(29));
    }
}
