//! Message flood detection.
//!
//! Counts messages per user inside a window that opens with the first
//! message. Crossing any rate limit mutes the user for a duration taken
//! from an escalating ladder.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::UserKey;

/// Anti-flood limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FloodConfig {
    pub max_messages_per_second: f64,
    pub max_messages_per_minute: u32,
    pub max_messages_per_five_minutes: u32,
    /// Window is reset after this many seconds.
    pub auto_reset_secs: u64,
    /// Mute durations for the 1st, 2nd, 3rd and later offences.
    pub mute_ladder_secs: Vec<u64>,
}

impl Default for FloodConfig {
    fn default() -> Self {
        Self {
            max_messages_per_second: 2.0,
            max_messages_per_minute: 15,
            max_messages_per_five_minutes: 50,
            auto_reset_secs: 300,
            mute_ladder_secs: vec![60, 300, 1800, 86_400],
        }
    }
}

impl FloodConfig {
    /// Mute duration for the given (1-based) offence number.
    #[must_use]
    pub fn mute_for_offence(&self, offence: u32) -> Duration {
        let idx = (offence.max(1) as usize - 1).min(self.mute_ladder_secs.len().saturating_sub(1));
        Duration::from_secs(self.mute_ladder_secs.get(idx).copied().unwrap_or(60))
    }
}

/// Which limit was crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloodReason {
    HighRate,
    MinuteLimit,
    FiveMinuteLimit,
}

impl FloodReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HighRate => "high message rate",
            Self::MinuteLimit => "too many messages in a minute",
            Self::FiveMinuteLimit => "too many messages in five minutes",
        }
    }
}

/// Result of a flood check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FloodCheck {
    Allow,
    /// The user is still serving an earlier mute.
    Blocked { remaining: Duration },
    /// The user just flooded and was muted.
    Flooding {
        reason: FloodReason,
        offences: u32,
        mute: Duration,
    },
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Anti-flood tracker.
#[derive(Debug, Default)]
pub struct AntiFlood {
    config: FloodConfig,
    windows: HashMap<UserKey, Window>,
    offences: HashMap<UserKey, u32>,
    muted_until: HashMap<UserKey, Instant>,
}

impl AntiFlood {
    #[must_use]
    pub fn new(config: FloodConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Records a message and decides whether the user is flooding.
    pub fn check(&mut self, key: UserKey, now: Instant) -> FloodCheck {
        if let Some(remaining) = self.mute_remaining(key, now) {
            return FloodCheck::Blocked { remaining };
        }

        let window = self.windows.entry(key).or_insert(Window {
            started: now,
            count: 0,
        });
        window.count += 1;
        let window = *window;

        let elapsed = now.saturating_duration_since(window.started);
        if let Some(reason) = self.crossed_limit(window.count, elapsed) {
            let offences = self.offences.entry(key).or_insert(0);
            *offences += 1;
            let offences = *offences;
            let mute = self.config.mute_for_offence(offences);

            self.muted_until.insert(key, now + mute);
            self.windows.remove(&key);
            warn!(
                "Flood by {}: {} (offence {}, muted {}s)",
                key,
                reason.as_str(),
                offences,
                mute.as_secs()
            );
            return FloodCheck::Flooding {
                reason,
                offences,
                mute,
            };
        }

        if elapsed > Duration::from_secs(self.config.auto_reset_secs) {
            self.windows.remove(&key);
        }
        FloodCheck::Allow
    }

    fn crossed_limit(&self, count: u32, elapsed: Duration) -> Option<FloodReason> {
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 && f64::from(count) / secs > self.config.max_messages_per_second {
            return Some(FloodReason::HighRate);
        }
        if elapsed < Duration::from_secs(60) && count > self.config.max_messages_per_minute {
            return Some(FloodReason::MinuteLimit);
        }
        if elapsed < Duration::from_secs(300) && count > self.config.max_messages_per_five_minutes
        {
            return Some(FloodReason::FiveMinuteLimit);
        }
        None
    }

    /// Remaining mute time, clearing expired mutes.
    pub fn mute_remaining(&mut self, key: UserKey, now: Instant) -> Option<Duration> {
        match self.muted_until.get(&key) {
            Some(until) if *until > now => Some(*until - now),
            Some(_) => {
                self.muted_until.remove(&key);
                None
            }
            None => None,
        }
    }

    /// Lifts a mute without touching the offence count.
    pub fn unmute(&mut self, key: UserKey) -> bool {
        self.muted_until.remove(&key).is_some()
    }

    /// Forgets everything about a user.
    pub fn reset(&mut self, key: UserKey) {
        self.windows.remove(&key);
        self.offences.remove(&key);
        self.muted_until.remove(&key);
    }

    /// Drops expired mutes and stale windows.
    pub fn expire(&mut self, now: Instant) {
        self.muted_until.retain(|_, until| *until > now);
        let reset_after = Duration::from_secs(self.config.auto_reset_secs);
        self.windows
            .retain(|_, w| now.saturating_duration_since(w.started) <= reset_after);
    }

    #[must_use]
    pub fn offences(&self, key: UserKey) -> u32 {
        self.offences.get(&key).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: UserKey = UserKey::new(1, -100);

    fn relaxed() -> FloodConfig {
        FloodConfig {
            max_messages_per_second: 100.0,
            max_messages_per_minute: 3,
            ..FloodConfig::default()
        }
    }

    #[test]
    fn test_first_message_allowed() {
        let mut flood = AntiFlood::new(FloodConfig::default());
        assert_eq!(flood.check(KEY, Instant::now()), FloodCheck::Allow);
    }

    #[test]
    fn test_high_rate_triggers_mute() {
        let mut flood = AntiFlood::new(FloodConfig::default());
        let start = Instant::now();
        assert_eq!(flood.check(KEY, start), FloodCheck::Allow);
        let result = flood.check(KEY, start + Duration::from_millis(400));
        assert_eq!(
            result,
            FloodCheck::Flooding {
                reason: FloodReason::HighRate,
                offences: 1,
                mute: Duration::from_secs(60),
            }
        );
    }

    #[test]
    fn test_minute_limit() {
        let mut flood = AntiFlood::new(relaxed());
        let start = Instant::now();
        for i in 0..3 {
            assert_eq!(flood.check(KEY, start + Duration::from_secs(i * 5)), FloodCheck::Allow);
        }
        let result = flood.check(KEY, start + Duration::from_secs(20));
        assert!(matches!(
            result,
            FloodCheck::Flooding {
                reason: FloodReason::MinuteLimit,
                ..
            }
        ));
    }

    #[test]
    fn test_muted_user_is_blocked_until_expiry() {
        let mut flood = AntiFlood::new(relaxed());
        let start = Instant::now();
        for i in 0..4 {
            flood.check(KEY, start + Duration::from_secs(i));
        }
        let blocked = flood.check(KEY, start + Duration::from_secs(10));
        assert!(matches!(blocked, FloodCheck::Blocked { .. }));

        let after = flood.check(KEY, start + Duration::from_secs(120));
        assert_eq!(after, FloodCheck::Allow);
    }

    #[test]
    fn test_mute_ladder_escalates() {
        let config = FloodConfig::default();
        assert_eq!(config.mute_for_offence(1), Duration::from_secs(60));
        assert_eq!(config.mute_for_offence(2), Duration::from_secs(300));
        assert_eq!(config.mute_for_offence(3), Duration::from_secs(1800));
        assert_eq!(config.mute_for_offence(9), Duration::from_secs(86_400));
    }

    #[test]
    fn test_reset_clears_offences() {
        let mut flood = AntiFlood::new(relaxed());
        let start = Instant::now();
        for i in 0..4 {
            flood.check(KEY, start + Duration::from_secs(i));
        }
        assert_eq!(flood.offences(KEY), 1);
        flood.reset(KEY);
        assert_eq!(flood.offences(KEY), 0);
        assert_eq!(flood.check(KEY, start + Duration::from_secs(5)), FloodCheck::Allow);
    }
}
