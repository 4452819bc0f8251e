//! Automatic mutes for repeated violations.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{UserKey, ViolationKind};

/// Offence counts reset once a user goes this long without an auto-mute.
const OFFENCE_MEMORY: Duration = Duration::from_secs(30 * 86_400);

/// Mute once `threshold` violations of a kind land inside `window_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuteRule {
    pub threshold: usize,
    pub window_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoMuteConfig {
    pub enabled: bool,
    pub rules: HashMap<ViolationKind, MuteRule>,
    /// Base mute duration per kind, in seconds.
    pub durations: HashMap<ViolationKind, u64>,
    /// Multipliers for the 1st, 2nd, 3rd and later mutes of a kind.
    pub multipliers: Vec<u64>,
    pub max_secs: u64,
}

impl Default for AutoMuteConfig {
    fn default() -> Self {
        use ViolationKind as V;
        let rule = |threshold, window_secs| MuteRule {
            threshold,
            window_secs,
        };
        Self {
            enabled: true,
            rules: HashMap::from([
                (V::Spam, rule(5, 60)),
                (V::Flood, rule(15, 60)),
                (V::BadWord, rule(3, 3600)),
                (V::Links, rule(5, 300)),
                (V::Caps, rule(10, 300)),
            ]),
            durations: HashMap::from([
                (V::Spam, 300),
                (V::Flood, 600),
                (V::BadWord, 900),
                (V::Links, 300),
                (V::Caps, 180),
                (V::Repetition, 240),
                (V::Advertisement, 1200),
                (V::Manual, 3600),
            ]),
            multipliers: vec![1, 2, 4, 10],
            max_secs: 7 * 86_400,
        }
    }
}

impl AutoMuteConfig {
    /// Base mute duration for a kind (five minutes when unset).
    #[must_use]
    pub fn base_duration(&self, kind: ViolationKind) -> Duration {
        Duration::from_secs(self.durations.get(&kind).copied().unwrap_or(300))
    }

    fn escalated(&self, kind: ViolationKind, prior_mutes: usize) -> Duration {
        let multiplier = self
            .multipliers
            .get(prior_mutes)
            .or_else(|| self.multipliers.last())
            .copied()
            .unwrap_or(1);
        let secs = self
            .base_duration(kind)
            .as_secs()
            .saturating_mul(multiplier)
            .min(self.max_secs);
        Duration::from_secs(secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MuteDecision {
    pub kind: ViolationKind,
    pub duration: Duration,
    /// 1-based count of mutes of this kind.
    pub offence: usize,
}

#[derive(Debug, Default)]
pub struct AutoMute {
    config: AutoMuteConfig,
    violations: HashMap<UserKey, Vec<(ViolationKind, Instant)>>,
    /// Prior auto-mutes per kind and when the last one happened.
    mute_counts: HashMap<(UserKey, ViolationKind), (usize, Instant)>,
    muted_until: HashMap<UserKey, Instant>,
}

impl AutoMute {
    #[must_use]
    pub fn new(config: AutoMuteConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn config(&self) -> &AutoMuteConfig {
        &self.config
    }

    /// Records a violation and mutes the user when its rule fires.
    pub fn record(&mut self, key: UserKey, kind: ViolationKind, now: Instant) -> Option<MuteDecision> {
        if !self.config.enabled {
            return None;
        }
        let rule = *self.config.rules.get(&kind)?;
        let window = Duration::from_secs(rule.window_secs);

        let history = self.violations.entry(key).or_default();
        history.push((kind, now));
        let recent = history
            .iter()
            .filter(|(k, at)| *k == kind && now.saturating_duration_since(*at) <= window)
            .count();
        if recent < rule.threshold {
            return None;
        }
        history.retain(|(k, _)| *k != kind);
        if history.is_empty() {
            self.violations.remove(&key);
        }

        let prior = self
            .mute_counts
            .get(&(key, kind))
            .filter(|(_, last)| now.saturating_duration_since(*last) <= OFFENCE_MEMORY)
            .map_or(0, |(count, _)| *count);
        let duration = self.config.escalated(kind, prior);
        self.mute_counts.insert((key, kind), (prior + 1, now));
        self.mute(key, duration, now);
        warn!(
            "Auto-muted {} for {}s after repeated {}",
            key,
            duration.as_secs(),
            kind.as_str()
        );
        Some(MuteDecision {
            kind,
            duration,
            offence: prior + 1,
        })
    }

    /// Mutes a user, extending but never shortening an existing mute.
    pub fn mute(&mut self, key: UserKey, duration: Duration, now: Instant) {
        let until = now + duration;
        let entry = self.muted_until.entry(key).or_insert(until);
        if *entry < until {
            *entry = until;
        }
    }

    pub fn is_muted(&mut self, key: UserKey, now: Instant) -> bool {
        match self.muted_until.get(&key) {
            Some(until) if *until > now => true,
            Some(_) => {
                self.muted_until.remove(&key);
                false
            }
            None => false,
        }
    }

    pub fn lift(&mut self, key: UserKey) -> bool {
        let lifted = self.muted_until.remove(&key).is_some();
        if lifted {
            info!("Unmuted {}", key);
        }
        lifted
    }

    pub fn expire(&mut self, now: Instant) {
        self.muted_until.retain(|_, until| *until > now);
        let longest = self
            .config
            .rules
            .values()
            .map(|r| Duration::from_secs(r.window_secs))
            .max()
            .unwrap_or_default();
        for history in self.violations.values_mut() {
            history.retain(|(_, at)| now.saturating_duration_since(*at) <= longest);
        }
        self.violations.retain(|_, h| !h.is_empty());
        self.mute_counts
            .retain(|_, (_, last)| now.saturating_duration_since(*last) <= OFFENCE_MEMORY);
    }

    /// Users with offence history or pending violations.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.violations.len() + self.mute_counts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: UserKey = UserKey::new(5, -5);

    #[test]
    fn test_threshold_inside_window_mutes() {
        let mut auto = AutoMute::new(AutoMuteConfig::default());
        let now = Instant::now();
        assert!(auto.record(KEY, ViolationKind::BadWord, now).is_none());
        assert!(auto.record(KEY, ViolationKind::BadWord, now).is_none());
        let decision = auto.record(KEY, ViolationKind::BadWord, now).unwrap();
        assert_eq!(decision.duration, Duration::from_secs(900));
        assert_eq!(decision.offence, 1);
        assert!(auto.is_muted(KEY, now));
    }

    #[test]
    fn test_old_violations_do_not_count() {
        let mut auto = AutoMute::new(AutoMuteConfig::default());
        let start = Instant::now();
        auto.record(KEY, ViolationKind::BadWord, start);
        auto.record(KEY, ViolationKind::BadWord, start);
        let later = start + Duration::from_secs(4000);
        assert!(auto.record(KEY, ViolationKind::BadWord, later).is_none());
    }

    #[test]
    fn test_repeat_mutes_escalate_and_cap() {
        let mut auto = AutoMute::new(AutoMuteConfig::default());
        let now = Instant::now();
        let mut durations = Vec::new();
        for _ in 0..5 {
            for _ in 0..2 {
                auto.record(KEY, ViolationKind::BadWord, now);
            }
            durations.push(auto.record(KEY, ViolationKind::BadWord, now).unwrap().duration.as_secs());
        }
        assert_eq!(durations, vec![900, 1800, 3600, 9000, 9000]);

        let config = AutoMuteConfig {
            max_secs: 1000,
            ..AutoMuteConfig::default()
        };
        assert_eq!(config.escalated(ViolationKind::Advertisement, 3), Duration::from_secs(1000));
    }

    #[test]
    fn test_kinds_without_rule_are_ignored() {
        let mut auto = AutoMute::new(AutoMuteConfig::default());
        for _ in 0..20 {
            assert!(auto.record(KEY, ViolationKind::Scam, Instant::now()).is_none());
        }
    }

    #[test]
    fn test_expire_forgets_old_offences() {
        let mut auto = AutoMute::new(AutoMuteConfig::default());
        let now = Instant::now();
        for user in 0..100 {
            let key = UserKey::new(user, -5);
            for _ in 0..3 {
                auto.record(key, ViolationKind::BadWord, now);
            }
        }
        assert_eq!(auto.tracked(), 100);

        let later = now + OFFENCE_MEMORY + Duration::from_secs(1);
        auto.expire(later);
        assert_eq!(auto.tracked(), 0);

        // A fresh offence after the memory window starts from the base duration.
        for _ in 0..2 {
            auto.record(KEY, ViolationKind::BadWord, later);
        }
        let decision = auto.record(KEY, ViolationKind::BadWord, later).unwrap();
        assert_eq!(decision.offence, 1);
    }

    #[test]
    fn test_lift_and_expire() {
        let mut auto = AutoMute::new(AutoMuteConfig::default());
        let now = Instant::now();
        auto.mute(KEY, Duration::from_secs(60), now);
        assert!(auto.lift(KEY));
        assert!(!auto.is_muted(KEY, now));

        auto.mute(KEY, Duration::from_secs(60), now);
        auto.expire(now + Duration::from_secs(61));
        assert!(!auto.is_muted(KEY, now));
    }
}
