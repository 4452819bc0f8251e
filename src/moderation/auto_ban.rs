//! Automatic bans driven by accumulated violation points.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{UserKey, ViolationKind};

const DAY: Duration = Duration::from_secs(86_400);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoBanConfig {
    pub enabled: bool,
    /// Points per violation kind. Kinds not listed do not count towards bans.
    pub points: HashMap<ViolationKind, u32>,
    pub ban_threshold: u32,
    /// Violations inside 24 hours that trigger a ban regardless of points.
    pub max_violations_per_day: usize,
    pub instant_kinds: HashSet<ViolationKind>,
    /// Base ban duration per kind, in seconds.
    pub durations: HashMap<ViolationKind, u64>,
    pub persistent_secs: u64,
    pub multipliers: Vec<u64>,
    pub max_temp_secs: u64,
    /// Bans of a kind within 24 hours after which the next one is permanent.
    pub permanent_after: usize,
}

impl Default for AutoBanConfig {
    fn default() -> Self {
        use ViolationKind as V;
        Self {
            enabled: true,
            points: HashMap::from([
                (V::Spam, 5),
                (V::Flood, 3),
                (V::BadWord, 10),
                (V::MaliciousLinks, 15),
                (V::Scam, 20),
                (V::Advertisement, 8),
                (V::Harassment, 15),
            ]),
            ban_threshold: 30,
            max_violations_per_day: 5,
            instant_kinds: HashSet::from([V::Scam]),
            durations: HashMap::from([
                (V::Spam, 86_400),
                (V::Flood, 172_800),
                (V::BadWord, 259_200),
                (V::MaliciousLinks, 604_800),
                (V::Scam, 2_592_000),
                (V::Advertisement, 604_800),
                (V::Harassment, 2_592_000),
            ]),
            persistent_secs: 2_592_000,
            multipliers: vec![1, 3, 10, 30],
            max_temp_secs: 2_592_000,
            permanent_after: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanRule {
    Instant,
    Points,
    PersistentViolations,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BanDecision {
    pub kind: ViolationKind,
    pub rule: BanRule,
    /// `None` means permanent.
    pub duration: Option<Duration>,
}

#[derive(Debug, Clone, Copy)]
struct ViolationRecord {
    points: u32,
    at: Instant,
}

#[derive(Debug, Default)]
pub struct AutoBan {
    config: AutoBanConfig,
    violations: HashMap<UserKey, Vec<ViolationRecord>>,
    history: Vec<(UserKey, ViolationKind, Instant)>,
    /// `None` marks a permanent ban.
    banned_until: HashMap<UserKey, Option<Instant>>,
}

impl AutoBan {
    #[must_use]
    pub fn new(config: AutoBanConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Records a violation and bans the user when a rule fires.
    pub fn record(&mut self, key: UserKey, kind: ViolationKind, now: Instant) -> Option<BanDecision> {
        if !self.config.enabled {
            return None;
        }
        let points = *self.config.points.get(&kind)?;

        let records = self.violations.entry(key).or_default();
        records.retain(|r| now.saturating_duration_since(r.at) <= DAY);
        records.push(ViolationRecord { points, at: now });
        let total: u32 = records.iter().map(|r| r.points).sum();
        let count = records.len();

        let (rule, base) = if self.config.instant_kinds.contains(&kind) {
            (BanRule::Instant, self.base_duration(kind))
        } else if total >= self.config.ban_threshold {
            (BanRule::Points, self.base_duration(kind))
        } else if count >= self.config.max_violations_per_day {
            (
                BanRule::PersistentViolations,
                Duration::from_secs(self.config.persistent_secs),
            )
        } else {
            return None;
        };

        let prior = self
            .history
            .iter()
            .filter(|(k, v, at)| *k == key && *v == kind && now.saturating_duration_since(*at) <= DAY)
            .count();
        let duration = self.escalated(base, prior);

        self.history.push((key, kind, now));
        self.violations.remove(&key);
        self.ban(key, duration, now);
        warn!(
            "Auto-banned {} for {} ({:?}, {})",
            key,
            kind.as_str(),
            rule,
            duration.map_or_else(|| "permanent".to_owned(), |d| format!("{}s", d.as_secs()))
        );
        Some(BanDecision {
            kind,
            rule,
            duration,
        })
    }

    fn base_duration(&self, kind: ViolationKind) -> Duration {
        Duration::from_secs(self.config.durations.get(&kind).copied().unwrap_or(86_400))
    }

    fn escalated(&self, base: Duration, prior: usize) -> Option<Duration> {
        if prior >= self.config.permanent_after {
            return None;
        }
        let multiplier = self
            .config
            .multipliers
            .get(prior)
            .or_else(|| self.config.multipliers.last())
            .copied()
            .unwrap_or(1);
        let secs = base.as_secs().saturating_mul(multiplier).min(self.config.max_temp_secs);
        Some(Duration::from_secs(secs))
    }

    /// Bans a user; `None` bans permanently.
    pub fn ban(&mut self, key: UserKey, duration: Option<Duration>, now: Instant) {
        self.banned_until
            .insert(key, duration.and_then(|d| now.checked_add(d)));
    }

    pub fn is_banned(&mut self, key: UserKey, now: Instant) -> bool {
        match self.banned_until.get(&key) {
            Some(None) => true,
            Some(Some(until)) if *until > now => true,
            Some(Some(_)) => {
                self.banned_until.remove(&key);
                false
            }
            None => false,
        }
    }

    #[must_use]
    pub fn points(&self, key: UserKey, now: Instant) -> u32 {
        self.violations.get(&key).map_or(0, |records| {
            records
                .iter()
                .filter(|r| now.saturating_duration_since(r.at) <= DAY)
                .map(|r| r.points)
                .sum()
        })
    }

    pub fn lift(&mut self, key: UserKey) -> bool {
        let lifted = self.banned_until.remove(&key).is_some();
        if lifted {
            info!("Unbanned {}", key);
        }
        lifted
    }

    pub fn expire(&mut self, now: Instant) {
        self.banned_until
            .retain(|_, until| until.is_none_or(|at| at > now));
        for records in self.violations.values_mut() {
            records.retain(|r| now.saturating_duration_since(r.at) <= DAY);
        }
        self.violations.retain(|_, r| !r.is_empty());
        self.history
            .retain(|(_, _, at)| now.saturating_duration_since(*at) <= DAY);
    }
}
