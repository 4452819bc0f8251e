//! Point-based warning system with escalation.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{UserKey, ViolationKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningLevel {
    Info,
    Warning,
    Severe,
    Critical,
}

impl WarningLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Severe => "severe",
            Self::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarningConfig {
    pub info_points: u32,
    pub warning_points: u32,
    pub severe_points: u32,
    pub critical_points: u32,
    pub mute_after_points: u32,
    pub mute_secs: u64,
    pub ban_after_points: u32,
    pub ban_secs: u64,
    pub ttl_secs: u64,
}

impl Default for WarningConfig {
    fn default() -> Self {
        Self {
            info_points: 1,
            warning_points: 5,
            severe_points: 10,
            critical_points: 20,
            mute_after_points: 30,
            mute_secs: 300,
            ban_after_points: 50,
            ban_secs: 86_400,
            ttl_secs: 7 * 86_400,
        }
    }
}

impl WarningConfig {
    #[must_use]
    pub const fn points_for(&self, level: WarningLevel) -> u32 {
        match level {
            WarningLevel::Info => self.info_points,
            WarningLevel::Warning => self.warning_points,
            WarningLevel::Severe => self.severe_points,
            WarningLevel::Critical => self.critical_points,
        }
    }
}

/// Points and level issued automatically for a violation, if any.
#[must_use]
pub const fn auto_warn_rule(kind: ViolationKind) -> Option<(u32, WarningLevel)> {
    match kind {
        ViolationKind::Spam => Some((5, WarningLevel::Warning)),
        ViolationKind::BadWord => Some((10, WarningLevel::Severe)),
        ViolationKind::Links | ViolationKind::MaliciousLinks => Some((8, WarningLevel::Warning)),
        ViolationKind::Flood => Some((3, WarningLevel::Warning)),
        ViolationKind::Harassment => Some((20, WarningLevel::Critical)),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub id: String,
    pub key: UserKey,
    pub reason: String,
    pub level: WarningLevel,
    pub points: u32,
    pub issued_by: Option<i64>,
    pub issued_at: Instant,
    pub expires_at: Option<Instant>,
}

impl Warning {
    fn is_active(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now <= at)
    }
}

/// What the point total calls for after a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    None,
    Mute(Duration),
    Ban(Duration),
}

/// Parameters for a manually issued warning.
#[derive(Debug, Clone)]
pub struct WarningRequest {
    pub reason: String,
    pub level: WarningLevel,
    pub points: Option<u32>,
    pub issued_by: Option<i64>,
    /// `None` uses the configured ttl.
    pub ttl: Option<Duration>,
}

impl WarningRequest {
    #[must_use]
    pub fn new(reason: impl Into<String>, level: WarningLevel) -> Self {
        Self {
            reason: reason.into(),
            level,
            points: None,
            issued_by: None,
            ttl: None,
        }
    }

    #[must_use]
    pub const fn issued_by(mut self, admin: i64) -> Self {
        self.issued_by = Some(admin);
        self
    }
}

#[derive(Debug, Default)]
pub struct WarningSystem {
    config: WarningConfig,
    warnings: HashMap<UserKey, Vec<Warning>>,
    counter: u64,
}

impl WarningSystem {
    #[must_use]
    pub fn new(config: WarningConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn issue(&mut self, key: UserKey, request: WarningRequest, now: Instant) -> (Warning, Escalation) {
        self.counter += 1;
        let ttl = request
            .ttl
            .unwrap_or_else(|| Duration::from_secs(self.config.ttl_secs));
        let warning = Warning {
            id: format!("WRN_{}_{}", key.user_id, self.counter),
            key,
            points: request
                .points
                .unwrap_or_else(|| self.config.points_for(request.level)),
            reason: request.reason,
            level: request.level,
            issued_by: request.issued_by,
            issued_at: now,
            expires_at: now.checked_add(ttl),
        };
        self.warnings.entry(key).or_default().push(warning.clone());

        warn!(
            "Warning {} for {}: {} ({} points)",
            warning.id, key, warning.reason, warning.points
        );
        let escalation = self.escalation_for(self.points(key, now));
        (warning, escalation)
    }

    /// Issues the automatic warning for a violation kind.
    pub fn auto_warn(&mut self, key: UserKey, kind: ViolationKind, now: Instant) -> Option<(Warning, Escalation)> {
        let (points, level) = auto_warn_rule(kind)?;
        let request = WarningRequest {
            points: Some(points),
            ..WarningRequest::new(format!("Auto-warning: {}", kind.as_str()), level)
        };
        Some(self.issue(key, request, now))
    }

    fn escalation_for(&self, points: u32) -> Escalation {
        if points >= self.config.ban_after_points {
            Escalation::Ban(Duration::from_secs(self.config.ban_secs))
        } else if points >= self.config.mute_after_points {
            Escalation::Mute(Duration::from_secs(self.config.mute_secs))
        } else {
            Escalation::None
        }
    }

    /// Sum of points of unexpired warnings.
    #[must_use]
    pub fn points(&self, key: UserKey, now: Instant) -> u32 {
        self.active(key, now).iter().map(|w| w.points).sum()
    }

    #[must_use]
    pub fn active(&self, key: UserKey, now: Instant) -> Vec<&Warning> {
        self.warnings
            .get(&key)
            .map(|list| list.iter().filter(|w| w.is_active(now)).collect())
            .unwrap_or_default()
    }

    pub fn remove(&mut self, id: &str) -> bool {
        for list in self.warnings.values_mut() {
            if let Some(pos) = list.iter().position(|w| w.id == id) {
                list.remove(pos);
                info!("Removed warning {}", id);
                return true;
            }
        }
        false
    }

    /// Clears every warning of a user, returning how many were removed.
    pub fn clear(&mut self, key: UserKey) -> usize {
        self.warnings.remove(&key).map_or(0, |list| list.len())
    }

    pub fn expire(&mut self, now: Instant) -> usize {
        let mut expired = 0;
        for list in self.warnings.values_mut() {
            let before = list.len();
            list.retain(|w| w.is_active(now));
            expired += before - list.len();
        }
        self.warnings.retain(|_, list| !list.is_empty());
        if expired > 0 {
            info!("Removed {} expired warnings", expired);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: UserKey = UserKey::new(11, -42);

    #[test]
    fn test_issue_uses_level_points() {
        let mut system = WarningSystem::new(WarningConfig::default());
        let now = Instant::now();
        let (warning, escalation) =
            system.issue(KEY, WarningRequest::new("rude", WarningLevel::Severe).issued_by(1), now);
        assert_eq!(warning.id, "WRN_11_1");
        assert_eq!(warning.points, 10);
        assert_eq!(warning.issued_by, Some(1));
        assert_eq!(escalation, Escalation::None);
        assert_eq!(system.points(KEY, now), 10);
    }

    #[test]
    fn test_escalation_thresholds() {
        let mut system = WarningSystem::new(WarningConfig::default());
        let now = Instant::now();
        system.issue(KEY, WarningRequest::new("a", WarningLevel::Critical), now);
        let (_, mute) = system.issue(KEY, WarningRequest::new("b", WarningLevel::Severe), now);
        assert_eq!(mute, Escalation::Mute(Duration::from_secs(300)));
        let (_, ban) = system.issue(KEY, WarningRequest::new("c", WarningLevel::Critical), now);
        assert_eq!(ban, Escalation::Ban(Duration::from_secs(86_400)));
    }

    #[test]
    fn test_auto_warn_rules() {
        let mut system = WarningSystem::new(WarningConfig::default());
        let now = Instant::now();
        let (warning, _) = system.auto_warn(KEY, ViolationKind::Links, now).unwrap();
        assert_eq!(warning.points, 8);
        assert!(system.auto_warn(KEY, ViolationKind::Caps, now).is_none());
    }

    #[test]
    fn test_expiry_and_clear() {
        let mut system = WarningSystem::new(WarningConfig::default());
        let now = Instant::now();
        let short = WarningRequest {
            ttl: Some(Duration::from_secs(10)),
            ..WarningRequest::new("short", WarningLevel::Info)
        };
        system.issue(KEY, short, now);
        system.issue(KEY, WarningRequest::new("long", WarningLevel::Info), now);

        let later = now + Duration::from_secs(60);
        assert_eq!(system.points(KEY, later), 1);
        assert_eq!(system.expire(later), 1);
        assert_eq!(system.clear(KEY), 1);
        assert_eq!(system.points(KEY, later), 0);
    }

    #[test]
    fn test_remove_by_id() {
        let mut system = WarningSystem::new(WarningConfig::default());
        let (warning, _) = system.issue(KEY, WarningRequest::new("x", WarningLevel::Info), Instant::now());
        assert!(system.remove(&warning.id));
        assert!(!system.remove(&warning.id));
    }
}
