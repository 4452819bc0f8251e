//! Group moderation: flood, spam, links and bad words, with warnings and
//! automatic mutes and bans layered on top.
//!
//! Every engine keeps its own per-[`UserKey`] state and takes the current
//! [`Instant`] from the caller. [`Moderator`] runs them in order and folds
//! their outcomes into a single [`Verdict`].

pub mod auto_ban;
pub mod auto_mute;
pub mod badwords;
pub mod flood;
pub mod links;
pub mod spam;
pub mod warnings;

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::Features;

pub use auto_ban::{AutoBan, AutoBanConfig, BanDecision};
pub use auto_mute::{AutoMute, AutoMuteConfig, MuteDecision};
pub use badwords::{AntiBadWord, BadWordConfig, BadWordMatch};
pub use flood::{AntiFlood, FloodCheck, FloodConfig};
pub use links::{AntiLink, LinkCheck, LinkConfig, LinkViolationReason};
pub use spam::{AntiSpam, SpamCheck, SpamConfig, SpamReason};
pub use warnings::{Escalation, Warning, WarningConfig, WarningLevel, WarningRequest, WarningSystem};

/// A user within one chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserKey {
    pub user_id: i64,
    pub chat_id: i64,
}

impl UserKey {
    #[must_use]
    pub const fn new(user_id: i64, chat_id: i64) -> Self {
        Self { user_id, chat_id }
    }
}

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user_id, self.chat_id)
    }
}

/// Moderation actions, ordered by severity.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    #[default]
    Allow,
    Delete,
    Warn,
    Mute,
    Ban,
}

impl Action {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Delete => "delete",
            Self::Warn => "warn",
            Self::Mute => "mute",
            Self::Ban => "ban",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    Spam,
    Flood,
    BadWord,
    Links,
    MaliciousLinks,
    Caps,
    Repetition,
    Advertisement,
    Scam,
    Harassment,
    Manual,
}

impl ViolationKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Spam => "spam",
            Self::Flood => "flood",
            Self::BadWord => "bad_word",
            Self::Links => "links",
            Self::MaliciousLinks => "malicious_links",
            Self::Caps => "caps",
            Self::Repetition => "repetition",
            Self::Advertisement => "advertisement",
            Self::Scam => "scam",
            Self::Harassment => "harassment",
            Self::Manual => "manual",
        }
    }
}

/// Thresholds and word lists for every engine, as stored in `moderation.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModerationConfig {
    pub flood: FloodConfig,
    pub spam: SpamConfig,
    pub links: LinkConfig,
    pub badwords: BadWordConfig,
    pub warnings: WarningConfig,
    pub auto_mute: AutoMuteConfig,
    pub auto_ban: AutoBanConfig,
}

/// The decision for one message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Verdict {
    pub action: Action,
    /// Mute or ban length; `None` on a ban means permanent.
    pub duration: Option<Duration>,
    pub violations: Vec<ViolationKind>,
    pub reasons: Vec<String>,
    /// Warning issued along the way, if any.
    pub warning: Option<Warning>,
}

impl Verdict {
    #[must_use]
    pub fn allow() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_allowed(&self) -> bool {
        self.action == Action::Allow
    }

    /// Whether the message should be removed from the chat. Warnings
    /// leave it in place.
    #[must_use]
    pub fn removes_message(&self) -> bool {
        matches!(self.action, Action::Delete | Action::Mute | Action::Ban)
    }

    fn consider(&mut self, action: Action, duration: Option<Duration>) {
        let longer = match (self.duration, duration) {
            (_, None) => action == Action::Ban,
            (None, Some(_)) => self.action != Action::Ban,
            (Some(current), Some(new)) => new > current,
        };
        if action > self.action || (action == self.action && longer) {
            self.action = action;
            self.duration = duration;
        }
    }

    fn violation(&mut self, kind: ViolationKind, reason: impl Into<String>) {
        if !self.violations.contains(&kind) {
            self.violations.push(kind);
        }
        self.reasons.push(reason.into());
    }

    /// Chat notice announcing the verdict, `None` for silent deletions.
    #[must_use]
    pub fn notice(&self, user_name: &str) -> Option<String> {
        let reason = self.reasons.join(", ");
        match self.action {
            Action::Allow | Action::Delete => None,
            Action::Warn => Some(format!("⚠️ {user_name}, please follow the rules: {reason}")),
            Action::Mute => Some(format!(
                "🔇 {user_name} muted for {}: {reason}",
                crate::commands::format_duration(self.duration.unwrap_or_default())
            )),
            Action::Ban => Some(match self.duration {
                Some(d) => format!(
                    "🔨 {user_name} banned for {}: {reason}",
                    crate::commands::format_duration(d)
                ),
                None => format!("🔨 {user_name} banned: {reason}"),
            }),
        }
    }
}

/// Runs every enabled engine over incoming group messages.
#[derive(Debug)]
pub struct Moderator {
    features: Features,
    spam_mute: Duration,
    link_mute: Duration,
    flood: AntiFlood,
    spam: AntiSpam,
    links: AntiLink,
    badwords: AntiBadWord,
    warnings: WarningSystem,
    auto_mute: AutoMute,
    auto_ban: AutoBan,
}

impl Moderator {
    #[must_use]
    pub fn new(config: &ModerationConfig, features: Features) -> Self {
        Self {
            features,
            spam_mute: Duration::from_secs(config.spam.mute_secs),
            link_mute: config.auto_mute.base_duration(ViolationKind::Links),
            flood: AntiFlood::new(config.flood.clone()),
            spam: AntiSpam::new(config.spam.clone()),
            links: AntiLink::new(&config.links),
            badwords: AntiBadWord::new(&config.badwords),
            warnings: WarningSystem::new(config.warnings.clone()),
            auto_mute: AutoMute::new(config.auto_mute.clone()),
            auto_ban: AutoBan::new(config.auto_ban.clone()),
        }
    }

    /// Replaces word lists and thresholds while keeping warnings and
    /// active mutes and bans.
    pub fn reload(&mut self, config: &ModerationConfig) {
        self.spam_mute = Duration::from_secs(config.spam.mute_secs);
        self.link_mute = config.auto_mute.base_duration(ViolationKind::Links);
        self.flood = AntiFlood::new(config.flood.clone());
        self.spam = AntiSpam::new(config.spam.clone());
        self.links = AntiLink::new(&config.links);
        self.badwords = AntiBadWord::new(&config.badwords);
        info!("Moderation rules reloaded");
    }

    /// Judges one text message from a non-admin group member.
    pub fn inspect(&mut self, key: UserKey, text: &str, now: Instant) -> Verdict {
        let mut verdict = Verdict::allow();

        if self.auto_ban.is_banned(key, now) || self.auto_mute.is_muted(key, now) {
            verdict.consider(Action::Delete, None);
            verdict.reasons.push("restricted".to_owned());
            return verdict;
        }

        if self.features.anti_flood {
            match self.flood.check(key, now) {
                FloodCheck::Allow => {}
                FloodCheck::Blocked { .. } => verdict.consider(Action::Delete, None),
                FloodCheck::Flooding { reason, mute, .. } => {
                    verdict.violation(ViolationKind::Flood, reason.as_str());
                    verdict.consider(Action::Mute, Some(mute));
                }
            }
        }

        if self.features.anti_spam
            && let SpamCheck::Spam { reason, action } = self.spam.check(key, text, now)
        {
            let kind = match reason {
                SpamReason::ExcessiveCaps => Some(ViolationKind::Caps),
                SpamReason::ExcessiveRepetition => Some(ViolationKind::Repetition),
                SpamReason::UserMuted => None,
                _ => Some(ViolationKind::Spam),
            };
            if let Some(kind) = kind {
                verdict.violation(kind, reason.describe());
            }
            let duration = (action == Action::Mute).then_some(self.spam_mute);
            verdict.consider(action, duration);
        }

        if self.features.anti_links {
            match self.links.check(text, key.user_id, key.chat_id) {
                LinkCheck::NoLinks | LinkCheck::Allowed { .. } => {}
                LinkCheck::Blacklisted => {
                    verdict.violation(ViolationKind::MaliciousLinks, "blacklisted sender");
                    verdict.consider(Action::Ban, None);
                }
                LinkCheck::Violation { violations, action } => {
                    let malicious = violations
                        .iter()
                        .any(|v| v.reason == LinkViolationReason::BlockedDomain);
                    let kind = if malicious {
                        ViolationKind::MaliciousLinks
                    } else {
                        ViolationKind::Links
                    };
                    let domains: Vec<&str> = violations.iter().map(|v| v.domain.as_str()).collect();
                    verdict.violation(kind, format!("link to {}", domains.join(", ")));
                    let duration = (action == Action::Mute).then_some(self.link_mute);
                    verdict.consider(action, duration);
                }
            }
        }

        if self.features.anti_bad_words {
            let matches = self.badwords.check(text, key);
            if let Some(worst) = matches.iter().max_by_key(|m| (m.action, m.severity)) {
                let kind = if worst.category == "scam" {
                    ViolationKind::Scam
                } else {
                    ViolationKind::BadWord
                };
                verdict.violation(kind, format!("forbidden word ({})", worst.category));
                let duration = match worst.action {
                    Action::Mute => Some(self.auto_mute.config().base_duration(ViolationKind::BadWord)),
                    _ => None,
                };
                verdict.consider(worst.action, duration);
            }
        }

        for kind in verdict.violations.clone() {
            self.escalate(key, kind, now, &mut verdict);
        }

        self.enforce(key, &verdict, now);
        if !verdict.is_allowed() {
            debug!("Verdict for {}: {:?}", key, verdict.action);
        }
        verdict
    }

    fn escalate(&mut self, key: UserKey, kind: ViolationKind, now: Instant, verdict: &mut Verdict) {
        if let Some((warning, escalation)) = self.warnings.auto_warn(key, kind, now) {
            match escalation {
                Escalation::None => {}
                Escalation::Mute(d) => verdict.consider(Action::Mute, Some(d)),
                Escalation::Ban(d) => verdict.consider(Action::Ban, Some(d)),
            }
            verdict.warning = Some(warning);
        }
        if let Some(decision) = self.auto_mute.record(key, kind, now) {
            verdict.consider(Action::Mute, Some(decision.duration));
        }
        if let Some(decision) = self.auto_ban.record(key, kind, now) {
            verdict.consider(Action::Ban, decision.duration);
        }
    }

    fn enforce(&mut self, key: UserKey, verdict: &Verdict, now: Instant) {
        match verdict.action {
            Action::Mute => {
                if let Some(d) = verdict.duration {
                    self.auto_mute.mute(key, d, now);
                }
            }
            Action::Ban => self.auto_ban.ban(key, verdict.duration, now),
            _ => {}
        }
    }

    /// Issues a manual warning, returning the warning and escalation.
    pub fn warn(&mut self, key: UserKey, request: WarningRequest, now: Instant) -> (Warning, Escalation) {
        let (warning, escalation) = self.warnings.issue(key, request, now);
        match escalation {
            Escalation::Mute(d) => self.auto_mute.mute(key, d, now),
            Escalation::Ban(d) => self.auto_ban.ban(key, Some(d), now),
            Escalation::None => {}
        }
        (warning, escalation)
    }

    #[must_use]
    pub fn warnings(&self, key: UserKey, now: Instant) -> Vec<&Warning> {
        self.warnings.active(key, now)
    }

    #[must_use]
    pub fn warning_points(&self, key: UserKey, now: Instant) -> u32 {
        self.warnings.points(key, now)
    }

    pub fn clear_warnings(&mut self, key: UserKey) -> usize {
        self.badwords.reset_record(key);
        self.warnings.clear(key)
    }

    pub fn mute(&mut self, key: UserKey, duration: Duration, now: Instant) {
        self.auto_mute.mute(key, duration, now);
    }

    /// Lifts every kind of mute the engines hold for a user.
    pub fn unmute(&mut self, key: UserKey) -> bool {
        let lifted = self.auto_mute.lift(key);
        let flood = self.flood.unmute(key);
        let spam = self.spam.unmute(key);
        lifted || flood || spam
    }

    pub fn ban(&mut self, key: UserKey, duration: Option<Duration>, now: Instant) {
        self.auto_ban.ban(key, duration, now);
    }

    pub fn unban(&mut self, key: UserKey) -> bool {
        self.auto_ban.lift(key)
    }

    /// Bad-word masked copy of a text.
    #[must_use]
    pub fn censor(&self, text: &str) -> String {
        let matches = self.badwords.find(text);
        self.badwords.censor(text, &matches)
    }

    /// Drops expired mutes, bans, warnings and stale counters.
    pub fn expire(&mut self, now: Instant) {
        self.flood.expire(now);
        self.spam.expire(now);
        self.warnings.expire(now);
        self.auto_mute.expire(now);
        self.auto_ban.expire(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: UserKey = UserKey::new(100, -200);

    fn moderator() -> Moderator {
        Moderator::new(&ModerationConfig::default(), Features::default())
    }

    #[test]
    fn test_action_ordering() {
        assert!(Action::Ban > Action::Mute);
        assert!(Action::Mute > Action::Warn);
        assert!(Action::Warn > Action::Delete);
        assert!(Action::Delete > Action::Allow);
    }

    #[test]
    fn test_clean_message_allowed() {
        let verdict = moderator().inspect(KEY, "good morning everyone", Instant::now());
        assert!(verdict.is_allowed());
        assert!(verdict.notice("Ann").is_none());
    }

    #[test]
    fn test_bad_word_mutes_and_warns() {
        let mut moderator = moderator();
        let now = Instant::now();
        let verdict = moderator.inspect(KEY, "you idiot", now);
        assert_eq!(verdict.action, Action::Mute);
        assert_eq!(verdict.duration, Some(Duration::from_secs(900)));
        assert_eq!(verdict.violations, vec![ViolationKind::BadWord]);
        assert_eq!(verdict.warning.as_ref().map(|w| w.points), Some(10));
        assert!(verdict.notice("Ann").unwrap().contains("muted for 15m"));

        let follow_up = moderator.inspect(KEY, "hello", now + Duration::from_secs(5));
        assert_eq!(follow_up.action, Action::Delete);
    }

    #[test]
    fn test_scam_phrase_bans() {
        let mut moderator = moderator();
        let verdict = moderator.inspect(KEY, "get free crypto now", Instant::now());
        assert_eq!(verdict.action, Action::Ban);
        assert!(verdict.violations.contains(&ViolationKind::Scam));
    }

    #[test]
    fn test_disabled_features_skip_engines() {
        let features = Features {
            anti_bad_words: false,
            anti_links: false,
            ..Features::default()
        };
        let mut moderator = Moderator::new(&ModerationConfig::default(), features);
        let verdict = moderator.inspect(KEY, "idiot at bit.ly/x", Instant::now());
        assert!(verdict.is_allowed());
    }

    #[test]
    fn test_blocked_link_deleted() {
        let mut moderator = moderator();
        let verdict = moderator.inspect(KEY, "look bit.ly/abc", Instant::now());
        assert_eq!(verdict.action, Action::Delete);
        assert_eq!(verdict.violations, vec![ViolationKind::MaliciousLinks]);
    }

    #[test]
    fn test_manual_mute_and_unmute() {
        let mut moderator = moderator();
        let now = Instant::now();
        moderator.mute(KEY, Duration::from_secs(60), now);
        assert_eq!(moderator.inspect(KEY, "hi", now).action, Action::Delete);
        assert!(moderator.unmute(KEY));
        assert!(moderator.inspect(KEY, "hi again", now + Duration::from_secs(3)).is_allowed());
    }

    #[test]
    fn test_manual_warnings_escalate() {
        let mut moderator = moderator();
        let now = Instant::now();
        moderator.warn(KEY, WarningRequest::new("x", WarningLevel::Critical), now);
        let (_, escalation) = moderator.warn(KEY, WarningRequest::new("y", WarningLevel::Severe), now);
        assert_eq!(escalation, Escalation::Mute(Duration::from_secs(300)));
        assert_eq!(moderator.warning_points(KEY, now), 30);
        assert_eq!(moderator.clear_warnings(KEY), 2);
    }

    #[test]
    fn test_quick_second_message_is_warned_not_removed() {
        let mut moderator = moderator();
        let now = Instant::now();
        assert!(moderator.inspect(KEY, "good morning", now).is_allowed());

        let verdict = moderator.inspect(KEY, "how is everyone", now + Duration::from_millis(1500));
        assert_eq!(verdict.action, Action::Warn);
        assert!(!verdict.removes_message());
        assert!(verdict.notice("Ann").is_some());
    }

    #[test]
    fn test_verdict_keeps_most_severe() {
        let mut verdict = Verdict::allow();
        verdict.consider(Action::Mute, Some(Duration::from_secs(60)));
        verdict.consider(Action::Delete, None);
        verdict.consider(Action::Mute, Some(Duration::from_secs(600)));
        verdict.consider(Action::Mute, Some(Duration::from_secs(30)));
        assert_eq!(verdict.action, Action::Mute);
        assert_eq!(verdict.duration, Some(Duration::from_secs(600)));
        verdict.consider(Action::Ban, Some(Duration::from_secs(10)));
        verdict.consider(Action::Ban, None);
        assert_eq!(verdict.duration, None);
    }
}
