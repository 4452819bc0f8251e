//! Spam detection: message rate, near-duplicate messages and text patterns.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{Action, UserKey};

const HISTORY_LIMIT: usize = 20;
const SIMILARITY_LOOKBACK: usize = 10;
const HISTORY_MAX_AGE: Duration = Duration::from_secs(3600);

/// Anti-spam thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpamConfig {
    pub max_messages_per_minute: usize,
    pub max_similar_messages: usize,
    pub min_message_interval_ms: u64,
    /// Detections before the user is muted.
    pub spam_threshold: u32,
    pub mute_secs: u64,
    pub similarity_threshold: f64,
    /// Phrases that mark a message as spam (case-insensitive).
    pub phrases: Vec<String>,
}

impl Default for SpamConfig {
    fn default() -> Self {
        Self {
            max_messages_per_minute: 10,
            max_similar_messages: 3,
            min_message_interval_ms: 2000,
            spam_threshold: 5,
            mute_secs: 300,
            similarity_threshold: 0.8,
            phrases: ["free money", "click here", "make money fast", "$$$", "earn from home"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
        }
    }
}

/// Why a message was classified as spam.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpamReason {
    UserMuted,
    MessageRate,
    MessageInterval,
    SimilarMessages,
    ExcessiveRepetition,
    ExcessiveCaps,
    SpamPhrase(String),
}

impl SpamReason {
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::UserMuted => "user is muted".to_owned(),
            Self::MessageRate => "too many messages per minute".to_owned(),
            Self::MessageInterval => "messages sent too fast".to_owned(),
            Self::SimilarMessages => "repeated similar messages".to_owned(),
            Self::ExcessiveRepetition => "excessive repetition".to_owned(),
            Self::ExcessiveCaps => "excessive capitals".to_owned(),
            Self::SpamPhrase(p) => format!("spam phrase \"{p}\""),
        }
    }
}

/// Result of a spam check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpamCheck {
    Clean,
    Spam { reason: SpamReason, action: Action },
}

impl SpamCheck {
    #[must_use]
    pub const fn is_spam(&self) -> bool {
        matches!(self, Self::Spam { .. })
    }
}

#[derive(Debug, Default)]
struct History {
    times: VecDeque<Instant>,
    texts: VecDeque<(Instant, String)>,
}

/// Anti-spam tracker.
#[derive(Debug, Default)]
pub struct AntiSpam {
    config: SpamConfig,
    phrases_lower: Vec<String>,
    history: HashMap<UserKey, History>,
    detections: HashMap<UserKey, u32>,
    muted_until: HashMap<UserKey, Instant>,
}

impl AntiSpam {
    #[must_use]
    pub fn new(config: SpamConfig) -> Self {
        let phrases_lower = config.phrases.iter().map(|p| p.to_lowercase()).collect();
        Self {
            config,
            phrases_lower,
            ..Self::default()
        }
    }

    /// Checks a message, recording it when it is not spam.
    pub fn check(&mut self, key: UserKey, text: &str, now: Instant) -> SpamCheck {
        if self.is_muted(key, now) {
            return SpamCheck::Spam {
                reason: SpamReason::UserMuted,
                action: Action::Delete,
            };
        }

        let history = self.history.entry(key).or_default();
        prune_history(history, now);

        let verdict = rate_check(&self.config, history, now)
            .or_else(|| similarity_check(&self.config, history, text))
            .or_else(|| pattern_check(&self.phrases_lower, text));

        if let Some((reason, action)) = verdict {
            self.record_detection(key, now);
            return SpamCheck::Spam { reason, action };
        }

        history.times.push_back(now);
        history.texts.push_back((now, text.to_owned()));
        while history.texts.len() > HISTORY_LIMIT {
            history.texts.pop_front();
        }
        SpamCheck::Clean
    }

    fn record_detection(&mut self, key: UserKey, now: Instant) {
        let count = self.detections.entry(key).or_insert(0);
        *count += 1;
        if *count >= self.config.spam_threshold {
            let mute = Duration::from_secs(self.config.mute_secs);
            self.muted_until.insert(key, now + mute);
            warn!("Spam threshold reached by {}, muted {}s", key, mute.as_secs());
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

    pub fn unmute(&mut self, key: UserKey) -> bool {
        self.muted_until.remove(&key).is_some()
    }

    #[must_use]
    pub fn detections(&self, key: UserKey) -> u32 {
        self.detections.get(&key).copied().unwrap_or(0)
    }

    pub fn expire(&mut self, now: Instant) {
        self.muted_until.retain(|_, until| *until > now);
        for history in self.history.values_mut() {
            prune_history(history, now);
        }
        self.history.retain(|_, h| !h.times.is_empty() || !h.texts.is_empty());
    }
}

fn prune_history(history: &mut History, now: Instant) {
    let fresh = |t: &Instant| now.saturating_duration_since(*t) < HISTORY_MAX_AGE;
    history.times.retain(fresh);
    history.texts.retain(|(t, _)| fresh(t));
}

fn rate_check(config: &SpamConfig, history: &History, now: Instant) -> Option<(SpamReason, Action)> {
    let last_minute = history
        .times
        .iter()
        .filter(|t| now.saturating_duration_since(**t) < Duration::from_secs(60))
        .count();
    if last_minute >= config.max_messages_per_minute {
        return Some((SpamReason::MessageRate, Action::Mute));
    }

    if let Some(last) = history.times.back()
        && now.saturating_duration_since(*last) < Duration::from_millis(config.min_message_interval_ms)
    {
        return Some((SpamReason::MessageInterval, Action::Warn));
    }
    None
}

fn similarity_check(
    config: &SpamConfig,
    history: &History,
    text: &str,
) -> Option<(SpamReason, Action)> {
    let similar = history
        .texts
        .iter()
        .rev()
        .take(SIMILARITY_LOOKBACK)
        .filter(|(_, previous)| jaccard_similarity(text, previous) > config.similarity_threshold)
        .count();

    (similar >= config.max_similar_messages).then_some((SpamReason::SimilarMessages, Action::Mute))
}

fn pattern_check(phrases_lower: &[String], text: &str) -> Option<(SpamReason, Action)> {
    if has_excessive_repetition(text) {
        return Some((SpamReason::ExcessiveRepetition, Action::Delete));
    }
    if has_excessive_caps(text) {
        return Some((SpamReason::ExcessiveCaps, Action::Warn));
    }
    let lower = text.to_lowercase();
    phrases_lower
        .iter()
        .find(|p| !p.is_empty() && lower.contains(p.as_str()))
        .map(|p| (SpamReason::SpamPhrase(p.clone()), Action::Delete))
}

/// Jaccard similarity of the lower-cased word sets.
#[must_use]
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let a_lower = a.to_lowercase();
    let b_lower = b.to_lowercase();
    let words_a: HashSet<&str> = a_lower.split_whitespace().collect();
    let words_b: HashSet<&str> = b_lower.split_whitespace().collect();
    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }
    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();
    #[allow(clippy::cast_precision_loss)]
    let ratio = intersection as f64 / union as f64;
    ratio
}

/// Five identical characters in a row, or three identical words in a row.
#[must_use]
pub fn has_excessive_repetition(text: &str) -> bool {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() < 10 {
        return false;
    }
    if chars.windows(5).any(|w| w.iter().all(|c| *c == w[0])) {
        return true;
    }
    let words: Vec<&str> = text.split_whitespace().collect();
    words.windows(3).any(|w| w[0] == w[1] && w[1] == w[2])
}

/// More than half upper-case and more than ten capitals.
#[must_use]
pub fn has_excessive_caps(text: &str) -> bool {
    let total = text.chars().count();
    if total < 10 {
        return false;
    }
    let upper = text.chars().filter(|c| c.is_uppercase()).count();
    upper * 2 > total && upper > 10
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: UserKey = UserKey::new(7, -1);

    fn spaced(start: Instant, secs: u64) -> Instant {
        start + Duration::from_secs(secs)
    }

    #[test]
    fn test_clean_message() {
        let mut spam = AntiSpam::new(SpamConfig::default());
        assert_eq!(spam.check(KEY, "hello there", Instant::now()), SpamCheck::Clean);
    }

    #[test]
    fn test_fast_messages_warn() {
        let mut spam = AntiSpam::new(SpamConfig::default());
        let start = Instant::now();
        spam.check(KEY, "first", start);
        let result = spam.check(KEY, "second", start + Duration::from_millis(500));
        assert_eq!(
            result,
            SpamCheck::Spam {
                reason: SpamReason::MessageInterval,
                action: Action::Warn
            }
        );
    }

    #[test]
    fn test_similar_messages_mute() {
        let mut spam = AntiSpam::new(SpamConfig::default());
        let start = Instant::now();
        for i in 0..3 {
            assert!(!spam.check(KEY, "buy my great stuff now", spaced(start, i * 5)).is_spam());
        }
        let result = spam.check(KEY, "buy my great stuff now", spaced(start, 20));
        assert_eq!(
            result,
            SpamCheck::Spam {
                reason: SpamReason::SimilarMessages,
                action: Action::Mute
            }
        );
    }

    #[test]
    fn test_repetition_and_caps() {
        assert!(has_excessive_repetition("heyyyyyy everyone"));
        assert!(has_excessive_repetition("spam spam spam and more"));
        assert!(!has_excessive_repetition("short"));
        assert!(has_excessive_caps("THIS IS VERY LOUD TEXT"));
        assert!(!has_excessive_caps("This Is Fine Text Here"));
    }

    #[test]
    fn test_spam_phrase_deleted() {
        let mut spam = AntiSpam::new(SpamConfig::default());
        let result = spam.check(KEY, "Get FREE money today", Instant::now());
        assert!(matches!(
            result,
            SpamCheck::Spam {
                reason: SpamReason::SpamPhrase(_),
                action: Action::Delete
            }
        ));
    }

    #[test]
    fn test_threshold_mutes_user() {
        let config = SpamConfig {
            spam_threshold: 2,
            ..SpamConfig::default()
        };
        let mut spam = AntiSpam::new(config);
        let start = Instant::now();
        spam.check(KEY, "click here please", start);
        spam.check(KEY, "click here again", spaced(start, 5));
        assert_eq!(spam.detections(KEY), 2);
        let result = spam.check(KEY, "normal words", spaced(start, 10));
        assert_eq!(
            result,
            SpamCheck::Spam {
                reason: SpamReason::UserMuted,
                action: Action::Delete
            }
        );
        assert!(!spam.is_muted(KEY, spaced(start, 400)));
    }

    #[test]
    fn test_jaccard() {
        assert!((jaccard_similarity("a b c", "a b c") - 1.0).abs() < f64::EPSILON);
        assert!((jaccard_similarity("a b", "c d")).abs() < f64::EPSILON);
        assert!((jaccard_similarity("", "a")).abs() < f64::EPSILON);
    }
}
