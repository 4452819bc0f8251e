//! Bad-word filter tolerant of common character substitutions.

use std::collections::{HashMap, HashSet};
use std::ops::Range;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{Action, UserKey};

/// How a category of words is punished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub severity: u8,
    pub action: Action,
}

/// A filtered word.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadWord {
    pub word: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_severity")]
    pub severity: u8,
}

fn default_category() -> String {
    "offensive".to_owned()
}

const fn default_severity() -> u8 {
    5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BadWordConfig {
    pub enabled: bool,
    pub replace_with: String,
    pub categories: HashMap<String, CategoryRule>,
    pub words: Vec<BadWord>,
    pub whitelist: Vec<String>,
}

impl Default for BadWordConfig {
    fn default() -> Self {
        let rule = |severity, action| CategoryRule { severity, action };
        let categories = [
            ("offensive", rule(10, Action::Mute)),
            ("abusive", rule(9, Action::Mute)),
            ("sexual", rule(10, Action::Delete)),
            ("racist", rule(10, Action::Ban)),
            ("spam", rule(5, Action::Warn)),
            ("scam", rule(8, Action::Mute)),
        ]
        .into_iter()
        .map(|(name, rule)| (name.to_owned(), rule))
        .collect();

        let word = |word: &str, category: &str, severity| BadWord {
            word: word.to_owned(),
            category: category.to_owned(),
            severity,
        };
        Self {
            enabled: true,
            replace_with: "***".to_owned(),
            categories,
            words: vec![
                word("badword", "offensive", 5),
                word("idiot", "abusive", 6),
                word("free crypto", "scam", 8),
            ],
            whitelist: Vec::new(),
        }
    }
}

/// One match of a filtered word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadWordMatch {
    pub word: String,
    pub category: String,
    pub severity: u8,
    pub action: Action,
    /// Byte range in the checked text.
    pub span: Range<usize>,
}

/// Per-key record of filtered messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BadWordRecord {
    pub warnings: u32,
    pub total_severity: u32,
}

#[derive(Debug)]
struct CompiledWord {
    entry: BadWord,
    pattern: Regex,
}

#[derive(Debug, Default)]
pub struct AntiBadWord {
    enabled: bool,
    replace_with: String,
    categories: HashMap<String, CategoryRule>,
    words: Vec<CompiledWord>,
    whitelist: HashSet<String>,
    records: HashMap<UserKey, BadWordRecord>,
}

impl AntiBadWord {
    #[must_use]
    pub fn new(config: &BadWordConfig) -> Self {
        let mut engine = Self {
            enabled: config.enabled,
            replace_with: config.replace_with.clone(),
            categories: config.categories.clone(),
            whitelist: config.whitelist.iter().map(|w| w.to_lowercase()).collect(),
            ..Self::default()
        };
        for word in &config.words {
            engine.add_word(&word.word, &word.category, word.severity);
        }
        engine
    }

    /// Finds filtered words and records them against the sender.
    pub fn check(&mut self, text: &str, key: UserKey) -> Vec<BadWordMatch> {
        let matches = self.find(text);
        if !matches.is_empty() {
            let record = self.records.entry(key).or_default();
            record.warnings += 1;
            record.total_severity += matches.iter().map(|m| u32::from(m.severity)).sum::<u32>();
        }
        matches
    }

    /// Finds filtered words without recording anything.
    #[must_use]
    pub fn find(&self, text: &str) -> Vec<BadWordMatch> {
        if !self.enabled || text.trim().is_empty() {
            return Vec::new();
        }

        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for compiled in &self.words {
            for m in compiled.pattern.find_iter(text) {
                let fresh = seen.insert((compiled.entry.word.as_str(), m.start(), m.end()));
                if !fresh || self.is_whitelisted(m.as_str()) {
                    continue;
                }
                let rule = self.rule_for(&compiled.entry.category);
                found.push(BadWordMatch {
                    word: compiled.entry.word.clone(),
                    category: compiled.entry.category.clone(),
                    severity: compiled.entry.severity,
                    action: rule.action,
                    span: m.range(),
                });
            }
        }
        found.sort_by_key(|m| m.span.start);
        found
    }

    fn rule_for(&self, category: &str) -> CategoryRule {
        self.categories.get(category).copied().unwrap_or(CategoryRule {
            severity: default_severity(),
            action: Action::Warn,
        })
    }

    fn is_whitelisted(&self, matched: &str) -> bool {
        let normalized: String = matched
            .to_lowercase()
            .chars()
            .filter(|c| c.is_alphanumeric() || c.is_whitespace())
            .collect();
        self.whitelist.contains(normalize_spaces(&normalized).as_str())
    }

    /// Replaces every match with the configured mask.
    #[must_use]
    pub fn censor(&self, text: &str, matches: &[BadWordMatch]) -> String {
        let mut spans: Vec<&Range<usize>> = matches.iter().map(|m| &m.span).collect();
        spans.sort_by_key(|s| std::cmp::Reverse(s.start));

        let mut censored = text.to_owned();
        let mut last_start = usize::MAX;
        for span in spans {
            // Overlapping spans were already covered by a later match.
            if span.end > last_start || span.end > censored.len() {
                continue;
            }
            censored.replace_range(span.clone(), &self.replace_with);
            last_start = span.start;
        }
        censored
    }

    /// Adds or replaces a word. Severity is clamped to 1..=10.
    pub fn add_word(&mut self, word: &str, category: &str, severity: u8) -> bool {
        let word = normalize_spaces(&word.to_lowercase());
        if word.is_empty() {
            return false;
        }
        let pattern = match RegexBuilder::new(&word_pattern(&word)).case_insensitive(true).build() {
            Ok(pattern) => pattern,
            Err(e) => {
                warn!("Skipping bad word {:?}: {}", word, e);
                return false;
            }
        };
        self.words.retain(|w| w.entry.word != word);
        self.words.push(CompiledWord {
            entry: BadWord {
                word: word.clone(),
                category: category.to_owned(),
                severity: severity.clamp(1, 10),
            },
            pattern,
        });
        info!("Added bad word in category {}", category);
        true
    }

    pub fn remove_word(&mut self, word: &str) -> bool {
        let word = normalize_spaces(&word.to_lowercase());
        let before = self.words.len();
        self.words.retain(|w| w.entry.word != word);
        self.words.len() != before
    }

    pub fn whitelist_word(&mut self, word: &str) -> bool {
        let word = normalize_spaces(&word.to_lowercase());
        !word.is_empty() && self.whitelist.insert(word)
    }

    #[must_use]
    pub fn record(&self, key: UserKey) -> BadWordRecord {
        self.records.get(&key).copied().unwrap_or_default()
    }

    pub fn reset_record(&mut self, key: UserKey) {
        self.records.remove(&key);
    }

    #[must_use]
    pub fn word_count(&self) -> usize {
        self.words.len()
    }
}

fn normalize_spaces(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn char_class(c: char) -> Option<&'static str> {
    Some(match c {
        'a' | '4' => "[a@4]",
        'b' | '8' => "[b8]",
        'c' => r"[c(]",
        'e' | '3' => "[e3]",
        'g' | '9' => "[g9]",
        'i' => "[i1!]",
        'l' => "[l1|]",
        'o' | '0' => "[o0]",
        's' | '5' => r"[s$5]",
        't' | '7' => "[t7]",
        'z' | '2' => "[z2]",
        '1' => "[i1l]",
        _ => return None,
    })
}

/// Builds the obfuscation-tolerant pattern for a lower-cased word.
fn word_pattern(word: &str) -> String {
    let parts: Vec<String> = word
        .chars()
        .map(|c| char_class(c).map_or_else(|| regex::escape(&c.to_string()), str::to_owned))
        .collect();

    let is_word_char = |c: Option<char>| c.is_some_and(|c| c.is_alphanumeric() || c == '_');
    let mut pattern = parts.join(r"\W*");
    if is_word_char(word.chars().next()) {
        pattern.insert_str(0, r"\b");
    }
    if is_word_char(word.chars().last()) {
        pattern.push_str(r"\b");
    }
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: UserKey = UserKey::new(3, -9);

    fn engine() -> AntiBadWord {
        AntiBadWord::new(&BadWordConfig::default())
    }

    #[test]
    fn test_clean_text() {
        assert!(engine().check("have a nice day", KEY).is_empty());
    }

    #[test]
    fn test_plain_and_obfuscated_matches() {
        let mut filter = engine();
        let plain = filter.check("you are an IDIOT", KEY);
        assert_eq!(plain.len(), 1);
        assert_eq!(plain[0].category, "abusive");
        assert_eq!(plain[0].action, Action::Mute);

        let obfuscated = filter.check("what a b4dw0rd", KEY);
        assert_eq!(obfuscated.len(), 1);
        assert_eq!(obfuscated[0].word, "badword");

        let spaced = filter.check("i.d.i.o.t", KEY);
        assert_eq!(spaced.len(), 1);
        assert_eq!(filter.record(KEY).warnings, 3);
    }

    #[test]
    fn test_word_boundaries() {
        assert!(engine().find("idiotic").is_empty());
    }

    #[test]
    fn test_censor() {
        let filter = engine();
        let text = "you idiot, get free crypto";
        let matches = filter.find(text);
        assert_eq!(filter.censor(text, &matches), "you ***, get ***");
    }

    #[test]
    fn test_whitelist_and_remove() {
        let mut filter = engine();
        filter.whitelist_word("idiot");
        assert!(filter.find("idiot").is_empty());
        assert!(filter.remove_word("badword"));
        assert!(filter.find("badword").is_empty());
        assert!(!filter.remove_word("badword"));
    }

    #[test]
    fn test_unknown_category_warns() {
        let mut filter = engine();
        assert!(filter.add_word("meanie", "rude", 20));
        let matches = filter.find("meanie");
        assert_eq!(matches[0].action, Action::Warn);
        assert_eq!(matches[0].severity, 10);
    }

    #[test]
    fn test_word_pattern() {
        assert_eq!(word_pattern("ab"), r"\b[a@4]\W*[b8]\b");
    }
}
