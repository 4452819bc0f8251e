//! Pattern-scored automatic replies loaded from `auto_reply.json`.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use regex::{Regex, RegexBuilder};
use tracing::{debug, info};

use crate::config::{AUTO_REPLY_FILE, AutoReplyConfig, ContentError, ReplyRule, write_json};

/// Replies below this score are not sent.
const MATCH_THRESHOLD: f64 = 0.6;
const CONTEXT_TTL: Duration = Duration::from_secs(60 * 60);
const REPEAT_LIMIT: u32 = 2;
const REPEAT_RESPONSE: &str = "You keep asking the same thing. Try asking something else.";

const DEFAULT_FALLBACKS: &[&str] = &[
    "I'm still learning, try asking something else.",
    "Sorry, I don't know the answer to that.",
    "I don't know much about that yet.",
];

/// A reply chosen for a message.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoReply {
    /// Matching rule, `None` for fallbacks.
    pub rule_id: Option<String>,
    pub text: String,
    pub confidence: f64,
}

impl AutoReply {
    #[must_use]
    pub const fn is_fallback(&self) -> bool {
        self.rule_id.is_none()
    }
}

#[derive(Debug, Clone)]
struct Conversation {
    last_message: String,
    repeat_count: u32,
    message_count: u64,
    last_seen: Instant,
}

#[derive(Debug)]
pub struct AutoReplyEngine {
    config: AutoReplyConfig,
    regexes: HashMap<String, Regex>,
    contexts: HashMap<i64, Conversation>,
    content_dir: Option<PathBuf>,
}

impl AutoReplyEngine {
    /// Creates an engine; with a content directory, added rules are saved
    /// back to `auto_reply.json` there.
    #[must_use]
    pub fn new(config: AutoReplyConfig, content_dir: Option<PathBuf>) -> Self {
        let mut engine = Self {
            config: AutoReplyConfig::default(),
            regexes: HashMap::new(),
            contexts: HashMap::new(),
            content_dir,
        };
        engine.reload(config);
        engine
    }

    /// Swaps in a new rule set, keeping conversation contexts.
    pub fn reload(&mut self, config: AutoReplyConfig) {
        self.regexes = config
            .patterns
            .values()
            .flat_map(|rule| rule.patterns.iter())
            .filter_map(|p| compile(p).map(|re| (p.clone(), re)))
            .collect();
        info!("Loaded {} reply rules", config.patterns.len());
        self.config = config;
    }

    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.config.patterns.len()
    }

    /// Picks a reply for a message, if any.
    pub fn handle(&mut self, text: &str, user_id: i64, now: Instant) -> Option<AutoReply> {
        let message = normalize(text);
        if message.is_empty() {
            return None;
        }

        self.expire_contexts(now);
        let repeats = self.update_context(user_id, &message, now);

        if let Some((rule_id, rule, score)) = self.best_match(&message) {
            debug!("Auto-reply {} matched with {:.2}", rule_id, score);
            return Some(AutoReply {
                rule_id: Some(rule_id.to_owned()),
                text: rule.response.clone(),
                confidence: score,
            });
        }

        if !self.config.fallback_enabled {
            return None;
        }
        let text = if repeats > REPEAT_LIMIT {
            REPEAT_RESPONSE.to_owned()
        } else {
            self.random_fallback()
        };
        Some(AutoReply {
            rule_id: None,
            text,
            confidence: 0.1,
        })
    }

    fn best_match(&self, message: &str) -> Option<(&str, &ReplyRule, f64)> {
        let mut best: Option<(&str, &ReplyRule, f64)> = None;
        for (id, rule) in &self.config.patterns {
            if rule.response.trim().is_empty() {
                continue;
            }
            for pattern in &rule.patterns {
                let score = self.score(message, pattern);
                if best.is_none_or(|(_, _, b)| score > b) {
                    best = Some((id.as_str(), rule, score));
                }
            }
        }
        best.filter(|(_, _, score)| *score > MATCH_THRESHOLD)
    }

    /// Match score in `0.0..=1.0` of one pattern against a normalised message.
    fn score(&self, message: &str, pattern: &str) -> f64 {
        let lowered = pattern.trim().to_lowercase();
        if lowered.is_empty() {
            return 0.0;
        }
        if message == lowered {
            return 1.0;
        }
        if message.contains(&lowered) {
            return 0.8;
        }
        if self.regexes.get(pattern).is_some_and(|re| re.is_match(message)) {
            return 0.9;
        }

        let message_words: HashSet<&str> = message.split_whitespace().collect();
        let pattern_words: HashSet<&str> = lowered.split_whitespace().collect();
        let shared = pattern_words.intersection(&message_words).count();
        #[allow(clippy::cast_precision_loss)]
        let ratio = shared as f64 / pattern_words.len() as f64;
        ratio * 0.7
    }

    fn random_fallback(&self) -> String {
        let mut rng = rand::thread_rng();
        let configured = self.config.fallback_responses.choose(&mut rng).cloned();
        configured
            .or_else(|| DEFAULT_FALLBACKS.choose(&mut rng).map(|s| (*s).to_owned()))
            .unwrap_or_default()
    }

    /// Records the message, returning how often it was repeated in a row.
    fn update_context(&mut self, user_id: i64, message: &str, now: Instant) -> u32 {
        let context = self.contexts.entry(user_id).or_insert_with(|| Conversation {
            last_message: String::new(),
            repeat_count: 0,
            message_count: 0,
            last_seen: now,
        });
        if context.message_count > 0 && context.last_message == message {
            context.repeat_count += 1;
        } else {
            context.repeat_count = 0;
            message.clone_into(&mut context.last_message);
        }
        context.message_count += 1;
        context.last_seen = now;
        context.repeat_count
    }

    fn expire_contexts(&mut self, now: Instant) {
        self.contexts
            .retain(|_, c| now.saturating_duration_since(c.last_seen) <= CONTEXT_TTL);
    }

    /// Adds a single-pattern rule and persists the rule set.
    pub fn add_rule(&mut self, pattern: &str, response: &str) -> Result<String, ContentError> {
        let mut n = self.config.patterns.len() + 1;
        while self.config.patterns.contains_key(&format!("custom_{n}")) {
            n += 1;
        }
        let id = format!("custom_{n}");
        let pattern = pattern.trim().to_owned();

        if let Some(re) = compile(&pattern) {
            self.regexes.insert(pattern.clone(), re);
        }
        self.config
            .patterns
            .insert(id.clone(), ReplyRule::new(vec![pattern], response.trim()));

        if let Some(dir) = &self.content_dir {
            std::fs::create_dir_all(dir).map_err(|source| ContentError::Io {
                path: dir.clone(),
                source,
            })?;
            write_json(&dir.join(AUTO_REPLY_FILE), &self.config)?;
        }
        info!("Added reply rule {}", id);
        Ok(id)
    }
}

fn compile(pattern: &str) -> Option<Regex> {
    RegexBuilder::new(pattern).case_insensitive(true).build().ok()
}

/// Trims, lower-cases, strips zero-width characters and collapses whitespace.
#[must_use]
pub fn normalize(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .filter(|c| !matches!(c, '\u{200b}' | '\u{200c}' | '\u{200d}' | '\u{feff}'))
        .collect();
    cleaned
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
