//! JSON content files: auto-reply rules, greeting templates and moderation
//! word lists.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::moderation::ModerationConfig;

pub const AUTO_REPLY_FILE: &str = "auto_reply.json";
pub const WELCOME_FILE: &str = "welcome.json";
pub const GOODBYE_FILE: &str = "goodbye.json";
pub const MODERATION_FILE: &str = "moderation.json";

/// Errors raised while loading or validating content files.
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {file}: {source}")]
    Parse {
        file: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Reply rule {id} has no patterns")]
    NoPatterns { id: String },

    #[error("Reply rule {id} has an empty pattern at index {index}")]
    EmptyPattern { id: String, index: usize },

    #[error("Reply rule {id} has an empty response")]
    EmptyResponse { id: String },

    #[error("Template {index} in {file} is empty")]
    EmptyTemplate { file: &'static str, index: usize },

    #[error("Bad word at index {index} is empty")]
    EmptyBadWord { index: usize },

    #[error("Duplicate bad word: {word}")]
    DuplicateBadWord { word: String },

    #[error("Bad word {word} has severity {severity} (must be 1-10)")]
    InvalidSeverity { word: String, severity: u8 },

    #[error("{name} must be between 0 and 1, got {value}")]
    InvalidRatio { name: &'static str, value: f64 },
}

/// One auto-reply rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplyRule {
    pub patterns: Vec<String>,
    pub response: String,
    #[serde(rename = "type", default = "default_rule_type")]
    pub kind: String,
}

fn default_rule_type() -> String {
    "text".to_owned()
}

impl ReplyRule {
    #[must_use]
    pub fn new(patterns: Vec<String>, response: impl Into<String>) -> Self {
        Self {
            patterns,
            response: response.into(),
            kind: default_rule_type(),
        }
    }
}

/// Contents of `auto_reply.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AutoReplyConfig {
    #[serde(default)]
    pub patterns: BTreeMap<String, ReplyRule>,
    #[serde(default)]
    pub fallback_responses: Vec<String>,
    #[serde(default = "default_true")]
    pub fallback_enabled: bool,
}

impl Default for AutoReplyConfig {
    fn default() -> Self {
        Self {
            patterns: BTreeMap::new(),
            fallback_responses: Vec::new(),
            fallback_enabled: true,
        }
    }
}

/// Contents of `welcome.json` or `goodbye.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GreetingConfig {
    #[serde(default)]
    pub templates: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for GreetingConfig {
    fn default() -> Self {
        Self {
            templates: Vec::new(),
            enabled: true,
        }
    }
}

const fn default_true() -> bool {
    true
}

/// Every content file, loaded together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentConfig {
    pub auto_reply: AutoReplyConfig,
    pub welcome: GreetingConfig,
    pub goodbye: GreetingConfig,
    pub moderation: ModerationConfig,
}

impl ContentConfig {
    /// Loads all content files from a directory. Missing files fall back to
    /// defaults; malformed files are an error.
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<Self, ContentError> {
        let dir = dir.as_ref();
        Ok(Self {
            auto_reply: load_or_default(dir, AUTO_REPLY_FILE)?,
            welcome: load_or_default(dir, WELCOME_FILE)?,
            goodbye: load_or_default(dir, GOODBYE_FILE)?,
            moderation: load_or_default(dir, MODERATION_FILE)?,
        })
    }

    /// Writes all content files into a directory, creating it if needed.
    pub fn save_to_dir(&self, dir: impl AsRef<Path>) -> Result<(), ContentError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|source| ContentError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        write_json(&dir.join(AUTO_REPLY_FILE), &self.auto_reply)?;
        write_json(&dir.join(WELCOME_FILE), &self.welcome)?;
        write_json(&dir.join(GOODBYE_FILE), &self.goodbye)?;
        write_json(&dir.join(MODERATION_FILE), &self.moderation)?;
        Ok(())
    }

    /// Validates all content, returning the first problem.
    pub fn validate(&self) -> Result<(), ContentError> {
        match self.validate_all().into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Returns every validation problem found.
    #[must_use]
    pub fn validate_all(&self) -> Vec<ContentError> {
        let mut problems = Vec::new();

        for (id, rule) in &self.auto_reply.patterns {
            if rule.patterns.is_empty() {
                problems.push(ContentError::NoPatterns { id: id.clone() });
            }
            for (index, pattern) in rule.patterns.iter().enumerate() {
                if pattern.trim().is_empty() {
                    problems.push(ContentError::EmptyPattern {
                        id: id.clone(),
                        index,
                    });
                }
            }
            if rule.response.trim().is_empty() {
                problems.push(ContentError::EmptyResponse { id: id.clone() });
            }
        }

        for (file, greeting) in [(WELCOME_FILE, &self.welcome), (GOODBYE_FILE, &self.goodbye)] {
            for (index, template) in greeting.templates.iter().enumerate() {
                if template.trim().is_empty() {
                    problems.push(ContentError::EmptyTemplate { file, index });
                }
            }
        }

        let mut seen = HashSet::new();
        for (index, entry) in self.moderation.badwords.words.iter().enumerate() {
            let word = entry.word.trim().to_lowercase();
            if word.is_empty() {
                problems.push(ContentError::EmptyBadWord { index });
                continue;
            }
            if !seen.insert(word.clone()) {
                problems.push(ContentError::DuplicateBadWord { word: word.clone() });
            }
            if !(1..=10).contains(&entry.severity) {
                problems.push(ContentError::InvalidSeverity {
                    word,
                    severity: entry.severity,
                });
            }
        }

        let ratio = self.moderation.spam.similarity_threshold;
        if !(0.0..=1.0).contains(&ratio) {
            problems.push(ContentError::InvalidRatio {
                name: "spam.similarity_threshold",
                value: ratio,
            });
        }

        problems
    }

    /// Creates example content for users to start from.
    #[must_use]
    pub fn example() -> Self {
        let rule = |patterns: &[&str], response: &str| {
            ReplyRule::new(patterns.iter().map(|p| (*p).to_owned()).collect(), response)
        };
        let mut patterns = BTreeMap::new();
        patterns.insert("greeting".to_owned(), rule(&["hello", "hi", "hey"], "👋 Hello! How can I help?"));
        patterns.insert(
            "thanks".to_owned(),
            rule(&["thank you", "thanks"], "😊 You're welcome!"),
        );
        patterns.insert(
            "rules".to_owned(),
            rule(&["rules", "what are the rules"], "📜 Send /rules to see the group rules."),
        );

        Self {
            auto_reply: AutoReplyConfig {
                patterns,
                fallback_responses: vec![
                    "I'm still learning, try asking something else.".to_owned(),
                    "Sorry, I don't know the answer to that.".to_owned(),
                ],
                fallback_enabled: true,
            },
            welcome: GreetingConfig {
                templates: vec![
                    "🎉 Welcome {user_name}!\n🌟 Glad to have you in {group_name}.\n📊 Members: {total_members}".to_owned(),
                ],
                enabled: true,
            },
            goodbye: GreetingConfig {
                templates: vec!["👋 {user_name} left {group_name}. Take care!".to_owned()],
                enabled: true,
            },
            moderation: ModerationConfig::default(),
        }
    }
}

fn load_or_default<T: DeserializeOwned + Default>(dir: &Path, file: &str) -> Result<T, ContentError> {
    let path = dir.join(file);
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("{} not found, using defaults", path.display());
            return Ok(T::default());
        }
        Err(source) => return Err(ContentError::Io { path, source }),
    };
    serde_json::from_str(&content).map_err(|source| ContentError::Parse {
        file: file.to_owned(),
        source,
    })
}

/// Serialises a value as pretty JSON.
pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ContentError> {
    let content = serde_json::to_string_pretty(value).map_err(|source| ContentError::Parse {
        file: path.display().to_string(),
        source,
    })?;
    std::fs::write(path, content).map_err(|source| ContentError::Io {
        path: path.to_path_buf(),
        source,
    })
}
