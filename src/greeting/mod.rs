//! Welcome and goodbye messages rendered from templates.

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::{DateTime, Local, TimeDelta};
use rand::seq::SliceRandom;
use regex::{Captures, Regex};
use tracing::debug;

use crate::config::GreetingConfig;
use crate::moderation::UserKey;
use crate::telegram::{ChatInfo, Member};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DUPLICATE_WINDOW: TimeDelta = TimeDelta::seconds(60);
const CACHE_TTL: TimeDelta = TimeDelta::hours(24);

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{[a-z_]+\}").unwrap_or_else(|e| unreachable!("placeholder pattern is valid: {e}"))
});

const DEFAULT_WELCOME: &[&str] = &[
    "🎉 Welcome {user_name}!\n🌟 Glad to have you in {group_name}.\n📊 Members: {total_members}",
    "👋 Hi {user_name}! Welcome to {group_name}.\n📜 Please read the /rules.",
    "✨ {user_name} just joined! Say hello, everyone.",
];

const DEFAULT_GOODBYE: &[&str] = &[
    "👋 {user_name} left {group_name}. Take care!",
    "😢 Goodbye {user_name}, hope to see you again.",
];

/// Fills the placeholders of a greeting template in one pass, so values
/// that look like placeholders are inserted literally. Unknown
/// placeholders are left untouched.
#[must_use]
pub fn render_template(
    template: &str,
    member: &Member,
    chat: &ChatInfo,
    time_key: &str,
    now: DateTime<Local>,
    bot_name: &str,
) -> String {
    let members = chat
        .member_count
        .map_or_else(|| "?".to_owned(), |n| n.to_string());
    let time = now.format(TIME_FORMAT).to_string();
    let values = [
        ("{user_name}", member.display_name()),
        ("{user_full_name}", member.full_name()),
        ("{user_id}", member.user_id.to_string()),
        ("{username}", member.mention()),
        ("{group_name}", chat.title.clone()),
        ("{total_members}", members),
        (time_key, time),
        ("{bot_name}", bot_name.to_owned()),
    ];
    PLACEHOLDER_RE
        .replace_all(template, |caps: &Captures<'_>| {
            let key = &caps[0];
            values
                .iter()
                .find(|(name, _)| *name == key)
                .map_or_else(|| key.to_owned(), |(_, value)| value.clone())
        })
        .into_owned()
}

fn pick<'a>(configured: &'a [String], defaults: &'a [&'a str]) -> Option<&'a str> {
    let mut rng = rand::thread_rng();
    let usable: Vec<&str> = configured
        .iter()
        .map(String::as_str)
        .filter(|t| !t.trim().is_empty())
        .collect();
    if usable.is_empty() {
        defaults.choose(&mut rng).copied()
    } else {
        usable.choose(&mut rng).copied()
    }
}

/// Greets new members, once per minute per member and chat.
#[derive(Debug)]
pub struct WelcomeEngine {
    config: GreetingConfig,
    bot_name: String,
    recent: HashMap<UserKey, DateTime<Local>>,
}

impl WelcomeEngine {
    #[must_use]
    pub fn new(config: GreetingConfig, bot_name: impl Into<String>) -> Self {
        Self {
            config,
            bot_name: bot_name.into(),
            recent: HashMap::new(),
        }
    }

    pub fn reload(&mut self, config: GreetingConfig) {
        self.config = config;
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Welcome text for a member, `None` when disabled or already welcomed
    /// within the last minute.
    pub fn render(&mut self, member: &Member, chat: &ChatInfo, now: DateTime<Local>) -> Option<String> {
        if !self.config.enabled {
            return None;
        }
        self.recent.retain(|_, at| now - *at < CACHE_TTL);

        let key = UserKey::new(member.user_id, chat.id);
        if let Some(at) = self.recent.get(&key)
            && now - *at < DUPLICATE_WINDOW
        {
            debug!("Skipping duplicate welcome for {}", key);
            return None;
        }
        self.recent.insert(key, now);

        let template = pick(&self.config.templates, DEFAULT_WELCOME)?;
        Some(render_template(template, member, chat, "{join_time}", now, &self.bot_name))
    }
}

#[derive(Debug)]
pub struct GoodbyeEngine {
    config: GreetingConfig,
    bot_name: String,
}

impl GoodbyeEngine {
    #[must_use]
    pub fn new(config: GreetingConfig, bot_name: impl Into<String>) -> Self {
        Self {
            config,
            bot_name: bot_name.into(),
        }
    }

    pub fn reload(&mut self, config: GreetingConfig) {
        self.config = config;
    }

    #[must_use]
    pub fn render(&self, member: &Member, chat: &ChatInfo, now: DateTime<Local>) -> Option<String> {
        if !self.config.enabled {
            return None;
        }
        let template = pick(&self.config.templates, DEFAULT_GOODBYE)?;
        Some(render_template(template, member, chat, "{leave_time}", now, &self.bot_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telegram::ChatKind;
    use chrono::TimeZone;

    fn member() -> Member {
        Member {
            user_id: 42,
            first_name: "Ann".to_owned(),
            last_name: Some("Lee".to_owned()),
            username: None,
            is_bot: false,
        }
    }

    fn chat() -> ChatInfo {
        ChatInfo {
            id: -100,
            kind: ChatKind::Group,
            title: "Rustaceans".to_owned(),
            member_count: Some(12),
        }
    }

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap()
    }

    fn config(template: &str) -> GreetingConfig {
        GreetingConfig {
            templates: vec![template.to_owned()],
            enabled: true,
        }
    }

    #[test]
    fn test_placeholders() {
        let text = render_template(
            "{user_name}|{user_full_name}|{user_id}|{username}|{group_name}|{total_members}|{join_time}|{bot_name}|{unknown}",
            &member(),
            &chat(),
            "{join_time}",
            now(),
            "Crush",
        );
        assert_eq!(text, "Ann|Ann Lee|42|N/A|Rustaceans|12|2024-05-01 12:30:00|Crush|{unknown}");
    }

    #[test]
    fn test_values_are_not_expanded_again() {
        let mut tricky = member();
        tricky.first_name = "{group_name}".to_owned();
        tricky.last_name = Some("{bot_name}".to_owned());
        let text = render_template(
            "Hi {user_name} ({user_full_name}) from {group_name}",
            &tricky,
            &chat(),
            "{join_time}",
            now(),
            "Crush",
        );
        assert_eq!(text, "Hi {group_name} ({group_name} {bot_name}) from Rustaceans");
    }

    #[test]
    fn test_duplicate_welcome_suppressed() {
        let mut engine = WelcomeEngine::new(config("Hi {user_name}"), "Crush");
        assert_eq!(engine.render(&member(), &chat(), now()).as_deref(), Some("Hi Ann"));
        assert!(engine.render(&member(), &chat(), now() + TimeDelta::seconds(30)).is_none());
        assert!(engine.render(&member(), &chat(), now() + TimeDelta::seconds(61)).is_some());
    }

    #[test]
    fn test_disabled_and_defaults() {
        let mut disabled = GreetingConfig::default();
        disabled.enabled = false;
        assert!(WelcomeEngine::new(disabled, "Crush").render(&member(), &chat(), now()).is_none());

        let empty = GreetingConfig {
            templates: vec![String::new()],
            enabled: true,
        };
        let text = GoodbyeEngine::new(empty, "Crush").render(&member(), &chat(), now()).unwrap();
        assert!(text.contains("Ann"));
    }

    #[test]
    fn test_goodbye_leave_time() {
        let engine = GoodbyeEngine::new(config("{user_name} left at {leave_time}"), "Crush");
        assert_eq!(
            engine.render(&member(), &chat(), now()).unwrap(),
            "Ann left at 2024-05-01 12:30:00"
        );
    }
}
