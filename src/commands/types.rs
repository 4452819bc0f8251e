//! Command types and definitions.

use std::fmt;

use chrono::{DateTime, Utc};

/// Available bot commands.
///
/// Moderation commands keep their raw arguments: the target may come from
/// the arguments or from the replied-to message, which only the handler
/// knows about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    Start,
    Help,
    /// Rank card, optionally of another user.
    Rank(String),
    Top,
    Stats,
    Rules,
    Info,
    /// Badge card, optionally of another user.
    Badges(String),
    /// `<when> <text>`
    Remind(String),
    Reminders,
    CancelReminder(String),

    Warn(String),
    Warnings(String),
    ClearWarns(String),
    Mute(String),
    Unmute(String),
    Ban(String),
    Unban(String),
    AddReply { pattern: String, response: String },
    Reload,
    Backup,
    /// `<once|daily|weekly|monthly> <HH:MM> <text>`
    Schedule(String),
}

impl BotCommand {
    /// Parses a command from a message text.
    ///
    /// Commands start with `/`. A `@botname` suffix is accepted; when it
    /// names a different bot the message is not for us. Returns `None` if
    /// the message is not a valid command.
    #[must_use]
    pub fn parse(text: &str, bot_username: Option<&str>) -> Option<Self> {
        let text = text.trim();
        let after_slash = text.strip_prefix('/')?;

        let (word, args) = match after_slash.split_once(char::is_whitespace) {
            Some((word, args)) => (word, args.trim()),
            None => (after_slash, ""),
        };

        let cmd = match word.split_once('@') {
            Some((cmd, target)) => {
                if let Some(ours) = bot_username
                    && !target.eq_ignore_ascii_case(ours.trim_start_matches('@'))
                {
                    return None;
                }
                cmd
            }
            None => word,
        };
        let args = args.to_owned();

        match cmd.to_lowercase().as_str() {
            "start" => Some(Self::Start),
            "help" | "h" => Some(Self::Help),
            "rank" | "level" | "xp" => Some(Self::Rank(args)),
            "top" | "leaderboard" => Some(Self::Top),
            "stats" => Some(Self::Stats),
            "rules" => Some(Self::Rules),
            "info" | "about" => Some(Self::Info),
            "badges" | "achievements" => Some(Self::Badges(args)),
            "remind" | "reminder" => Some(Self::Remind(args)),
            "reminders" => Some(Self::Reminders),
            "cancelreminder" | "unremind" => Some(Self::CancelReminder(args)),
            "warn" => Some(Self::Warn(args)),
            "warnings" | "warns" => Some(Self::Warnings(args)),
            "clearwarns" | "unwarn" => Some(Self::ClearWarns(args)),
            "mute" => Some(Self::Mute(args)),
            "unmute" => Some(Self::Unmute(args)),
            "ban" => Some(Self::Ban(args)),
            "unban" => Some(Self::Unban(args)),
            "addreply" => Self::parse_add_reply(&args),
            "reload" => Some(Self::Reload),
            "backup" => Some(Self::Backup),
            "schedule" => Some(Self::Schedule(args)),
            _ => None,
        }
    }

    /// Parses `<pattern> | <response>`.
    fn parse_add_reply(args: &str) -> Option<Self> {
        let (pattern, response) = args.split_once('|')?;
        let pattern = pattern.trim();
        let response = response.trim();
        if pattern.is_empty() || response.is_empty() {
            return None;
        }
        Some(Self::AddReply {
            pattern: pattern.to_owned(),
            response: response.to_owned(),
        })
    }

    /// Returns the command name as it appears in help.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Help => "help",
            Self::Rank(_) => "rank",
            Self::Top => "top",
            Self::Stats => "stats",
            Self::Rules => "rules",
            Self::Info => "info",
            Self::Badges(_) => "badges",
            Self::Remind(_) => "remind",
            Self::Reminders => "reminders",
            Self::CancelReminder(_) => "cancelreminder",
            Self::Warn(_) => "warn",
            Self::Warnings(_) => "warnings",
            Self::ClearWarns(_) => "clearwarns",
            Self::Mute(_) => "mute",
            Self::Unmute(_) => "unmute",
            Self::Ban(_) => "ban",
            Self::Unban(_) => "unban",
            Self::AddReply { .. } => "addreply",
            Self::Reload => "reload",
            Self::Backup => "backup",
            Self::Schedule(_) => "schedule",
        }
    }

    /// Whether only configured admins may run the command.
    #[must_use]
    pub const fn requires_admin(&self) -> bool {
        matches!(
            self,
            Self::Warn(_)
                | Self::Warnings(_)
                | Self::ClearWarns(_)
                | Self::Mute(_)
                | Self::Unmute(_)
                | Self::Ban(_)
                | Self::Unban(_)
                | Self::AddReply { .. }
                | Self::Reload
                | Self::Backup
                | Self::Schedule(_)
        )
    }

    /// Public commands with their usage and description.
    #[must_use]
    pub fn public_commands() -> Vec<(&'static str, &'static str)> {
        vec![
            ("/start", "Introduction"),
            ("/help", "Show this help message"),
            ("/rank [@user]", "Show rank and XP"),
            ("/top", "Show the leaderboard"),
            ("/stats", "Show bot statistics"),
            ("/rules", "Show the group rules"),
            ("/info", "Show bot information"),
            ("/badges [@user]", "Show earned badges"),
            ("/remind <10m|2h30m|1d|HH:MM> <text>", "Set a reminder"),
            ("/reminders", "List your reminders"),
            ("/cancelreminder <id>", "Cancel a reminder"),
        ]
    }

    #[must_use]
    pub fn admin_commands() -> Vec<(&'static str, &'static str)> {
        vec![
            ("/warn <user> [reason]", "Warn a user"),
            ("/warnings <user>", "List active warnings"),
            ("/clearwarns <user>", "Clear all warnings"),
            ("/mute <user> [minutes]", "Mute a user"),
            ("/unmute <user>", "Unmute a user"),
            ("/ban <user> [reason]", "Ban a user"),
            ("/unban <user>", "Unban a user"),
            ("/addreply <pattern> | <response>", "Add an auto-reply rule"),
            ("/reload", "Reload content files"),
            ("/backup", "Create a backup now"),
            ("/schedule <once|daily|weekly|monthly> <HH:MM> <text>", "Schedule an announcement"),
        ]
    }
}

impl fmt::Display for BotCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rank(args)
            | Self::Badges(args)
            | Self::Remind(args)
            | Self::CancelReminder(args)
            | Self::Schedule(args)
            | Self::Warn(args)
            | Self::Warnings(args)
            | Self::ClearWarns(args)
            | Self::Mute(args)
            | Self::Unmute(args)
            | Self::Ban(args)
            | Self::Unban(args)
                if !args.is_empty() =>
            {
                write!(f, "{} {args}", self.name())
            }
            Self::AddReply { pattern, response } => write!(f, "addreply {pattern} | {response}"),
            _ => write!(f, "{}", self.name()),
        }
    }
}

/// A chat-side effect a command asks the dispatcher to carry out.
/// `until: None` means permanently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatAction {
    Restrict { user_id: i64, until: Option<DateTime<Utc>> },
    Unrestrict { user_id: i64 },
    Ban { user_id: i64, until: Option<DateTime<Utc>> },
    Unban { user_id: i64 },
    RunBackup,
}

/// Result of command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub success: bool,

    /// Response message to show the user.
    pub message: String,

    pub action: Option<ChatAction>,
}

impl CommandResult {
    /// Creates a successful result.
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            action: None,
        }
    }

    /// Creates a successful result the dispatcher follows up with `action`.
    #[must_use]
    pub fn with_action(message: impl Into<String>, action: ChatAction) -> Self {
        Self {
            success: true,
            message: message.into(),
            action: Some(action),
        }
    }

    /// Creates an error result.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            action: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_public() {
        assert_eq!(BotCommand::parse("/start", None), Some(BotCommand::Start));
        assert_eq!(BotCommand::parse("/h", None), Some(BotCommand::Help));
        assert_eq!(BotCommand::parse("/top", None), Some(BotCommand::Top));
        assert_eq!(
            BotCommand::parse("/rank @ann", None),
            Some(BotCommand::Rank("@ann".to_owned()))
        );
        assert_eq!(BotCommand::parse("/rank", None), Some(BotCommand::Rank(String::new())));
    }

    #[test]
    fn test_parse_bot_suffix() {
        assert_eq!(BotCommand::parse("/help@crush_bot", Some("crush_bot")), Some(BotCommand::Help));
        assert_eq!(BotCommand::parse("/help@Crush_Bot", Some("@crush_bot")), Some(BotCommand::Help));
        assert_eq!(BotCommand::parse("/help@other_bot", Some("crush_bot")), None);
        assert_eq!(BotCommand::parse("/help@anyone", None), Some(BotCommand::Help));
    }

    #[test]
    fn test_parse_admin_args() {
        assert_eq!(
            BotCommand::parse("/mute @bob 10", None),
            Some(BotCommand::Mute("@bob 10".to_owned()))
        );
        assert_eq!(
            BotCommand::parse("/warn   spamming links ", None),
            Some(BotCommand::Warn("spamming links".to_owned()))
        );
        assert!(BotCommand::parse("/backup", None).unwrap().requires_admin());
        assert!(!BotCommand::parse("/stats", None).unwrap().requires_admin());
    }

    #[test]
    fn test_parse_add_reply() {
        assert_eq!(
            BotCommand::parse("/addreply pizza | 🍕 Pizza time!", None),
            Some(BotCommand::AddReply {
                pattern: "pizza".to_owned(),
                response: "🍕 Pizza time!".to_owned(),
            })
        );
        assert_eq!(BotCommand::parse("/addreply pizza", None), None);
        assert_eq!(BotCommand::parse("/addreply | reply", None), None);
    }

    #[test]
    fn test_parse_reminder_commands() {
        assert_eq!(
            BotCommand::parse("/remind 10m stretch", None),
            Some(BotCommand::Remind("10m stretch".to_owned()))
        );
        assert_eq!(BotCommand::parse("/reminders", None), Some(BotCommand::Reminders));
        assert_eq!(
            BotCommand::parse("/cancelreminder 3", None),
            Some(BotCommand::CancelReminder("3".to_owned()))
        );
        let schedule = BotCommand::parse("/schedule daily 09:00 Good morning", None).unwrap();
        assert!(schedule.requires_admin());
        assert!(!BotCommand::Remind(String::new()).requires_admin());
        assert_eq!(BotCommand::parse("/badges", None), Some(BotCommand::Badges(String::new())));
    }

    #[test]
    fn test_parse_case_insensitive() {
        assert_eq!(BotCommand::parse("/STATS", None), Some(BotCommand::Stats));
        assert_eq!(BotCommand::parse("  /Rules  ", None), Some(BotCommand::Rules));
    }

    #[test]
    fn test_parse_not_a_command() {
        assert_eq!(BotCommand::parse("hello", None), None);
        assert_eq!(BotCommand::parse("/unknown", None), None);
        assert_eq!(BotCommand::parse("/", None), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(BotCommand::Mute("@bob 5".to_owned()).to_string(), "mute @bob 5");
        assert_eq!(BotCommand::Rank(String::new()).to_string(), "rank");
    }
}
