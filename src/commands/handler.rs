//! Command handler implementation.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tracing::{debug, info, warn};

use super::types::{BotCommand, ChatAction, CommandResult};
use crate::bot::{BotServices, Moment};
use crate::moderation::{Escalation, UserKey, WarningLevel, WarningRequest};
use crate::reminders::{NewReminder, ReminderError, Repeat, parse_when};
use crate::telegram::{ChatInfo, Member};

const DEFAULT_MUTE_MINUTES: u64 = 60;
const MAX_MUTE_MINUTES: u64 = 7 * 24 * 60;
const LEADERBOARD_SIZE: usize = 10;
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M";
const REMIND_USAGE: &str = "Usage: /remind <10m|2h30m|1d|HH:MM> <text>";
const SCHEDULE_USAGE: &str = "Usage: /schedule <once|daily|weekly|monthly> <HH:MM> <text>";

/// Where a command was sent and by whom.
#[derive(Debug, Clone, Copy)]
pub struct CommandContext<'a> {
    pub chat: &'a ChatInfo,
    pub sender: &'a Member,
    /// Author of the replied-to message; the target of moderation commands.
    pub reply_to: Option<&'a Member>,
}

/// A resolved command target.
#[derive(Debug, Clone)]
struct Target {
    user_id: i64,
    name: String,
}

/// Handles bot commands against the shared services.
#[derive(Debug)]
pub struct CommandHandler {
    services: Arc<BotServices>,
}

impl CommandHandler {
    #[must_use]
    pub fn new(services: Arc<BotServices>) -> Self {
        Self { services }
    }

    /// Tries to parse and execute a command from a message.
    ///
    /// Returns `None` if the message is not a command.
    pub async fn try_handle(&self, text: &str, ctx: CommandContext<'_>, now: Moment) -> Option<CommandResult> {
        let command = BotCommand::parse(text, self.services.identity.username.as_deref())?;

        debug!("Handling command: {}", command);
        let name = command.name();
        let result = if command.requires_admin() && !self.services.settings.is_admin(ctx.sender.user_id) {
            warn!("User {} tried admin command /{}", ctx.sender.user_id, name);
            CommandResult::error("⛔ This command is for admins only.")
        } else {
            self.execute(command, ctx, now).await
        };
        info!("Command /{} result: success={}", name, result.success);

        self.services
            .stats
            .lock()
            .await
            .record_command(ctx.sender.user_id, name, result.success);
        Some(result)
    }

    /// Executes a parsed command.
    async fn execute(&self, command: BotCommand, ctx: CommandContext<'_>, now: Moment) -> CommandResult {
        match command {
            BotCommand::Start => self.handle_start(ctx),
            BotCommand::Help => self.handle_help(ctx),
            BotCommand::Rank(args) => self.handle_rank(&args, ctx, now).await,
            BotCommand::Top => self.handle_top().await,
            BotCommand::Stats => self.handle_stats(ctx, now).await,
            BotCommand::Rules => self.handle_rules(),
            BotCommand::Info => self.handle_info().await,
            BotCommand::Badges(args) => self.handle_badges(&args, ctx).await,
            BotCommand::Remind(args) => self.handle_remind(&args, ctx, now).await,
            BotCommand::Reminders => self.handle_reminders(ctx).await,
            BotCommand::CancelReminder(args) => self.handle_cancel_reminder(&args, ctx).await,
            BotCommand::Warn(args) => self.handle_warn(&args, ctx, now).await,
            BotCommand::Warnings(args) => self.handle_warnings(&args, ctx, now).await,
            BotCommand::ClearWarns(args) => self.handle_clear_warns(&args, ctx).await,
            BotCommand::Mute(args) => self.handle_mute(&args, ctx, now).await,
            BotCommand::Unmute(args) => self.handle_unmute(&args, ctx, now).await,
            BotCommand::Ban(args) => self.handle_ban(&args, ctx, now).await,
            BotCommand::Unban(args) => self.handle_unban(&args, ctx, now).await,
            BotCommand::AddReply { pattern, response } => self.handle_add_reply(&pattern, &response).await,
            BotCommand::Reload => self.handle_reload().await,
            BotCommand::Backup => CommandResult::with_action("⏳ Creating backup...", ChatAction::RunBackup),
            BotCommand::Schedule(args) => self.handle_schedule(&args, ctx, now).await,
        }
    }

    /// Picks the target from the replied-to message, or from the first
    /// argument. Returns the target and the remaining arguments.
    async fn resolve_target<'a>(&self, args: &'a str, ctx: CommandContext<'_>) -> Result<(Target, &'a str), String> {
        if let Some(member) = ctx.reply_to {
            self.services.users.lock().await.remember(member);
            return Ok((
                Target {
                    user_id: member.user_id,
                    name: member.display_name(),
                },
                args,
            ));
        }

        let (first, rest) = args.split_once(char::is_whitespace).unwrap_or((args, ""));
        if first.is_empty() {
            return Err("Specify a user: reply to their message or pass @username or an id.".to_owned());
        }
        let users = self.services.users.lock().await;
        let user_id = users
            .resolve(first)
            .ok_or_else(|| format!("Unknown user: {first}"))?;
        Ok((
            Target {
                user_id,
                name: users.name(user_id),
            },
            rest.trim(),
        ))
    }

    /// Resolves a moderation target, refusing admins.
    async fn moderation_target<'a>(
        &self,
        args: &'a str,
        ctx: CommandContext<'_>,
    ) -> Result<(Target, &'a str), CommandResult> {
        let (target, rest) = self
            .resolve_target(args, ctx)
            .await
            .map_err(CommandResult::error)?;
        if self.services.settings.is_admin(target.user_id) {
            return Err(CommandResult::error("Admins cannot be moderated."));
        }
        Ok((target, rest))
    }

    fn handle_start(&self, ctx: CommandContext<'_>) -> CommandResult {
        CommandResult::success(format!(
            "👋 Hi {}! I'm {}.\nI keep this group tidy, greet new members, answer common questions and track ranks.\nSend /help to see what I can do.",
            ctx.sender.display_name(),
            self.bot_name()
        ))
    }

    fn handle_help(&self, ctx: CommandContext<'_>) -> CommandResult {
        let mut lines = vec!["📖 Commands:".to_owned()];
        for (usage, desc) in BotCommand::public_commands() {
            lines.push(format!("  {usage} - {desc}"));
        }
        if self.services.settings.is_admin(ctx.sender.user_id) {
            lines.push(String::new());
            lines.push("🛡 Admin commands:".to_owned());
            for (usage, desc) in BotCommand::admin_commands() {
                lines.push(format!("  {usage} - {desc}"));
            }
        }
        CommandResult::success(lines.join("\n"))
    }

    async fn handle_rank(&self, args: &str, ctx: CommandContext<'_>, now: Moment) -> CommandResult {
        if !self.services.settings.features.ranks {
            return CommandResult::error("Ranks are disabled.");
        }

        let target = if args.is_empty() && ctx.reply_to.is_none() {
            Target {
                user_id: ctx.sender.user_id,
                name: ctx.sender.display_name(),
            }
        } else {
            match self.resolve_target(args, ctx).await {
                Ok((target, _)) => target,
                Err(e) => return CommandResult::error(e),
            }
        };

        let db = self.services.database.lock().await;
        match self.services.ranks.rank_of(&db, target.user_id, now.utc()) {
            Ok(record) => CommandResult::success(self.services.ranks.describe(&target.name, &record)),
            Err(e) => {
                warn!("Failed to load rank of {}: {}", target.user_id, e);
                CommandResult::error("Could not load the rank right now.")
            }
        }
    }

    async fn handle_top(&self) -> CommandResult {
        if !self.services.settings.features.ranks {
            return CommandResult::error("Ranks are disabled.");
        }

        let records = {
            let db = self.services.database.lock().await;
            match self.services.ranks.leaderboard(&db, LEADERBOARD_SIZE) {
                Ok(records) => records,
                Err(e) => {
                    warn!("Failed to load leaderboard: {}", e);
                    return CommandResult::error("Could not load the leaderboard right now.");
                }
            }
        };
        if records.is_empty() {
            return CommandResult::success("🏆 Nobody has earned XP yet.");
        }

        let users = self.services.users.lock().await;
        let mut text = "🏆 Leaderboard".to_owned();
        for (i, record) in records.iter().enumerate() {
            let place = match i {
                0 => "🥇".to_owned(),
                1 => "🥈".to_owned(),
                2 => "🥉".to_owned(),
                _ => format!("{}.", i + 1),
            };
            let _ = write!(
                text,
                "\n{place} {} - level {} ({} XP)",
                users.name(record.user_id),
                record.level,
                record.xp
            );
        }
        CommandResult::success(text)
    }

    async fn handle_stats(&self, ctx: CommandContext<'_>, now: Moment) -> CommandResult {
        let stats = self.services.stats.lock().await;
        let mut text = stats.summary(now.local);
        if let Some(chat) = stats.chat(ctx.chat.id) {
            let _ = write!(
                text,
                "\nThis chat: {} messages, {} active users",
                chat.total_messages,
                chat.active_users.len()
            );
        }
        let _ = write!(
            text,
            "\nYour activity score: {:.0}/100",
            stats.activity_score(ctx.sender.user_id, now.local)
        );
        CommandResult::success(text)
    }

    fn handle_rules(&self) -> CommandResult {
        let features = self.services.settings.features;
        let mut lines = vec![
            "📜 Group rules".to_owned(),
            "1. Be respectful to other members.".to_owned(),
        ];
        if features.anti_flood || features.anti_spam {
            lines.push("2. No flooding or spam, including repeated messages and ALL CAPS.".to_owned());
        }
        if features.anti_links {
            lines.push("3. Links only from trusted sites; shorteners are removed.".to_owned());
        }
        if features.anti_bad_words {
            lines.push("4. No insults, slurs or scams.".to_owned());
        }
        lines.push("Violations earn warnings, and warnings add up to mutes and bans.".to_owned());
        CommandResult::success(lines.join("\n"))
    }

    async fn handle_info(&self) -> CommandResult {
        let rules = self.services.auto_reply.lock().await.rule_count();
        CommandResult::success(format!(
            "🤖 {} v{}\n\
             Uptime: {}\n\
             Auto-reply rules: {rules}\n\
             Admins: {}",
            self.bot_name(),
            env!("CARGO_PKG_VERSION"),
            format_duration(self.services.started_at.elapsed()),
            self.services.settings.admin_ids.len(),
        ))
    }

    async fn handle_badges(&self, args: &str, ctx: CommandContext<'_>) -> CommandResult {
        if !self.services.settings.features.badges {
            return CommandResult::error("Badges are disabled.");
        }
        let target = if args.is_empty() && ctx.reply_to.is_none() {
            Target {
                user_id: ctx.sender.user_id,
                name: ctx.sender.display_name(),
            }
        } else {
            match self.resolve_target(args, ctx).await {
                Ok((target, _)) => target,
                Err(e) => return CommandResult::error(e),
            }
        };

        let db = self.services.database.lock().await;
        match self.services.badges.describe(&db, target.user_id, &target.name) {
            Ok(text) => CommandResult::success(text),
            Err(e) => {
                warn!("Failed to load badges of {}: {}", target.user_id, e);
                CommandResult::error("Could not load badges right now.")
            }
        }
    }

    async fn handle_remind(&self, args: &str, ctx: CommandContext<'_>, now: Moment) -> CommandResult {
        if !self.services.settings.features.reminders {
            return CommandResult::error("Reminders are disabled.");
        }
        let Some((when, text)) = args.split_once(char::is_whitespace) else {
            return CommandResult::error(REMIND_USAGE);
        };
        let Some(due) = parse_when(when, now.local) else {
            return CommandResult::error(format!("Could not read the time \"{when}\".\n{REMIND_USAGE}"));
        };

        let reminder = NewReminder {
            user_id: ctx.sender.user_id,
            chat_id: ctx.chat.id,
            text,
            due,
            repeat: None,
            announcement: false,
        };
        let created = {
            let db = self.services.database.lock().await;
            self.services.reminders.create(&db, &reminder, now.local)
        };
        match created {
            Ok(id) => CommandResult::success(format!(
                "⏰ Reminder #{id} set for {} (in {}).",
                due.format(TIME_FORMAT),
                format_duration((due - now.local).to_std().unwrap_or_default())
            )),
            Err(e) => reminder_error(&e),
        }
    }

    async fn handle_reminders(&self, ctx: CommandContext<'_>) -> CommandResult {
        let listed = {
            let db = self.services.database.lock().await;
            self.services.reminders.list(&db, ctx.sender.user_id)
        };
        let reminders = match listed {
            Ok(reminders) => reminders,
            Err(e) => return reminder_error(&e),
        };
        if reminders.is_empty() {
            return CommandResult::success("⏰ You have no reminders.");
        }

        let mut text = format!("⏰ Your reminders ({}):", reminders.len());
        for reminder in &reminders {
            let repeat = reminder
                .repeat
                .as_deref()
                .map_or_else(String::new, |r| format!(" [{r}]"));
            let _ = write!(
                text,
                "\n#{} {}{repeat} - {}",
                reminder.id,
                reminder.due_at.with_timezone(&Local).format(TIME_FORMAT),
                truncate(&reminder.text, 40)
            );
        }
        CommandResult::success(text)
    }

    async fn handle_cancel_reminder(&self, args: &str, ctx: CommandContext<'_>) -> CommandResult {
        let Ok(id) = args.trim().trim_start_matches('#').parse::<i64>() else {
            return CommandResult::error("Usage: /cancelreminder <id>");
        };
        // Admins may cancel announcements and anyone's reminders.
        let owner = (!self.services.settings.is_admin(ctx.sender.user_id)).then_some(ctx.sender.user_id);
        let cancelled = {
            let db = self.services.database.lock().await;
            self.services.reminders.cancel(&db, id, owner)
        };
        match cancelled {
            Ok(true) => CommandResult::success(format!("🗑 Reminder #{id} cancelled.")),
            Ok(false) => CommandResult::error(format!("No reminder #{id} to cancel.")),
            Err(e) => reminder_error(&e),
        }
    }

    async fn handle_schedule(&self, args: &str, ctx: CommandContext<'_>, now: Moment) -> CommandResult {
        let mut parts = args.splitn(3, char::is_whitespace);
        let (Some(kind), Some(time), Some(text)) = (parts.next(), parts.next(), parts.next()) else {
            return CommandResult::error(SCHEDULE_USAGE);
        };
        let repeat = match kind.to_lowercase().as_str() {
            "once" => None,
            other => match Repeat::parse(other) {
                Some(repeat) => Some(repeat),
                None => return CommandResult::error(SCHEDULE_USAGE),
            },
        };
        let Some(due) = parse_when(time, now.local) else {
            return CommandResult::error(format!("Could not read the time \"{time}\".\n{SCHEDULE_USAGE}"));
        };

        let announcement = NewReminder {
            user_id: ctx.sender.user_id,
            chat_id: ctx.chat.id,
            text,
            due,
            repeat,
            announcement: true,
        };
        let created = {
            let db = self.services.database.lock().await;
            self.services.reminders.create(&db, &announcement, now.local)
        };
        match created {
            Ok(id) => CommandResult::success(format!(
                "📅 Announcement #{id} scheduled {} starting {}.",
                repeat.map_or("once", Repeat::as_str),
                due.format(TIME_FORMAT)
            )),
            Err(e) => reminder_error(&e),
        }
    }

    async fn handle_warn(&self, args: &str, ctx: CommandContext<'_>, now: Moment) -> CommandResult {
        let (target, rest) = match self.moderation_target(args, ctx).await {
            Ok(resolved) => resolved,
            Err(result) => return result,
        };
        let reason = if rest.is_empty() { "No reason given" } else { rest };

        let key = UserKey::new(target.user_id, ctx.chat.id);
        let request = WarningRequest::new(reason, WarningLevel::Warning).issued_by(ctx.sender.user_id);
        let (warning, escalation, points) = {
            let mut moderator = self.services.moderator.lock().await;
            let (warning, escalation) = moderator.warn(key, request, now.instant);
            (warning, escalation, moderator.warning_points(key, now.instant))
        };
        self.services
            .log_action(ctx.chat.id, target.user_id, "warn", reason, None, now.utc())
            .await;

        let mut message = format!(
            "⚠️ {} warned: {reason}\nWarning {} ({points} points total)",
            target.name, warning.id
        );
        match escalation {
            Escalation::None => CommandResult::success(message),
            Escalation::Mute(d) => {
                let _ = write!(message, "\n🔇 Muted for {}", format_duration(d));
                self.services
                    .log_action(ctx.chat.id, target.user_id, "mute", "warning points", Some(d.as_secs()), now.utc())
                    .await;
                CommandResult::with_action(
                    message,
                    ChatAction::Restrict {
                        user_id: target.user_id,
                        until: Some(until(now, d)),
                    },
                )
            }
            Escalation::Ban(d) => {
                let _ = write!(message, "\n🔨 Banned for {}", format_duration(d));
                self.services
                    .log_action(ctx.chat.id, target.user_id, "ban", "warning points", Some(d.as_secs()), now.utc())
                    .await;
                CommandResult::with_action(
                    message,
                    ChatAction::Ban {
                        user_id: target.user_id,
                        until: Some(until(now, d)),
                    },
                )
            }
        }
    }

    async fn handle_warnings(&self, args: &str, ctx: CommandContext<'_>, now: Moment) -> CommandResult {
        let target = match self.resolve_target(args, ctx).await {
            Ok((target, _)) => target,
            Err(e) => return CommandResult::error(e),
        };
        let key = UserKey::new(target.user_id, ctx.chat.id);

        let moderator = self.services.moderator.lock().await;
        let warnings = moderator.warnings(key, now.instant);
        if warnings.is_empty() {
            return CommandResult::success(format!("✅ {} has no active warnings.", target.name));
        }
        let mut text = format!(
            "⚠️ Warnings of {} ({} points):",
            target.name,
            moderator.warning_points(key, now.instant)
        );
        for warning in warnings {
            let _ = write!(
                text,
                "\n• [{}] {} ({} pts)",
                warning.level.as_str(),
                truncate(&warning.reason, 40),
                warning.points
            );
        }
        CommandResult::success(text)
    }

    async fn handle_clear_warns(&self, args: &str, ctx: CommandContext<'_>) -> CommandResult {
        let target = match self.resolve_target(args, ctx).await {
            Ok((target, _)) => target,
            Err(e) => return CommandResult::error(e),
        };
        let cleared = self
            .services
            .moderator
            .lock()
            .await
            .clear_warnings(UserKey::new(target.user_id, ctx.chat.id));
        CommandResult::success(format!("🧹 Cleared {cleared} warnings of {}.", target.name))
    }

    async fn handle_mute(&self, args: &str, ctx: CommandContext<'_>, now: Moment) -> CommandResult {
        let (target, rest) = match self.moderation_target(args, ctx).await {
            Ok(resolved) => resolved,
            Err(result) => return result,
        };
        let minutes = if rest.is_empty() {
            DEFAULT_MUTE_MINUTES
        } else {
            match rest.split_whitespace().next().and_then(|m| m.parse::<u64>().ok()) {
                Some(m) if m > 0 => m.min(MAX_MUTE_MINUTES),
                _ => return CommandResult::error("Usage: /mute <user> [minutes]"),
            }
        };
        let duration = Duration::from_secs(minutes * 60);

        self.services.moderator.lock().await.mute(
            UserKey::new(target.user_id, ctx.chat.id),
            duration,
            now.instant,
        );
        self.services
            .log_action(ctx.chat.id, target.user_id, "mute", "admin", Some(duration.as_secs()), now.utc())
            .await;

        CommandResult::with_action(
            format!("🔇 {} muted for {}.", target.name, format_duration(duration)),
            ChatAction::Restrict {
                user_id: target.user_id,
                until: Some(until(now, duration)),
            },
        )
    }

    async fn handle_unmute(&self, args: &str, ctx: CommandContext<'_>, now: Moment) -> CommandResult {
        let target = match self.resolve_target(args, ctx).await {
            Ok((target, _)) => target,
            Err(e) => return CommandResult::error(e),
        };
        self.services
            .moderator
            .lock()
            .await
            .unmute(UserKey::new(target.user_id, ctx.chat.id));
        self.services
            .log_action(ctx.chat.id, target.user_id, "unmute", "admin", None, now.utc())
            .await;
        CommandResult::with_action(
            format!("🔊 {} can write again.", target.name),
            ChatAction::Unrestrict {
                user_id: target.user_id,
            },
        )
    }

    async fn handle_ban(&self, args: &str, ctx: CommandContext<'_>, now: Moment) -> CommandResult {
        let (target, rest) = match self.moderation_target(args, ctx).await {
            Ok(resolved) => resolved,
            Err(result) => return result,
        };
        let reason = if rest.is_empty() { "No reason given" } else { rest };

        self.services
            .moderator
            .lock()
            .await
            .ban(UserKey::new(target.user_id, ctx.chat.id), None, now.instant);
        self.services
            .log_action(ctx.chat.id, target.user_id, "ban", reason, None, now.utc())
            .await;

        CommandResult::with_action(
            format!("🔨 {} banned: {reason}", target.name),
            ChatAction::Ban {
                user_id: target.user_id,
                until: None,
            },
        )
    }

    async fn handle_unban(&self, args: &str, ctx: CommandContext<'_>, now: Moment) -> CommandResult {
        let target = match self.resolve_target(args, ctx).await {
            Ok((target, _)) => target,
            Err(e) => return CommandResult::error(e),
        };
        self.services
            .moderator
            .lock()
            .await
            .unban(UserKey::new(target.user_id, ctx.chat.id));
        self.services
            .log_action(ctx.chat.id, target.user_id, "unban", "admin", None, now.utc())
            .await;
        CommandResult::with_action(
            format!("✅ {} unbanned.", target.name),
            ChatAction::Unban {
                user_id: target.user_id,
            },
        )
    }

    async fn handle_add_reply(&self, pattern: &str, response: &str) -> CommandResult {
        match self.services.auto_reply.lock().await.add_rule(pattern, response) {
            Ok(id) => CommandResult::success(format!(
                "✓ Added auto-reply [{id}]: \"{}\" → \"{}\"",
                truncate(pattern, 30),
                truncate(response, 30)
            )),
            Err(e) => {
                warn!("Failed to save auto-reply rule: {}", e);
                CommandResult::error(format!("Failed to save the rule: {e}"))
            }
        }
    }

    async fn handle_reload(&self) -> CommandResult {
        match self.services.reload_content().await {
            Ok(content) => CommandResult::success(format!(
                "✓ Content reloaded: {} reply rules, {} welcome and {} goodbye templates",
                content.auto_reply.patterns.len(),
                content.welcome.templates.len(),
                content.goodbye.templates.len()
            )),
            Err(e) => CommandResult::error(format!("Reload failed: {e}")),
        }
    }

    fn bot_name(&self) -> &str {
        if self.services.identity.name.is_empty() {
            "Crush Bot"
        } else {
            &self.services.identity.name
        }
    }
}

fn reminder_error(error: &ReminderError) -> CommandResult {
    match error {
        ReminderError::Storage(e) => {
            warn!("Reminder storage failed: {}", e);
            CommandResult::error("Could not save the reminder right now.")
        }
        e => CommandResult::error(format!("❌ {e}")),
    }
}

fn until(now: Moment, duration: Duration) -> chrono::DateTime<chrono::Utc> {
    let delta = chrono::TimeDelta::from_std(duration).unwrap_or(chrono::TimeDelta::MAX);
    now.utc().checked_add_signed(delta).unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC)
}

/// Truncates a string to a maximum length, adding "..." if truncated.
#[must_use]
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_owned()
    } else {
        format!("{}...", s.chars().take(max_len).collect::<String>())
    }
}

/// Formats a duration compactly, e.g. `45s`, `15m`, `2h 5m`, `3d`.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86_400 {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        if mins == 0 {
            format!("{hours}h")
        } else {
            format!("{hours}h {mins}m")
        }
    } else {
        let days = secs / 86_400;
        let hours = (secs % 86_400) / 3600;
        if hours == 0 {
            format!("{days}d")
        } else {
            format!("{days}d {hours}h")
        }
    }
}
