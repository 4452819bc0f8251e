//! Routes inbound events through moderation, commands, statistics, ranks,
//! badges, auto-replies and greetings.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::{BotServices, Moment};
use crate::badges::BadgeEvent;
use crate::commands::{ChatAction, CommandContext, CommandHandler, truncate};
use crate::moderation::{Action, UserKey, Verdict};
use crate::ranks::XpSource;
use crate::telegram::{ChatGateway, ChatInfo, IncomingMessage, InboundEvent, Member, TelegramError};

pub struct Dispatcher {
    services: Arc<BotServices>,
    gateway: Arc<dyn ChatGateway>,
    commands: CommandHandler,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("commands", &self.commands)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    #[must_use]
    pub fn new(services: Arc<BotServices>, gateway: Arc<dyn ChatGateway>) -> Self {
        let commands = CommandHandler::new(Arc::clone(&services));
        Self {
            services,
            gateway,
            commands,
        }
    }

    /// Handles events concurrently until the stream closes or `shutdown`
    /// resolves, then waits for the handlers still running.
    pub async fn serve<F>(self: Arc<Self>, mut events: mpsc::Receiver<InboundEvent>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut handlers = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                event = events.recv() => {
                    let Some(event) = event else {
                        warn!("Update stream closed");
                        break;
                    };
                    let dispatcher = Arc::clone(&self);
                    handlers.spawn(async move {
                        dispatcher.handle(event).await;
                    });
                }
                Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(e) = joined {
                        error!("Event handler panicked: {}", e);
                    }
                }
            }
        }

        if !handlers.is_empty() {
            info!("Waiting for {} event handlers to finish", handlers.len());
        }
        while let Some(joined) = handlers.join_next().await {
            if let Err(e) = joined {
                error!("Event handler panicked: {}", e);
            }
        }
    }

    pub async fn handle(&self, event: InboundEvent) {
        self.handle_at(event, Moment::now()).await;
    }

    /// Handles an event as if it arrived at `now`.
    pub async fn handle_at(&self, event: InboundEvent, now: Moment) {
        match event {
            InboundEvent::Message(message) => self.on_message(message, now).await,
            InboundEvent::MemberJoined { chat, member } => self.on_join(&chat, &member, now).await,
            InboundEvent::MemberLeft { chat, member } => self.on_leave(&chat, &member, now).await,
        }
    }

    async fn on_message(&self, message: IncomingMessage, now: Moment) {
        if message.outgoing || message.sender.user_id == self.services.identity.user_id {
            return;
        }
        {
            let mut users = self.services.users.lock().await;
            users.remember(&message.sender);
            if let Some(reply_to) = &message.reply_to {
                users.remember(reply_to);
            }
        }

        let sender_id = message.sender.user_id;
        let is_admin = self.services.settings.is_admin(sender_id);
        if message.chat.is_group() && !is_admin {
            let key = UserKey::new(sender_id, message.chat.id);
            let verdict = self.services.moderator.lock().await.inspect(key, &message.text, now.instant);
            if !verdict.is_allowed() {
                self.apply_verdict(&message, &verdict, now).await;
            }
            if verdict.removes_message() {
                return;
            }
        }

        if message.text.trim_start().starts_with('/') {
            let ctx = CommandContext {
                chat: &message.chat,
                sender: &message.sender,
                reply_to: message.reply_to.as_ref(),
            };
            if let Some(result) = self.commands.try_handle(&message.text, ctx, now).await {
                self.send(message.chat.id, &result.message, Some(message.id)).await;
                if let Some(action) = result.action {
                    self.apply_command_action(&message.chat, action, now).await;
                }
                self.award_xp(&message.chat, &message.sender, XpSource::Command, now).await;
                return;
            }
        }

        self.record_message(&message, now).await;
        self.award_xp(&message.chat, &message.sender, XpSource::Message, now).await;
        self.award_badges(&message.chat, &message.sender, BadgeEvent::Message, now).await;

        if self.services.settings.features.auto_reply && self.addressed_to_bot(&message) {
            let reply = self
                .services
                .auto_reply
                .lock()
                .await
                .handle(&message.text, sender_id, now.instant);
            if let Some(reply) = reply {
                debug!("Auto-reply to {} ({:.2})", sender_id, reply.confidence);
                self.send(message.chat.id, &reply.text, Some(message.id)).await;
            }
        }
    }

    /// Private chats, `@mentions` and replies to the bot.
    fn addressed_to_bot(&self, message: &IncomingMessage) -> bool {
        if !message.chat.is_group() {
            return true;
        }
        let identity = &self.services.identity;
        let mentioned = identity.username.as_ref().is_some_and(|name| {
            message
                .text
                .to_lowercase()
                .contains(&format!("@{}", name.trim_start_matches('@').to_lowercase()))
        });
        let replied = message
            .reply_to
            .as_ref()
            .is_some_and(|m| m.user_id == identity.user_id);
        mentioned || replied
    }

    async fn apply_verdict(&self, message: &IncomingMessage, verdict: &Verdict, now: Moment) {
        let chat_id = message.chat.id;
        let user_id = message.sender.user_id;

        if verdict.removes_message()
            && let Err(e) = self.gateway.delete_message(chat_id, message.id).await
        {
            warn!("Failed to delete message {} in {}: {}", message.id, chat_id, e);
        }

        let until = verdict.duration.and_then(|d| {
            chrono::TimeDelta::from_std(d)
                .ok()
                .and_then(|delta| now.utc().checked_add_signed(delta))
        });
        let applied = match verdict.action {
            Action::Mute => self.gateway.restrict(chat_id, user_id, until).await,
            Action::Ban => self.gateway.ban(chat_id, user_id, until).await,
            Action::Allow | Action::Delete | Action::Warn => Ok(()),
        };
        if let Err(e) = applied {
            warn!("Failed to {} {} in {}: {}", verdict.action.as_str(), user_id, chat_id, e);
        }

        // Messages dropped while a restriction is already in force are not logged again.
        if !verdict.violations.is_empty() {
            let excerpt = self.services.moderator.lock().await.censor(&message.text);
            info!(
                "{} {} in {}: {} ({:?})",
                verdict.action.as_str(),
                user_id,
                chat_id,
                verdict.reasons.join(", "),
                truncate(&excerpt, 60)
            );
            self.services
                .log_action(
                    chat_id,
                    user_id,
                    verdict.action.as_str(),
                    &verdict.reasons.join(", "),
                    verdict.duration.map(|d| d.as_secs()),
                    now.utc(),
                )
                .await;
        }

        if let Some(notice) = verdict.notice(&message.sender.display_name()) {
            self.send(chat_id, &notice, None).await;
        }
    }

    async fn apply_command_action(&self, chat: &ChatInfo, action: ChatAction, now: Moment) {
        let result = match action {
            ChatAction::Restrict { user_id, until } => self.gateway.restrict(chat.id, user_id, until).await,
            ChatAction::Unrestrict { user_id } => self.gateway.unrestrict(chat.id, user_id).await,
            ChatAction::Ban { user_id, until } => self.gateway.ban(chat.id, user_id, until).await,
            ChatAction::Unban { user_id } => self.gateway.unban(chat.id, user_id).await,
            ChatAction::RunBackup => {
                let text = match self.services.backups.run(now.local).await {
                    Ok(report) => report.summary(),
                    Err(e) => {
                        warn!("Backup failed: {}", e);
                        format!("❌ Backup failed: {e}")
                    }
                };
                self.send(chat.id, &text, None).await;
                Ok(())
            }
        };
        if let Err(e) = result {
            warn!("Chat action in {} failed: {}", chat.id, e);
            self.send(chat.id, &format!("❌ Telegram refused the action: {e}"), None)
                .await;
        }
    }

    async fn record_message(&self, message: &IncomingMessage, now: Moment) {
        let chat_id = message.chat.is_group().then_some(message.chat.id);
        let length = message.text.chars().count();
        let result = self.services.stats.lock().await.record_message(
            message.sender.user_id,
            chat_id,
            message.kind.as_str(),
            length,
            now.local,
        );
        if let Err(e) = result {
            warn!("Failed to save statistics: {}", e);
        }
    }

    async fn award_xp(&self, chat: &ChatInfo, member: &Member, source: XpSource, now: Moment) {
        if !self.services.settings.features.ranks {
            return;
        }
        let level_up = {
            let db = self.services.database.lock().await;
            match self.services.ranks.add_xp(&db, member.user_id, source, now.utc()) {
                Ok(change) => self.services.ranks.level_up_message(&member.display_name(), &change),
                Err(e) => {
                    warn!("Failed to award XP to {}: {}", member.user_id, e);
                    None
                }
            }
        };
        if let Some(text) = level_up
            && chat.is_group()
        {
            self.send(chat.id, &text, None).await;
        }
    }

    /// Announces new badges in groups; private chats earn them silently.
    async fn award_badges(&self, chat: &ChatInfo, member: &Member, event: BadgeEvent, now: Moment) {
        if !self.services.settings.features.badges {
            return;
        }
        let badges = &self.services.badges;
        let announcements: Vec<String> = {
            let db = self.services.database.lock().await;
            match badges.record(&db, member.user_id, event, now.local) {
                Ok(earned) => earned
                    .iter()
                    .map(|badge| badges.announcement(&member.display_name(), badge))
                    .collect(),
                Err(e) => {
                    warn!("Failed to update badges of {}: {}", member.user_id, e);
                    Vec::new()
                }
            }
        };
        if chat.is_group() {
            for text in announcements {
                self.send(chat.id, &text, None).await;
            }
        }
    }

    async fn on_join(&self, chat: &ChatInfo, member: &Member, now: Moment) {
        if member.user_id == self.services.identity.user_id {
            info!("Added to chat {} ({})", chat.title, chat.id);
            return;
        }
        self.services.users.lock().await.remember(member);
        self.services.stats.lock().await.record_join(chat.id, now.local);
        if !member.is_bot {
            self.award_xp(chat, member, XpSource::Join, now).await;
        }

        if self.services.settings.features.welcome {
            let text = self.services.welcome.lock().await.render(member, chat, now.local);
            if let Some(text) = text {
                self.send(chat.id, &text, None).await;
            }
        }
        if !member.is_bot {
            self.award_badges(chat, member, BadgeEvent::Joined, now).await;
        }
    }

    async fn on_leave(&self, chat: &ChatInfo, member: &Member, now: Moment) {
        if member.user_id == self.services.identity.user_id {
            return;
        }
        self.services.stats.lock().await.record_leave(chat.id, now.local);

        if self.services.settings.features.goodbye {
            let text = self.services.goodbye.lock().await.render(member, chat, now.local);
            if let Some(text) = text {
                self.send(chat.id, &text, None).await;
            }
        }
    }

    async fn send(&self, chat_id: i64, text: &str, reply_to: Option<i32>) {
        if let Err(e) = self.gateway.send_text(chat_id, text, reply_to).await {
            match e {
                TelegramError::FloodWait(seconds) => warn!("Dropped message to {}: flood wait {}s", chat_id, seconds),
                e => warn!("Failed to send message to {}: {}", chat_id, e),
            }
        }
    }
}
