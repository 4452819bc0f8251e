//! Drives the dispatcher end-to-end against a recording gateway.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::mpsc;

use crush_bot::backup::{BackupManager, BackupPlan};
use crush_bot::bot::{BotIdentity, BotServices, Dispatcher, Moment};
use crush_bot::config::{BotSettings, ContentConfig};
use crush_bot::stats::StatsEngine;
use crush_bot::storage::{DataLayout, Database};
use crush_bot::telegram::{
    ChatGateway, ChatInfo, ChatKind, InboundEvent, IncomingMessage, Member, MessageKind, TelegramError,
};

const ADMIN: i64 = 1;
const GROUP: i64 = -100;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Send { chat_id: i64, text: String, reply_to: Option<i32> },
    Delete { chat_id: i64, message_id: i32 },
    Restrict { chat_id: i64, user_id: i64, timed: bool },
    Unrestrict { chat_id: i64, user_id: i64 },
    Ban { chat_id: i64, user_id: i64 },
    Unban { chat_id: i64, user_id: i64 },
}

#[derive(Debug, Default)]
struct Recorder {
    calls: Mutex<Vec<Call>>,
}

impl Recorder {
    fn take(&self) -> Vec<Call> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    fn push(&self, call: Call) -> Result<(), TelegramError> {
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

#[async_trait]
impl ChatGateway for Recorder {
    async fn send_text(&self, chat_id: i64, text: &str, reply_to: Option<i32>) -> Result<(), TelegramError> {
        self.push(Call::Send {
            chat_id,
            text: text.to_owned(),
            reply_to,
        })
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<(), TelegramError> {
        self.push(Call::Delete { chat_id, message_id })
    }

    async fn restrict(&self, chat_id: i64, user_id: i64, until: Option<DateTime<Utc>>) -> Result<(), TelegramError> {
        self.push(Call::Restrict {
            chat_id,
            user_id,
            timed: until.is_some(),
        })
    }

    async fn unrestrict(&self, chat_id: i64, user_id: i64) -> Result<(), TelegramError> {
        self.push(Call::Unrestrict { chat_id, user_id })
    }

    async fn ban(&self, chat_id: i64, user_id: i64, _until: Option<DateTime<Utc>>) -> Result<(), TelegramError> {
        self.push(Call::Ban { chat_id, user_id })
    }

    async fn unban(&self, chat_id: i64, user_id: i64) -> Result<(), TelegramError> {
        self.push(Call::Unban { chat_id, user_id })
    }
}

fn harness(dir: &Path) -> (Arc<BotServices>, Arc<Recorder>, Dispatcher) {
    harness_with(dir, |_| {})
}

fn harness_with(dir: &Path, configure: impl FnOnce(&mut BotSettings)) -> (Arc<BotServices>, Arc<Recorder>, Dispatcher) {
    let mut settings = BotSettings {
        admin_ids: vec![ADMIN],
        data_dir: dir.join("data"),
        content_dir: dir.join("content"),
        ..BotSettings::default()
    };
    configure(&mut settings);
    let layout = DataLayout::new(&settings.data_dir);
    layout.ensure().unwrap();
    let stats = StatsEngine::load(layout.usage_file()).unwrap();
    let backups = BackupManager::new(BackupPlan::for_layout(
        &layout,
        &settings.content_dir,
        &dir.join(".env"),
        settings.backup_retention_days,
    ));
    let identity = BotIdentity {
        user_id: 999,
        username: Some("crush_bot".to_owned()),
        name: "Crush".to_owned(),
    };
    let services = Arc::new(BotServices::new(
        settings,
        identity,
        ContentConfig::example(),
        Database::open_in_memory().unwrap(),
        stats,
        backups,
    ));
    let recorder = Arc::new(Recorder::default());
    let gateway: Arc<dyn ChatGateway> = Arc::clone(&recorder) as Arc<dyn ChatGateway>;
    let dispatcher = Dispatcher::new(Arc::clone(&services), gateway);
    (services, recorder, dispatcher)
}

fn group() -> ChatInfo {
    ChatInfo {
        id: GROUP,
        kind: ChatKind::Group,
        title: "Crushers".to_owned(),
        member_count: None,
    }
}

fn private(user_id: i64) -> ChatInfo {
    ChatInfo {
        id: user_id,
        kind: ChatKind::Private,
        title: String::new(),
        member_count: None,
    }
}

fn member(user_id: i64, name: &str) -> Member {
    Member {
        user_id,
        first_name: name.to_owned(),
        last_name: None,
        username: Some(name.to_lowercase()),
        is_bot: false,
    }
}

fn message(id: i32, chat: ChatInfo, sender: Member, text: &str) -> IncomingMessage {
    IncomingMessage {
        id,
        chat,
        sender,
        text: text.to_owned(),
        kind: MessageKind::Text,
        outgoing: false,
        reply_to: None,
    }
}

fn sent_texts(calls: &[Call]) -> Vec<&str> {
    calls
        .iter()
        .filter_map(|c| match c {
            Call::Send { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_join_sends_welcome_and_counts_member() {
    let dir = tempfile::tempdir().unwrap();
    let (services, recorder, dispatcher) = harness(dir.path());

    dispatcher
        .handle(InboundEvent::MemberJoined {
            chat: group(),
            member: member(42, "Alice"),
        })
        .await;

    let calls = recorder.take();
    let texts = sent_texts(&calls);
    assert_eq!(texts.len(), 2);
    assert!(texts[0].contains("Welcome Alice"));
    assert!(texts[1].contains("First Hello"));

    let stats = services.stats.lock().await;
    assert_eq!(stats.chat(GROUP).map(|c| c.joins), Some(1));
}

#[tokio::test]
async fn test_blocked_link_is_deleted_and_logged() {
    let dir = tempfile::tempdir().unwrap();
    let (services, recorder, dispatcher) = harness(dir.path());

    let msg = message(7, group(), member(42, "Alice"), "free stuff at bit.ly/win");
    dispatcher.handle(InboundEvent::Message(msg)).await;

    let calls = recorder.take();
    assert!(calls.contains(&Call::Delete {
        chat_id: GROUP,
        message_id: 7
    }));

    let db = services.database.lock().await;
    let actions = db.recent_actions(GROUP, 10).unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].user_id, 42);
    drop(db);

    // Removed messages do not count towards statistics.
    let stats = services.stats.lock().await;
    assert!(stats.chat(GROUP).is_none_or(|c| c.total_messages == 0));
}

#[tokio::test]
async fn test_admins_skip_moderation() {
    let dir = tempfile::tempdir().unwrap();
    let (_services, recorder, dispatcher) = harness(dir.path());

    let msg = message(8, group(), member(ADMIN, "Boss"), "see bit.ly/notes");
    dispatcher.handle(InboundEvent::Message(msg)).await;

    let calls = recorder.take();
    assert!(!calls.iter().any(|c| matches!(c, Call::Delete { .. })));
}

#[tokio::test]
async fn test_private_message_gets_auto_reply() {
    let dir = tempfile::tempdir().unwrap();
    let (_services, recorder, dispatcher) = harness(dir.path());

    let msg = message(3, private(42), member(42, "Alice"), "hello there");
    dispatcher.handle(InboundEvent::Message(msg)).await;

    let calls = recorder.take();
    assert!(calls.iter().any(|c| matches!(
        c,
        Call::Send { chat_id: 42, reply_to: Some(3), text } if text.contains("Hello")
    )));
}

#[tokio::test]
async fn test_group_chatter_is_not_answered() {
    let dir = tempfile::tempdir().unwrap();
    let (services, recorder, dispatcher) = harness(dir.path());

    let msg = message(4, group(), member(42, "Alice"), "hello everyone");
    dispatcher.handle(InboundEvent::Message(msg)).await;

    // Only the first-message badge is announced.
    let calls = recorder.take();
    let texts = sent_texts(&calls);
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("First Words"));
    let stats = services.stats.lock().await;
    assert_eq!(stats.chat(GROUP).map(|c| c.total_messages), Some(1));
    drop(stats);

    let db = services.database.lock().await;
    let rank = db.load_rank(42).unwrap().unwrap();
    assert!(rank.xp > 0);
}

#[tokio::test]
async fn test_admin_mute_by_reply_restricts_target() {
    let dir = tempfile::tempdir().unwrap();
    let (_services, recorder, dispatcher) = harness(dir.path());

    let mut msg = message(10, group(), member(ADMIN, "Boss"), "/mute 15");
    msg.reply_to = Some(member(42, "Alice"));
    dispatcher.handle(InboundEvent::Message(msg)).await;

    let calls = recorder.take();
    assert!(calls.contains(&Call::Restrict {
        chat_id: GROUP,
        user_id: 42,
        timed: true
    }));
    let texts = sent_texts(&calls);
    assert!(texts.iter().any(|t| t.contains("15m")));

    // Later messages from the muted user are removed.
    let msg = message(11, group(), member(42, "Alice"), "am I muted?");
    dispatcher
        .handle_at(InboundEvent::Message(msg), Moment::now())
        .await;
    assert!(recorder.take().contains(&Call::Delete {
        chat_id: GROUP,
        message_id: 11
    }));
}

#[tokio::test]
async fn test_admin_command_refused_for_regular_user() {
    let dir = tempfile::tempdir().unwrap();
    let (_services, recorder, dispatcher) = harness(dir.path());

    let mut msg = message(12, group(), member(42, "Alice"), "/ban");
    msg.reply_to = Some(member(43, "Bob"));
    dispatcher.handle(InboundEvent::Message(msg)).await;

    let calls = recorder.take();
    assert!(!calls.iter().any(|c| matches!(c, Call::Ban { .. })));
    assert_eq!(sent_texts(&calls).len(), 1);
}

#[tokio::test]
async fn test_outgoing_and_own_messages_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let (_services, recorder, dispatcher) = harness(dir.path());

    let mut own = message(20, private(42), member(999, "Crush"), "hello");
    own.sender.is_bot = true;
    dispatcher.handle(InboundEvent::Message(own)).await;

    let mut outgoing = message(21, private(42), member(42, "Alice"), "hello");
    outgoing.outgoing = true;
    dispatcher.handle(InboundEvent::Message(outgoing)).await;

    assert!(recorder.take().is_empty());
}

#[tokio::test]
async fn test_leave_sends_goodbye_and_counts_leave() {
    let dir = tempfile::tempdir().unwrap();
    let (services, recorder, dispatcher) = harness(dir.path());

    dispatcher
        .handle(InboundEvent::MemberLeft {
            chat: group(),
            member: member(42, "Alice"),
        })
        .await;

    let calls = recorder.take();
    assert_eq!(sent_texts(&calls), vec!["👋 Alice left Crushers. Take care!"]);
    let stats = services.stats.lock().await;
    assert_eq!(stats.chat(GROUP).map(|c| c.leaves), Some(1));
}

#[tokio::test]
async fn test_admin_backup_command_reports_archive() {
    let dir = tempfile::tempdir().unwrap();
    let (_services, recorder, dispatcher) = harness(dir.path());

    let msg = message(30, group(), member(ADMIN, "Boss"), "/backup");
    dispatcher.handle(InboundEvent::Message(msg)).await;

    let calls = recorder.take();
    let texts = sent_texts(&calls);
    assert!(texts.iter().any(|t| t.contains("Creating backup")));
    assert!(texts.iter().any(|t| t.contains("💾 Backup created")));
    assert!(dir.path().join("data").join("backups").read_dir().unwrap().next().is_some());
}

#[tokio::test]
async fn test_warned_message_is_kept() {
    let dir = tempfile::tempdir().unwrap();
    let (services, recorder, dispatcher) = harness(dir.path());

    let first = Moment::now();
    let mut second = first;
    second.instant += Duration::from_millis(1500);
    second.local += TimeDelta::milliseconds(1500);

    dispatcher
        .handle_at(InboundEvent::Message(message(40, group(), member(42, "Alice"), "good morning")), first)
        .await;
    dispatcher
        .handle_at(
            InboundEvent::Message(message(41, group(), member(42, "Alice"), "how is everyone")),
            second,
        )
        .await;

    let calls = recorder.take();
    assert!(!calls.iter().any(|c| matches!(c, Call::Delete { .. })));
    assert!(sent_texts(&calls).iter().any(|t| t.contains("please follow the rules")));

    // A warned message still counts.
    let stats = services.stats.lock().await;
    assert_eq!(stats.chat(GROUP).map(|c| c.total_messages), Some(2));
}

#[tokio::test]
async fn test_badges_can_be_switched_off() {
    let dir = tempfile::tempdir().unwrap();
    let (services, recorder, dispatcher) = harness_with(dir.path(), |s| s.features.badges = false);

    let msg = message(50, group(), member(42, "Alice"), "hello everyone");
    dispatcher.handle(InboundEvent::Message(msg)).await;

    assert!(sent_texts(&recorder.take()).is_empty());
    let db = services.database.lock().await;
    assert!(db.badges_of(42).unwrap().is_empty());
}

#[tokio::test]
async fn test_serve_handles_every_event_before_returning() {
    let dir = tempfile::tempdir().unwrap();
    let (services, _recorder, dispatcher) = harness(dir.path());

    let (tx, rx) = mpsc::channel(32);
    for user_id in 100..120 {
        let msg = message(user_id as i32, group(), member(user_id, "Member"), "hi all");
        tx.send(InboundEvent::Message(msg)).await.unwrap();
    }
    drop(tx);

    Arc::new(dispatcher).serve(rx, std::future::pending::<()>()).await;

    let stats = services.stats.lock().await;
    assert_eq!(stats.chat(GROUP).map(|c| c.total_messages), Some(20));
}
