//! The bot runtime: shared services and the event dispatcher.

mod dispatcher;
mod services;

pub use dispatcher::Dispatcher;
pub use services::{BotIdentity, BotServices, Moment, UserDirectory};

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use super::{BotIdentity, BotServices};
    use crate::backup::{BackupManager, BackupPlan};
    use crate::config::{BotSettings, ContentConfig};
    use crate::stats::StatsEngine;
    use crate::storage::{DataLayout, Database};
    use crate::telegram::{ChatGateway, TelegramError};

    /// Keeps sent texts as `(chat_id, text)` and accepts everything else.
    #[derive(Debug, Default)]
    pub(crate) struct SentTexts {
        sent: Mutex<Vec<(i64, String)>>,
    }

    impl SentTexts {
        pub(crate) fn take(&self) -> Vec<(i64, String)> {
            std::mem::take(&mut *self.sent.lock().unwrap())
        }
    }

    #[async_trait]
    impl ChatGateway for SentTexts {
        async fn send_text(&self, chat_id: i64, text: &str, _reply_to: Option<i32>) -> Result<(), TelegramError> {
            self.sent.lock().unwrap().push((chat_id, text.to_owned()));
            Ok(())
        }

        async fn delete_message(&self, _chat_id: i64, _message_id: i32) -> Result<(), TelegramError> {
            Ok(())
        }

        async fn restrict(&self, _chat_id: i64, _user_id: i64, _until: Option<DateTime<Utc>>) -> Result<(), TelegramError> {
            Ok(())
        }

        async fn unrestrict(&self, _chat_id: i64, _user_id: i64) -> Result<(), TelegramError> {
            Ok(())
        }

        async fn ban(&self, _chat_id: i64, _user_id: i64, _until: Option<DateTime<Utc>>) -> Result<(), TelegramError> {
            Ok(())
        }

        async fn unban(&self, _chat_id: i64, _user_id: i64) -> Result<(), TelegramError> {
            Ok(())
        }
    }

    /// Services rooted in `dir` with an in-memory database.
    pub(crate) fn services(dir: &Path, admins: &[i64]) -> Arc<BotServices> {
        let settings = BotSettings {
            admin_ids: admins.to_vec(),
            data_dir: dir.join("data"),
            content_dir: dir.join("content"),
            ..BotSettings::default()
        };
        let layout = DataLayout::new(&settings.data_dir);
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
        Arc::new(BotServices::new(
            settings,
            identity,
            ContentConfig::example(),
            Database::open_in_memory().unwrap(),
            stats,
            backups,
        ))
    }
}
