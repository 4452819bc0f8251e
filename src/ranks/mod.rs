//! XP and levels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::storage::{Database, RankRecord, StorageError};

/// A rank level and the XP it starts at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    pub level: u32,
    pub name: String,
    pub badge: String,
    pub min_xp: u64,
}

/// What earned the XP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XpSource {
    Message,
    Command,
    Join,
}

/// XP awarded per source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct XpGain {
    pub message: u64,
    pub command: u64,
    pub join: u64,
}

impl Default for XpGain {
    fn default() -> Self {
        Self {
            message: 10,
            command: 5,
            join: 50,
        }
    }
}

impl XpGain {
    const fn amount(self, source: XpSource) -> u64 {
        match source {
            XpSource::Message => self.message,
            XpSource::Command => self.command,
            XpSource::Join => self.join,
        }
    }
}

/// Result of awarding XP.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct XpChange {
    pub old_xp: u64,
    pub new_xp: u64,
    pub old_level: u32,
    pub new_level: u32,
    pub leveled_up: bool,
    /// XP still missing for the next level, 0 at the top.
    pub to_next_level: u64,
    pub progress_percent: f64,
}

#[derive(Debug, Clone)]
pub struct RankEngine {
    levels: Vec<Level>,
    gain: XpGain,
}

impl Default for RankEngine {
    fn default() -> Self {
        Self::new(default_levels(), XpGain::default())
    }
}

impl RankEngine {
    /// Creates an engine; levels are sorted by their XP threshold.
    #[must_use]
    pub fn new(mut levels: Vec<Level>, gain: XpGain) -> Self {
        levels.sort_by_key(|l| l.min_xp);
        Self { levels, gain }
    }

    #[must_use]
    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    /// The highest level whose threshold `xp` reaches.
    #[must_use]
    pub fn level_for(&self, xp: u64) -> Option<&Level> {
        self.levels.iter().rev().find(|l| xp >= l.min_xp)
    }

    fn next_level(&self, xp: u64) -> Option<&Level> {
        self.levels.iter().find(|l| l.min_xp > xp)
    }

    /// Progress towards the next level in percent (100 at the top level).
    #[must_use]
    pub fn progress(&self, xp: u64) -> f64 {
        let current = self.level_for(xp).map_or(0, |l| l.min_xp);
        let Some(next) = self.next_level(xp) else {
            return 100.0;
        };
        let range = next.min_xp - current;
        if range == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let percent = (xp - current) as f64 / range as f64 * 100.0;
        percent
    }

    #[must_use]
    pub fn to_next_level(&self, xp: u64) -> u64 {
        self.next_level(xp).map_or(0, |next| next.min_xp - xp)
    }

    fn level_number(&self, xp: u64) -> u32 {
        self.level_for(xp).map_or(1, |l| l.level)
    }

    /// Awards XP for an activity and persists the new total.
    pub fn add_xp(
        &self,
        db: &Database,
        user_id: i64,
        source: XpSource,
        now: DateTime<Utc>,
    ) -> Result<XpChange, StorageError> {
        let mut record = db
            .load_rank(user_id)?
            .unwrap_or_else(|| RankRecord::new(user_id, now));

        let old_xp = record.xp;
        let old_level = self.level_number(old_xp);
        record.xp = old_xp.saturating_add(self.gain.amount(source));
        record.level = self.level_number(record.xp);
        match source {
            XpSource::Message => record.messages_sent += 1,
            XpSource::Command => record.commands_used += 1,
            XpSource::Join => {}
        }
        record.updated_at = now;
        db.save_rank(&record)?;

        let change = XpChange {
            old_xp,
            new_xp: record.xp,
            old_level,
            new_level: record.level,
            leveled_up: record.level > old_level,
            to_next_level: self.to_next_level(record.xp),
            progress_percent: self.progress(record.xp),
        };
        if change.leveled_up {
            info!("User {} reached level {}", user_id, change.new_level);
        }
        Ok(change)
    }

    /// Stored rank of a user, or a fresh record when unknown.
    pub fn rank_of(&self, db: &Database, user_id: i64, now: DateTime<Utc>) -> Result<RankRecord, StorageError> {
        Ok(db
            .load_rank(user_id)?
            .unwrap_or_else(|| RankRecord::new(user_id, now)))
    }

    pub fn leaderboard(&self, db: &Database, limit: usize) -> Result<Vec<RankRecord>, StorageError> {
        db.top_ranks(limit)
    }

    /// Chat message for a level-up.
    #[must_use]
    pub fn level_up_message(&self, user_name: &str, change: &XpChange) -> Option<String> {
        if !change.leveled_up {
            return None;
        }
        let level = self.level_for(change.new_xp)?;
        Some(format!(
            "🎉 {user_name} reached level {} {} {}!",
            level.level, level.badge, level.name
        ))
    }

    /// Multi-line rank card for `/rank`.
    #[must_use]
    pub fn describe(&self, user_name: &str, record: &RankRecord) -> String {
        let level = self.level_for(record.xp);
        let (number, name, badge) = level.map_or((1, "Newcomer", ""), |l| (l.level, l.name.as_str(), l.badge.as_str()));
        format!(
            "🏆 Rank of {user_name}\nLevel {number} {badge} {name}\nXP: {} ({:.0}% to next level, {} XP missing)\nMessages: {}",
            record.xp,
            self.progress(record.xp),
            self.to_next_level(record.xp),
            record.messages_sent
        )
    }
}

fn default_levels() -> Vec<Level> {
    [
        (1, "Newcomer", "🆕", 0),
        (2, "Member", "👤", 100),
        (3, "Regular", "⭐", 500),
        (4, "Active", "🔥", 1_000),
        (5, "Experienced", "🎯", 2_500),
        (6, "Expert", "🧠", 5_000),
        (7, "Master", "👑", 10_000),
        (8, "Grand Master", "⚡", 20_000),
        (9, "Legend", "🌈", 50_000),
        (10, "Mythical", "✨", 100_000),
    ]
    .into_iter()
    .map(|(level, name, badge, min_xp)| Level {
        level,
        name: name.to_owned(),
        badge: badge.to_owned(),
        min_xp,
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_level_thresholds() {
        let engine = RankEngine::default();
        assert_eq!(engine.level_for(0).unwrap().level, 1);
        assert_eq!(engine.level_for(99).unwrap().level, 1);
        assert_eq!(engine.level_for(100).unwrap().level, 2);
        assert_eq!(engine.level_for(150_000).unwrap().level, 10);
    }

    #[test]
    fn test_progress() {
        let engine = RankEngine::default();
        assert!((engine.progress(50) - 50.0).abs() < 1e-9);
        assert!((engine.progress(300) - 50.0).abs() < 1e-9);
        assert!((engine.progress(200_000) - 100.0).abs() < 1e-9);
        assert_eq!(engine.to_next_level(90), 10);
        assert_eq!(engine.to_next_level(200_000), 0);
    }

    #[test]
    fn test_add_xp_levels_up_and_persists() {
        let db = Database::open_in_memory().unwrap();
        let engine = RankEngine::default();

        let join = engine.add_xp(&db, 1, XpSource::Join, now()).unwrap();
        assert_eq!(join.new_xp, 50);
        assert!(!join.leveled_up);

        for _ in 0..4 {
            engine.add_xp(&db, 1, XpSource::Message, now()).unwrap();
        }
        let change = engine.add_xp(&db, 1, XpSource::Message, now()).unwrap();
        assert_eq!(change.new_xp, 100);
        assert!(change.leveled_up);
        assert_eq!((change.old_level, change.new_level), (1, 2));
        assert!(engine.level_up_message("Ann", &change).unwrap().contains("level 2"));

        let record = engine.rank_of(&db, 1, now()).unwrap();
        assert_eq!(record.messages_sent, 5);
        assert_eq!(record.level, 2);
    }

    #[test]
    fn test_leaderboard() {
        let db = Database::open_in_memory().unwrap();
        let engine = RankEngine::default();
        engine.add_xp(&db, 1, XpSource::Command, now()).unwrap();
        engine.add_xp(&db, 2, XpSource::Join, now()).unwrap();
        let top: Vec<i64> = engine.leaderboard(&db, 10).unwrap().iter().map(|r| r.user_id).collect();
        assert_eq!(top, vec![2, 1]);
    }
}
