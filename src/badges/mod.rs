//! Achievement badges earned through activity.
//!
//! Badges are awarded once per user and never taken away. Progress comes
//! from the per-user activity record: message count, the current streak
//! of consecutive active days and the time since the user was first seen.

use std::fmt::Write as _;

use chrono::{DateTime, Local, Utc};
use tracing::info;

use crate::storage::{ActivityRecord, Database, StorageError};

/// What a badge asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criterion {
    /// Joining a group while the bot is there.
    Joined,
    /// Total messages sent.
    Messages(u64),
    /// Consecutive days with at least one message.
    Streak(u32),
    /// Days since the user was first seen.
    Loyalty(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Badge {
    pub id: &'static str,
    pub icon: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub points: u32,
    pub criterion: Criterion,
}

const fn badge(
    id: &'static str,
    icon: &'static str,
    name: &'static str,
    description: &'static str,
    points: u32,
    criterion: Criterion,
) -> Badge {
    Badge {
        id,
        icon,
        name,
        description,
        points,
        criterion,
    }
}

pub const CATALOG: &[Badge] = &[
    badge("first_join", "👋", "First Hello", "Joined the group", 10, Criterion::Joined),
    badge("first_message", "💬", "First Words", "Sent a first message", 5, Criterion::Messages(1)),
    badge("chatty", "💭", "Chatty", "Sent 50 messages", 25, Criterion::Messages(50)),
    badge("conversationalist", "🗣️", "Conversationalist", "Sent 250 messages", 50, Criterion::Messages(250)),
    badge("message_master", "📝", "Message Master", "Sent 1000 messages", 100, Criterion::Messages(1000)),
    badge("legendary_chatter", "🔥", "Legendary Chatter", "Sent 5000 messages", 500, Criterion::Messages(5000)),
    badge("streak_7", "🔥", "7-Day Streak", "Active 7 days in a row", 50, Criterion::Streak(7)),
    badge("streak_30", "⚡", "30-Day Streak", "Active 30 days in a row", 100, Criterion::Streak(30)),
    badge("streak_100", "💎", "100-Day Streak", "Active 100 days in a row", 500, Criterion::Streak(100)),
    badge("one_month", "🥉", "One Month", "Member for a month", 25, Criterion::Loyalty(30)),
    badge("three_months", "🥈", "Three Months", "Member for three months", 50, Criterion::Loyalty(90)),
    badge("six_months", "🥇", "Six Months", "Member for six months", 100, Criterion::Loyalty(180)),
    badge("one_year", "🏆", "One Year", "Member for a year", 250, Criterion::Loyalty(365)),
    badge("veteran", "🛡️", "Veteran", "Member for two years", 500, Criterion::Loyalty(730)),
];

#[must_use]
pub fn find(id: &str) -> Option<&'static Badge> {
    CATALOG.iter().find(|b| b.id == id)
}

/// Activity that can earn badges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadgeEvent {
    Joined,
    Message,
}

/// Awards badges and renders badge lists.
#[derive(Debug, Clone, Copy, Default)]
pub struct BadgeEngine;

impl BadgeEngine {
    /// Updates the user's activity for `event` and awards every badge that
    /// is now earned. Returns the badges awarded by this call.
    pub fn record(
        &self,
        db: &Database,
        user_id: i64,
        event: BadgeEvent,
        now: DateTime<Local>,
    ) -> Result<Vec<&'static Badge>, StorageError> {
        let utc = now.with_timezone(&Utc);
        let mut activity = db
            .load_activity(user_id)?
            .unwrap_or_else(|| ActivityRecord::new(user_id, utc));
        if event == BadgeEvent::Message {
            track_message(&mut activity, now);
        }
        db.save_activity(&activity)?;

        let mut awarded = Vec::new();
        for badge in CATALOG {
            if earned(badge.criterion, &activity, event, utc) && db.award_badge(user_id, badge.id, utc)? {
                info!("User {} earned badge {}", user_id, badge.id);
                awarded.push(badge);
            }
        }
        Ok(awarded)
    }

    /// Badge card: earned badges, total points and the next message goal.
    pub fn describe(&self, db: &Database, user_id: i64, name: &str) -> Result<String, StorageError> {
        let held: Vec<&Badge> = db
            .badges_of(user_id)?
            .iter()
            .filter_map(|award| find(&award.badge_id))
            .collect();
        let activity = db.load_activity(user_id)?;

        if held.is_empty() {
            return Ok(format!("🏅 {name} has no badges yet. Keep chatting!"));
        }
        let points: u32 = held.iter().map(|b| b.points).sum();
        let mut text = format!("🏅 Badges of {name} ({} of {}, {points} points)", held.len(), CATALOG.len());
        for badge in &held {
            let _ = write!(text, "\n{} {} - {}", badge.icon, badge.name, badge.description);
        }

        let messages = activity.as_ref().map_or(0, |a| a.messages);
        let next = CATALOG.iter().find_map(|b| match b.criterion {
            Criterion::Messages(goal) if goal > messages => Some((b, goal)),
            _ => None,
        });
        if let Some((badge, goal)) = next {
            let _ = write!(text, "\nNext: {} {} ({messages}/{goal} messages)", badge.icon, badge.name);
        }
        if let Some(activity) = activity
            && activity.current_streak > 1
        {
            let _ = write!(text, "\n🔥 Current streak: {} days", activity.current_streak);
        }
        Ok(text)
    }

    #[must_use]
    pub fn announcement(&self, user_name: &str, badge: &Badge) -> String {
        format!(
            "🏅 {user_name} earned a badge: {} {}!\n{} (+{} points)",
            badge.icon, badge.name, badge.description, badge.points
        )
    }
}

/// Counts a message and extends or restarts the daily streak.
fn track_message(activity: &mut ActivityRecord, now: DateTime<Local>) {
    let today = now.date_naive();
    activity.messages = activity.messages.saturating_add(1);
    match activity.last_active_day {
        Some(day) if day == today => {}
        Some(day) if day.succ_opt() == Some(today) => activity.current_streak += 1,
        _ => activity.current_streak = 1,
    }
    activity.last_active_day = Some(today);
    activity.best_streak = activity.best_streak.max(activity.current_streak);
}

fn earned(criterion: Criterion, activity: &ActivityRecord, event: BadgeEvent, now: DateTime<Utc>) -> bool {
    match criterion {
        Criterion::Joined => event == BadgeEvent::Joined,
        Criterion::Messages(goal) => activity.messages >= goal,
        Criterion::Streak(days) => activity.current_streak >= days,
        Criterion::Loyalty(days) => (now - activity.first_seen).num_days() >= days,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    fn day(n: i64) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap() + TimeDelta::days(n)
    }

    fn ids(badges: &[&Badge]) -> Vec<&'static str> {
        badges.iter().map(|b| b.id).collect()
    }

    #[test]
    fn test_catalog_ids_unique() {
        for (i, badge) in CATALOG.iter().enumerate() {
            assert!(CATALOG[i + 1..].iter().all(|b| b.id != badge.id), "{}", badge.id);
        }
    }

    #[test]
    fn test_join_and_first_message() {
        let db = Database::open_in_memory().unwrap();
        let engine = BadgeEngine;
        assert_eq!(ids(&engine.record(&db, 1, BadgeEvent::Joined, day(0)).unwrap()), vec!["first_join"]);
        assert_eq!(
            ids(&engine.record(&db, 1, BadgeEvent::Message, day(0)).unwrap()),
            vec!["first_message"]
        );
        assert!(engine.record(&db, 1, BadgeEvent::Message, day(0)).unwrap().is_empty());
        assert!(engine.record(&db, 1, BadgeEvent::Joined, day(0)).unwrap().is_empty());
    }

    #[test]
    fn test_message_milestone() {
        let db = Database::open_in_memory().unwrap();
        let engine = BadgeEngine;
        let mut earned = Vec::new();
        for _ in 0..50 {
            earned.extend(ids(&engine.record(&db, 2, BadgeEvent::Message, day(0)).unwrap()));
        }
        assert_eq!(earned, vec!["first_message", "chatty"]);
    }

    #[test]
    fn test_streak_counts_consecutive_days() {
        let db = Database::open_in_memory().unwrap();
        let engine = BadgeEngine;
        for n in 0..6 {
            engine.record(&db, 3, BadgeEvent::Message, day(n)).unwrap();
        }
        // A gap restarts the streak.
        engine.record(&db, 3, BadgeEvent::Message, day(7)).unwrap();
        let activity = db.load_activity(3).unwrap().unwrap();
        assert_eq!(activity.current_streak, 1);
        assert_eq!(activity.best_streak, 6);

        let mut last = Vec::new();
        for n in 8..14 {
            last = ids(&engine.record(&db, 3, BadgeEvent::Message, day(n)).unwrap());
        }
        assert_eq!(last, vec!["streak_7"]);
    }

    #[test]
    fn test_loyalty_from_first_seen() {
        let db = Database::open_in_memory().unwrap();
        let engine = BadgeEngine;
        engine.record(&db, 4, BadgeEvent::Joined, day(0)).unwrap();
        let awarded = engine.record(&db, 4, BadgeEvent::Message, day(95)).unwrap();
        assert_eq!(ids(&awarded), vec!["first_message", "one_month", "three_months"]);
    }

    #[test]
    fn test_describe() {
        let db = Database::open_in_memory().unwrap();
        let engine = BadgeEngine;
        assert!(engine.describe(&db, 5, "Ann").unwrap().contains("no badges yet"));

        for _ in 0..3 {
            engine.record(&db, 5, BadgeEvent::Message, day(0)).unwrap();
        }
        let text = engine.describe(&db, 5, "Ann").unwrap();
        assert!(text.contains("First Words"));
        assert!(text.contains("5 points"));
        assert!(text.contains("3/50 messages"));
    }
}
