//! Personal reminders and scheduled chat announcements.
//!
//! Both live in the `reminders` table. The maintenance scheduler calls
//! [`ReminderBook::fire_due`] every tick; one-shot entries are deleted once
//! fired and recurring ones move to their next occurrence after `now`.

use std::sync::LazyLock;

use chrono::{DateTime, Days, Local, Months, NaiveTime, TimeDelta, Utc};
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::storage::{Database, ReminderRecord, StorageError};

pub const DEFAULT_MAX_PER_USER: usize = 20;
const MAX_TEXT_CHARS: usize = 1000;
const MAX_DELAY: TimeDelta = TimeDelta::days(365);

static RELATIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(\d+)d)?(?:(\d+)h)?(?:(\d+)m)?$")
        .unwrap_or_else(|e| unreachable!("relative time pattern is valid: {e}"))
});

#[derive(Debug, Error)]
pub enum ReminderError {
    #[error("You already have {0} reminders; cancel one first")]
    TooMany(usize),

    #[error("Reminder text is empty")]
    EmptyText,

    #[error("Reminder text is longer than {MAX_TEXT_CHARS} characters")]
    TextTooLong,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// How often a recurring entry fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    Daily,
    Weekly,
    Monthly,
}

impl Repeat {
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    fn step(self, from: DateTime<Local>) -> Option<DateTime<Local>> {
        match self {
            Self::Daily => from.checked_add_days(Days::new(1)),
            Self::Weekly => from.checked_add_days(Days::new(7)),
            Self::Monthly => from.checked_add_months(Months::new(1)),
        }
    }

    /// First occurrence after `now`, skipping any missed while offline.
    #[must_use]
    pub fn next_after(self, due: DateTime<Local>, now: DateTime<Local>) -> Option<DateTime<Local>> {
        let mut next = self.step(due)?;
        while next <= now {
            next = self.step(next)?;
        }
        Some(next)
    }
}

/// Parses a delay (`10m`, `2h30m`, `1d`) or a clock time (`18:30`, today
/// or tomorrow if already past).
#[must_use]
pub fn parse_when(input: &str, now: DateTime<Local>) -> Option<DateTime<Local>> {
    let input = input.trim().to_lowercase();
    if let Some(time) = parse_clock(&input) {
        return next_at(time, now);
    }

    let caps = RELATIVE_RE.captures(&input)?;
    let part = |i: usize| -> Option<i64> { caps.get(i).map_or(Some(0), |m| m.as_str().parse().ok()) };
    let delay = TimeDelta::try_days(part(1)?)?
        .checked_add(&TimeDelta::try_hours(part(2)?)?)?
        .checked_add(&TimeDelta::try_minutes(part(3)?)?)?;
    if delay <= TimeDelta::zero() || delay > MAX_DELAY {
        return None;
    }
    now.checked_add_signed(delay)
}

fn parse_clock(input: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(input, "%H:%M").ok()
}

/// Today at `time`, or tomorrow when that has passed.
fn next_at(time: NaiveTime, now: DateTime<Local>) -> Option<DateTime<Local>> {
    let today = now.date_naive().and_time(time).and_local_timezone(Local).earliest()?;
    if today > now {
        Some(today)
    } else {
        today.checked_add_days(Days::new(1))
    }
}

/// A message the scheduler should post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub reminder_id: i64,
    pub chat_id: i64,
    pub text: String,
}

/// What to schedule.
#[derive(Debug, Clone)]
pub struct NewReminder<'a> {
    pub user_id: i64,
    pub chat_id: i64,
    pub text: &'a str,
    pub due: DateTime<Local>,
    pub repeat: Option<Repeat>,
    pub announcement: bool,
}

/// Creates, lists, cancels and fires reminders.
#[derive(Debug, Clone)]
pub struct ReminderBook {
    max_per_user: usize,
}

impl Default for ReminderBook {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PER_USER)
    }
}

impl ReminderBook {
    #[must_use]
    pub const fn new(max_per_user: usize) -> Self {
        Self { max_per_user }
    }

    /// Stores a reminder, returning its id. Announcements are not counted
    /// against the per-user limit.
    pub fn create(&self, db: &Database, reminder: &NewReminder<'_>, now: DateTime<Local>) -> Result<i64, ReminderError> {
        let text = reminder.text.trim();
        if text.is_empty() {
            return Err(ReminderError::EmptyText);
        }
        if text.chars().count() > MAX_TEXT_CHARS {
            return Err(ReminderError::TextTooLong);
        }
        if !reminder.announcement && db.count_reminders(reminder.user_id)? >= self.max_per_user {
            return Err(ReminderError::TooMany(self.max_per_user));
        }

        let id = db.add_reminder(&ReminderRecord {
            id: 0,
            user_id: reminder.user_id,
            chat_id: reminder.chat_id,
            text: text.to_owned(),
            announcement: reminder.announcement,
            repeat: reminder.repeat.map(|r| r.as_str().to_owned()),
            due_at: reminder.due.with_timezone(&Utc),
            created_at: now.with_timezone(&Utc),
        })?;
        info!(
            "Scheduled {} {} for user {} in {} at {}",
            if reminder.announcement { "announcement" } else { "reminder" },
            id,
            reminder.user_id,
            reminder.chat_id,
            reminder.due.format("%Y-%m-%d %H:%M")
        );
        Ok(id)
    }

    pub fn list(&self, db: &Database, user_id: i64) -> Result<Vec<ReminderRecord>, ReminderError> {
        Ok(db.reminders_of(user_id)?)
    }

    /// Cancels a reminder; `owner: None` cancels regardless of who set it.
    pub fn cancel(&self, db: &Database, id: i64, owner: Option<i64>) -> Result<bool, ReminderError> {
        Ok(db.delete_reminder(id, owner)?)
    }

    /// Collects everything due by `now` and advances the table: one-shot
    /// entries are removed, recurring ones rescheduled.
    pub fn fire_due(&self, db: &Database, now: DateTime<Local>) -> Result<Vec<Delivery>, ReminderError> {
        let due = db.due_reminders(now.with_timezone(&Utc))?;
        let mut deliveries = Vec::with_capacity(due.len());
        for reminder in due {
            let repeat = reminder.repeat.as_deref().map(Repeat::parse);
            let next = match repeat {
                Some(Some(repeat)) => repeat.next_after(reminder.due_at.with_timezone(&Local), now),
                Some(None) => {
                    warn!("Reminder {} has an unknown repeat, firing once", reminder.id);
                    None
                }
                None => None,
            };
            match next {
                Some(at) => {
                    debug!("Reminder {} next fires at {}", reminder.id, at);
                    db.reschedule_reminder(reminder.id, at.with_timezone(&Utc))?;
                }
                None => {
                    db.delete_reminder(reminder.id, None)?;
                }
            }

            let text = if reminder.announcement {
                reminder.text
            } else if next.is_some() {
                format!("🔄 Recurring reminder:\n\n{}", reminder.text)
            } else {
                format!("⏰ Reminder:\n\n{}", reminder.text)
            };
            deliveries.push(Delivery {
                reminder_id: reminder.id,
                chat_id: reminder.chat_id,
                text,
            });
        }
        Ok(deliveries)
    }
}
