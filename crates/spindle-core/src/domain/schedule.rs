//! Schedule calculus: absolute due times for one-shot and recurring tasks.
//!
//! Everything here is pure given `now`. Callers pass the current time in the
//! calendar zone whose day boundaries should apply (the worker uses the local
//! zone through `Clock`). Due times are unix seconds, the score used in the
//! scheduled structure.

use chrono::{DateTime, Datelike, Days, LocalResult, NaiveDate, NaiveTime, Offset, TimeZone, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const SECONDS_PER_MINUTE: i64 = 60;
const SECONDS_PER_HOUR: i64 = 3_600;
const SECONDS_PER_DAY: i64 = 86_400;
const SECONDS_PER_WEEK: i64 = 604_800;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("hour must be in 0..24, got {0}")]
    InvalidHour(u32),

    #[error("minute must be in 0..60, got {0}")]
    InvalidMinute(u32),

    #[error("recurrence interval must be positive")]
    NonPositiveInterval,
}

/// Relative offset for a one-shot schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delay {
    Seconds(i64),
    Minutes(i64),
    Days(i64),
    Weeks(i64),
}

impl Delay {
    pub fn as_seconds(self) -> i64 {
        match self {
            Delay::Seconds(n) => n,
            Delay::Minutes(n) => n.saturating_mul(SECONDS_PER_MINUTE),
            Delay::Days(n) => n.saturating_mul(SECONDS_PER_DAY),
            Delay::Weeks(n) => n.saturating_mul(SECONDS_PER_WEEK),
        }
    }
}

/// Day of week, numbered 1 = Sunday .. 7 = Saturday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Day {
    Sunday = 1,
    Monday = 2,
    Tuesday = 3,
    Wednesday = 4,
    Thursday = 5,
    Friday = 6,
    Saturday = 7,
}

impl Day {
    pub fn number(self) -> u32 {
        self as u32
    }
}

impl From<Weekday> for Day {
    fn from(weekday: Weekday) -> Self {
        match weekday {
            Weekday::Sun => Day::Sunday,
            Weekday::Mon => Day::Monday,
            Weekday::Tue => Day::Tuesday,
            Weekday::Wed => Day::Wednesday,
            Weekday::Thu => Day::Thursday,
            Weekday::Fri => Day::Friday,
            Weekday::Sat => Day::Saturday,
        }
    }
}

/// Recurring time specification.
///
/// `Secondly` / `Minutely` drift: the next occurrence is always measured from
/// the moment of recomputation, not from a wall-clock grid. `Daily` / `Weekly`
/// anchor to calendar day boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recurrence {
    Secondly(u32),
    Minutely(u32),
    Daily { hour: u32, minute: u32 },
    Weekly { day: Day, hour: u32, minute: u32 },
}

impl Recurrence {
    pub fn secondly(seconds: u32) -> Result<Self, ScheduleError> {
        if seconds == 0 {
            return Err(ScheduleError::NonPositiveInterval);
        }
        Ok(Recurrence::Secondly(seconds))
    }

    pub fn minutely(minutes: u32) -> Result<Self, ScheduleError> {
        if minutes == 0 {
            return Err(ScheduleError::NonPositiveInterval);
        }
        Ok(Recurrence::Minutely(minutes))
    }

    pub fn daily(hour: u32, minute: u32) -> Result<Self, ScheduleError> {
        validate_time_of_day(hour, minute)?;
        Ok(Recurrence::Daily { hour, minute })
    }

    pub fn weekly(day: Day, hour: u32, minute: u32) -> Result<Self, ScheduleError> {
        validate_time_of_day(hour, minute)?;
        Ok(Recurrence::Weekly { day, hour, minute })
    }

    /// Next occurrence strictly after `now` for the calendar variants; an
    /// occurrence equal to `now` counts as already past.
    pub fn next_due<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> i64 {
        let now_ts = now.timestamp();
        match *self {
            Recurrence::Secondly(n) => now_ts + i64::from(n),
            Recurrence::Minutely(n) => now_ts + i64::from(n) * SECONDS_PER_MINUTE,
            Recurrence::Daily { hour, minute } => {
                let tz = now.timezone();
                let today = now.date_naive();
                let candidate = occurrence(&tz, today, hour, minute);
                if now_ts >= candidate {
                    occurrence(&tz, add_days(today, 1), hour, minute)
                } else {
                    candidate
                }
            }
            Recurrence::Weekly { day, hour, minute } => {
                let tz = now.timezone();
                let today = now.date_naive();
                let current = now.weekday().number_from_sunday();

                if day.number() == current {
                    let candidate = occurrence(&tz, today, hour, minute);
                    if now_ts < candidate {
                        return candidate;
                    }
                }

                // 1..=7 days ahead; same weekday wraps to next week
                let delta = day.number() as i64 - current as i64;
                let delta = if delta <= 0 { delta + 7 } else { delta };
                occurrence(&tz, add_days(today, delta as u64), hour, minute)
            }
        }
    }
}

fn validate_time_of_day(hour: u32, minute: u32) -> Result<(), ScheduleError> {
    if hour >= 24 {
        return Err(ScheduleError::InvalidHour(hour));
    }
    if minute >= 60 {
        return Err(ScheduleError::InvalidMinute(minute));
    }
    Ok(())
}

fn add_days(date: NaiveDate, days: u64) -> NaiveDate {
    date.checked_add_days(Days::new(days)).unwrap_or(NaiveDate::MAX)
}

fn occurrence<Tz: TimeZone>(tz: &Tz, date: NaiveDate, hour: u32, minute: u32) -> i64 {
    day_start(tz, date) + i64::from(hour) * SECONDS_PER_HOUR + i64::from(minute) * SECONDS_PER_MINUTE
}

/// Unix timestamp of local midnight on `date`.
fn day_start<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> i64 {
    let midnight = date.and_time(NaiveTime::MIN);
    match tz.from_local_datetime(&midnight) {
        LocalResult::Single(start) => start.timestamp(),
        LocalResult::Ambiguous(earliest, _) => earliest.timestamp(),
        // midnight skipped by a DST jump: use the offset in effect just after it
        LocalResult::None => {
            let offset = tz.offset_from_utc_datetime(&midnight).fix();
            midnight.and_utc().timestamp() - i64::from(offset.local_minus_utc())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleKind {
    /// Consumed on promotion.
    OneShot,
    /// Re-armed from `every` on each resolution.
    Periodic { every: Recurrence },
}

/// Absolute due time plus how it was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    due_at: i64,
    kind: ScheduleKind,
}

impl Schedule {
    /// One-shot, `delay` after `now`.
    pub fn after<Tz: TimeZone>(delay: Delay, now: &DateTime<Tz>) -> Self {
        Self::at(now.timestamp().saturating_add(delay.as_seconds()))
    }

    /// One-shot at an absolute unix timestamp.
    pub fn at(due_at: i64) -> Self {
        Self {
            due_at,
            kind: ScheduleKind::OneShot,
        }
    }

    /// Periodic, first occurrence computed from `now`.
    pub fn periodic<Tz: TimeZone>(every: Recurrence, now: &DateTime<Tz>) -> Self {
        Self {
            due_at: every.next_due(now),
            kind: ScheduleKind::Periodic { every },
        }
    }

    pub fn due_at(&self) -> i64 {
        self.due_at
    }

    pub fn kind(&self) -> &ScheduleKind {
        &self.kind
    }

    pub fn is_periodic(&self) -> bool {
        matches!(self.kind, ScheduleKind::Periodic { .. })
    }

    pub fn recurrence(&self) -> Option<Recurrence> {
        match self.kind {
            ScheduleKind::Periodic { every } => Some(every),
            ScheduleKind::OneShot => None,
        }
    }

    /// The next occurrence of a periodic schedule; `None` for one-shot.
    pub fn rearm<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<Schedule> {
        self.recurrence().map(|every| Schedule::periodic(every, now))
    }
}
