//! Voting week arithmetic.
//!
//! A voting week runs Monday 00:00:00.000 through Sunday 23:59:59.999 in the
//! time zone of the instant passed in. Sunday is the locked day: results are
//! visible but no vote may change.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone,
    Utc, Weekday,
};
use serde::Serialize;

/// Source of "now" for request handlers.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<FixedOffset>;
}

/// Wall clock expressed in the configured voting offset.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }
}

/// A clock pinned to one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<FixedOffset>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<FixedOffset> {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeRemaining {
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
}

/// Monday of the week containing `instant`, as a calendar date.
///
/// Sunday belongs to the week that started six days earlier.
pub fn week_start_date<Tz: TimeZone>(instant: &DateTime<Tz>) -> NaiveDate {
    let date = instant.date_naive();
    let index = i64::from(date.weekday().num_days_from_sunday());
    let offset = if index == 0 { -6 } else { 1 - index };
    date + Duration::days(offset)
}

/// Monday 00:00:00.000 local time of the week containing `instant`.
pub fn week_start<Tz: TimeZone>(instant: &DateTime<Tz>) -> DateTime<Tz> {
    let monday = week_start_date(instant);
    at_local(&instant.timezone(), monday.and_time(NaiveTime::MIN))
}

/// Sunday 23:59:59.999 local time of the week containing `instant`.
pub fn week_end<Tz: TimeZone>(instant: &DateTime<Tz>) -> DateTime<Tz> {
    let next_monday = week_start_date(instant) + Duration::days(7);
    let last = next_monday.and_time(NaiveTime::MIN) - Duration::milliseconds(1);
    at_local(&instant.timezone(), last)
}

pub fn is_voting_locked<Tz: TimeZone>(instant: &DateTime<Tz>) -> bool {
    instant.weekday() == Weekday::Sun
}

/// Countdown to the end of this week's Sunday. Display only.
///
/// On Sunday itself this counts to the end of that same day, when the lock lifts.
pub fn time_until_lock_end<Tz: TimeZone>(instant: &DateTime<Tz>) -> TimeRemaining {
    let remaining = week_end(instant).naive_utc() - instant.naive_utc();
    TimeRemaining {
        days: remaining.num_days(),
        hours: remaining.num_hours() % 24,
        minutes: remaining.num_minutes() % 60,
    }
}

pub fn days_until_next_week<Tz: TimeZone>(instant: &DateTime<Tz>) -> u32 {
    match instant.weekday().num_days_from_sunday() {
        0 => 1,
        day => 8 - day,
    }
}

fn at_local<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    // A DST gap at midnight has no local reading; fall back to the UTC reading.
    tz.from_local_datetime(&naive)
        .earliest()
        .unwrap_or_else(|| tz.from_utc_datetime(&naive))
}
