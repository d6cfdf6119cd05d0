use std::fmt;

use chrono::{Datelike, Days, Months, NaiveDate, Weekday};

use crate::clock::BusinessTime;
use crate::model::Span;

/// Each pattern answers "where is occurrence N"; admitting the occurrences is
/// up to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recurrence {
    /// 12 occurrences, 7 days apart.
    Weekly,
    /// 6 occurrences on the same day of month, clamped to the month's last day.
    Monthly,
    /// 4 occurrences, 3 months apart, clamped like `Monthly`.
    Quarterly,
    /// 6 occurrences on the first given weekday of each month.
    FirstWeekday(Weekday),
    /// 6 occurrences on the last given weekday of each month.
    LastWeekday(Weekday),
}

impl Recurrence {
    /// Accepts `weekly`, `monthly`, `quarterly`, `first_<weekday>` and `last_<weekday>`.
    pub fn parse(tag: &str) -> Option<Self> {
        let tag = tag.trim().to_ascii_lowercase().replace('-', "_");
        match tag.as_str() {
            "weekly" => return Some(Recurrence::Weekly),
            "monthly" => return Some(Recurrence::Monthly),
            "quarterly" => return Some(Recurrence::Quarterly),
            _ => {}
        }
        if let Some(day) = tag.strip_prefix("first_") {
            return day.parse().ok().map(Recurrence::FirstWeekday);
        }
        if let Some(day) = tag.strip_prefix("last_") {
            return day.parse().ok().map(Recurrence::LastWeekday);
        }
        None
    }

    pub fn count(&self) -> u32 {
        match self {
            Recurrence::Weekly => 12,
            Recurrence::Monthly => 6,
            Recurrence::Quarterly => 4,
            Recurrence::FirstWeekday(_) | Recurrence::LastWeekday(_) => 6,
        }
    }

    /// Occurrence `n` (0-based) of a series whose first request was `first`.
    /// Wall-clock start time and duration are carried over from `first`.
    pub fn occurrence(&self, n: u32, first: Span, bt: &BusinessTime) -> Option<Span> {
        let local = bt.local(first.start);
        let date = local.date();
        let target = match self {
            Recurrence::Weekly => date.checked_add_days(Days::new(7 * u64::from(n)))?,
            Recurrence::Monthly => date.checked_add_months(Months::new(n))?,
            Recurrence::Quarterly => date.checked_add_months(Months::new(3 * n))?,
            Recurrence::FirstWeekday(day) => {
                let month = month_start(date).checked_add_months(Months::new(n))?;
                NaiveDate::from_weekday_of_month_opt(month.year(), month.month(), *day, 1)?
            }
            Recurrence::LastWeekday(day) => {
                let month = month_start(date).checked_add_months(Months::new(n))?;
                last_weekday_of_month(month, *day)?
            }
        };
        let start = bt.instant(target.and_time(local.time()));
        Some(Span::new(start, start + first.duration_ms()))
    }

    /// All occurrences in order. Occurrences whose date cannot be represented are skipped.
    pub fn expand(&self, first: Span, bt: &BusinessTime) -> Vec<Span> {
        (0..self.count()).filter_map(|n| self.occurrence(n, first, bt)).collect()
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recurrence::Weekly => f.write_str("weekly"),
            Recurrence::Monthly => f.write_str("monthly"),
            Recurrence::Quarterly => f.write_str("quarterly"),
            Recurrence::FirstWeekday(d) => write!(f, "first_{}", weekday_name(*d)),
            Recurrence::LastWeekday(d) => write!(f, "last_{}", weekday_name(*d)),
        }
    }
}

fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

fn last_weekday_of_month(month: NaiveDate, day: Weekday) -> Option<NaiveDate> {
    let last = month_start(month).checked_add_months(Months::new(1))?.pred_opt()?;
    let back = (7 + last.weekday().num_days_from_monday() - day.num_days_from_monday()) % 7;
    last.checked_sub_days(Days::new(u64::from(back)))
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}
