use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};

use crate::model::Ms;

/// Source of "now". The engine never reads the system clock directly.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> Ms;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> Ms {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as Ms)
            .unwrap_or(0)
    }
}

/// Settable clock for tests and replays.
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: Ms) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: Ms) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, delta: Ms) {
        self.now.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Ms {
        self.now.load(Ordering::SeqCst)
    }
}

/// Calendar arithmetic in the business timezone.
///
/// Instants are stored as unix milliseconds; every "which day is this" question
/// goes through here so the answer never depends on where the caller sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessTime {
    offset: FixedOffset,
}

impl BusinessTime {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// Offset east of UTC in minutes; `None` if out of range.
    pub fn from_offset_minutes(minutes: i32) -> Option<Self> {
        FixedOffset::east_opt(minutes.checked_mul(60)?).map(Self::new)
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn local(&self, ms: Ms) -> NaiveDateTime {
        DateTime::from_timestamp_millis(ms)
            .unwrap_or(DateTime::UNIX_EPOCH)
            .with_timezone(&self.offset)
            .naive_local()
    }

    pub fn date_of(&self, ms: Ms) -> NaiveDate {
        self.local(ms).date()
    }

    /// Wall-clock time in the business timezone to an instant.
    pub fn instant(&self, local: NaiveDateTime) -> Ms {
        // A fixed offset has exactly one mapping for every wall-clock value.
        self.offset
            .from_local_datetime(&local)
            .single()
            .map(|dt| dt.timestamp_millis())
            .unwrap_or_else(|| local.and_utc().timestamp_millis())
    }

    pub fn start_of_day(&self, date: NaiveDate) -> Ms {
        self.instant(date.and_time(NaiveTime::MIN))
    }

    /// Parse a request timestamp. RFC 3339 values with an offset are absolute;
    /// values without one are business-timezone wall clock.
    pub fn parse_instant(&self, raw: &str) -> Option<Ms> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.timestamp_millis());
        }
        const LOCAL_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"];
        LOCAL_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .map(|local| self.instant(local))
    }

    /// Render an instant as business wall clock, `YYYY-MM-DDTHH:MM:SS`.
    pub fn format_local(&self, ms: Ms) -> String {
        self.local(ms).format("%Y-%m-%dT%H:%M:%S").to_string()
    }
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}
