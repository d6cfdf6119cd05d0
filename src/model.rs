use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;
use uuid::Uuid;

use crate::audit::AuditEntry;
use crate::clock::BusinessTime;
use crate::limits::{DISPLAY_CODE_LEN, MIN_CANCEL_CODE_LEN};

/// Unix milliseconds, the only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

// ── Identifiers ──────────────────────────────────────────────────

/// Booking id. Random v4 so that a prefix of it can double as a
/// verification code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BookingId(Uuid);

impl BookingId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The code printed in notices: first 12 characters, uppercased.
    pub fn display_code(&self) -> String {
        self.0.to_string()[..DISPLAY_CODE_LEN].to_uppercase()
    }

    /// Case-insensitive prefix check used for user cancellations.
    pub fn matches_code(&self, code: &str) -> bool {
        let code = code.trim();
        code.len() >= MIN_CANCEL_CODE_LEN
            && self.0.to_string().to_uppercase().starts_with(&code.to_uppercase())
    }
}

impl Default for BookingId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BookingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for BookingId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

// ── Booking ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
    CancelledBySystem,
    AnonymizedCancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::CancelledBySystem => "cancelled_by_system",
            BookingStatus::AnonymizedCancelled => "anonymized_cancelled",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        !matches!(self, BookingStatus::Confirmed)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const ANONYMIZED_FIRST_NAME: &str = "Anonymized";
pub const ANONYMIZED_LAST_NAME: &str = "User";
pub const ANONYMIZED_EMAIL: &str = "redacted@anonymized.local";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

impl Identity {
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
            email: email.into(),
        }
    }

    pub fn anonymized() -> Self {
        Self::new(ANONYMIZED_FIRST_NAME, ANONYMIZED_LAST_NAME, ANONYMIZED_EMAIL)
    }

    pub fn is_anonymized(&self) -> bool {
        self.first_name == ANONYMIZED_FIRST_NAME && self.last_name == ANONYMIZED_LAST_NAME
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }

    pub fn email_matches(&self, email: &str) -> bool {
        !self.email.is_empty() && self.email.eq_ignore_ascii_case(email.trim())
    }
}

/// Terms/privacy acceptance captured with a user booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consent {
    pub terms_accepted: bool,
    pub privacy_accepted: bool,
    pub accepted_at: Option<Ms>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub room: String,
    pub span: Span,
    pub party_size: u32,
    pub status: BookingStatus,
    pub requester: Identity,
    /// Present only on bookings made by regular users.
    pub group_leader: Option<Identity>,
    pub purpose: String,
    pub notes: String,
    pub recurrence_group: Option<Uuid>,
    pub consent: Option<Consent>,
    pub created_at: Ms,
}

impl Booking {
    pub fn is_confirmed(&self) -> bool {
        self.status == BookingStatus::Confirmed
    }

    pub fn is_admin_created(&self) -> bool {
        self.group_leader.is_none()
    }

    pub fn apply(&mut self, update: FieldUpdate) {
        match update {
            FieldUpdate::Status(status) => self.status = status,
            FieldUpdate::Notes(notes) => self.notes = notes,
            FieldUpdate::Room(room) => self.room = room,
            FieldUpdate::Span(span) => self.span = span,
            FieldUpdate::Requester(identity) => self.requester = identity,
            FieldUpdate::GroupLeader(leader) => self.group_leader = leader,
        }
    }

    pub fn summary(&self, tz: &BusinessTime) -> BookingSummary {
        BookingSummary {
            id: self.id,
            code: self.id.display_code(),
            room: self.room.clone(),
            date: tz.date_of(self.span.start),
            start: tz.format_local(self.span.start),
            end: tz.format_local(self.span.end),
            purpose: self.purpose.clone(),
            party_size: self.party_size,
            status: self.status,
        }
    }
}

/// A booking stripped of personal fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingSummary {
    pub id: BookingId,
    pub code: String,
    pub room: String,
    pub date: NaiveDate,
    pub start: String,
    pub end: String,
    pub purpose: String,
    pub party_size: u32,
    pub status: BookingStatus,
}

/// Typed replacement for "set column X of row N".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldUpdate {
    Status(BookingStatus),
    Notes(String),
    Room(String),
    Span(Span),
    Requester(Identity),
    GroupLeader(Option<Identity>),
}

// ── Blocked dates ────────────────────────────────────────────────

pub const ALL_ROOMS: &str = "All Rooms";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoomScope {
    AllRooms,
    Room(String),
}

impl RoomScope {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case(ALL_ROOMS) {
            RoomScope::AllRooms
        } else {
            RoomScope::Room(raw.to_string())
        }
    }

    pub fn covers(&self, room: &str) -> bool {
        match self {
            RoomScope::AllRooms => true,
            RoomScope::Room(r) => r == room,
        }
    }
}

impl fmt::Display for RoomScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomScope::AllRooms => f.write_str(ALL_ROOMS),
            RoomScope::Room(r) => f.write_str(r),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedDate {
    pub id: Ulid,
    pub date: NaiveDate,
    pub scope: RoomScope,
    pub reason: String,
    pub created_at: Ms,
}

// ── WAL records ──────────────────────────────────────────────────

/// WAL record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BookingAppended { booking: Booking },
    FieldUpdated { id: BookingId, update: FieldUpdate },
    DateBlocked { block: BlockedDate },
    AuditRecorded { entry: AuditEntry },
}
