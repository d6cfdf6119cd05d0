use chrono::{Days, NaiveDate};

use crate::audit::AuditEntry;
use crate::model::*;

use super::Engine;

/// The "fetch everything" read a calendar needs on load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub bookings: Vec<BookingSummary>,
    pub blocked: Vec<BlockedDate>,
    pub announcement: Option<String>,
}

// Reads never take the write lock; they see whatever was committed last.
impl Engine {
    pub fn list_confirmed(&self) -> Listing {
        let bt = &self.policy.business_time;
        Listing {
            bookings: self.store.scan_active().iter().map(|b| b.summary(bt)).collect(),
            blocked: self.blocked.all(),
            announcement: self.policy.announcement_at(self.now()).map(str::to_string),
        }
    }

    /// Confirmed bookings starting in the seven business days from `week_start`,
    /// optionally for one room.
    pub fn bookings_for_week(&self, room: Option<&str>, week_start: NaiveDate) -> Vec<BookingSummary> {
        let bt = &self.policy.business_time;
        let from = bt.start_of_day(week_start);
        let until = week_start
            .checked_add_days(Days::new(7))
            .map(|d| bt.start_of_day(d))
            .unwrap_or(Ms::MAX);
        self.store
            .scan_active()
            .iter()
            .filter(|b| room.is_none_or(|r| b.room == r))
            .filter(|b| b.span.start >= from && b.span.start < until)
            .map(|b| b.summary(bt))
            .collect()
    }

    /// Upcoming confirmed bookings made with `email`.
    pub fn user_bookings(&self, email: &str) -> Vec<BookingSummary> {
        let email = email.trim();
        if email.is_empty() {
            return Vec::new();
        }
        let now = self.now();
        let bt = &self.policy.business_time;
        self.store
            .scan_active()
            .iter()
            .filter(|b| b.requester.email_matches(email) && b.span.start > now)
            .map(|b| b.summary(bt))
            .collect()
    }

    pub fn find(&self, id: &BookingId) -> Option<Booking> {
        self.store.find_by_id(id)
    }

    pub fn blocked_dates(&self) -> Vec<BlockedDate> {
        self.blocked.all()
    }

    pub fn audit_log(&self) -> Vec<AuditEntry> {
        self.audit.entries()
    }

    pub fn booking_count(&self) -> usize {
        self.store.len()
    }
}
