use crate::config::RoomRules;
use crate::limits::*;
use crate::model::*;

use super::{CapacityLimit, EngineError};

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::validation("Invalid date format."));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::validation("A booking cannot be longer than 7 days."));
    }
    Ok(())
}

/// Confirmed bookings in `room` overlapping `span`, optionally ignoring one booking.
pub(crate) fn concurrent<'a>(
    room: &str,
    span: &Span,
    active: &'a [Booking],
    exclude: Option<BookingId>,
) -> Vec<&'a Booking> {
    active
        .iter()
        .filter(|b| b.is_confirmed() && b.room == room && b.span.overlaps(span))
        .filter(|b| Some(b.id) != exclude)
        .collect()
}

/// Group count and party-size total of a concurrent set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub groups: u32,
    pub participants: u32,
}

impl Usage {
    pub fn of(bookings: &[&Booking]) -> Self {
        Self {
            groups: bookings.len() as u32,
            participants: bookings.iter().fold(0u32, |sum, b| sum.saturating_add(b.party_size)),
        }
    }

    /// Would one more party of `party_size` fit under `rules`? Sums are taken in u64.
    pub fn admits(&self, party_size: u32, rules: &RoomRules) -> Result<(), CapacityLimit> {
        if self.groups >= rules.max_concurrent_groups {
            return Err(CapacityLimit::Groups {
                max: rules.max_concurrent_groups,
            });
        }
        if u64::from(self.participants) + u64::from(party_size) > u64::from(rules.max_total_participants) {
            return Err(CapacityLimit::Participants {
                max: rules.max_total_participants,
            });
        }
        Ok(())
    }
}

pub(crate) fn check_capacity(
    room: &str,
    rules: &RoomRules,
    span: &Span,
    party_size: u32,
    active: &[Booking],
) -> Result<(), EngineError> {
    let overlapping = concurrent(room, span, active, None);
    Usage::of(&overlapping)
        .admits(party_size, rules)
        .map_err(|limit| EngineError::Capacity {
            room: room.to_string(),
            limit,
        })
}

/// Sweep line over `(span, party_size)` pairs: the highest simultaneous group count
/// and participant total at any instant. Ends sort before starts at the same instant,
/// so touching bookings never stack.
pub fn peak_usage(loads: &[(Span, u32)]) -> Usage {
    let mut events: Vec<(Ms, i64, i64)> = Vec::with_capacity(loads.len() * 2);
    for (span, party) in loads {
        events.push((span.start, 1, i64::from(*party)));
        events.push((span.end, -1, -i64::from(*party)));
    }
    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut groups: i64 = 0;
    let mut participants: i64 = 0;
    let mut peak = Usage::default();
    for (_, dg, dp) in events {
        groups += dg;
        participants += dp;
        peak.groups = peak.groups.max(u32::try_from(groups.max(0)).unwrap_or(u32::MAX));
        peak.participants = peak
            .participants
            .max(u32::try_from(participants.max(0)).unwrap_or(u32::MAX));
    }
    peak
}
