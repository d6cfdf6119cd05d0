use chrono::{Days, Months};
use uuid::Uuid;

use crate::auth::Actor;
use crate::blocked::BlockedDateIndex;
use crate::config::{Policy, RoomRules};
use crate::limits::*;
use crate::model::*;
use crate::recurrence::Recurrence;

use super::conflict::{Usage, check_capacity, concurrent, validate_span};
use super::{AuthFailure, CapacityLimit, EngineError};

const HOUR_MS: Ms = 3_600_000;

/// A create request as received. Timestamps stay raw so that malformed input
/// is reported like any other validation failure.
#[derive(Debug, Clone, Default)]
pub struct CreateRequest {
    pub room: String,
    pub start: String,
    pub end: String,
    pub party_size: u32,
    pub requester: Identity,
    /// Required for regular users, ignored for admins.
    pub group_leader: Option<Identity>,
    pub purpose: String,
    pub notes: String,
    /// `weekly`, `monthly`, `quarterly`, `first_<weekday>`, `last_<weekday>`; admin only.
    pub recurrence: Option<String>,
    pub consent: Option<Consent>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Single {
        id: BookingId,
        room_booked: String,
        room_requested: String,
    },
    Series {
        group: Uuid,
        first_id: BookingId,
        admitted: u32,
        rejected: u32,
        room_booked: String,
        room_requested: String,
    },
}

impl CreateOutcome {
    pub fn first_id(&self) -> BookingId {
        match self {
            CreateOutcome::Single { id, .. } => *id,
            CreateOutcome::Series { first_id, .. } => *first_id,
        }
    }

    pub fn room_booked(&self) -> &str {
        match self {
            CreateOutcome::Single { room_booked, .. } | CreateOutcome::Series { room_booked, .. } => room_booked,
        }
    }

    pub fn room_requested(&self) -> &str {
        match self {
            CreateOutcome::Single { room_requested, .. } | CreateOutcome::Series { room_requested, .. } => {
                room_requested
            }
        }
    }

    pub fn was_redirected(&self) -> bool {
        self.room_booked() != self.room_requested()
    }
}

/// Outcome of planning a recurring request against the current bookings.
#[derive(Debug, Default)]
pub(super) struct SeriesPlan {
    pub admitted: Vec<Span>,
    pub rejected: Vec<(Span, EngineError)>,
}

/// Admission decisions. Pure: callers pass the current booking set and get a
/// verdict, nothing is written.
pub(super) struct Admission<'a> {
    pub policy: &'a Policy,
    pub blocked: &'a BlockedDateIndex,
    pub now: Ms,
}

impl<'a> Admission<'a> {
    pub fn new(policy: &'a Policy, blocked: &'a BlockedDateIndex, now: Ms) -> Self {
        Self { policy, blocked, now }
    }

    /// `None` for a plain booking; admins only otherwise.
    pub fn recurrence(&self, actor: Actor, raw: Option<&str>) -> Result<Option<Recurrence>, EngineError> {
        let tag = match raw.map(str::trim) {
            None | Some("") => return Ok(None),
            Some(t) if t.eq_ignore_ascii_case("none") => return Ok(None),
            Some(t) => t,
        };
        if !actor.is_admin() {
            return Err(AuthFailure::AdminRequired.into());
        }
        Recurrence::parse(tag)
            .map(Some)
            .ok_or_else(|| EngineError::validation("Invalid recurrence type."))
    }

    pub fn check_required(&self, actor: Actor, req: &CreateRequest) -> Result<(), EngineError> {
        let mut fields: Vec<(&str, &str)> = vec![
            ("first_name", req.requester.first_name.as_str()),
            ("last_name", req.requester.last_name.as_str()),
            ("email", req.requester.email.as_str()),
        ];
        if !actor.is_admin() {
            let leader = req.group_leader.as_ref();
            fields.push(("leader_first_name", leader.map_or("", |l| l.first_name.as_str())));
            fields.push(("leader_last_name", leader.map_or("", |l| l.last_name.as_str())));
        }
        fields.push(("event", req.purpose.as_str()));
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(EngineError::validation(format!("Missing required field: {name}.")));
            }
        }
        if req.party_size == 0 {
            return Err(EngineError::validation("Missing required field: participants."));
        }
        for (name, value) in [("start_iso", &req.start), ("end_iso", &req.end), ("room", &req.room)] {
            if value.trim().is_empty() {
                return Err(EngineError::validation(format!("Missing required field: {name}.")));
            }
        }
        Ok(())
    }

    pub fn rules(&self, room: &str) -> Result<&'a RoomRules, EngineError> {
        self.policy
            .rules(room)
            .ok_or_else(|| EngineError::validation(format!("Invalid room name: {room}.")))
    }

    pub fn parse_span(&self, start: &str, end: &str) -> Result<Span, EngineError> {
        let bt = &self.policy.business_time;
        let (Some(start), Some(end)) = (bt.parse_instant(start), bt.parse_instant(end)) else {
            return Err(EngineError::validation("Invalid date format."));
        };
        if start >= end {
            return Err(EngineError::validation("Start time must be before end time."));
        }
        let span = Span::new(start, end);
        validate_span(&span)?;
        Ok(span)
    }

    /// Redirect a regular user's request into the overflow room when it fits there.
    /// Admin choices are final.
    pub fn resolve_room(&self, actor: Actor, requested: &str, span: &Span, party_size: u32, active: &[Booking]) -> String {
        let Some(overflow) = self.policy.overflow_room.as_deref() else {
            return requested.to_string();
        };
        if actor.is_admin() || requested == overflow {
            return requested.to_string();
        }
        let Some(rules) = self.policy.rules(overflow) else {
            return requested.to_string();
        };
        let fits = Usage::of(&concurrent(overflow, span, active, None))
            .admits(party_size, rules)
            .is_ok();
        let sized = party_size >= rules.min_booking_size && party_size <= rules.max_booking_size;
        let open = self.blocked_on(overflow, span).is_none();
        if fits && sized && open {
            overflow.to_string()
        } else {
            requested.to_string()
        }
    }

    fn blocked_on(&self, room: &str, span: &Span) -> Option<BlockedDate> {
        let date = self.policy.business_time.date_of(span.start);
        self.blocked.is_blocked(date, room)
    }

    pub fn check_blocked(&self, room: &str, span: &Span) -> Result<(), EngineError> {
        match self.blocked_on(room, span) {
            Some(block) => Err(EngineError::Blocked {
                room: room.to_string(),
                date: block.date,
                reason: block.reason,
            }),
            None => Ok(()),
        }
    }

    /// Size, shape and booking-window rules for the resolved room.
    pub fn check_policy(
        &self,
        actor: Actor,
        req: &CreateRequest,
        room: &str,
        rules: &RoomRules,
        span: &Span,
    ) -> Result<(), EngineError> {
        let party = req.party_size;
        if party > rules.max_total_participants {
            return Err(EngineError::Capacity {
                room: room.to_string(),
                limit: CapacityLimit::Participants {
                    max: rules.max_total_participants,
                },
            });
        }
        if actor.is_admin() {
            if party < rules.min_booking_size {
                return Err(EngineError::validation(format!(
                    "Invalid group size. Must be at least {}.",
                    rules.min_booking_size
                )));
            }
        } else if party < rules.min_booking_size || party > rules.max_booking_size {
            return Err(EngineError::validation(format!(
                "Invalid group size for {room}. Participants must be between {} and {}.",
                rules.min_booking_size, rules.max_booking_size
            )));
        }

        if !looks_like_email(req.requester.email.trim()) {
            return Err(EngineError::validation("Invalid email format."));
        }
        check_lengths(req)?;

        let bt = &self.policy.business_time;
        let today = bt.date_of(self.now);
        let today_start = bt.start_of_day(today);
        if span.start < today_start {
            return Err(EngineError::validation("Cannot create a booking in the past."));
        }
        let horizon = if actor.is_admin() {
            today.checked_add_months(Months::new(self.policy.admin_window_months))
        } else {
            today.checked_add_days(Days::new(u64::from(self.policy.user_window_days)))
        };
        if let Some(horizon) = horizon
            && span.start > bt.start_of_day(horizon)
        {
            return Err(EngineError::validation(if actor.is_admin() {
                format!(
                    "Admins can only book up to {} months in advance.",
                    self.policy.admin_window_months
                )
            } else {
                format!("Users can only book up to {} days in advance.", self.policy.user_window_days)
            }));
        }
        if !actor.is_admin() && self.policy.min_lead_ms > 0 && span.start - self.now < self.policy.min_lead_ms {
            return Err(EngineError::validation(format!(
                "Bookings must be made at least {} hours in advance.",
                self.policy.min_lead_ms / HOUR_MS
            )));
        }
        Ok(())
    }

    /// Admit occurrences one by one. Each admitted occurrence counts against the
    /// ones after it; the first occurrence may lie before `now`.
    pub fn plan_series(
        &self,
        recurrence: Recurrence,
        first: Span,
        room: &str,
        rules: &RoomRules,
        party_size: u32,
        active: &[Booking],
    ) -> SeriesPlan {
        let mut plan = SeriesPlan::default();
        let bt = &self.policy.business_time;
        let count = recurrence.count().min(MAX_SERIES_OCCURRENCES);
        for n in 0..count {
            let Some(span) = recurrence.occurrence(n, first, bt) else {
                continue;
            };
            let verdict = self.admit_occurrence(n, span, room, rules, party_size, active, &plan.admitted);
            match verdict {
                Ok(()) => plan.admitted.push(span),
                Err(e) => {
                    tracing::debug!("series occurrence {n} in {room} rejected: {e}");
                    plan.rejected.push((span, e));
                }
            }
        }
        plan
    }

    #[allow(clippy::too_many_arguments)]
    fn admit_occurrence(
        &self,
        n: u32,
        span: Span,
        room: &str,
        rules: &RoomRules,
        party_size: u32,
        active: &[Booking],
        admitted: &[Span],
    ) -> Result<(), EngineError> {
        if n > 0 && span.start < self.now {
            return Err(EngineError::validation("Cannot create a booking in the past."));
        }
        validate_span(&span)?;
        self.check_blocked(room, &span)?;
        let mut usage = Usage::of(&concurrent(room, &span, active, None));
        let own = admitted.iter().filter(|s| s.overlaps(&span)).count() as u32;
        usage.groups = usage.groups.saturating_add(own);
        usage.participants = usage.participants.saturating_add(own.saturating_mul(party_size));
        usage.admits(party_size, rules).map_err(|limit| EngineError::Capacity {
            room: room.to_string(),
            limit,
        })
    }

    pub fn check_capacity(&self, room: &str, rules: &RoomRules, span: &Span, party_size: u32, active: &[Booking]) -> Result<(), EngineError> {
        check_capacity(room, rules, span, party_size, active)
    }
}

/// `local@domain.tld`, no whitespace.
pub(crate) fn looks_like_email(s: &str) -> bool {
    if s.is_empty() || s.chars().any(char::is_whitespace) {
        return false;
    }
    s.match_indices('@').any(|(i, _)| {
        let (local, domain) = (&s[..i], &s[i + 1..]);
        !local.is_empty()
            && domain
                .char_indices()
                .any(|(j, c)| c == '.' && j > 0 && j + 1 < domain.len())
    })
}

fn check_lengths(req: &CreateRequest) -> Result<(), EngineError> {
    let mut names = vec![&req.requester.first_name, &req.requester.last_name];
    if let Some(leader) = &req.group_leader {
        names.push(&leader.first_name);
        names.push(&leader.last_name);
    }
    if names.iter().any(|n| n.len() > MAX_NAME_LEN) {
        return Err(EngineError::validation("Name is too long."));
    }
    if req.requester.email.len() > MAX_EMAIL_LEN {
        return Err(EngineError::validation("Invalid email format."));
    }
    if req.purpose.len() > MAX_PURPOSE_LEN {
        return Err(EngineError::validation("Event name is too long."));
    }
    if req.notes.len() > MAX_NOTES_LEN {
        return Err(EngineError::validation("Notes are too long."));
    }
    Ok(())
}
