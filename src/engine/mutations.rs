use serde_json::json;
use tracing::info;
use ulid::Ulid;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditActor, AuditEntry};
use crate::auth::Actor;
use crate::clock::parse_date;
use crate::limits::MAX_REASON_LEN;
use crate::model::*;
use crate::notify::{Notice, SeriesTally};

use super::admission::{Admission, CreateOutcome, CreateRequest};
use super::conflict::{Usage, concurrent, peak_usage};
use super::{AuthFailure, Committed, Engine, EngineError, WalCommand, observe};

const ADMIN_CANCEL_NOTE: &str = "[Admin Cancel] ";

#[derive(Debug, Clone)]
pub struct CancelRequest {
    pub id: BookingId,
    /// Booking-code prefix proving the caller received the confirmation.
    pub code: Option<String>,
    /// Required from admins when the booking belongs to a series.
    pub scope: Option<CancelScope>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelScope {
    Occurrence,
    /// This occurrence and every occurrence of its series that has not started.
    Series,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled { bookings: Vec<BookingSummary> },
    /// Nothing was changed; ask again with an explicit scope.
    ConfirmScope { group: Uuid, remaining: usize },
}

#[derive(Debug, Clone)]
pub struct MoveRequest {
    pub id: BookingId,
    pub room: String,
    pub start: String,
    pub end: String,
    pub reason: String,
}

/// What moving a booking would do. Advisory: a move may proceed regardless.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveReview {
    pub booking: BookingSummary,
    pub room: String,
    pub span: Span,
    pub conflicts: Vec<BookingSummary>,
    /// Highest simultaneous load in the target window, the moved booking included.
    pub peak: Usage,
    pub exceeds_limits: bool,
    pub blocked: Option<BlockedDate>,
}

#[derive(Debug, Clone)]
pub struct BlockDateRequest {
    pub date: String,
    /// A room name or "All Rooms".
    pub scope: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockOutcome {
    pub block: BlockedDate,
    pub cancelled: Vec<BookingSummary>,
}

impl BlockOutcome {
    pub fn cancelled_count(&self) -> usize {
        self.cancelled.len()
    }
}

impl Engine {
    pub async fn create(&self, actor: Actor, req: CreateRequest) -> Result<Committed<CreateOutcome>, EngineError> {
        let result = self.create_inner(actor, req).await;
        observe("create", &result);
        result
    }

    async fn create_inner(&self, actor: Actor, req: CreateRequest) -> Result<Committed<CreateOutcome>, EngineError> {
        let _guard = self.lock_writes().await?;
        let now = self.now();
        let admission = Admission::new(&self.policy, &self.blocked, now);

        let recurrence = admission.recurrence(actor, req.recurrence.as_deref())?;
        admission.check_required(actor, &req)?;
        let requested = req.room.trim().to_string();
        admission.rules(&requested)?;
        let span = admission.parse_span(&req.start, &req.end)?;
        let active = self.store.scan_active();

        let room = match recurrence {
            Some(_) => requested.clone(),
            None => admission.resolve_room(actor, &requested, &span, req.party_size, &active),
        };
        let rules = admission.rules(&room)?;
        if recurrence.is_none() {
            admission.check_blocked(&room, &span)?;
        }
        admission.check_policy(actor, &req, &room, rules, &span)?;

        let Some(recurrence) = recurrence else {
            admission.check_capacity(&room, rules, &span, req.party_size, &active)?;
            let booking = self.build_booking(actor, &req, &room, span, None, now);
            self.commit_booking(actor, &booking, &requested).await?;
            info!(
                "booking {} confirmed in {room} (requested {requested}), party {}",
                booking.id, booking.party_size
            );
            metrics::counter!(crate::observability::ADMISSIONS_TOTAL, "kind" => "single").increment(1);
            self.publish_gauges();
            let outcome = CreateOutcome::Single {
                id: booking.id,
                room_booked: room,
                room_requested: requested.clone(),
            };
            let notice = Notice::BookingConfirmed {
                booking,
                requested_room: requested,
                series: None,
            };
            return Ok(Committed::new(outcome, vec![notice]));
        };

        let plan = admission.plan_series(recurrence, span, &room, rules, req.party_size, &active);
        let rejected = plan.rejected.len() as u32;
        if plan.admitted.is_empty() {
            return Err(EngineError::SeriesRejected { rejected });
        }

        let group = Uuid::new_v4();
        let mut first: Option<Booking> = None;
        for occurrence in &plan.admitted {
            let booking = self.build_booking(actor, &req, &room, *occurrence, Some(group), now);
            self.commit_booking(actor, &booking, &requested).await?;
            first.get_or_insert(booking);
        }
        let admitted = plan.admitted.len() as u32;
        let Some(first) = first else {
            return Err(EngineError::SeriesRejected { rejected });
        };
        info!("series {group} ({recurrence}) in {room}: {admitted} booked, {rejected} rejected");
        metrics::counter!(crate::observability::ADMISSIONS_TOTAL, "kind" => "series").increment(1);
        metrics::counter!(crate::observability::SERIES_OCCURRENCES_REJECTED_TOTAL).increment(u64::from(rejected));
        self.publish_gauges();

        let outcome = CreateOutcome::Series {
            group,
            first_id: first.id,
            admitted,
            rejected,
            room_booked: room,
            room_requested: requested.clone(),
        };
        let notice = Notice::BookingConfirmed {
            booking: first,
            requested_room: requested,
            series: Some(SeriesTally { admitted, rejected }),
        };
        Ok(Committed::new(outcome, vec![notice]))
    }

    fn build_booking(
        &self,
        actor: Actor,
        req: &CreateRequest,
        room: &str,
        span: Span,
        recurrence_group: Option<Uuid>,
        now: Ms,
    ) -> Booking {
        let trimmed = |i: &Identity| Identity::new(i.first_name.trim(), i.last_name.trim(), i.email.trim());
        Booking {
            id: BookingId::new(),
            room: room.to_string(),
            span,
            party_size: req.party_size,
            status: BookingStatus::Confirmed,
            requester: trimmed(&req.requester),
            group_leader: if actor.is_admin() {
                None
            } else {
                req.group_leader.as_ref().map(trimmed)
            },
            purpose: req.purpose.trim().to_string(),
            notes: req.notes.trim().to_string(),
            recurrence_group,
            consent: if actor.is_admin() { None } else { req.consent.clone() },
            created_at: now,
        }
    }

    async fn commit_booking(&self, actor: Actor, booking: &Booking, requested: &str) -> Result<(), EngineError> {
        self.persist_and_apply(Event::BookingAppended {
            booking: booking.clone(),
        })
        .await?;
        let bt = &self.policy.business_time;
        self.record_audit(AuditEntry::new(
            booking.created_at,
            AuditAction::Create,
            booking.id.to_string(),
            actor.into(),
            json!({
                "room": booking.room,
                "requested_room": requested,
                "start": bt.format_local(booking.span.start),
                "end": bt.format_local(booking.span.end),
                "participants": booking.party_size,
                "event": booking.purpose,
                "recurrence_group": booking.recurrence_group.map(|g| g.to_string()),
            }),
        ))
        .await
    }

    // ── Cancel ───────────────────────────────────────────────

    pub async fn cancel(&self, actor: Actor, req: CancelRequest) -> Result<Committed<CancelOutcome>, EngineError> {
        let result = self.cancel_inner(actor, req).await;
        observe("cancel", &result);
        result
    }

    async fn cancel_inner(&self, actor: Actor, req: CancelRequest) -> Result<Committed<CancelOutcome>, EngineError> {
        let _guard = self.lock_writes().await?;
        let now = self.now();
        let booking = self
            .store
            .find_by_id(&req.id)
            .ok_or_else(|| EngineError::NotFound(format!("booking {}", req.id)))?;

        let code_ok = req.code.as_deref().is_some_and(|c| booking.id.matches_code(c));
        if !actor.is_admin() {
            if booking.is_admin_created() {
                return Err(AuthFailure::CodeNotAccepted.into());
            }
            if !code_ok {
                return Err(AuthFailure::InvalidCode.into());
            }
        }
        if booking.status.is_cancelled() {
            return Err(AuthFailure::AlreadyCancelled.into());
        }

        let mut targets = vec![booking.clone()];
        if actor.is_admin()
            && let Some(group) = booking.recurrence_group
        {
            let upcoming: Vec<Booking> = self
                .store
                .scan_active()
                .into_iter()
                .filter(|b| b.recurrence_group == Some(group) && b.id != booking.id && b.span.start > now)
                .collect();
            match req.scope {
                None if !upcoming.is_empty() => {
                    return Ok(Committed::new(
                        CancelOutcome::ConfirmScope {
                            group,
                            remaining: upcoming.len() + 1,
                        },
                        Vec::new(),
                    ));
                }
                Some(CancelScope::Series) => targets.extend(upcoming),
                _ => {}
            }
        }

        let by_admin = actor.is_admin();
        let bt = &self.policy.business_time;
        let mut summaries = Vec::with_capacity(targets.len());
        let mut notices = Vec::with_capacity(targets.len());
        for mut target in targets {
            self.persist_and_apply(Event::FieldUpdated {
                id: target.id,
                update: FieldUpdate::Status(BookingStatus::Cancelled),
            })
            .await?;
            target.status = BookingStatus::Cancelled;
            if by_admin && !code_ok {
                target.notes = format!("{ADMIN_CANCEL_NOTE}{}", target.notes);
                self.persist_and_apply(Event::FieldUpdated {
                    id: target.id,
                    update: FieldUpdate::Notes(target.notes.clone()),
                })
                .await?;
            }
            self.record_audit(AuditEntry::new(
                now,
                AuditAction::Cancel,
                target.id.to_string(),
                actor.into(),
                json!({ "code_verified": code_ok, "series": target.recurrence_group.map(|g| g.to_string()) }),
            ))
            .await?;
            info!("booking {} in {} cancelled by {:?}", target.id, target.room, actor);
            metrics::counter!(
                crate::observability::CANCELLATIONS_TOTAL,
                "cause" => if by_admin { "admin" } else { "user" }
            )
            .increment(1);
            summaries.push(target.summary(bt));
            notices.push(Notice::BookingCancelled {
                booking: target,
                by_admin,
            });
        }
        self.publish_gauges();
        Ok(Committed::new(CancelOutcome::Cancelled { bookings: summaries }, notices))
    }

    // ── Move ─────────────────────────────────────────────────

    /// Conflict review for a move, without changing anything.
    pub async fn preview_move(&self, actor: Actor, req: &MoveRequest) -> Result<MoveReview, EngineError> {
        if !actor.is_admin() {
            return Err(AuthFailure::AdminRequired.into());
        }
        self.review_move(req)
    }

    pub async fn commit_move(&self, actor: Actor, req: MoveRequest) -> Result<Committed<MoveReview>, EngineError> {
        let result = self.commit_move_inner(actor, req).await;
        observe("move", &result);
        result
    }

    async fn commit_move_inner(&self, actor: Actor, req: MoveRequest) -> Result<Committed<MoveReview>, EngineError> {
        if !actor.is_admin() {
            return Err(AuthFailure::AdminRequired.into());
        }
        let reason = req.reason.trim();
        if reason.is_empty() {
            return Err(EngineError::validation("Missing required field: reason."));
        }
        if reason.len() > MAX_REASON_LEN {
            return Err(EngineError::validation("Reason is too long."));
        }

        let _guard = self.lock_writes().await?;
        let review = self.review_move(&req)?;
        let mut booking = self
            .store
            .find_by_id(&req.id)
            .ok_or_else(|| EngineError::NotFound(format!("booking {}", req.id)))?;
        let from_room = booking.room.clone();

        booking.room = review.room.clone();
        booking.span = review.span;
        booking.notes = format!("{} [Admin Moved: {reason}]", booking.notes).trim_start().to_string();
        for update in [
            FieldUpdate::Room(booking.room.clone()),
            FieldUpdate::Span(booking.span),
            FieldUpdate::Notes(booking.notes.clone()),
        ] {
            self.persist_and_apply(Event::FieldUpdated { id: booking.id, update }).await?;
        }

        let bt = &self.policy.business_time;
        self.record_audit(AuditEntry::new(
            self.now(),
            AuditAction::Move,
            booking.id.to_string(),
            AuditActor::Admin,
            json!({
                "from_room": from_room,
                "to_room": booking.room,
                "start": bt.format_local(booking.span.start),
                "end": bt.format_local(booking.span.end),
                "reason": reason,
                "conflicts": review.conflicts.len(),
            }),
        ))
        .await?;
        info!(
            "booking {} moved {from_room} -> {} ({} conflicts acknowledged)",
            booking.id,
            booking.room,
            review.conflicts.len()
        );

        let notice = Notice::BookingMoved {
            booking,
            reason: reason.to_string(),
        };
        Ok(Committed::new(review, vec![notice]))
    }

    fn review_move(&self, req: &MoveRequest) -> Result<MoveReview, EngineError> {
        let admission = Admission::new(&self.policy, &self.blocked, self.now());
        let room = req.room.trim();
        let rules = admission.rules(room)?;
        let span = admission.parse_span(&req.start, &req.end)?;
        let booking = self
            .store
            .find_by_id(&req.id)
            .ok_or_else(|| EngineError::NotFound(format!("booking {}", req.id)))?;
        if !booking.is_confirmed() {
            return Err(EngineError::validation("Only confirmed bookings can be moved."));
        }

        let bt = &self.policy.business_time;
        let active = self.store.scan_active();
        let conflicts = concurrent(room, &span, &active, Some(booking.id));

        let mut loads: Vec<(Span, u32)> = conflicts
            .iter()
            .map(|b| (Span::new(b.span.start.max(span.start), b.span.end.min(span.end)), b.party_size))
            .collect();
        loads.push((span, booking.party_size));
        let peak = peak_usage(&loads);
        let exceeds_limits =
            peak.groups > rules.max_concurrent_groups || peak.participants > rules.max_total_participants;

        Ok(MoveReview {
            booking: booking.summary(bt),
            room: room.to_string(),
            span,
            conflicts: conflicts.iter().map(|b| b.summary(bt)).collect(),
            peak,
            exceeds_limits,
            blocked: self.blocked.is_blocked(bt.date_of(span.start), room),
        })
    }

    // ── Duplicate ────────────────────────────────────────────

    /// Copy a booking's people, purpose and size to a new start, keeping its length.
    /// Goes through full admission as an admin request.
    pub async fn duplicate(&self, actor: Actor, id: BookingId, new_start: &str) -> Result<Committed<CreateOutcome>, EngineError> {
        let result = self.duplicate_inner(actor, id, new_start).await;
        observe("duplicate", &result);
        result
    }

    async fn duplicate_inner(&self, actor: Actor, id: BookingId, new_start: &str) -> Result<Committed<CreateOutcome>, EngineError> {
        if !actor.is_admin() {
            return Err(AuthFailure::AdminRequired.into());
        }
        let original = self
            .store
            .find_by_id(&id)
            .ok_or_else(|| EngineError::NotFound(format!("booking {id}")))?;
        let bt = &self.policy.business_time;
        let start = bt
            .parse_instant(new_start)
            .ok_or_else(|| EngineError::validation("Invalid date format."))?;
        let end = start + original.span.duration_ms();

        let req = CreateRequest {
            room: original.room.clone(),
            start: bt.format_local(start),
            end: bt.format_local(end),
            party_size: original.party_size,
            requester: original.requester.clone(),
            group_leader: original.group_leader.clone(),
            purpose: original.purpose.clone(),
            notes: String::new(),
            recurrence: None,
            consent: None,
        };
        self.create_inner(Actor::Admin, req).await
    }

    // ── Block a date ─────────────────────────────────────────

    /// Close a date for one room or all rooms, cancelling every confirmed booking
    /// that falls on it.
    pub async fn block_date(&self, actor: Actor, req: BlockDateRequest) -> Result<Committed<BlockOutcome>, EngineError> {
        let result = self.block_date_inner(actor, req).await;
        observe("block_date", &result);
        result
    }

    async fn block_date_inner(&self, actor: Actor, req: BlockDateRequest) -> Result<Committed<BlockOutcome>, EngineError> {
        if !actor.is_admin() {
            return Err(AuthFailure::AdminRequired.into());
        }
        let date = parse_date(&req.date).ok_or_else(|| EngineError::validation("Invalid date format."))?;
        let scope = RoomScope::parse(&req.scope);
        if let RoomScope::Room(ref room) = scope
            && !self.policy.catalog.contains(room)
        {
            return Err(EngineError::validation(format!("Invalid room name: {room}.")));
        }
        let reason = req.reason.trim().to_string();
        if reason.is_empty() {
            return Err(EngineError::validation("Missing required field: reason."));
        }
        if reason.len() > MAX_REASON_LEN {
            return Err(EngineError::validation("Reason is too long."));
        }

        let _guard = self.lock_writes().await?;
        let now = self.now();
        let block = BlockedDate {
            id: Ulid::new(),
            date,
            scope: scope.clone(),
            reason: reason.clone(),
            created_at: now,
        };
        self.persist_and_apply(Event::DateBlocked { block: block.clone() }).await?;
        self.record_audit(AuditEntry::new(
            now,
            AuditAction::BlockDate,
            block.id.to_string(),
            AuditActor::Admin,
            json!({ "date": date.to_string(), "room": scope.to_string(), "reason": reason }),
        ))
        .await?;

        let bt = &self.policy.business_time;
        let affected: Vec<Booking> = self
            .store
            .scan_active()
            .into_iter()
            .filter(|b| bt.date_of(b.span.start) == date && scope.covers(&b.room))
            .collect();

        let mut cancelled = Vec::with_capacity(affected.len());
        let mut notices = Vec::with_capacity(affected.len());
        for mut booking in affected {
            booking.status = BookingStatus::CancelledBySystem;
            booking.notes = format!("[Auto-Cancelled: Blocked Date - {reason}] {}", booking.notes);
            self.persist_and_apply(Event::FieldUpdated {
                id: booking.id,
                update: FieldUpdate::Status(booking.status),
            })
            .await?;
            self.persist_and_apply(Event::FieldUpdated {
                id: booking.id,
                update: FieldUpdate::Notes(booking.notes.clone()),
            })
            .await?;
            self.record_audit(AuditEntry::new(
                now,
                AuditAction::AutoCancelBlockedDate,
                booking.id.to_string(),
                AuditActor::System,
                json!({ "reason": reason, "blocked_room": scope.to_string(), "blocked_date": date.to_string() }),
            ))
            .await?;
            metrics::counter!(crate::observability::CANCELLATIONS_TOTAL, "cause" => "closure").increment(1);
            cancelled.push(booking.summary(bt));
            notices.push(Notice::ClosureCancelled {
                booking,
                date,
                reason: reason.clone(),
            });
        }
        info!("{date} blocked for {scope}: {} booking(s) cancelled", cancelled.len());
        self.publish_gauges();
        Ok(Committed::new(BlockOutcome { block, cancelled }, notices))
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL with just the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _guard = self.lock_writes().await?;
        let mut events: Vec<Event> = self
            .store
            .scan()
            .into_iter()
            .map(|booking| Event::BookingAppended { booking })
            .collect();
        events.extend(self.blocked.all().into_iter().map(|block| Event::DateBlocked { block }));
        events.extend(self.audit.entries().into_iter().map(|entry| Event::AuditRecorded { entry }));

        let (tx, rx) = tokio::sync::oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = tokio::sync::oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
