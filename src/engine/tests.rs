use super::*;
use crate::audit::AuditAction;
use crate::auth::Actor;
use crate::clock::ManualClock;
use crate::config::Announcement;
use std::time::Duration;

const H: Ms = 3_600_000;
const DAY: Ms = 24 * H;

/// Saturday morning, Manila time.
const NOW: &str = "2025-05-31T09:00";

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("roombook_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn setup(name: &str, now: &str) -> (Engine, Arc<ManualClock>) {
    setup_with(name, now, Policy::default())
}

fn setup_with(name: &str, now: &str, policy: Policy) -> (Engine, Arc<ManualClock>) {
    let start = policy.business_time.parse_instant(now).unwrap();
    let clock = Arc::new(ManualClock::new(start));
    let engine = Engine::new(test_wal_path(name), Arc::new(policy), clock.clone()).unwrap();
    (engine, clock)
}

fn at(engine: &Engine, raw: &str) -> Ms {
    engine.policy().business_time.parse_instant(raw).unwrap()
}

fn admin_request(room: &str, start: &str, end: &str, party: u32) -> CreateRequest {
    CreateRequest {
        room: room.into(),
        start: start.into(),
        end: end.into(),
        party_size: party,
        requester: Identity::new("Ana", "Reyes", "ana@example.com"),
        purpose: "Choir practice".into(),
        ..Default::default()
    }
}

fn user_request(room: &str, start: &str, end: &str, party: u32) -> CreateRequest {
    CreateRequest {
        room: room.into(),
        start: start.into(),
        end: end.into(),
        party_size: party,
        requester: Identity::new("Maria", "Santos", "maria@example.com"),
        group_leader: Some(Identity::new("Paolo", "Lim", "")),
        purpose: "Youth fellowship".into(),
        notes: "needs projector".into(),
        consent: Some(Consent {
            terms_accepted: true,
            privacy_accepted: true,
            accepted_at: Some(0),
        }),
        ..Default::default()
    }
}

fn cancel(id: BookingId, code: Option<&str>, scope: Option<CancelScope>) -> CancelRequest {
    CancelRequest {
        id,
        code: code.map(str::to_string),
        scope,
    }
}

async fn book(engine: &Engine, actor: Actor, req: CreateRequest) -> BookingId {
    engine.create(actor, req).await.unwrap().value.first_id()
}

// ── Admission ────────────────────────────────────────────

#[tokio::test]
async fn single_group_room_end_to_end() {
    let (engine, _) = setup("joseph.wal", NOW);

    let a = engine
        .create(Actor::Admin, admin_request("Joseph", "2025-06-01T10:00", "2025-06-01T11:00", 10))
        .await
        .unwrap();
    assert_eq!(a.value.room_booked(), "Joseph");
    assert!(matches!(a.notices.as_slice(), [Notice::BookingConfirmed { series: None, .. }]));

    let b = engine
        .create(Actor::Admin, admin_request("Joseph", "2025-06-01T10:00", "2025-06-01T11:00", 5))
        .await
        .unwrap_err();
    assert!(matches!(
        b,
        EngineError::Capacity {
            limit: CapacityLimit::Groups { max: 1 },
            ..
        }
    ));
    assert!(b.to_string().starts_with("Group Limit Exceeded for Joseph"));

    // touching, not overlapping
    let c = engine
        .create(Actor::Admin, admin_request("Joseph", "2025-06-01T11:00", "2025-06-01T12:00", 5))
        .await;
    tokio_test::assert_ok!(&c);

    assert_eq!(engine.list_confirmed().bookings.len(), 2);
    assert_eq!(engine.audit_log().len(), 2);
}

#[tokio::test]
async fn participant_limit_names_the_room() {
    let (engine, _) = setup("participants.wal", NOW);
    book(&engine, Actor::Admin, admin_request("Jonah", "2025-06-01T10:00", "2025-06-01T11:00", 15)).await;

    let err = engine
        .create(Actor::Admin, admin_request("Jonah", "2025-06-01T10:30", "2025-06-01T11:30", 6))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Capacity {
            limit: CapacityLimit::Participants { max: 20 },
            ..
        }
    ));
    assert_eq!(err.category(), "capacity");
    assert!(err.to_string().contains("Jonah"));
}

#[tokio::test]
async fn user_requests_are_squeezed_into_overflow() {
    let (engine, _) = setup("squeeze.wal", NOW);

    let out = engine
        .create(Actor::User, user_request("Joseph", "2025-06-01T10:00", "2025-06-01T11:00", 5))
        .await
        .unwrap()
        .value;
    assert!(out.was_redirected());
    assert_eq!(out.room_booked(), "Main Hall");
    assert_eq!(out.room_requested(), "Joseph");
    assert_eq!(engine.find(&out.first_id()).unwrap().room, "Main Hall");

    let created = engine
        .audit_log()
        .into_iter()
        .find(|e| e.action == AuditAction::Create)
        .unwrap();
    assert_eq!(created.details_json()["requested_room"], "Joseph");
    assert_eq!(created.details_json()["room"], "Main Hall");

    // asking for the overflow room itself is never a redirect
    let direct = engine
        .create(Actor::User, user_request("Main Hall", "2025-06-01T13:00", "2025-06-01T14:00", 5))
        .await
        .unwrap()
        .value;
    assert!(!direct.was_redirected());

    // admins get the room they asked for
    let admin = engine
        .create(Actor::Admin, admin_request("Joseph", "2025-06-01T10:00", "2025-06-01T11:00", 5))
        .await
        .unwrap()
        .value;
    assert_eq!(admin.room_booked(), "Joseph");
}

#[tokio::test]
async fn admin_bypasses_per_booking_maximum() {
    let policy = Policy {
        overflow_room: None,
        ..Policy::default()
    };
    let (engine, _) = setup_with("admin_bypass.wal", NOW, policy);

    let admin = engine
        .create(Actor::Admin, admin_request("Jonah", "2025-06-01T10:00", "2025-06-01T11:00", 18))
        .await;
    tokio_test::assert_ok!(&admin);

    let user = engine
        .create(Actor::User, user_request("Jonah", "2025-06-01T12:00", "2025-06-01T13:00", 18))
        .await
        .unwrap_err();
    assert_eq!(
        user.to_string(),
        "Invalid group size for Jonah. Participants must be between 2 and 10."
    );
    assert_eq!(user.category(), "validation");
}

#[tokio::test]
async fn admin_party_larger_than_room_is_rejected() {
    let (engine, _) = setup("admin_huge_party.wal", NOW);
    book(&engine, Actor::Admin, admin_request("Main Hall", "2025-06-01T10:00", "2025-06-01T11:00", 10)).await;

    let err = engine
        .create(
            Actor::Admin,
            admin_request("Main Hall", "2025-06-01T10:00", "2025-06-01T11:00", u32::MAX - 5),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Capacity {
            limit: CapacityLimit::Participants { max: 55 },
            ..
        }
    ));

    let mut series = admin_request("Main Hall", "2025-06-01T10:00", "2025-06-01T11:00", u32::MAX);
    series.recurrence = Some("weekly".into());
    assert!(matches!(
        engine.create(Actor::Admin, series).await,
        Err(EngineError::Capacity { .. })
    ));

    let hall = engine.list_confirmed().bookings;
    assert_eq!(hall.len(), 1);
    assert_eq!(hall[0].party_size, 10);
}

#[tokio::test]
async fn huge_user_party_is_not_squeezed() {
    let (engine, _) = setup("user_huge_party.wal", NOW);
    book(&engine, Actor::Admin, admin_request("Main Hall", "2025-06-01T10:00", "2025-06-01T11:00", 10)).await;

    let err = engine
        .create(Actor::User, user_request("Joseph", "2025-06-01T10:00", "2025-06-01T11:00", u32::MAX))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Capacity {
            ref room,
            limit: CapacityLimit::Participants { max: 15 },
        } if room == "Joseph"
    ));
    assert_eq!(engine.list_confirmed().bookings.len(), 1);
}

#[tokio::test]
async fn users_need_lead_time_and_stay_inside_window() {
    let (engine, _) = setup("user_windows.wal", NOW);

    let soon = engine
        .create(Actor::User, user_request("Main Hall", "2025-05-31T18:00", "2025-05-31T19:00", 5))
        .await
        .unwrap_err();
    assert_eq!(soon.to_string(), "Bookings must be made at least 24 hours in advance.");

    let far = engine
        .create(Actor::User, user_request("Main Hall", "2025-06-09T10:00", "2025-06-09T11:00", 5))
        .await
        .unwrap_err();
    assert_eq!(far.to_string(), "Users can only book up to 7 days in advance.");

    let past = engine
        .create(Actor::Admin, admin_request("Moses", "2025-05-30T10:00", "2025-05-30T11:00", 5))
        .await
        .unwrap_err();
    assert_eq!(past.to_string(), "Cannot create a booking in the past.");

    let unknown = engine
        .create(Actor::Admin, admin_request("Attic", "2025-06-01T10:00", "2025-06-01T11:00", 5))
        .await
        .unwrap_err();
    assert_eq!(unknown.to_string(), "Invalid room name: Attic.");
}

#[tokio::test]
async fn random_admissions_never_exceed_room_limits() {
    let (engine, _) = setup("capacity_invariant.wal", NOW);
    let base = at(&engine, "2025-06-02T08:00");
    let bt = engine.policy().business_time;
    let rooms = ["Main Hall", "Jonah", "Joseph", "Moses"];

    let mut seed: u64 = 0x5eed;
    let mut next = move |n: u64| {
        seed = seed
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (seed >> 33) % n
    };

    let mut accepted = 0;
    for _ in 0..300 {
        let room = rooms[next(4) as usize];
        let start = base + next(3) as Ms * DAY + next(20) as Ms * H / 2;
        let end = start + (1 + next(6)) as Ms * H / 2;
        let party = 2 + next(24) as u32;
        let req = admin_request(room, &bt.format_local(start), &bt.format_local(end), party);
        if engine.create(Actor::Admin, req).await.is_ok() {
            accepted += 1;
        }
    }
    assert!(accepted > 20, "only {accepted} admitted");

    let active = engine.store.scan_active();
    for room in rooms {
        let rules = engine.policy().rules(room).unwrap();
        let loads: Vec<(Span, u32)> = active
            .iter()
            .filter(|b| b.room == room)
            .map(|b| (b.span, b.party_size))
            .collect();
        let peak = peak_usage(&loads);
        assert!(peak.groups <= rules.max_concurrent_groups, "{room}: {peak:?}");
        assert!(peak.participants <= rules.max_total_participants, "{room}: {peak:?}");
    }
}

#[tokio::test]
async fn concurrent_requests_for_last_slot_admit_one() {
    let (engine, _) = setup("race.wal", NOW);
    let engine = Arc::new(engine);

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .create(Actor::Admin, admin_request("Joseph", "2025-06-03T19:00", "2025-06-03T21:00", 4))
                    .await
            })
        })
        .collect();

    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 1);
    assert_eq!(engine.list_confirmed().bookings.len(), 1);
}

#[tokio::test]
async fn lock_timeout_is_transient() {
    let policy = Policy {
        lock_wait: Duration::from_millis(50),
        ..Policy::default()
    };
    let (engine, _) = setup_with("lock_timeout.wal", NOW, policy);

    let held = engine.lock_writes().await.unwrap();
    let err = engine
        .create(Actor::Admin, admin_request("Moses", "2025-06-01T10:00", "2025-06-01T11:00", 4))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::LockTimeout(_)));
    assert!(err.is_transient());
    assert_eq!(err.category(), "lock_timeout");
    assert!(engine.list_confirmed().bookings.is_empty());

    drop(held);
    let retry = engine
        .create(Actor::Admin, admin_request("Moses", "2025-06-01T10:00", "2025-06-01T11:00", 4))
        .await;
    tokio_test::assert_ok!(&retry);
}

// ── Recurring bookings ───────────────────────────────────

#[tokio::test]
async fn weekly_series_books_every_free_week() {
    let (engine, _) = setup("series_partial.wal", NOW);
    book(&engine, Actor::Admin, admin_request("Joseph", "2025-06-16T18:00", "2025-06-16T19:00", 2)).await;

    let req = CreateRequest {
        recurrence: Some("weekly".into()),
        ..admin_request("Joseph", "2025-06-02T18:00", "2025-06-02T20:00", 5)
    };
    let committed = engine.create(Actor::Admin, req).await.unwrap();
    let CreateOutcome::Series {
        group,
        admitted,
        rejected,
        first_id,
        ..
    } = committed.value
    else {
        panic!("expected a series outcome");
    };
    assert_eq!((admitted, rejected), (11, 1));
    assert_eq!(engine.find(&first_id).unwrap().recurrence_group, Some(group));

    // one confirmation for the whole series
    match committed.notices.as_slice() {
        [Notice::BookingConfirmed { series: Some(tally), .. }] => {
            assert_eq!(*tally, crate::notify::SeriesTally { admitted: 11, rejected: 1 });
        }
        other => panic!("unexpected notices: {other:?}"),
    }
    let members = engine
        .store
        .scan()
        .into_iter()
        .filter(|b| b.recurrence_group == Some(group))
        .count();
    assert_eq!(members, 11);
}

#[tokio::test]
async fn series_with_no_admissible_occurrence_fails() {
    let (engine, _) = setup("series_rejected.wal", NOW);
    let req = CreateRequest {
        recurrence: Some("monthly".into()),
        ..admin_request("Joseph", "2025-06-02T18:00", "2025-06-02T20:00", 16)
    };
    let err = engine.create(Actor::Admin, req).await.unwrap_err();
    assert!(matches!(err, EngineError::SeriesRejected { rejected: 6 }));
    assert!(engine.list_confirmed().bookings.is_empty());
}

#[tokio::test]
async fn users_cannot_book_series() {
    let (engine, _) = setup("series_user.wal", NOW);
    let req = CreateRequest {
        recurrence: Some("weekly".into()),
        ..user_request("Main Hall", "2025-06-02T18:00", "2025-06-02T20:00", 5)
    };
    let err = engine.create(Actor::User, req).await.unwrap_err();
    assert!(matches!(err, EngineError::Authorization(AuthFailure::AdminRequired)));
}

// ── Cancellation ─────────────────────────────────────────

#[tokio::test]
async fn user_cancel_needs_eight_character_code() {
    let (engine, _) = setup("cancel_code.wal", NOW);
    let id = book(
        &engine,
        Actor::User,
        user_request("Main Hall", "2025-06-01T10:00", "2025-06-01T11:00", 5),
    )
    .await;
    let code = id.to_string();

    let short = engine.cancel(Actor::User, cancel(id, Some(&code[..6]), None)).await.unwrap_err();
    assert!(matches!(short, EngineError::Authorization(AuthFailure::InvalidCode)));
    let missing = engine.cancel(Actor::User, cancel(id, None, None)).await.unwrap_err();
    assert!(matches!(missing, EngineError::Authorization(AuthFailure::InvalidCode)));

    let done = engine
        .cancel(Actor::User, cancel(id, Some(&code[..8].to_uppercase()), None))
        .await
        .unwrap();
    assert!(matches!(&done.value, CancelOutcome::Cancelled { bookings } if bookings.len() == 1));
    assert!(matches!(
        done.notices.as_slice(),
        [Notice::BookingCancelled { by_admin: false, .. }]
    ));
    let booking = engine.find(&id).unwrap();
    assert_eq!(booking.status, BookingStatus::Cancelled);
    assert_eq!(booking.notes, "needs projector");

    let again = engine
        .cancel(Actor::User, cancel(id, Some(&code[..8]), None))
        .await
        .unwrap_err();
    assert_eq!(again.to_string(), "Already cancelled.");
}

#[tokio::test]
async fn admin_bookings_ignore_short_codes() {
    let (engine, _) = setup("cancel_admin.wal", NOW);
    let id = book(
        &engine,
        Actor::Admin,
        admin_request("Moses", "2025-06-01T10:00", "2025-06-01T11:00", 4),
    )
    .await;

    let err = engine
        .cancel(Actor::User, cancel(id, Some(&id.display_code()), None))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Authorization(AuthFailure::CodeNotAccepted)));
    assert!(engine.find(&id).unwrap().is_confirmed());

    let unknown = engine
        .cancel(Actor::Admin, cancel(BookingId::new(), None, None))
        .await
        .unwrap_err();
    assert_eq!(unknown.category(), "not_found");

    engine.cancel(Actor::Admin, cancel(id, None, None)).await.unwrap();
    let booking = engine.find(&id).unwrap();
    assert_eq!(booking.status, BookingStatus::Cancelled);
    assert!(booking.notes.starts_with("[Admin Cancel] "));
    assert_eq!(engine.audit.count(AuditAction::Cancel), 1);
}

#[tokio::test]
async fn series_cancel_asks_for_scope_first() {
    let (engine, _) = setup("cancel_series.wal", NOW);
    let req = CreateRequest {
        recurrence: Some("weekly".into()),
        ..admin_request("Moses", "2025-06-02T18:00", "2025-06-02T20:00", 10)
    };
    let first = book(&engine, Actor::Admin, req).await;
    assert_eq!(engine.list_confirmed().bookings.len(), 12);

    let ask = engine.cancel(Actor::Admin, cancel(first, None, None)).await.unwrap();
    assert!(matches!(ask.value, CancelOutcome::ConfirmScope { remaining: 12, .. }));
    assert!(ask.notices.is_empty());
    assert_eq!(engine.list_confirmed().bookings.len(), 12);

    engine
        .cancel(Actor::Admin, cancel(first, None, Some(CancelScope::Occurrence)))
        .await
        .unwrap();
    assert_eq!(engine.list_confirmed().bookings.len(), 11);

    let next = engine.list_confirmed().bookings[0].id;
    let ask = engine.cancel(Actor::Admin, cancel(next, None, None)).await.unwrap();
    assert!(matches!(ask.value, CancelOutcome::ConfirmScope { remaining: 11, .. }));

    let all = engine
        .cancel(Actor::Admin, cancel(next, None, Some(CancelScope::Series)))
        .await
        .unwrap();
    assert!(matches!(&all.value, CancelOutcome::Cancelled { bookings } if bookings.len() == 11));
    assert_eq!(all.notices.len(), 11);
    assert!(engine.list_confirmed().bookings.is_empty());
}

// ── Move / duplicate ─────────────────────────────────────

#[tokio::test]
async fn move_review_reports_conflicts_and_peak() {
    let (engine, _) = setup("move.wal", NOW);
    book(&engine, Actor::Admin, admin_request("Jonah", "2025-06-01T10:00", "2025-06-01T11:00", 8)).await;
    book(&engine, Actor::Admin, admin_request("Jonah", "2025-06-01T10:30", "2025-06-01T11:30", 8)).await;
    let x = book(&engine, Actor::Admin, admin_request("Moses", "2025-06-01T10:00", "2025-06-01T11:00", 6)).await;

    let req = MoveRequest {
        id: x,
        room: "Jonah".into(),
        start: "2025-06-01T10:00".into(),
        end: "2025-06-01T11:30".into(),
        reason: "flooded".into(),
    };

    let denied = engine.preview_move(Actor::User, &req).await.unwrap_err();
    assert!(matches!(denied, EngineError::Authorization(AuthFailure::AdminRequired)));

    let review = engine.preview_move(Actor::Admin, &req).await.unwrap();
    assert_eq!(review.booking.room, "Moses");
    assert_eq!(review.conflicts.len(), 2);
    assert_eq!(
        review.peak,
        Usage {
            groups: 3,
            participants: 22
        }
    );
    assert!(review.exceeds_limits);
    assert_eq!(review.blocked, None);
    // preview changes nothing
    assert_eq!(engine.find(&x).unwrap().room, "Moses");

    let no_reason = MoveRequest {
        reason: "  ".into(),
        ..req.clone()
    };
    let err = engine.commit_move(Actor::Admin, no_reason).await.unwrap_err();
    assert_eq!(err.category(), "validation");

    let committed = engine.commit_move(Actor::Admin, req).await.unwrap();
    assert!(matches!(committed.notices.as_slice(), [Notice::BookingMoved { .. }]));
    let moved = engine.find(&x).unwrap();
    assert_eq!(moved.room, "Jonah");
    assert_eq!(moved.span, Span::new(at(&engine, "2025-06-01T10:00"), at(&engine, "2025-06-01T11:30")));
    assert_eq!(moved.notes, "[Admin Moved: flooded]");
    assert_eq!(moved.requester.email, "ana@example.com");
    assert_eq!(engine.audit.count(AuditAction::Move), 1);
}

#[tokio::test]
async fn only_confirmed_bookings_move() {
    let (engine, _) = setup("move_cancelled.wal", NOW);
    let id = book(&engine, Actor::Admin, admin_request("Moses", "2025-06-01T10:00", "2025-06-01T11:00", 6)).await;
    engine.cancel(Actor::Admin, cancel(id, None, None)).await.unwrap();

    let req = MoveRequest {
        id,
        room: "Joseph".into(),
        start: "2025-06-02T10:00".into(),
        end: "2025-06-02T11:00".into(),
        reason: "retry".into(),
    };
    let err = engine.commit_move(Actor::Admin, req).await.unwrap_err();
    assert_eq!(err.to_string(), "Only confirmed bookings can be moved.");
}

#[tokio::test]
async fn duplicate_keeps_duration_and_people() {
    let (engine, _) = setup("duplicate.wal", NOW);
    let original = book(
        &engine,
        Actor::Admin,
        admin_request("Moses", "2025-06-01T10:00", "2025-06-01T12:30", 6),
    )
    .await;

    let denied = engine.duplicate(Actor::User, original, "2025-06-08T09:00").await.unwrap_err();
    assert!(matches!(denied, EngineError::Authorization(AuthFailure::AdminRequired)));

    let copy = engine
        .duplicate(Actor::Admin, original, "2025-06-08T09:00")
        .await
        .unwrap()
        .value
        .first_id();
    assert_ne!(copy, original);
    let copy = engine.find(&copy).unwrap();
    assert_eq!(copy.span.start, at(&engine, "2025-06-08T09:00"));
    assert_eq!(copy.span.duration_ms(), 5 * H / 2);
    assert_eq!((copy.room.as_str(), copy.party_size), ("Moses", 6));
    assert_eq!(copy.purpose, "Choir practice");
    assert_eq!(copy.requester.full_name(), "Ana Reyes");

    // still subject to capacity
    let clash = engine.duplicate(Actor::Admin, original, "2025-06-01T11:00").await.unwrap_err();
    assert_eq!(clash.category(), "capacity");
}

// ── Blocked dates ────────────────────────────────────────

#[tokio::test]
async fn blocking_a_date_cancels_only_that_date() {
    let (engine, _) = setup("block_cascade.wal", "2025-11-01T09:00");
    let eve = book(&engine, Actor::Admin, admin_request("Main Hall", "2025-12-24T10:00", "2025-12-24T11:00", 20)).await;
    let morning = book(&engine, Actor::Admin, admin_request("Main Hall", "2025-12-25T10:00", "2025-12-25T11:00", 20)).await;
    let evening = book(&engine, Actor::Admin, admin_request("Jonah", "2025-12-25T18:00", "2025-12-25T19:00", 8)).await;
    let after = book(&engine, Actor::Admin, admin_request("Moses", "2025-12-26T10:00", "2025-12-26T11:00", 8)).await;

    let req = BlockDateRequest {
        date: "2025-12-25".into(),
        scope: "All Rooms".into(),
        reason: "Christmas".into(),
    };
    let denied = engine.block_date(Actor::User, req.clone()).await.unwrap_err();
    assert!(matches!(denied, EngineError::Authorization(AuthFailure::AdminRequired)));

    let outcome = engine.block_date(Actor::Admin, req).await.unwrap();
    assert_eq!(outcome.value.cancelled_count(), 2);
    assert_eq!(outcome.value.block.scope, RoomScope::AllRooms);
    assert_eq!(outcome.notices.len(), 2);
    assert!(
        outcome
            .notices
            .iter()
            .all(|n| matches!(n, Notice::ClosureCancelled { reason, .. } if reason == "Christmas"))
    );

    for id in [morning, evening] {
        let b = engine.find(&id).unwrap();
        assert_eq!(b.status, BookingStatus::CancelledBySystem);
        assert!(b.notes.starts_with("[Auto-Cancelled: Blocked Date - Christmas] "));
    }
    for id in [eve, after] {
        assert!(engine.find(&id).unwrap().is_confirmed());
    }
    assert_eq!(engine.audit.count(AuditAction::AutoCancelBlockedDate), 2);
    assert_eq!(engine.audit.count(AuditAction::BlockDate), 1);

    let closed = engine
        .create(Actor::Admin, admin_request("Moses", "2025-12-25T14:00", "2025-12-25T15:00", 4))
        .await
        .unwrap_err();
    assert!(matches!(&closed, EngineError::Blocked { reason, .. } if reason == "Christmas"));
}

#[tokio::test]
async fn room_scoped_block_spares_other_rooms() {
    let (engine, _) = setup("block_room.wal", NOW);
    let moses = book(&engine, Actor::Admin, admin_request("Moses", "2025-06-03T10:00", "2025-06-03T11:00", 8)).await;

    let outcome = engine
        .block_date(
            Actor::Admin,
            BlockDateRequest {
                date: "2025-06-03".into(),
                scope: "Jonah".into(),
                reason: "Painting".into(),
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome.value.cancelled_count(), 0);
    assert!(engine.find(&moses).unwrap().is_confirmed());
    assert_eq!(engine.blocked_dates().len(), 1);

    let bad_room = engine
        .block_date(
            Actor::Admin,
            BlockDateRequest {
                date: "2025-06-04".into(),
                scope: "Attic".into(),
                reason: "Painting".into(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(bad_room.category(), "validation");

    let bad_date = engine
        .block_date(
            Actor::Admin,
            BlockDateRequest {
                date: "06/04/2025".into(),
                scope: "Jonah".into(),
                reason: "Painting".into(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(bad_date.to_string(), "Invalid date format.");
}

// ── Reads ────────────────────────────────────────────────

#[tokio::test]
async fn listings_by_week_and_by_email() {
    let policy = Policy {
        announcement: Some(Announcement {
            message: "Parking lot closed".into(),
            active: true,
            starts_at: None,
            ends_at: None,
        }),
        ..Policy::default()
    };
    let (engine, _) = setup_with("listing.wal", NOW, policy);
    book(&engine, Actor::Admin, admin_request("Jonah", "2025-06-02T10:00", "2025-06-02T11:00", 4)).await;
    book(&engine, Actor::Admin, admin_request("Moses", "2025-06-03T10:00", "2025-06-03T11:00", 4)).await;
    book(&engine, Actor::Admin, admin_request("Jonah", "2025-06-10T10:00", "2025-06-10T11:00", 4)).await;
    book(&engine, Actor::User, user_request("Main Hall", "2025-06-04T10:00", "2025-06-04T11:00", 4)).await;

    let week = chrono::NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
    assert_eq!(engine.bookings_for_week(Some("Jonah"), week).len(), 1);
    assert_eq!(engine.bookings_for_week(None, week).len(), 3);

    let mine = engine.user_bookings("MARIA@example.com");
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].room, "Main Hall");
    assert!(engine.user_bookings("").is_empty());

    let listing = engine.list_confirmed();
    assert_eq!(listing.bookings.len(), 4);
    assert_eq!(listing.announcement.as_deref(), Some("Parking lot closed"));
}

// ── Privacy ──────────────────────────────────────────────

#[tokio::test]
async fn export_then_erase_personal_data() {
    let (engine, _) = setup("gdpr.wal", NOW);
    let first = book(&engine, Actor::User, user_request("Main Hall", "2025-06-01T10:00", "2025-06-01T11:00", 5)).await;
    let second = book(&engine, Actor::User, user_request("Main Hall", "2025-06-02T10:00", "2025-06-02T11:00", 5)).await;
    let code = first.display_code();

    let no_email = engine.export_user_data(" ", &code).await.unwrap_err();
    assert_eq!(no_email.to_string(), "Email is required.");
    let short = engine.export_user_data("maria@example.com", "ABC12").await.unwrap_err();
    assert!(matches!(short, EngineError::Authorization(AuthFailure::InvalidCode)));
    let wrong = engine.export_user_data("maria@example.com", "000000000000").await.unwrap_err();
    assert!(matches!(wrong, EngineError::Authorization(AuthFailure::InvalidCode)));
    let stranger = engine.export_user_data("nobody@example.com", &code).await.unwrap_err();
    assert_eq!(stranger.category(), "not_found");

    let export = engine
        .export_user_data("maria@example.com", &code.to_lowercase())
        .await
        .unwrap();
    assert_eq!(export.value.len(), 2);
    assert_eq!(export.value[0].get("email"), Some("maria@example.com"));
    assert_eq!(export.value[0].get("terms_accepted"), Some("TRUE"));
    assert!(matches!(export.notices.as_slice(), [Notice::DataExported { records: 2, .. }]));
    assert_eq!(engine.audit.count(AuditAction::Export), 1);

    let erased = engine.erase_user_data("maria@example.com", &code).await.unwrap();
    assert_eq!(erased.value.count, 2);
    assert_eq!(erased.value.summaries.len(), 2);
    assert!(matches!(&erased.notices[0], Notice::DataErased { bookings, .. } if bookings.len() == 2));

    for id in [first, second] {
        let b = engine.find(&id).unwrap();
        assert_eq!(b.status, BookingStatus::AnonymizedCancelled);
        assert!(b.requester.is_anonymized());
        assert_eq!(b.requester.email, ANONYMIZED_EMAIL);
        assert_eq!(b.group_leader, Some(Identity::default()));
        assert!(b.notes.is_empty());
        assert!(!b.is_admin_created());
    }
    assert!(engine.user_bookings("maria@example.com").is_empty());
    assert_eq!(engine.audit.count(AuditAction::Erasure), 2);

    let gone = engine.export_user_data("maria@example.com", &code).await.unwrap_err();
    assert_eq!(gone.category(), "not_found");
}

#[tokio::test]
async fn retention_sweep_is_idempotent() {
    let (engine, clock) = setup("retention.wal", NOW);
    let old_admin = book(&engine, Actor::Admin, admin_request("Moses", "2025-06-01T10:00", "2025-06-01T11:00", 4)).await;
    let old_user = book(&engine, Actor::User, user_request("Main Hall", "2025-06-02T10:00", "2025-06-02T11:00", 4)).await;

    clock.advance(400 * DAY);
    let bt = engine.policy().business_time;
    let fresh_start = clock.now_ms() + 2 * DAY;
    let fresh = book(
        &engine,
        Actor::Admin,
        admin_request("Moses", &bt.format_local(fresh_start), &bt.format_local(fresh_start + H), 4),
    )
    .await;

    assert_eq!(engine.anonymize_expired().await.unwrap(), 2);
    assert_eq!(engine.anonymize_expired().await.unwrap(), 0);
    assert_eq!(engine.audit.count(AuditAction::RetentionAnonymize), 2);

    for id in [old_admin, old_user] {
        let b = engine.find(&id).unwrap();
        assert!(b.requester.is_anonymized());
        // past bookings keep their status
        assert_eq!(b.status, BookingStatus::Confirmed);
    }
    assert_eq!(engine.find(&old_user).unwrap().group_leader, Some(Identity::default()));
    assert_eq!(engine.find(&old_admin).unwrap().group_leader, None);
    assert_eq!(engine.find(&fresh).unwrap().requester.first_name, "Ana");
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn state_survives_restart() {
    let path = test_wal_path("restart.wal");
    let policy = Arc::new(Policy::default());
    let clock = Arc::new(ManualClock::new(policy.business_time.parse_instant(NOW).unwrap()));

    let (listing, audit, cancelled) = {
        let engine = Engine::new(path.clone(), policy.clone(), clock.clone()).unwrap();
        book(&engine, Actor::Admin, admin_request("Moses", "2025-06-01T10:00", "2025-06-01T11:00", 4)).await;
        let user = book(&engine, Actor::User, user_request("Main Hall", "2025-06-02T10:00", "2025-06-02T11:00", 4)).await;
        engine
            .block_date(
                Actor::Admin,
                BlockDateRequest {
                    date: "2025-06-03".into(),
                    scope: "Jonah".into(),
                    reason: "Painting".into(),
                },
            )
            .await
            .unwrap();
        engine.cancel(Actor::Admin, cancel(user, None, None)).await.unwrap();
        (engine.list_confirmed(), engine.audit_log(), engine.find(&user).unwrap())
    };

    let engine = Engine::new(path, policy, clock).unwrap();
    assert_eq!(engine.list_confirmed(), listing);
    assert_eq!(engine.audit_log(), audit);
    assert_eq!(engine.find(&cancelled.id).unwrap(), cancelled);
    assert!(cancelled.notes.starts_with("[Admin Cancel] "));
    assert_eq!(engine.blocked_dates().len(), 1);
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compaction.wal");
    let policy = Arc::new(Policy::default());
    let clock = Arc::new(ManualClock::new(policy.business_time.parse_instant(NOW).unwrap()));

    let (bookings, audit, blocked) = {
        let engine = Engine::new(path.clone(), policy.clone(), clock.clone()).unwrap();
        let a = book(&engine, Actor::Admin, admin_request("Moses", "2025-06-01T10:00", "2025-06-01T11:00", 4)).await;
        book(&engine, Actor::Admin, admin_request("Jonah", "2025-06-01T10:00", "2025-06-01T11:00", 4)).await;
        engine.cancel(Actor::Admin, cancel(a, None, None)).await.unwrap();
        engine
            .block_date(
                Actor::Admin,
                BlockDateRequest {
                    date: "2025-06-05".into(),
                    scope: "All Rooms".into(),
                    reason: "Retreat".into(),
                },
            )
            .await
            .unwrap();
        assert!(engine.wal_appends_since_compact().await > 0);

        tokio_test::assert_ok!(engine.compact_wal().await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        (engine.store.scan(), engine.audit_log(), engine.blocked_dates())
    };

    let engine = Engine::new(path, policy, clock).unwrap();
    assert_eq!(engine.store.scan(), bookings);
    assert_eq!(engine.audit_log(), audit);
    assert_eq!(engine.blocked_dates(), blocked);
}
