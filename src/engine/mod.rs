mod admission;
mod conflict;
mod error;
mod mutations;
mod privacy;
mod queries;
#[cfg(test)]
mod tests;

pub use admission::{CreateOutcome, CreateRequest};
pub use conflict::{Usage, peak_usage};
pub use error::{AuthFailure, CapacityLimit, EngineError};
pub use mutations::{BlockDateRequest, BlockOutcome, CancelOutcome, CancelRequest, CancelScope, MoveRequest, MoveReview};
pub use privacy::ErasureOutcome;
pub use queries::Listing;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, MutexGuard, mpsc, oneshot};
use tracing::warn;

use crate::audit::{AuditEntry, AuditLog};
use crate::blocked::BlockedDateIndex;
use crate::clock::Clock;
use crate::config::Policy;
use crate::model::*;
use crate::notify::Notice;
use crate::store::{BookingStore, BookingTable};
use crate::wal::Wal;

/// A successful write plus the notices its caller should deliver once the
/// write lock is gone.
#[derive(Debug)]
pub struct Committed<T> {
    pub value: T,
    pub notices: Vec<Notice>,
}

impl<T> Committed<T> {
    pub(crate) fn new(value: T, notices: Vec<Notice>) -> Self {
        Self { value, notices }
    }
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
                let flush_start = Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so partial bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let result = wal.append_buffered(&event).and_then(|()| wal.flush_sync());
            let _ = response.send(result);
        }
    }
}

pub struct Engine {
    pub(super) policy: Arc<Policy>,
    pub(super) store: Arc<dyn BookingStore>,
    pub(super) blocked: BlockedDateIndex,
    pub(super) audit: AuditLog,
    pub(super) clock: Arc<dyn Clock>,
    /// Serializes every read-check-write sequence.
    write_lock: Mutex<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, policy: Arc<Policy>, clock: Arc<dyn Clock>) -> io::Result<Self> {
        Self::with_store(wal_path, policy, clock, Arc::new(BookingTable::new()))
    }

    /// Open the WAL at `wal_path`, replay it into `store`, and start the writer task.
    /// Must be called inside a tokio runtime.
    pub fn with_store(
        wal_path: PathBuf,
        policy: Arc<Policy>,
        clock: Arc<dyn Clock>,
        store: Arc<dyn BookingStore>,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            policy,
            store,
            blocked: BlockedDateIndex::new(),
            audit: AuditLog::new(),
            clock,
            write_lock: Mutex::new(()),
            wal_tx,
        };

        for event in events {
            if let Err(e) = engine.apply(event) {
                warn!("replay: skipping event: {e}");
            }
        }
        engine.publish_gauges();
        Ok(engine)
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn now(&self) -> Ms {
        self.clock.now_ms()
    }

    fn apply(&self, event: Event) -> Result<(), EngineError> {
        match event {
            Event::BookingAppended { booking } => self.store.append(booking)?,
            Event::FieldUpdated { id, update } => self.store.update_field(&id, update)?,
            Event::DateBlocked { block } => self.blocked.insert(block),
            Event::AuditRecorded { entry } => self.audit.push(entry),
        }
        Ok(())
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Journal first, then apply. Nothing reaches the store that is not on disk.
    pub(super) async fn persist_and_apply(&self, event: Event) -> Result<(), EngineError> {
        self.wal_append(&event).await?;
        self.apply(event)
    }

    pub(super) async fn record_audit(&self, entry: AuditEntry) -> Result<(), EngineError> {
        self.persist_and_apply(Event::AuditRecorded { entry }).await
    }

    /// Take the global write lock, waiting at most `Policy::lock_wait`.
    pub(super) async fn lock_writes(&self) -> Result<MutexGuard<'_, ()>, EngineError> {
        let wait = self.policy.lock_wait;
        let started = Instant::now();
        let guard = tokio::time::timeout(wait, self.write_lock.lock())
            .await
            .map_err(|_| EngineError::LockTimeout(wait))?;
        metrics::histogram!(crate::observability::WRITE_LOCK_WAIT_SECONDS).record(started.elapsed().as_secs_f64());
        Ok(guard)
    }

    pub(super) fn publish_gauges(&self) {
        let confirmed = self.store.scan_active().len();
        metrics::gauge!(crate::observability::BOOKINGS_CONFIRMED).set(confirmed as f64);
    }
}

/// Count a failed write by category.
pub(super) fn observe<T>(op: &'static str, result: &Result<T, EngineError>) {
    if let Err(e) = result {
        metrics::counter!(crate::observability::REJECTIONS_TOTAL, "op" => op, "reason" => e.category()).increment(1);
    }
}
