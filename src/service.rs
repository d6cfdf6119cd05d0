use std::sync::Arc;

use chrono::NaiveDate;
use tracing::debug;

use crate::auth::AdminGate;
use crate::engine::*;
use crate::model::{BlockedDate, BookingId, BookingSummary};
use crate::notify::{Notifier, deliver_all};
use crate::store::BookingRow;

/// Turns a presented admin secret into an [`Actor`](crate::auth::Actor), runs the
/// engine operation, and delivers the resulting notices once the write lock is gone.
pub struct BookingService {
    engine: Arc<Engine>,
    gate: AdminGate,
    notifier: Arc<dyn Notifier>,
}

impl BookingService {
    pub fn new(engine: Arc<Engine>, gate: AdminGate, notifier: Arc<dyn Notifier>) -> Self {
        Self { engine, gate, notifier }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn verify_admin(&self, secret: Option<&str>) -> bool {
        self.gate.is_admin(secret)
    }

    /// Notices go out after the engine call has returned and released its lock.
    /// Delivery failures never reach the caller.
    async fn deliver<T>(&self, committed: Committed<T>) -> T {
        let failed = deliver_all(self.notifier.as_ref(), &committed.notices).await;
        if failed > 0 {
            debug!("{failed} of {} notice(s) not delivered", committed.notices.len());
        }
        committed.value
    }

    pub async fn create(&self, secret: Option<&str>, req: CreateRequest) -> Result<CreateOutcome, EngineError> {
        let actor = self.gate.resolve(secret)?;
        let committed = self.engine.create(actor, req).await?;
        Ok(self.deliver(committed).await)
    }

    pub async fn cancel(&self, secret: Option<&str>, req: CancelRequest) -> Result<CancelOutcome, EngineError> {
        let actor = self.gate.resolve(secret)?;
        let committed = self.engine.cancel(actor, req).await?;
        Ok(self.deliver(committed).await)
    }

    pub async fn preview_move(&self, secret: Option<&str>, req: &MoveRequest) -> Result<MoveReview, EngineError> {
        let actor = self.gate.require_admin(secret)?;
        self.engine.preview_move(actor, req).await
    }

    pub async fn commit_move(&self, secret: Option<&str>, req: MoveRequest) -> Result<MoveReview, EngineError> {
        let actor = self.gate.require_admin(secret)?;
        let committed = self.engine.commit_move(actor, req).await?;
        Ok(self.deliver(committed).await)
    }

    pub async fn duplicate(&self, secret: Option<&str>, id: BookingId, new_start: &str) -> Result<CreateOutcome, EngineError> {
        let actor = self.gate.require_admin(secret)?;
        let committed = self.engine.duplicate(actor, id, new_start).await?;
        Ok(self.deliver(committed).await)
    }

    pub async fn block_date(&self, secret: Option<&str>, req: BlockDateRequest) -> Result<BlockOutcome, EngineError> {
        let actor = self.gate.require_admin(secret)?;
        let committed = self.engine.block_date(actor, req).await?;
        Ok(self.deliver(committed).await)
    }

    pub async fn export_user_data(&self, email: &str, code: &str) -> Result<Vec<BookingRow>, EngineError> {
        let committed = self.engine.export_user_data(email, code).await?;
        Ok(self.deliver(committed).await)
    }

    pub async fn erase_user_data(&self, email: &str, code: &str) -> Result<ErasureOutcome, EngineError> {
        let committed = self.engine.erase_user_data(email, code).await?;
        Ok(self.deliver(committed).await)
    }

    pub fn list_confirmed(&self) -> Listing {
        self.engine.list_confirmed()
    }

    pub fn bookings_for_week(&self, room: Option<&str>, week_start: NaiveDate) -> Vec<BookingSummary> {
        self.engine.bookings_for_week(room, week_start)
    }

    pub fn user_bookings(&self, email: &str) -> Vec<BookingSummary> {
        self.engine.user_bookings(email)
    }

    pub fn blocked_dates(&self) -> Vec<BlockedDate> {
        self.engine.blocked_dates()
    }
}
