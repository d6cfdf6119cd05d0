use chrono::Duration;
use serde_json::json;
use tracing::{debug, info};

use crate::audit::{AuditAction, AuditActor, AuditEntry};
use crate::limits::MIN_PRIVACY_CODE_LEN;
use crate::model::*;
use crate::notify::Notice;
use crate::store::BookingRow;

use super::{AuthFailure, Committed, Engine, EngineError, observe};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErasureOutcome {
    pub count: usize,
    /// What each row looked like before it was scrubbed.
    pub summaries: Vec<BookingSummary>,
}

impl Engine {
    /// Rows owned by `email`, provided `code` is the display code of one of them.
    fn verified_rows(&self, email: &str, code: &str) -> Result<Vec<Booking>, EngineError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(EngineError::validation("Email is required."));
        }
        let code = code.trim();
        if code.len() < MIN_PRIVACY_CODE_LEN {
            return Err(AuthFailure::InvalidCode.into());
        }
        let rows: Vec<Booking> = self
            .store
            .scan()
            .into_iter()
            .filter(|b| b.requester.email_matches(email))
            .collect();
        if rows.is_empty() {
            return Err(EngineError::NotFound(format!("no bookings for {email}")));
        }
        if !rows.iter().any(|b| b.id.display_code().eq_ignore_ascii_case(code)) {
            return Err(AuthFailure::InvalidCode.into());
        }
        Ok(rows)
    }

    /// Every row held for `email`, as header → value maps.
    pub async fn export_user_data(&self, email: &str, code: &str) -> Result<Committed<Vec<BookingRow>>, EngineError> {
        let result = self.export_inner(email, code).await;
        observe("export", &result);
        result
    }

    async fn export_inner(&self, email: &str, code: &str) -> Result<Committed<Vec<BookingRow>>, EngineError> {
        let rows = self.verified_rows(email, code)?;
        let bt = &self.policy.business_time;
        let export: Vec<BookingRow> = rows.iter().map(|b| BookingRow::from_booking(b, bt)).collect();

        self.record_audit(AuditEntry::new(
            self.now(),
            AuditAction::Export,
            code.trim().to_uppercase(),
            AuditActor::User,
            json!({ "records": export.len() }),
        ))
        .await?;
        info!("exported {} record(s) for a data request", export.len());

        let notice = Notice::DataExported {
            email: email.trim().to_string(),
            records: export.len(),
        };
        Ok(Committed::new(export, vec![notice]))
    }

    /// Scrub personal fields from every row of `email` and withdraw its upcoming bookings.
    pub async fn erase_user_data(&self, email: &str, code: &str) -> Result<Committed<ErasureOutcome>, EngineError> {
        let result = self.erase_inner(email, code).await;
        observe("erase", &result);
        result
    }

    async fn erase_inner(&self, email: &str, code: &str) -> Result<Committed<ErasureOutcome>, EngineError> {
        let _guard = self.lock_writes().await?;
        let rows = self.verified_rows(email, code)?;
        let now = self.now();
        let bt = &self.policy.business_time;
        let summaries: Vec<BookingSummary> = rows.iter().map(|b| b.summary(bt)).collect();

        for booking in &rows {
            let withdrawn = booking.is_confirmed() && booking.span.start > now;
            if withdrawn {
                self.persist_and_apply(Event::FieldUpdated {
                    id: booking.id,
                    update: FieldUpdate::Status(BookingStatus::AnonymizedCancelled),
                })
                .await?;
                metrics::counter!(crate::observability::CANCELLATIONS_TOTAL, "cause" => "erasure").increment(1);
            }
            self.scrub(booking).await?;
            self.record_audit(AuditEntry::new(
                now,
                AuditAction::Erasure,
                booking.id.to_string(),
                AuditActor::User,
                json!({ "withdrawn": withdrawn }),
            ))
            .await?;
        }
        info!("erased personal data from {} booking(s)", rows.len());
        self.publish_gauges();

        let notice = Notice::DataErased {
            email: email.trim().to_string(),
            bookings: summaries.clone(),
        };
        Ok(Committed::new(
            ErasureOutcome {
                count: rows.len(),
                summaries,
            },
            vec![notice],
        ))
    }

    async fn scrub(&self, booking: &Booking) -> Result<(), EngineError> {
        let mut updates = vec![FieldUpdate::Requester(Identity::anonymized())];
        if booking.group_leader.is_some() {
            // Keep the leader slot: its presence marks a user-made booking.
            updates.push(FieldUpdate::GroupLeader(Some(Identity::default())));
        }
        if !booking.notes.is_empty() {
            updates.push(FieldUpdate::Notes(String::new()));
        }
        for update in updates {
            self.persist_and_apply(Event::FieldUpdated { id: booking.id, update }).await?;
        }
        Ok(())
    }

    /// Anonymize rows that ended more than `retention_days` ago. Rows already
    /// anonymized are skipped, so re-running is a no-op. Returns the number scrubbed.
    pub async fn anonymize_expired(&self) -> Result<u32, EngineError> {
        let result = self.anonymize_inner().await;
        observe("retention", &result);
        result
    }

    async fn anonymize_inner(&self) -> Result<u32, EngineError> {
        let _guard = self.lock_writes().await?;
        let now = self.now();
        let horizon = Duration::days(i64::from(self.policy.retention_days)).num_milliseconds();
        let cutoff = now.saturating_sub(horizon);

        let mut scrubbed = 0u32;
        for booking in self.store.scan() {
            if booking.span.end >= cutoff {
                continue;
            }
            if booking.requester.is_anonymized() {
                debug!("retention: {} already anonymized", booking.id);
                continue;
            }
            self.scrub(&booking).await?;
            self.record_audit(AuditEntry::new(
                now,
                AuditAction::RetentionAnonymize,
                booking.id.to_string(),
                AuditActor::System,
                json!({ "ended": self.policy.business_time.format_local(booking.span.end) }),
            ))
            .await?;
            scrubbed += 1;
        }
        metrics::counter!(crate::observability::RETENTION_ANONYMIZED_TOTAL).increment(u64::from(scrubbed));
        if scrubbed > 0 {
            info!("retention: anonymized {scrubbed} booking(s)");
        }
        Ok(scrubbed)
    }
}
