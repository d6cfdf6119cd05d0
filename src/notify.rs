use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::model::{Booking, BookingSummary};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeriesTally {
    pub admitted: u32,
    pub rejected: u32,
}

/// Post-commit side effect the engine asks its caller to deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    BookingConfirmed {
        booking: Booking,
        requested_room: String,
        /// Set for recurring requests; one notice covers the whole series.
        series: Option<SeriesTally>,
    },
    BookingCancelled {
        booking: Booking,
        by_admin: bool,
    },
    BookingMoved {
        booking: Booking,
        reason: String,
    },
    ClosureCancelled {
        booking: Booking,
        date: NaiveDate,
        reason: String,
    },
    DataExported {
        email: String,
        records: usize,
    },
    DataErased {
        email: String,
        bookings: Vec<BookingSummary>,
    },
}

impl Notice {
    pub fn kind(&self) -> &'static str {
        match self {
            Notice::BookingConfirmed { .. } => "booking_confirmed",
            Notice::BookingCancelled { .. } => "booking_cancelled",
            Notice::BookingMoved { .. } => "booking_moved",
            Notice::ClosureCancelled { .. } => "closure_cancelled",
            Notice::DataExported { .. } => "data_exported",
            Notice::DataErased { .. } => "data_erased",
        }
    }

    pub fn booking(&self) -> Option<&Booking> {
        match self {
            Notice::BookingConfirmed { booking, .. }
            | Notice::BookingCancelled { booking, .. }
            | Notice::BookingMoved { booking, .. }
            | Notice::ClosureCancelled { booking, .. } => Some(booking),
            Notice::DataExported { .. } | Notice::DataErased { .. } => None,
        }
    }

    pub fn room(&self) -> Option<&str> {
        self.booking().map(|b| b.room.as_str())
    }

    /// Contact address, if there is anyone to tell.
    pub fn recipient(&self) -> Option<&str> {
        let email = match self {
            Notice::DataExported { email, .. } | Notice::DataErased { email, .. } => email.as_str(),
            _ => {
                let booking = self.booking()?;
                if booking.requester.is_anonymized() {
                    return None;
                }
                booking.requester.email.as_str()
            }
        };
        Some(email).filter(|e| !e.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    Unavailable(String),
    Rejected { recipient: String, reason: String },
}

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifyError::Unavailable(msg) => write!(f, "notifier unavailable: {msg}"),
            NotifyError::Rejected { recipient, reason } => write!(f, "delivery to {recipient} rejected: {reason}"),
        }
    }
}

impl std::error::Error for NotifyError {}

/// Delivery channel for notices (email, chat, push). Failures are reported,
/// never retried here.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notice: &Notice) -> Result<(), NotifyError>;
}

/// Writes each notice to the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notice: &Notice) -> Result<(), NotifyError> {
        match notice.booking() {
            Some(b) => info!(
                "notice {} for {} ({} in {}) to {}",
                notice.kind(),
                b.id.display_code(),
                b.purpose,
                b.room,
                notice.recipient().unwrap_or("nobody")
            ),
            None => info!("notice {} to {}", notice.kind(), notice.recipient().unwrap_or("nobody")),
        }
        Ok(())
    }
}

/// Broadcast hub for in-process listeners, one channel per room.
pub struct NotifyHub {
    channels: DashMap<String, broadcast::Sender<Notice>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to notices for a room. Creates the channel if needed.
    pub fn subscribe(&self, room: &str) -> broadcast::Receiver<Notice> {
        let sender = self
            .channels
            .entry(room.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// No-op if nobody is listening or the notice has no room.
    pub fn send(&self, notice: &Notice) {
        if let Some(room) = notice.room()
            && let Some(sender) = self.channels.get(room)
        {
            let _ = sender.send(notice.clone());
        }
    }

    pub fn remove(&self, room: &str) {
        self.channels.remove(room);
    }
}

#[async_trait]
impl Notifier for NotifyHub {
    async fn notify(&self, notice: &Notice) -> Result<(), NotifyError> {
        self.send(notice);
        Ok(())
    }
}

/// Hands every notice to each inner notifier; the first failure is reported
/// after all of them have run.
pub struct Fanout {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl Fanout {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self { notifiers }
    }
}

#[async_trait]
impl Notifier for Fanout {
    async fn notify(&self, notice: &Notice) -> Result<(), NotifyError> {
        let results = join_all(self.notifiers.iter().map(|n| n.notify(notice))).await;
        results.into_iter().collect::<Result<Vec<()>, _>>().map(|_| ())
    }
}

/// Deliver a batch concurrently. Failures are logged and counted, never returned:
/// a committed booking stays committed whatever happens here.
pub async fn deliver_all(notifier: &dyn Notifier, notices: &[Notice]) -> usize {
    let results = join_all(notices.iter().map(|n| notifier.notify(n))).await;
    let mut failed = 0;
    for (notice, result) in notices.iter().zip(results) {
        if let Err(e) = result {
            failed += 1;
            warn!("notice {} not delivered: {e}", notice.kind());
            metrics::counter!(crate::observability::NOTIFY_FAILURES_TOTAL, "kind" => notice.kind()).increment(1);
        }
    }
    failed
}
