mod row;
mod table;

pub use row::{BookingRow, EXPORT_HEADERS};
pub use table::BookingTable;

use crate::model::{Booking, BookingId, FieldUpdate};

/// Row-oriented booking storage. Callers mutate only under the engine's write lock;
/// reads may run concurrently and see any committed state.
pub trait BookingStore: Send + Sync {
    /// Every booking, ordered by start then creation.
    fn scan(&self) -> Vec<Booking>;

    fn append(&self, booking: Booking) -> Result<(), StoreError>;

    fn update_field(&self, id: &BookingId, update: FieldUpdate) -> Result<(), StoreError>;

    fn find_by_id(&self, id: &BookingId) -> Option<Booking>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn scan_active(&self) -> Vec<Booking> {
        self.scan().into_iter().filter(Booking::is_confirmed).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    NotFound(BookingId),
    DuplicateId(BookingId),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "booking not found: {id}"),
            StoreError::DuplicateId(id) => write!(f, "booking already exists: {id}"),
        }
    }
}

impl std::error::Error for StoreError {}
