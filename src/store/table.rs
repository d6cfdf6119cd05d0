use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::model::{Booking, BookingId, FieldUpdate};

use super::{BookingStore, StoreError};

/// In-memory booking table. Rebuilt from the WAL on start-up.
#[derive(Default)]
pub struct BookingTable {
    rows: DashMap<BookingId, Booking>,
}

impl BookingTable {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BookingStore for BookingTable {
    fn scan(&self) -> Vec<Booking> {
        let mut rows: Vec<Booking> = self.rows.iter().map(|e| e.value().clone()).collect();
        rows.sort_by(|a, b| {
            a.span
                .start
                .cmp(&b.span.start)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        rows
    }

    fn append(&self, booking: Booking) -> Result<(), StoreError> {
        match self.rows.entry(booking.id) {
            Entry::Occupied(_) => Err(StoreError::DuplicateId(booking.id)),
            Entry::Vacant(slot) => {
                slot.insert(booking);
                Ok(())
            }
        }
    }

    fn update_field(&self, id: &BookingId, update: FieldUpdate) -> Result<(), StoreError> {
        let mut row = self.rows.get_mut(id).ok_or(StoreError::NotFound(*id))?;
        row.apply(update);
        Ok(())
    }

    fn find_by_id(&self, id: &BookingId) -> Option<Booking> {
        self.rows.get(id).map(|e| e.value().clone())
    }

    fn len(&self) -> usize {
        self.rows.len()
    }
}
