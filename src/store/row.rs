use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::clock::BusinessTime;
use crate::model::Booking;

/// Column names of the flat booking record, in export order.
pub const EXPORT_HEADERS: [&str; 19] = [
    "id",
    "date",
    "start_iso",
    "end_iso",
    "first_name",
    "last_name",
    "email",
    "leader_first_name",
    "leader_last_name",
    "event",
    "room",
    "participants",
    "status",
    "created_at",
    "notes",
    "terms_accepted",
    "privacy_accepted",
    "consent_timestamp",
    "recurrence_group",
];

/// A booking rendered as named text cells. Serializes as a JSON object in header order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRow {
    cells: Vec<(&'static str, String)>,
}

impl BookingRow {
    pub fn from_booking(b: &Booking, bt: &BusinessTime) -> Self {
        let flag = |v: bool| if v { "TRUE" } else { "FALSE" }.to_string();
        let leader = b.group_leader.as_ref();
        let consent = b.consent.as_ref();
        let values = [
            b.id.to_string(),
            bt.date_of(b.span.start).to_string(),
            bt.format_local(b.span.start),
            bt.format_local(b.span.end),
            b.requester.first_name.clone(),
            b.requester.last_name.clone(),
            b.requester.email.clone(),
            leader.map(|l| l.first_name.clone()).unwrap_or_default(),
            leader.map(|l| l.last_name.clone()).unwrap_or_default(),
            b.purpose.clone(),
            b.room.clone(),
            b.party_size.to_string(),
            b.status.as_str().to_string(),
            bt.format_local(b.created_at),
            b.notes.clone(),
            flag(consent.is_some_and(|c| c.terms_accepted)),
            flag(consent.is_some_and(|c| c.privacy_accepted)),
            consent
                .and_then(|c| c.accepted_at)
                .map(|at| bt.format_local(at))
                .unwrap_or_default(),
            b.recurrence_group.map(|g| g.to_string()).unwrap_or_default(),
        ];
        Self {
            cells: EXPORT_HEADERS.into_iter().zip(values).collect(),
        }
    }

    pub fn get(&self, header: &str) -> Option<&str> {
        self.cells.iter().find(|(h, _)| *h == header).map(|(_, v)| v.as_str())
    }

    pub fn cells(&self) -> &[(&'static str, String)] {
        &self.cells
    }
}

impl Serialize for BookingRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (header, value) in &self.cells {
            map.serialize_entry(header, value)?;
        }
        map.end()
    }
}
