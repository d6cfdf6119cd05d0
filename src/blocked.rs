use chrono::NaiveDate;
use dashmap::DashMap;

use crate::model::BlockedDate;

/// Closures keyed by business-timezone date. Append-only.
#[derive(Default)]
pub struct BlockedDateIndex {
    by_date: DashMap<NaiveDate, Vec<BlockedDate>>,
}

impl BlockedDateIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, block: BlockedDate) {
        self.by_date.entry(block.date).or_default().push(block);
    }

    /// The first closure on `date` that covers `room`, if any.
    pub fn is_blocked(&self, date: NaiveDate, room: &str) -> Option<BlockedDate> {
        self.by_date
            .get(&date)
            .and_then(|blocks| blocks.iter().find(|b| b.scope.covers(room)).cloned())
    }

    /// Every closure, ordered by date then creation.
    pub fn all(&self) -> Vec<BlockedDate> {
        let mut blocks: Vec<BlockedDate> = self.by_date.iter().flat_map(|e| e.value().clone()).collect();
        blocks.sort_by(|a, b| a.date.cmp(&b.date).then(a.created_at.cmp(&b.created_at)));
        blocks
    }

    pub fn len(&self) -> usize {
        self.by_date.iter().map(|e| e.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
