use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::Ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    Create,
    Cancel,
    Move,
    BlockDate,
    AutoCancelBlockedDate,
    Export,
    Erasure,
    RetentionAnonymize,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Cancel => "cancel",
            AuditAction::Move => "move",
            AuditAction::BlockDate => "block_date",
            AuditAction::AutoCancelBlockedDate => "auto_cancel_blocked_date",
            AuditAction::Export => "gdpr_export",
            AuditAction::Erasure => "gdpr_erasure",
            AuditAction::RetentionAnonymize => "gdpr_anonymize",
        }
    }
}

/// Who triggered an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditActor {
    Admin,
    User,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Ulid,
    pub at: Ms,
    pub action: AuditAction,
    /// Booking id, blocked-date id or display code, depending on the action.
    pub subject: String,
    pub actor: AuditActor,
    /// JSON object as text; bincode cannot decode `serde_json::Value`.
    pub details: String,
}

impl AuditEntry {
    pub fn new(at: Ms, action: AuditAction, subject: impl Into<String>, actor: AuditActor, details: serde_json::Value) -> Self {
        Self {
            id: Ulid::new(),
            at,
            action,
            subject: subject.into(),
            actor,
            details: details.to_string(),
        }
    }

    pub fn details_json(&self) -> serde_json::Value {
        serde_json::from_str(&self.details).unwrap_or(serde_json::Value::Null)
    }
}

/// Append-only activity log. Entries are journaled alongside bookings.
#[derive(Default)]
pub struct AuditLog {
    entries: RwLock<Vec<AuditEntry>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: AuditEntry) {
        if let Ok(mut entries) = self.entries.write() {
            entries.push(entry);
        }
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn count(&self, action: AuditAction) -> usize {
        self.entries
            .read()
            .map(|e| e.iter().filter(|x| x.action == action).count())
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
