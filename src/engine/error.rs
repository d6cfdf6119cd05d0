use std::time::Duration;

use chrono::NaiveDate;

use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    InvalidAdminSecret,
    AdminRequired,
    /// Short code missing, too short, or not a prefix of the booking id.
    InvalidCode,
    /// Admin-created bookings cannot be cancelled with a short code.
    CodeNotAccepted,
    AlreadyCancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityLimit {
    Groups { max: u32 },
    Participants { max: u32 },
}

#[derive(Debug)]
pub enum EngineError {
    /// Bad input or a policy violation. The message is shown to the end user as is.
    Validation(String),
    Capacity {
        room: String,
        limit: CapacityLimit,
    },
    Blocked {
        room: String,
        date: NaiveDate,
        reason: String,
    },
    Authorization(AuthFailure),
    LockTimeout(Duration),
    NotFound(String),
    /// Every occurrence of a recurring request was turned away.
    SeriesRejected {
        rejected: u32,
    },
    Store(StoreError),
    WalError(String),
}

impl EngineError {
    /// Stable label for metrics and for telling transient errors apart.
    pub fn category(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::Capacity { .. } | EngineError::SeriesRejected { .. } => "capacity",
            EngineError::Blocked { .. } => "blocked",
            EngineError::Authorization(_) => "authorization",
            EngineError::LockTimeout(_) => "lock_timeout",
            EngineError::NotFound(_) => "not_found",
            EngineError::Store(_) | EngineError::WalError(_) => "internal",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::LockTimeout(_))
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }
}

impl std::fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthFailure::InvalidAdminSecret => write!(f, "Invalid Admin PIN."),
            AuthFailure::AdminRequired => write!(f, "This action requires the admin PIN."),
            AuthFailure::InvalidCode => write!(f, "Verification failed. Invalid Booking Code."),
            AuthFailure::CodeNotAccepted => {
                write!(f, "This booking was made by an admin and can only be cancelled with the admin PIN.")
            }
            AuthFailure::AlreadyCancelled => write!(f, "Already cancelled."),
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "{msg}"),
            EngineError::Capacity { room, limit } => match limit {
                CapacityLimit::Groups { max } => {
                    write!(f, "Group Limit Exceeded for {room}. At most {max} group(s) may use it at once.")
                }
                CapacityLimit::Participants { max } => {
                    write!(f, "Participant Capacity Exceeded for {room}. At most {max} participants may use it at once.")
                }
            },
            EngineError::Blocked { room, date, reason } => {
                write!(f, "The room {room} is closed on {date}: {reason}")
            }
            EngineError::Authorization(failure) => write!(f, "{failure}"),
            EngineError::LockTimeout(wait) => {
                write!(f, "server busy: write lock not acquired within {}s, please retry", wait.as_secs())
            }
            EngineError::NotFound(what) => write!(f, "not found: {what}"),
            EngineError::SeriesRejected { rejected } => write!(
                f,
                "No recurrent events could be booked due to conflicts or blocked dates ({rejected} rejected)."
            ),
            EngineError::Store(e) => write!(f, "store error: {e}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<AuthFailure> for EngineError {
    fn from(failure: AuthFailure) -> Self {
        EngineError::Authorization(failure)
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::Store(e)
    }
}
