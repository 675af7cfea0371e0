use crate::model::{BookingId, BookingStatus};
use crate::remote::RemoteError;

/// Why a candidate interval was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictCause {
    Closure { id: i64, title: String },
    Block { id: i64, label: String },
    Booking { id: BookingId, range: String },
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Missing or malformed input; raised before any network call.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Candidate overlaps a closure, block or approved booking.
    #[error("conflict: {reason}")]
    Conflict { reason: String, cause: ConflictCause },

    #[error("illegal transition for {id}: {from} -> {to}")]
    IllegalTransition {
        id: BookingId,
        from: BookingStatus,
        to: BookingStatus,
    },

    #[error("{0} requires explicit staff confirmation")]
    ConfirmationRequired(&'static str),

    #[error("a transition is already in progress for {0}")]
    InProgress(BookingId),

    #[error("booking not found: {0}")]
    NotFound(BookingId),

    /// A booking for the same member, date and resource kind already exists.
    #[error("{email} already has booking {existing} on that date")]
    LikelyDuplicate { email: String, existing: BookingId },

    /// Remote rejection or transport failure. Local state was rolled back.
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl EngineError {
    /// Whether the caller may retry the same transition unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Remote(e) if e.is_retryable())
    }

    /// True for errors caught locally before any remote call was attempted.
    pub fn is_local(&self) -> bool {
        !matches!(self, EngineError::Remote(_))
    }
}
