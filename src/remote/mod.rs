//! The remote source of truth. The scheduler never persists anything itself:
//! every accepted transition is a call on a [`RemoteStore`], and the store's
//! answer always wins over local predictions.

mod memory;

pub use memory::{InMemoryRemote, Seed};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The store refused the mutation, e.g. the record was already moved by another client.
    #[error("rejected by remote: {0}")]
    Rejected(String),

    /// The store's own conflict check failed.
    #[error("remote conflict: {0}")]
    Conflict(String),

    #[error("remote has no booking {0}")]
    NotFound(BookingId),

    #[error("transport failure: {0}")]
    Transport(String),
}

impl RemoteError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Transport(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationKind {
    /// Outstanding fees must be collected first.
    Payment,
    /// The player roster is incomplete.
    Roster,
}

impl RemediationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RemediationKind::Payment => "payment",
            RemediationKind::Roster => "roster",
        }
    }
}

/// Statuses accepted by the check-in endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckinStatus {
    Attended,
    NoShow,
    Cancelled,
}

impl From<CheckinStatus> for BookingStatus {
    fn from(s: CheckinStatus) -> Self {
        match s {
            CheckinStatus::Attended => BookingStatus::Attended,
            CheckinStatus::NoShow => BookingStatus::NoShow,
            CheckinStatus::Cancelled => BookingStatus::Cancelled,
        }
    }
}

/// Check-in answers either with the updated record or with a remediation
/// demand. The latter is not a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckinOutcome {
    Recorded(BookingRecord),
    RemediationRequired { kind: RemediationKind, detail: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingFilter {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub resource_id: Option<ResourceId>,
}

impl BookingFilter {
    pub fn matches(&self, record: &BookingRecord) -> bool {
        self.from.is_none_or(|d| record.date >= d)
            && self.to.is_none_or(|d| record.date <= d)
            && self
                .resource_id
                .is_none_or(|rid| record.resource_id == Some(rid))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveRequest {
    pub resource_id: ResourceId,
    pub staff_notes: Option<String>,
    pub reviewed_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclineRequest {
    pub staff_notes: Option<String>,
    #[serde(default, with = "crate::clock::hhmm_opt")]
    pub suggested_time: Option<Minutes>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualBooking {
    pub member_email: String,
    pub member_display_name: String,
    pub resource_id: ResourceId,
    pub date: NaiveDate,
    #[serde(with = "crate::clock::hhmm")]
    pub start_time: Minutes,
    pub duration_minutes: Minutes,
    pub declared_player_count: u8,
    pub guest_count: u8,
    pub notes: Option<String>,
    pub external_correlation_id: Option<String>,
    pub rescheduled_from: Option<BookingId>,
}

/// The REST surface the scheduler depends on.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn fetch_bookings(&self, filter: &BookingFilter) -> Result<Vec<BookingRecord>, RemoteError>;
    async fn fetch_resources(&self) -> Result<Vec<Resource>, RemoteError>;
    async fn fetch_closures(&self) -> Result<Vec<CalendarClosure>, RemoteError>;
    async fn fetch_blocks(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<AvailabilityBlock>, RemoteError>;

    async fn approve(&self, id: &BookingId, req: ApproveRequest) -> Result<BookingRecord, RemoteError>;
    async fn decline(&self, id: &BookingId, req: DeclineRequest) -> Result<BookingRecord, RemoteError>;
    async fn cancel(&self, id: &BookingId, cancelled_by: &str) -> Result<BookingRecord, RemoteError>;
    async fn acknowledge_cancellation(&self, id: &BookingId) -> Result<BookingRecord, RemoteError>;
    async fn checkin(&self, id: &BookingId, status: CheckinStatus) -> Result<CheckinOutcome, RemoteError>;

    async fn check_existing_booking(
        &self,
        member_email: &str,
        date: NaiveDate,
        kind: ResourceKind,
    ) -> Result<Option<BookingRecord>, RemoteError>;
    async fn create_manual_booking(&self, booking: ManualBooking) -> Result<BookingRecord, RemoteError>;

    /// Unlink every booking carrying `correlation_id`; returns how many changed.
    async fn unmatch(&self, correlation_id: &str) -> Result<usize, RemoteError>;
    async fn link_member(&self, id: &BookingId, member: &Member) -> Result<BookingRecord, RemoteError>;
    async fn search_members(&self, query: &str) -> Result<Vec<Member>, RemoteError>;
}
