use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use ulid::Ulid;

use crate::clock::{self, MINUTES_PER_DAY};

/// Minutes since local midnight. The only time-of-day type.
pub type Minutes = u16;

pub type ResourceId = i64;

/// Half-open interval `[start, end)` within one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Minutes,
    pub end: Minutes,
}

impl Span {
    pub const WHOLE_DAY: Span = Span {
        start: 0,
        end: MINUTES_PER_DAY,
    };

    pub fn new(start: Minutes, end: Minutes) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn try_new(start: Minutes, end: Minutes) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration(&self) -> Minutes {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Minutes) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", clock::format_clock(self.start), clock::format_clock(self.end))
    }
}

/// Booking ids are numeric for records created in-house and free text for
/// records imported from an outside scheduling system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BookingId {
    Numeric(i64),
    External(String),
}

impl fmt::Display for BookingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookingId::Numeric(n) => write!(f, "{n}"),
            BookingId::External(s) => f.write_str(s),
        }
    }
}

impl From<i64> for BookingId {
    fn from(n: i64) -> Self {
        BookingId::Numeric(n)
    }
}

impl From<&str> for BookingId {
    fn from(s: &str) -> Self {
        match s.parse::<i64>() {
            Ok(n) => BookingId::Numeric(n),
            Err(_) => BookingId::External(s.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    SimulatorBay,
    ConferenceRoom,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::SimulatorBay => "simulator_bay",
            ResourceKind::ConferenceRoom => "conference_room",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub name: String,
    pub kind: ResourceKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Submitted by a member (or imported) and awaiting staff review.
    BookingRequest,
    /// Entered by staff; starts out `confirmed`.
    DirectBooking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    PendingApproval,
    Approved,
    Confirmed,
    Declined,
    Cancelled,
    CancellationPending,
    Attended,
    NoShow,
}

impl BookingStatus {
    /// `pending` and `pending_approval` are one logical entry state.
    pub fn is_pending(self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::PendingApproval)
    }

    /// Approved-or-later records hold their resource for conflict purposes.
    pub fn occupies_resource(self) -> bool {
        matches!(
            self,
            BookingStatus::Approved | BookingStatus::Confirmed | BookingStatus::Attended
        )
    }

    pub fn is_active(self) -> bool {
        matches!(self, BookingStatus::Approved | BookingStatus::Confirmed)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BookingStatus::Declined
                | BookingStatus::Cancelled
                | BookingStatus::Attended
                | BookingStatus::NoShow
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::PendingApproval => "pending_approval",
            BookingStatus::Approved => "approved",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Declined => "declined",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::CancellationPending => "cancellation_pending",
            BookingStatus::Attended => "attended",
            BookingStatus::NoShow => "no_show",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit the scheduler operates on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRecord {
    pub id: BookingId,
    pub source_kind: SourceKind,
    pub member_email: String,
    pub member_display_name: String,
    #[serde(default)]
    pub resource_id: Option<ResourceId>,
    pub date: NaiveDate,
    #[serde(with = "clock::hhmm")]
    pub start_time: Minutes,
    #[serde(with = "clock::hhmm")]
    pub end_time: Minutes,
    pub duration_minutes: Minutes,
    pub status: BookingStatus,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub staff_notes: Option<String>,
    #[serde(default)]
    pub external_correlation_id: Option<String>,
    #[serde(default = "one")]
    pub declared_player_count: u8,
    #[serde(default)]
    pub guest_count: u8,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub reviewed_by: Option<String>,
    #[serde(default)]
    pub cancelled_by: Option<String>,
    #[serde(default, with = "clock::hhmm_opt")]
    pub suggested_time: Option<Minutes>,
    #[serde(default)]
    pub rescheduled_from: Option<BookingId>,
    /// Explicit "no internal member identity" flag set by importers or staff.
    #[serde(default)]
    pub unmatched: bool,
}

fn one() -> u8 {
    1
}

impl BookingRecord {
    /// `None` when the stored bounds are inverted or empty.
    pub fn span(&self) -> Option<Span> {
        Span::try_new(self.start_time, self.end_time)
    }

    pub fn is_on(&self, resource_id: ResourceId, date: NaiveDate) -> bool {
        self.resource_id == Some(resource_id) && self.date == date
    }

    /// `start < end` and `duration == end - start`.
    pub fn is_well_formed(&self) -> bool {
        self.span()
            .is_some_and(|s| s.duration() == self.duration_minutes)
    }
}

/// Raw "affected areas" value of a closure, kept in whatever legacy encoding
/// it arrived in. JSON arrays are stored as their JSON text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AffectedAreas(pub String);

impl AffectedAreas {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for AffectedAreas {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(d)?;
        Ok(match value {
            serde_json::Value::Null => AffectedAreas::default(),
            serde_json::Value::String(s) => AffectedAreas(s),
            serde_json::Value::Number(n) => AffectedAreas(n.to_string()),
            other => AffectedAreas(other.to_string()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarClosure {
    pub id: i64,
    pub title: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default, with = "clock::hhmm_opt")]
    pub start_time: Option<Minutes>,
    #[serde(default, with = "clock::hhmm_opt")]
    pub end_time: Option<Minutes>,
    #[serde(default)]
    pub affected_areas: AffectedAreas,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default = "active")]
    pub is_active: bool,
}

fn active() -> bool {
    true
}

impl CalendarClosure {
    pub fn covers_date(&self, date: NaiveDate) -> bool {
        self.is_active && self.start_date <= date && date <= self.end_date
    }

    /// Occupied interval on any covered date. Missing bounds extend to the
    /// edge of the day; `None` if the bounds are inverted.
    pub fn span(&self) -> Option<Span> {
        Span::try_new(
            self.start_time.unwrap_or(0),
            self.end_time.unwrap_or(MINUTES_PER_DAY),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityBlock {
    pub id: i64,
    pub resource_id: ResourceId,
    pub block_date: NaiveDate,
    #[serde(with = "clock::hhmm")]
    pub start_time: Minutes,
    #[serde(with = "clock::hhmm")]
    pub end_time: Minutes,
    pub block_type: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

impl AvailabilityBlock {
    pub fn span(&self) -> Option<Span> {
        Span::try_new(self.start_time, self.end_time)
    }

    pub fn label(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.block_type)
    }
}

/// Directory entry used when re-linking an unmatched booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub email: String,
    pub display_name: String,
    #[serde(default)]
    pub tier: Option<String>,
}

// ── Notification payloads ────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingAction {
    Created,
    Approved,
    Declined,
    Cancelled,
    CancellationPending,
    CancellationAcknowledged,
    Attended,
    NoShow,
    Rescheduled,
    Linked,
    Unmatched,
}

impl BookingAction {
    pub fn for_status(status: BookingStatus) -> Option<Self> {
        Some(match status {
            BookingStatus::Approved => BookingAction::Approved,
            BookingStatus::Declined => BookingAction::Declined,
            BookingStatus::Cancelled => BookingAction::Cancelled,
            BookingStatus::CancellationPending => BookingAction::CancellationPending,
            BookingStatus::Attended => BookingAction::Attended,
            BookingStatus::NoShow => BookingAction::NoShow,
            BookingStatus::Confirmed => BookingAction::Created,
            BookingStatus::Pending | BookingStatus::PendingApproval => return None,
        })
    }
}

/// `booking-updated` notification. `origin` identifies the client that made
/// the change so each client can tell its own writes from everyone else's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingEvent {
    pub action: BookingAction,
    pub record_id: BookingId,
    pub resource_id: Option<ResourceId>,
    pub origin: Ulid,
    pub at: DateTime<Utc>,
}

impl BookingEvent {
    pub fn new(action: BookingAction, record: &BookingRecord, origin: Ulid) -> Self {
        Self {
            action,
            record_id: record.id.clone(),
            resource_id: record.resource_id,
            origin,
            at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_basics() {
        let s = Span::new(600, 660);
        assert_eq!(s.duration(), 60);
        assert!(s.contains_instant(600));
        assert!(s.contains_instant(659));
        assert!(!s.contains_instant(660)); // half-open
        assert_eq!(s.to_string(), "10:00-11:00");
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(600, 660);
        let b = Span::new(630, 690);
        let c = Span::new(660, 720);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(Span::WHOLE_DAY.contains_span(&a));
        assert!(Span::try_new(660, 660).is_none());
    }

    #[test]
    fn status_classes() {
        assert!(BookingStatus::PendingApproval.is_pending());
        assert!(BookingStatus::Pending.is_pending());
        assert!(!BookingStatus::Pending.occupies_resource());
        assert!(BookingStatus::Confirmed.occupies_resource());
        assert!(BookingStatus::Attended.occupies_resource());
        assert!(!BookingStatus::CancellationPending.occupies_resource());
        assert!(!BookingStatus::CancellationPending.is_terminal());
        assert!(BookingStatus::NoShow.is_terminal());
    }

    #[test]
    fn booking_id_parsing() {
        assert_eq!(BookingId::from("42"), BookingId::Numeric(42));
        assert_eq!(
            BookingId::from("tm-8812"),
            BookingId::External("tm-8812".into())
        );
        let json: BookingId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(json, BookingId::External("abc".into()));
        let json: BookingId = serde_json::from_str("17").unwrap();
        assert_eq!(json, BookingId::Numeric(17));
    }

    #[test]
    fn record_from_json() {
        let raw = r#"{
            "id": 7,
            "sourceKind": "booking_request",
            "memberEmail": "pat@example.com",
            "memberDisplayName": "Pat",
            "resourceId": null,
            "date": "2024-01-10",
            "startTime": "10:00:00",
            "endTime": "11:30",
            "durationMinutes": 90,
            "status": "pending_approval",
            "createdAt": "2024-01-01T12:00:00Z"
        }"#;
        let rec: BookingRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(rec.start_time, 600);
        assert_eq!(rec.end_time, 690);
        assert_eq!(rec.declared_player_count, 1);
        assert!(rec.is_well_formed());
        assert!(rec.status.is_pending());
        assert_eq!(rec.suggested_time, None);
    }

    #[test]
    fn affected_areas_accepts_arrays_and_strings() {
        let a: AffectedAreas = serde_json::from_str("\"bay_3\"").unwrap();
        assert_eq!(a.as_str(), "bay_3");
        let b: AffectedAreas = serde_json::from_str("[1, \"bay_2\"]").unwrap();
        assert_eq!(b.as_str(), "[1,\"bay_2\"]");
        let c: AffectedAreas = serde_json::from_str("null").unwrap();
        assert_eq!(c.as_str(), "");
    }

    #[test]
    fn closure_span_defaults_to_whole_day() {
        let raw = r#"{
            "id": 1, "title": "Holiday",
            "startDate": "2024-12-24", "endDate": "2024-12-26",
            "affectedAreas": "entire_facility"
        }"#;
        let c: CalendarClosure = serde_json::from_str(raw).unwrap();
        assert_eq!(c.span(), Some(Span::WHOLE_DAY));
        assert!(c.covers_date(NaiveDate::from_ymd_opt(2024, 12, 25).unwrap()));
        assert!(!c.covers_date(NaiveDate::from_ymd_opt(2024, 12, 27).unwrap()));
    }
}
