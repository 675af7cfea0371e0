//! Matching bookings from the outside scheduling system to club members.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

use crate::clock;
use crate::engine::EngineError;
use crate::limits::MAX_MEMBER_SEARCH_RESULTS;
use crate::model::*;

/// Domains the importer uses when it has no real member address.
const PLACEHOLDER_DOMAINS: &[&str] = &["trackman.local", "unmatched.local", "import.invalid"];

/// Local-part prefixes the importer uses for synthetic addresses.
const PLACEHOLDER_PREFIXES: &[&str] = &["unmatched-", "trackman-", "import-"];

/// Display names that mean "nobody".
const SENTINEL_NAMES: &[&str] = &["unknown", "unknown (trackman)", "unmatched", "unassigned"];

/// Notes markers that embed an outside booking id, e.g. `[Trackman Booking ID: 88213]`.
const NOTE_MARKERS: &[&str] = &["[Trackman Booking ID:", "[External Booking ID:"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmatchedReason {
    ExplicitFlag,
    PlaceholderEmail,
    SentinelName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Matched,
    Unmatched(UnmatchedReason),
}

impl Classification {
    pub fn is_matched(self) -> bool {
        matches!(self, Classification::Matched)
    }
}

pub fn classify(record: &BookingRecord) -> Classification {
    if record.unmatched {
        return Classification::Unmatched(UnmatchedReason::ExplicitFlag);
    }
    if is_placeholder_email(&record.member_email) {
        return Classification::Unmatched(UnmatchedReason::PlaceholderEmail);
    }
    let name = record.member_display_name.trim().to_ascii_lowercase();
    if SENTINEL_NAMES.contains(&name.as_str()) {
        return Classification::Unmatched(UnmatchedReason::SentinelName);
    }
    Classification::Matched
}

pub fn is_placeholder_email(email: &str) -> bool {
    let email = email.trim().to_ascii_lowercase();
    let Some((local, domain)) = email.rsplit_once('@') else {
        return true;
    };
    local.is_empty()
        || PLACEHOLDER_DOMAINS.contains(&domain)
        || PLACEHOLDER_PREFIXES.iter().any(|p| local.starts_with(p))
}

/// The outside system's id for this booking: the explicit field, else a
/// marker embedded in the member notes.
pub fn external_reference(record: &BookingRecord) -> Option<String> {
    if let Some(id) = record
        .external_correlation_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        return Some(id.to_string());
    }
    record.notes.as_deref().and_then(marker_in)
}

fn marker_in(notes: &str) -> Option<String> {
    NOTE_MARKERS.iter().find_map(|marker| {
        let rest = &notes[notes.find(marker)? + marker.len()..];
        let id = rest[..rest.find(']')?].trim();
        (!id.is_empty()).then(|| id.to_string())
    })
}

/// Re-point a booking at a directory member.
pub fn link(record: &mut BookingRecord, member: &Member) {
    record.member_email = member.email.clone();
    record.member_display_name = member.display_name.clone();
    record.unmatched = false;
}

/// Indices of records carrying `correlation_id`; an unmatch cascades to all of them.
pub fn sharing_reference(records: &[BookingRecord], correlation_id: &str) -> Vec<usize> {
    records
        .iter()
        .enumerate()
        .filter(|(_, r)| external_reference(r).as_deref() == Some(correlation_id))
        .map(|(i, _)| i)
        .collect()
}

/// Case-insensitive free-text search: every whitespace-separated term must
/// appear in the email or display name. Exact email hits sort first.
pub fn search_members<'a>(members: &'a [Member], query: &str) -> Vec<&'a Member> {
    let query = query.trim().to_ascii_lowercase();
    if query.is_empty() {
        return Vec::new();
    }
    let terms: Vec<&str> = query.split_whitespace().collect();
    let mut hits: Vec<&Member> = members
        .iter()
        .filter(|m| {
            let hay = format!("{} {}", m.email, m.display_name).to_ascii_lowercase();
            terms.iter().all(|t| hay.contains(t))
        })
        .collect();
    hits.sort_by_key(|m| (m.email.to_ascii_lowercase() != query, m.display_name.to_ascii_lowercase()));
    hits.truncate(MAX_MEMBER_SEARCH_RESULTS);
    hits
}

/// A booking as the outside system or an import file hands it over. Field
/// names vary between sources; [`ExternalBooking::normalize`] is the only way
/// into the scheduler.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalBooking {
    pub id: BookingId,
    #[serde(default, alias = "email", alias = "userEmail", alias = "user_email")]
    pub member_email: Option<String>,
    #[serde(
        default,
        alias = "memberName",
        alias = "userName",
        alias = "user_name",
        alias = "displayName"
    )]
    pub member_display_name: Option<String>,
    #[serde(default, alias = "bay", alias = "bayId", alias = "resourceId")]
    pub resource: Option<serde_json::Value>,
    #[serde(alias = "requestDate", alias = "bookingDate")]
    pub date: String,
    pub start_time: String,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default, alias = "duration")]
    pub duration_minutes: Option<Minutes>,
    #[serde(default)]
    pub status: Option<BookingStatus>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default, alias = "trackmanBookingId", alias = "externalId")]
    pub external_correlation_id: Option<String>,
    #[serde(default, alias = "playerCount")]
    pub declared_player_count: Option<u8>,
    #[serde(default)]
    pub guest_count: Option<u8>,
    #[serde(default, alias = "isUnmatched")]
    pub unmatched: Option<bool>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl ExternalBooking {
    pub fn normalize(self, received_at: DateTime<Utc>) -> Result<BookingRecord, EngineError> {
        let invalid = |what: &str| EngineError::Validation(format!("imported booking {}: {what}", self.id));

        let date = NaiveDate::parse_from_str(self.date.trim(), "%Y-%m-%d").map_err(|_| invalid("bad date"))?;
        let start = clock::parse_clock(&self.start_time).ok_or_else(|| invalid("bad start time"))?;
        let end = match (&self.end_time, self.duration_minutes) {
            (Some(end), _) => clock::parse_clock(end).ok_or_else(|| invalid("bad end time"))?,
            (None, Some(d)) => start.checked_add(d).ok_or_else(|| invalid("duration overflows"))?,
            (None, None) => return Err(invalid("needs an end time or a duration")),
        };
        let span = Span::try_new(start, end).ok_or_else(|| invalid("end is not after start"))?;
        if self.duration_minutes.is_some_and(|d| d != span.duration()) {
            return Err(invalid("duration disagrees with start/end"));
        }
        let resource_id = match &self.resource {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::Number(n)) => Some(n.as_i64().ok_or_else(|| invalid("bad resource"))?),
            Some(serde_json::Value::String(s)) => {
                let s = s.trim();
                Some(
                    s.strip_prefix("bay_")
                        .unwrap_or(s)
                        .parse()
                        .map_err(|_| invalid("bad resource"))?,
                )
            }
            Some(_) => return Err(invalid("bad resource")),
        };

        Ok(BookingRecord {
            source_kind: SourceKind::BookingRequest,
            member_email: self.member_email.unwrap_or_default().trim().to_string(),
            member_display_name: self
                .member_display_name
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| "Unknown".to_string()),
            resource_id,
            date,
            start_time: span.start,
            end_time: span.end,
            duration_minutes: span.duration(),
            status: self.status.unwrap_or(BookingStatus::PendingApproval),
            notes: self.notes,
            staff_notes: None,
            external_correlation_id: self.external_correlation_id,
            declared_player_count: self.declared_player_count.unwrap_or(1).max(1),
            guest_count: self.guest_count.unwrap_or(0),
            created_at: self.created_at.unwrap_or(received_at),
            reviewed_by: None,
            cancelled_by: None,
            suggested_time: None,
            rescheduled_from: None,
            unmatched: self.unmatched.unwrap_or(false),
            id: self.id,
        })
    }
}
