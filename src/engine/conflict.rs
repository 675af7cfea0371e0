use chrono::NaiveDate;

use crate::clock::{self, MINUTES_PER_DAY};
use crate::limits::*;
use crate::model::*;

use super::availability::{DayIndex, Occupant, Sources};
use super::error::ConflictCause;
use super::EngineError;

/// A proposed `(resource, date, [start, end))` placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub resource_id: ResourceId,
    pub date: NaiveDate,
    pub span: Span,
    /// Record being placed, skipped when comparing against existing bookings.
    pub exclude: Option<BookingId>,
}

impl Candidate {
    pub fn new(resource_id: ResourceId, date: NaiveDate, span: Span) -> Self {
        Self {
            resource_id,
            date,
            span,
            exclude: None,
        }
    }

    pub fn excluding(mut self, id: BookingId) -> Self {
        self.exclude = Some(id);
        self
    }

    /// Candidate for an existing record placed on `resource_id`.
    pub fn for_record(record: &BookingRecord, resource_id: ResourceId) -> Result<Self, EngineError> {
        let span = record.span().ok_or_else(|| {
            EngineError::Validation(format!("booking {} has an empty or inverted time range", record.id))
        })?;
        Ok(Self::new(resource_id, record.date, span).excluding(record.id.clone()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Available,
    Conflict { reason: String, cause: ConflictCause },
}

impl Availability {
    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available)
    }

    pub fn into_result(self) -> Result<(), EngineError> {
        match self {
            Availability::Available => Ok(()),
            Availability::Conflict { reason, cause } => Err(EngineError::Conflict { reason, cause }),
        }
    }
}

/// Pure and order-independent: closures are checked first, then blocks, then
/// approved-or-later bookings. Within a tier the earliest-starting occupant
/// (lowest id on ties) is reported.
pub fn check_availability(candidate: &Candidate, sources: Sources<'_>) -> Availability {
    let index = DayIndex::for_resource(
        candidate.date,
        candidate.resource_id,
        sources,
        candidate.exclude.as_ref(),
    );
    let Some(hit) = index.first_occupant(candidate.resource_id, &candidate.span) else {
        return Availability::Available;
    };
    let (reason, cause) = match &hit.occupant {
        Occupant::Closure { id, title } => (
            format!("Conflicts with closure: {title}"),
            ConflictCause::Closure {
                id: *id,
                title: title.clone(),
            },
        ),
        Occupant::Block { id, label } => (
            format!("Conflicts with {label} ({})", hit.span),
            ConflictCause::Block {
                id: *id,
                label: label.clone(),
            },
        ),
        Occupant::Booking { id, .. } => (
            format!("Conflicts with existing booking {}", hit.span),
            ConflictCause::Booking {
                id: id.clone(),
                range: hit.span.to_string(),
            },
        ),
    };
    Availability::Conflict { reason, cause }
}

/// Build a candidate from loosely supplied fields, rejecting anything missing
/// or out of bounds before a network call is considered.
pub fn validate_candidate(
    resource_id: Option<ResourceId>,
    date: Option<NaiveDate>,
    start: Option<Minutes>,
    duration: Minutes,
) -> Result<Candidate, EngineError> {
    let resource_id = resource_id.ok_or_else(|| EngineError::Validation("no resource selected".into()))?;
    let date = date.ok_or_else(|| EngineError::Validation("no date selected".into()))?;
    let start = start.ok_or_else(|| EngineError::Validation("no start time selected".into()))?;
    let span = validate_duration(start, duration)?;
    Ok(Candidate::new(resource_id, date, span))
}

pub(crate) fn validate_duration(start: Minutes, duration: Minutes) -> Result<Span, EngineError> {
    if !(MIN_BOOKING_MINUTES..=MAX_BOOKING_MINUTES).contains(&duration) {
        return Err(EngineError::Validation(format!(
            "duration must be between {MIN_BOOKING_MINUTES} and {MAX_BOOKING_MINUTES} minutes"
        )));
    }
    let end = start.saturating_add(duration);
    if end > MINUTES_PER_DAY {
        return Err(EngineError::Validation(format!(
            "booking starting at {} runs past midnight",
            clock::format_clock(start)
        )));
    }
    Ok(Span::new(start, end))
}

pub(crate) fn validate_text(field: &'static str, value: Option<&str>, max: usize) -> Result<(), EngineError> {
    if value.is_some_and(|v| v.len() > max) {
        return Err(EngineError::Validation(format!("{field} longer than {max} characters")));
    }
    Ok(())
}
