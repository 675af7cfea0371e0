//! Booking lifecycle: legal status moves, their guards, and the side effects
//! each move carries.
//!
//! ```text
//! pending | pending_approval ──approve──▶ approved
//!                            └─decline──▶ declined
//! approved | confirmed ──cancel──▶ cancelled | cancellation_pending ──ack──▶ cancelled
//!                      ├─check-in─▶ attended
//!                      └─no-show──▶ no_show
//! ```
//!
//! Planning is pure: [`plan`] inspects a record and the current schedule and
//! either refuses or returns a [`TransitionPlan`] whose [`predict`](TransitionPlan::predict)
//! yields the optimistic post-transition record.

use chrono::NaiveDateTime;

use crate::clock;
use crate::correlation;
use crate::limits::MAX_NOTES_LEN;
use crate::model::*;

use super::availability::{DayIndex, Sources};
use super::conflict::{check_availability, validate_text, Candidate};
use super::EngineError;

use BookingStatus::*;

/// Statuses reachable from `from`. Terminal states return an empty slice.
pub fn valid_targets(from: BookingStatus) -> &'static [BookingStatus] {
    match from {
        Pending | PendingApproval => &[Approved, Declined],
        Approved | Confirmed => &[Cancelled, CancellationPending, Attended, NoShow],
        CancellationPending => &[Cancelled],
        Declined | Cancelled | Attended | NoShow => &[],
    }
}

pub fn can_transition(from: BookingStatus, to: BookingStatus) -> bool {
    valid_targets(from).contains(&to)
}

/// A staff-requested status change with its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Approve {
        resource_id: Option<ResourceId>,
        staff_notes: Option<String>,
        reviewed_by: String,
    },
    Decline {
        staff_notes: Option<String>,
        suggested_time: Option<Minutes>,
    },
    Cancel {
        cancelled_by: String,
    },
    /// Staff confirm the external system's copy has been cleaned up.
    AcknowledgeCancellation,
    CheckIn,
    /// `confirmed` must be set by an explicit "are you sure" step.
    NoShow {
        confirmed: bool,
    },
}

impl Transition {
    pub fn label(&self) -> &'static str {
        match self {
            Transition::Approve { .. } => "approve",
            Transition::Decline { .. } => "decline",
            Transition::Cancel { .. } => "cancel",
            Transition::AcknowledgeCancellation => "acknowledge_cancellation",
            Transition::CheckIn => "check_in",
            Transition::NoShow { .. } => "no_show",
        }
    }

    /// Status this transition would move `record` to.
    pub fn target(&self, record: &BookingRecord) -> BookingStatus {
        match self {
            Transition::Approve { .. } => Approved,
            Transition::Decline { .. } => Declined,
            Transition::Cancel { .. } if correlation::external_reference(record).is_some() => {
                CancellationPending
            }
            Transition::Cancel { .. } | Transition::AcknowledgeCancellation => Cancelled,
            Transition::CheckIn => Attended,
            Transition::NoShow { .. } => NoShow,
        }
    }
}

/// Work a transition requires beyond the status change itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    AssignResource(ResourceId),
    StampReviewer(String),
    StampCanceller(String),
    RecordStaffNotes(String),
    SuggestAlternative(Minutes),
    /// Carry the outside system's id onto the approved booking.
    LinkExternal { correlation_id: String },
    /// The outside system still holds this booking and must be cleaned up by hand.
    ExternalCleanup { correlation_id: String },
    NotifyMember { email: String, action: BookingAction },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionPlan {
    pub id: BookingId,
    pub from: BookingStatus,
    pub to: BookingStatus,
    pub effects: Vec<SideEffect>,
}

impl TransitionPlan {
    /// The record as it should look once the remote store accepts the transition.
    pub fn predict(&self, record: &BookingRecord) -> BookingRecord {
        let mut next = record.clone();
        next.status = self.to;
        for effect in &self.effects {
            match effect {
                SideEffect::AssignResource(rid) => next.resource_id = Some(*rid),
                SideEffect::StampReviewer(who) => next.reviewed_by = Some(who.clone()),
                SideEffect::StampCanceller(who) => next.cancelled_by = Some(who.clone()),
                SideEffect::RecordStaffNotes(notes) => next.staff_notes = Some(notes.clone()),
                SideEffect::SuggestAlternative(t) => next.suggested_time = Some(*t),
                SideEffect::LinkExternal { correlation_id } => {
                    next.external_correlation_id = Some(correlation_id.clone())
                }
                SideEffect::ExternalCleanup { .. } | SideEffect::NotifyMember { .. } => {}
            }
        }
        next
    }

    pub fn needs_external_cleanup(&self) -> bool {
        self.effects
            .iter()
            .any(|e| matches!(e, SideEffect::ExternalCleanup { .. }))
    }
}

/// Inputs the guards evaluate against.
#[derive(Debug, Clone, Copy)]
pub struct GuardContext<'a> {
    pub now: NaiveDateTime,
    pub sources: Sources<'a>,
    pub business_hours: Span,
    pub slot_minutes: Minutes,
}

/// Evaluate every guard for `transition` on `record`.
pub fn plan(
    record: &BookingRecord,
    transition: &Transition,
    ctx: &GuardContext<'_>,
) -> Result<TransitionPlan, EngineError> {
    let from = record.status;
    let to = transition.target(record);
    // Cancel and acknowledge both land on `cancelled`; only the source state tells them apart.
    let source_ok = match transition {
        Transition::Cancel { .. } => from.is_active(),
        Transition::AcknowledgeCancellation => from == CancellationPending,
        _ => true,
    };
    if !source_ok || !can_transition(from, to) {
        return Err(EngineError::IllegalTransition {
            id: record.id.clone(),
            from,
            to,
        });
    }

    let mut effects = Vec::new();
    match transition {
        Transition::Approve {
            resource_id,
            staff_notes,
            reviewed_by,
        } => {
            let rid = resource_id.ok_or_else(|| EngineError::Validation("no resource selected".into()))?;
            validate_text("staff notes", staff_notes.as_deref(), MAX_NOTES_LEN)?;
            check_availability(&Candidate::for_record(record, rid)?, ctx.sources).into_result()?;

            effects.push(SideEffect::AssignResource(rid));
            if record.source_kind != SourceKind::DirectBooking {
                effects.push(SideEffect::StampReviewer(reviewed_by.clone()));
            }
            if let Some(notes) = staff_notes {
                effects.push(SideEffect::RecordStaffNotes(notes.clone()));
            }
            if let Some(correlation_id) = correlation::external_reference(record) {
                effects.push(SideEffect::LinkExternal { correlation_id });
            }
        }
        Transition::Decline {
            staff_notes,
            suggested_time,
        } => {
            validate_text("staff notes", staff_notes.as_deref(), MAX_NOTES_LEN)?;
            if let Some(notes) = staff_notes {
                effects.push(SideEffect::RecordStaffNotes(notes.clone()));
            }
            if let Some(t) = suggested_time {
                ensure_slot_open(record, *t, ctx)?;
                effects.push(SideEffect::SuggestAlternative(*t));
            }
        }
        Transition::Cancel { cancelled_by } => {
            let ends_at = clock::at(record.date, record.end_time);
            if ctx.now >= ends_at {
                return Err(EngineError::Validation(format!(
                    "booking {} has already ended",
                    record.id
                )));
            }
            effects.push(SideEffect::StampCanceller(cancelled_by.clone()));
            if to == CancellationPending
                && let Some(correlation_id) = correlation::external_reference(record)
            {
                effects.push(SideEffect::ExternalCleanup { correlation_id });
            }
        }
        Transition::AcknowledgeCancellation => {}
        Transition::CheckIn => {
            if record.date != ctx.now.date() {
                return Err(EngineError::Validation(format!(
                    "check-in is only possible on the booking date ({})",
                    record.date
                )));
            }
        }
        Transition::NoShow { confirmed } => {
            if !confirmed {
                return Err(EngineError::ConfirmationRequired("marking a no-show"));
            }
        }
    }

    if let Some(action) = notify_action(transition, to) {
        effects.push(SideEffect::NotifyMember {
            email: record.member_email.clone(),
            action,
        });
    }

    Ok(TransitionPlan {
        id: record.id.clone(),
        from,
        to,
        effects,
    })
}

fn notify_action(transition: &Transition, to: BookingStatus) -> Option<BookingAction> {
    match transition {
        Transition::CheckIn => None,
        Transition::AcknowledgeCancellation => Some(BookingAction::CancellationAcknowledged),
        _ => BookingAction::for_status(to),
    }
}

/// A suggested alternative must be an open slot on the requested resource,
/// or on any resource when none was requested.
fn ensure_slot_open(record: &BookingRecord, t: Minutes, ctx: &GuardContext<'_>) -> Result<(), EngineError> {
    let duration = record.duration_minutes;
    let index = DayIndex::build(record.date, ctx.sources, Some(&record.id));
    let open_on = |rid: ResourceId| {
        index
            .open_slots(rid, duration, ctx.business_hours, ctx.slot_minutes)
            .contains(&t)
    };
    let fits = match record.resource_id {
        Some(rid) => open_on(rid),
        None => ctx.sources.resources.iter().any(|r| open_on(r.id)),
    };
    if fits {
        Ok(())
    } else {
        Err(EngineError::Validation(format!(
            "suggested time {} is not an open slot",
            clock::format_clock(t)
        )))
    }
}
