//! Hand-off to the payment / roster workflows that can suspend a check-in.
//!
//! A suspended transition is not a failure: the engine rolls its optimistic
//! update back and returns a [`RemediationTicket`] that carries everything
//! needed to re-issue the exact same transition once the workflow finishes.

use async_trait::async_trait;

use crate::engine::Transition;
use crate::model::BookingId;
use crate::remote::RemediationKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemediationTicket {
    pub record_id: BookingId,
    pub kind: RemediationKind,
    pub detail: String,
    pub transition: Transition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemediationOutcome {
    /// Payment collected or roster completed; the transition may be re-issued.
    Resolved,
    /// Staff walked away; the transition stays un-applied.
    Abandoned,
}

#[async_trait]
pub trait Remediator: Send + Sync {
    async fn resolve(&self, ticket: &RemediationTicket) -> RemediationOutcome;
}

/// Plain closures work as remediators, handy for wiring a UI callback.
#[async_trait]
impl<F> Remediator for F
where
    F: Fn(&RemediationTicket) -> RemediationOutcome + Send + Sync,
{
    async fn resolve(&self, ticket: &RemediationTicket) -> RemediationOutcome {
        self(ticket)
    }
}
