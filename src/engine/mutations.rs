use std::time::Instant;

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::correlation;
use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::remediation::{RemediationOutcome, RemediationTicket, Remediator};
use crate::remote::{ApproveRequest, CheckinOutcome, CheckinStatus, DeclineRequest, ManualBooking, RemediationKind, RemoteError};

use super::availability::Sources;
use super::conflict::{check_availability, validate_duration, validate_text, Candidate};
use super::lifecycle::{self, GuardContext, SideEffect, Transition, TransitionPlan};
use super::view::Snapshot;
use super::{Engine, EngineError};

/// Result of a transition the remote store did not refuse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The store accepted it; carries the store's copy of the record.
    Confirmed(BookingRecord),
    /// Suspended pending payment or roster completion. Nothing was applied.
    RemediationRequired(RemediationTicket),
}

impl TransitionOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, TransitionOutcome::Confirmed(_))
    }

    pub fn record(&self) -> Option<&BookingRecord> {
        match self {
            TransitionOutcome::Confirmed(r) => Some(r),
            TransitionOutcome::RemediationRequired(_) => None,
        }
    }

    /// Cancelled here but still live in the outside scheduling system.
    pub fn needs_external_cleanup(&self) -> bool {
        self.record()
            .is_some_and(|r| r.status == BookingStatus::CancellationPending)
    }
}

/// Where a rescheduled booking moves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewPlacement {
    pub resource_id: ResourceId,
    pub date: NaiveDate,
    pub start_time: Minutes,
    pub duration_minutes: Minutes,
}

enum Dispatched {
    Recorded(BookingRecord),
    Remediation { kind: RemediationKind, detail: String },
}

impl From<CheckinOutcome> for Dispatched {
    fn from(o: CheckinOutcome) -> Self {
        match o {
            CheckinOutcome::Recorded(r) => Dispatched::Recorded(r),
            CheckinOutcome::RemediationRequired { kind, detail } => Dispatched::Remediation { kind, detail },
        }
    }
}

fn count<T>(operation: &'static str, result: &Result<T, EngineError>) {
    let outcome = match result {
        Ok(_) => "confirmed",
        Err(e) => observability::error_label(e),
    };
    metrics::counter!(observability::TRANSITIONS_TOTAL, "transition" => operation, "outcome" => outcome).increment(1);
}

fn local_check(candidate: &Candidate, sources: Sources<'_>) -> Result<(), EngineError> {
    check_availability(candidate, sources).into_result().inspect_err(|e| {
        if matches!(e, EngineError::Conflict { .. }) {
            metrics::counter!(observability::CONFLICTS_TOTAL).increment(1);
        }
    })
}

impl Engine {
    /// Guard, apply optimistically, call the remote store, then confirm or
    /// roll back. A remediation demand is an `Ok` outcome, never an error.
    pub async fn apply_transition(
        &self,
        id: &BookingId,
        transition: Transition,
    ) -> Result<TransitionOutcome, EngineError> {
        let label = transition.label();
        let result = self.transition_inner(id, transition).await;
        let outcome = match &result {
            Ok(TransitionOutcome::Confirmed(_)) => "confirmed",
            Ok(TransitionOutcome::RemediationRequired(_)) => "remediation",
            Err(e) => observability::error_label(e),
        };
        metrics::counter!(observability::TRANSITIONS_TOTAL, "transition" => label, "outcome" => outcome).increment(1);
        result
    }

    async fn transition_inner(
        &self,
        id: &BookingId,
        transition: Transition,
    ) -> Result<TransitionOutcome, EngineError> {
        let _claim = self.claim(id)?;
        let label = transition.label();

        let (plan, snapshot) = {
            let mut view = self.view.write().await;
            let record = view.find(id).cloned().ok_or_else(|| EngineError::NotFound(id.clone()))?;
            let ctx = GuardContext {
                now: self.now(),
                sources: view.sources(),
                business_hours: self.config.business_hours(),
                slot_minutes: self.config.slot_minutes,
            };
            let plan = lifecycle::plan(&record, &transition, &ctx).inspect_err(|e| {
                if matches!(e, EngineError::Conflict { .. }) {
                    metrics::counter!(observability::CONFLICTS_TOTAL).increment(1);
                }
            })?;
            let snapshot = view.speculate(vec![plan.predict(&record)]);
            (plan, snapshot)
        };
        debug!(id = %id, transition = label, from = %plan.from, to = %plan.to, "optimistic update applied");

        let started = Instant::now();
        let result = self.dispatch(&plan, &transition).await;
        metrics::histogram!(observability::TRANSITION_DURATION_SECONDS, "transition" => label)
            .record(started.elapsed().as_secs_f64());

        match result {
            Ok(Dispatched::Recorded(record)) => {
                self.settle(&plan, record.clone()).await;
                Ok(TransitionOutcome::Confirmed(record))
            }
            Ok(Dispatched::Remediation { kind, detail }) => {
                let clean = self.view.write().await.rollback(snapshot);
                if !clean {
                    self.refresh_quietly("remediation rollback").await;
                }
                metrics::counter!(observability::REMEDIATIONS_TOTAL, "kind" => kind.as_str()).increment(1);
                info!(id = %id, transition = label, kind = kind.as_str(), "transition suspended: {detail}");
                Ok(TransitionOutcome::RemediationRequired(RemediationTicket {
                    record_id: id.clone(),
                    kind,
                    detail,
                    transition,
                }))
            }
            Err(e) => {
                self.roll_back(snapshot, label, &e).await;
                Err(e.into())
            }
        }
    }

    async fn dispatch(&self, plan: &TransitionPlan, transition: &Transition) -> Result<Dispatched, RemoteError> {
        let id = &plan.id;
        match transition {
            Transition::Approve {
                staff_notes,
                reviewed_by,
                ..
            } => {
                let resource_id = plan
                    .effects
                    .iter()
                    .find_map(|e| match e {
                        SideEffect::AssignResource(rid) => Some(*rid),
                        _ => None,
                    })
                    .ok_or_else(|| RemoteError::Rejected("approval without a resource".into()))?;
                let req = ApproveRequest {
                    resource_id,
                    staff_notes: staff_notes.clone(),
                    reviewed_by: Some(reviewed_by.clone()),
                };
                self.remote.approve(id, req).await.map(Dispatched::Recorded)
            }
            Transition::Decline {
                staff_notes,
                suggested_time,
            } => {
                let req = DeclineRequest {
                    staff_notes: staff_notes.clone(),
                    suggested_time: *suggested_time,
                };
                self.remote.decline(id, req).await.map(Dispatched::Recorded)
            }
            Transition::Cancel { cancelled_by } => self.remote.cancel(id, cancelled_by).await.map(Dispatched::Recorded),
            Transition::AcknowledgeCancellation => self
                .remote
                .acknowledge_cancellation(id)
                .await
                .map(Dispatched::Recorded),
            Transition::CheckIn => self.remote.checkin(id, CheckinStatus::Attended).await.map(Into::into),
            Transition::NoShow { .. } => self.remote.checkin(id, CheckinStatus::NoShow).await.map(Into::into),
        }
    }

    /// Store accepted: take its record, announce, then reconcile.
    async fn settle(&self, plan: &TransitionPlan, record: BookingRecord) {
        if record.status != plan.to {
            debug!(id = %plan.id, predicted = %plan.to, actual = %record.status, "remote diverged from prediction");
        }
        self.view.write().await.apply_record(record.clone());

        for effect in &plan.effects {
            if let SideEffect::ExternalCleanup { correlation_id } = effect {
                warn!(id = %plan.id, correlation_id = %correlation_id, "cancelled locally; external booking still needs cleanup");
            }
        }
        let action = plan
            .effects
            .iter()
            .find_map(|e| match e {
                SideEffect::NotifyMember { action, .. } => Some(*action),
                _ => None,
            })
            .or_else(|| BookingAction::for_status(record.status));
        if let Some(action) = action {
            self.publish(action, &record);
        }
        self.refresh_quietly("transition").await;
    }

    async fn roll_back(&self, snapshot: Snapshot, operation: &'static str, err: &RemoteError) {
        let clean = self.view.write().await.rollback(snapshot);
        metrics::counter!(observability::ROLLBACKS_TOTAL).increment(1);
        warn!(operation, retryable = err.is_retryable(), "rolled back optimistic update: {err}");
        if !clean {
            self.refresh_quietly("rollback").await;
        }
    }

    async fn refresh_quietly(&self, after: &str) {
        if let Err(e) = self.refresh().await {
            warn!("refresh after {after} failed, keeping the store's answer: {e}");
        }
    }

    /// Run a transition and, when it is suspended, hand the ticket to
    /// `remediator`; a resolved ticket re-issues the same transition.
    pub async fn apply_transition_with_remediation(
        &self,
        id: &BookingId,
        transition: Transition,
        remediator: &dyn Remediator,
    ) -> Result<TransitionOutcome, EngineError> {
        let mut rounds = 0;
        loop {
            let ticket = match self.apply_transition(id, transition.clone()).await? {
                TransitionOutcome::RemediationRequired(ticket) => ticket,
                confirmed => return Ok(confirmed),
            };
            if rounds >= MAX_REMEDIATION_ROUNDS {
                warn!(id = %id, rounds, "giving up after repeated remediation demands");
                return Ok(TransitionOutcome::RemediationRequired(ticket));
            }
            rounds += 1;
            match remediator.resolve(&ticket).await {
                RemediationOutcome::Resolved => {
                    info!(id = %id, kind = ticket.kind.as_str(), "remediation resolved, retrying {}", transition.label());
                }
                RemediationOutcome::Abandoned => {
                    info!(id = %id, kind = ticket.kind.as_str(), "remediation abandoned");
                    return Ok(TransitionOutcome::RemediationRequired(ticket));
                }
            }
        }
    }

    /// Staff-entered booking, created `confirmed`. Refuses with
    /// [`EngineError::LikelyDuplicate`] when the member already holds a
    /// booking that day unless `allow_duplicate` is set.
    pub async fn create_manual_booking(
        &self,
        booking: ManualBooking,
        allow_duplicate: bool,
    ) -> Result<BookingRecord, EngineError> {
        let result = self.create_inner(booking, allow_duplicate).await;
        count("create_manual", &result);
        let record = result?;
        self.publish(BookingAction::Created, &record);
        self.refresh_quietly("manual booking").await;
        Ok(record)
    }

    async fn create_inner(&self, booking: ManualBooking, allow_duplicate: bool) -> Result<BookingRecord, EngineError> {
        if booking.member_email.trim().is_empty() {
            return Err(EngineError::Validation("member email is required".into()));
        }
        validate_text("member name", Some(&booking.member_display_name), MAX_NAME_LEN)?;
        validate_text("notes", booking.notes.as_deref(), MAX_NOTES_LEN)?;
        if booking.guest_count > MAX_GUESTS {
            return Err(EngineError::Validation(format!("at most {MAX_GUESTS} guests")));
        }
        let span = validate_duration(booking.start_time, booking.duration_minutes)?;
        let mut candidate = Candidate::new(booking.resource_id, booking.date, span);
        candidate.exclude = booking.rescheduled_from.clone();

        let kind = {
            let view = self.view.read().await;
            let kind = view
                .resource(booking.resource_id)
                .map(|r| r.kind)
                .ok_or_else(|| EngineError::Validation(format!("unknown resource {}", booking.resource_id)))?;
            local_check(&candidate, view.sources())?;
            kind
        };

        if !allow_duplicate {
            let existing = self
                .remote
                .check_existing_booking(&booking.member_email, booking.date, kind)
                .await?;
            if let Some(existing) = existing
                && booking.rescheduled_from.as_ref() != Some(&existing.id)
            {
                return Err(EngineError::LikelyDuplicate {
                    email: booking.member_email,
                    existing: existing.id,
                });
            }
        }

        let record = self.remote.create_manual_booking(booking).await?;
        info!(id = %record.id, resource = ?record.resource_id, date = %record.date, "manual booking created");
        self.view.write().await.apply_record(record.clone());
        Ok(record)
    }

    /// Move an active booking: create its replacement (pointing back at the
    /// original) and then cancel the original.
    pub async fn reschedule(&self, id: &BookingId, to: NewPlacement) -> Result<BookingRecord, EngineError> {
        let result = self.reschedule_inner(id, to).await;
        count("reschedule", &result);
        result
    }

    async fn reschedule_inner(&self, id: &BookingId, to: NewPlacement) -> Result<BookingRecord, EngineError> {
        let _claim = self.claim(id)?;
        let staff = self.config.staff.clone();
        let cancel = Transition::Cancel {
            cancelled_by: staff.clone(),
        };

        let original = {
            let view = self.view.read().await;
            let original = view.find(id).cloned().ok_or_else(|| EngineError::NotFound(id.clone()))?;
            let ctx = GuardContext {
                now: self.now(),
                sources: view.sources(),
                business_hours: self.config.business_hours(),
                slot_minutes: self.config.slot_minutes,
            };
            lifecycle::plan(&original, &cancel, &ctx)?;
            original
        };

        let request = ManualBooking {
            member_email: original.member_email.clone(),
            member_display_name: original.member_display_name.clone(),
            resource_id: to.resource_id,
            date: to.date,
            start_time: to.start_time,
            duration_minutes: to.duration_minutes,
            declared_player_count: original.declared_player_count,
            guest_count: original.guest_count,
            notes: original.notes.clone(),
            external_correlation_id: original.external_correlation_id.clone(),
            rescheduled_from: Some(id.clone()),
        };
        let created = self.create_inner(request, true).await?;

        let cancelled = match self.remote.cancel(id, &staff).await {
            Ok(record) => record,
            Err(e) => {
                warn!(id = %id, replacement = %created.id, "cancelling original failed, withdrawing replacement: {e}");
                if let Err(undo) = self.remote.cancel(&created.id, &staff).await {
                    warn!(replacement = %created.id, "withdrawing replacement failed: {undo}");
                }
                self.refresh_quietly("failed reschedule").await;
                return Err(e.into());
            }
        };
        info!(from = %id, to = %created.id, "booking rescheduled");

        self.view.write().await.apply_record(cancelled.clone());
        if let Some(action) = BookingAction::for_status(cancelled.status) {
            self.publish(action, &cancelled);
        }
        self.publish(BookingAction::Rescheduled, &created);
        self.refresh_quietly("reschedule").await;
        Ok(created)
    }

    /// Flag every booking carrying `correlation_id` as unmatched. Returns how
    /// many records the store changed.
    pub async fn unmatch(&self, correlation_id: &str) -> Result<usize, EngineError> {
        let result = self.unmatch_inner(correlation_id).await;
        count("unmatch", &result);
        result
    }

    async fn unmatch_inner(&self, correlation_id: &str) -> Result<usize, EngineError> {
        let cid = correlation_id.trim();
        if cid.is_empty() {
            return Err(EngineError::Validation("external id is required".into()));
        }
        let ids: Vec<BookingId> = {
            let view = self.view.read().await;
            let in_requests = correlation::sharing_reference(view.requests(), cid)
                .into_iter()
                .map(|i| view.requests()[i].id.clone());
            let in_bookings = correlation::sharing_reference(view.bookings(), cid)
                .into_iter()
                .map(|i| view.bookings()[i].id.clone());
            in_requests.chain(in_bookings).collect()
        };
        if ids.is_empty() {
            return Err(EngineError::Validation(format!("no booking carries external id {cid}")));
        }
        let _claims = ids.iter().map(|id| self.claim(id)).collect::<Result<Vec<_>, _>>()?;

        let snapshot = {
            let mut view = self.view.write().await;
            let predicted = ids
                .iter()
                .filter_map(|id| view.find(id).cloned())
                .map(|mut r| {
                    r.unmatched = true;
                    r
                })
                .collect();
            view.speculate(predicted)
        };

        match self.remote.unmatch(cid).await {
            Ok(changed) => {
                info!(correlation_id = cid, changed, "bookings unmatched");
                let records: Vec<BookingRecord> = {
                    let view = self.view.read().await;
                    ids.iter().filter_map(|id| view.find(id).cloned()).collect()
                };
                for record in &records {
                    self.publish(BookingAction::Unmatched, record);
                }
                self.refresh_quietly("unmatch").await;
                Ok(changed)
            }
            Err(e) => {
                self.roll_back(snapshot, "unmatch", &e).await;
                Err(e.into())
            }
        }
    }

    /// Point an (unmatched) booking at a directory member.
    pub async fn link_member(&self, id: &BookingId, member: &Member) -> Result<BookingRecord, EngineError> {
        let result = self.link_inner(id, member).await;
        count("link_member", &result);
        result
    }

    async fn link_inner(&self, id: &BookingId, member: &Member) -> Result<BookingRecord, EngineError> {
        if correlation::is_placeholder_email(&member.email) {
            return Err(EngineError::Validation(format!("{} is not a member address", member.email)));
        }
        let _claim = self.claim(id)?;
        let snapshot = {
            let mut view = self.view.write().await;
            let mut predicted = view.find(id).cloned().ok_or_else(|| EngineError::NotFound(id.clone()))?;
            correlation::link(&mut predicted, member);
            view.speculate(vec![predicted])
        };

        match self.remote.link_member(id, member).await {
            Ok(record) => {
                self.view.write().await.apply_record(record.clone());
                self.publish(BookingAction::Linked, &record);
                self.refresh_quietly("link").await;
                Ok(record)
            }
            Err(e) => {
                self.roll_back(snapshot, "link_member", &e).await;
                Err(e.into())
            }
        }
    }
}
