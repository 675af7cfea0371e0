use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;
use ulid::Ulid;

use crate::correlation::{self, ExternalBooking};
use crate::engine::{check_availability, Candidate, Sources};
use crate::model::*;
use crate::notify::NotifyHub;

use super::*;

/// Initial contents for an [`InMemoryRemote`], e.g. loaded from a JSON file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Seed {
    pub resources: Vec<Resource>,
    pub bookings: Vec<BookingRecord>,
    pub closures: Vec<CalendarClosure>,
    pub blocks: Vec<AvailabilityBlock>,
    pub members: Vec<Member>,
    /// Records in the outside system's shape, normalized on load.
    pub imports: Vec<ExternalBooking>,
}

/// Reference [`RemoteStore`] enforcing the server-side rules: one transition
/// out of any state, conflict re-check on approve and create, remediation
/// demands on check-in, and the unmatch cascade.
pub struct InMemoryRemote {
    bookings: DashMap<BookingId, BookingRecord>,
    resources: DashMap<ResourceId, Resource>,
    closures: DashMap<i64, CalendarClosure>,
    blocks: DashMap<i64, AvailabilityBlock>,
    members: DashMap<String, Member>,
    outstanding: DashMap<BookingId, RemediationKind>,
    next_id: AtomicI64,
    /// Serializes mutations so check-then-write is atomic.
    write_gate: AsyncMutex<()>,
    fault: Mutex<Option<RemoteError>>,
    hub: Option<(Arc<NotifyHub>, Ulid)>,
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self {
            bookings: DashMap::new(),
            resources: DashMap::new(),
            closures: DashMap::new(),
            blocks: DashMap::new(),
            members: DashMap::new(),
            outstanding: DashMap::new(),
            next_id: AtomicI64::new(1),
            write_gate: AsyncMutex::new(()),
            fault: Mutex::new(None),
            hub: None,
        }
    }

    pub fn from_seed(seed: Seed) -> Self {
        let remote = Self::new();
        for r in seed.resources {
            remote.resources.insert(r.id, r);
        }
        for c in seed.closures {
            remote.closures.insert(c.id, c);
        }
        for b in seed.blocks {
            remote.blocks.insert(b.id, b);
        }
        for m in seed.members {
            remote.members.insert(m.email.to_ascii_lowercase(), m);
        }
        for b in seed.bookings {
            remote.bump_next_id(&b.id);
            remote.bookings.insert(b.id.clone(), b);
        }
        let received_at = Utc::now();
        for import in seed.imports {
            match import.normalize(received_at) {
                Ok(b) => {
                    remote.bump_next_id(&b.id);
                    remote.bookings.insert(b.id.clone(), b);
                }
                Err(e) => warn!("skipping seed import: {e}"),
            }
        }
        remote
    }

    /// Publish a `booking-updated` event (with `origin`) whenever someone
    /// other than a scheduler client changes a booking through [`upsert_booking`](Self::upsert_booking).
    pub fn with_hub(mut self, hub: Arc<NotifyHub>, origin: Ulid) -> Self {
        self.hub = Some((hub, origin));
        self
    }

    // ── Server-side fixtures ─────────────────────────────────

    pub fn booking(&self, id: &BookingId) -> Option<BookingRecord> {
        self.bookings.get(id).map(|e| e.value().clone())
    }

    /// Write a booking as another actor would (front desk, member app, importer).
    pub fn upsert_booking(&self, record: BookingRecord) {
        self.bump_next_id(&record.id);
        let event = BookingAction::for_status(record.status).map(|action| (action, record.clone()));
        self.bookings.insert(record.id.clone(), record);
        if let (Some((hub, origin)), Some((action, record))) = (&self.hub, event) {
            hub.send(BookingEvent::new(action, &record, *origin));
        }
    }

    /// Take a resource out of service, as the admin workflow would.
    pub fn retire_resource(&self, id: ResourceId) {
        self.resources.remove(&id);
    }

    pub fn require_remediation(&self, id: BookingId, kind: RemediationKind) {
        self.outstanding.insert(id, kind);
    }

    /// Clear an outstanding remediation (payment collected, roster completed).
    pub fn settle(&self, id: &BookingId) {
        self.outstanding.remove(id);
    }

    /// Fail the next call, read or write, with `err`.
    pub fn fail_next(&self, err: RemoteError) {
        if let Ok(mut slot) = self.fault.lock() {
            *slot = Some(err);
        }
    }

    fn bump_next_id(&self, id: &BookingId) {
        if let BookingId::Numeric(n) = id {
            self.next_id.fetch_max(n + 1, Ordering::SeqCst);
        }
    }

    fn take_fault(&self) -> Result<(), RemoteError> {
        match self.fault.lock().ok().and_then(|mut f| f.take()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn get(&self, id: &BookingId) -> Result<BookingRecord, RemoteError> {
        self.booking(id).ok_or_else(|| RemoteError::NotFound(id.clone()))
    }

    fn put(&self, record: BookingRecord) -> BookingRecord {
        self.bookings.insert(record.id.clone(), record.clone());
        record
    }

    fn ensure_free(&self, candidate: &Candidate) -> Result<(), RemoteError> {
        let resources: Vec<Resource> = self.resources.iter().map(|e| e.value().clone()).collect();
        let bookings: Vec<BookingRecord> = self.bookings.iter().map(|e| e.value().clone()).collect();
        let closures: Vec<CalendarClosure> = self.closures.iter().map(|e| e.value().clone()).collect();
        let blocks: Vec<AvailabilityBlock> = self.blocks.iter().map(|e| e.value().clone()).collect();
        let sources = Sources {
            resources: &resources,
            bookings: &bookings,
            closures: &closures,
            blocks: &blocks,
        };
        match check_availability(candidate, sources) {
            crate::engine::Availability::Available => Ok(()),
            crate::engine::Availability::Conflict { reason, .. } => Err(RemoteError::Conflict(reason)),
        }
    }
}

fn already(record: &BookingRecord) -> RemoteError {
    RemoteError::Rejected(format!("booking {} is already {}", record.id, record.status))
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn fetch_bookings(&self, filter: &BookingFilter) -> Result<Vec<BookingRecord>, RemoteError> {
        self.take_fault()?;
        let mut out: Vec<BookingRecord> = self
            .bookings
            .iter()
            .filter(|e| filter.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| (a.date, a.start_time, &a.id).cmp(&(b.date, b.start_time, &b.id)));
        Ok(out)
    }

    async fn fetch_resources(&self) -> Result<Vec<Resource>, RemoteError> {
        self.take_fault()?;
        let mut out: Vec<Resource> = self.resources.iter().map(|e| e.value().clone()).collect();
        out.sort_by_key(|r| r.id);
        Ok(out)
    }

    async fn fetch_closures(&self) -> Result<Vec<CalendarClosure>, RemoteError> {
        self.take_fault()?;
        let mut out: Vec<CalendarClosure> = self.closures.iter().map(|e| e.value().clone()).collect();
        out.sort_by_key(|c| c.id);
        Ok(out)
    }

    async fn fetch_blocks(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<AvailabilityBlock>, RemoteError> {
        self.take_fault()?;
        let mut out: Vec<AvailabilityBlock> = self
            .blocks
            .iter()
            .filter(|e| (from..=to).contains(&e.value().block_date))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|b| b.id);
        Ok(out)
    }

    async fn approve(&self, id: &BookingId, req: ApproveRequest) -> Result<BookingRecord, RemoteError> {
        let _gate = self.write_gate.lock().await;
        self.take_fault()?;
        let mut record = self.get(id)?;
        if !record.status.is_pending() {
            return Err(already(&record));
        }
        if !self.resources.contains_key(&req.resource_id) {
            return Err(RemoteError::Rejected(format!("unknown resource {}", req.resource_id)));
        }
        let candidate = Candidate::for_record(&record, req.resource_id)
            .map_err(|e| RemoteError::Rejected(e.to_string()))?;
        self.ensure_free(&candidate)?;

        record.status = BookingStatus::Approved;
        record.resource_id = Some(req.resource_id);
        if req.staff_notes.is_some() {
            record.staff_notes = req.staff_notes;
        }
        if record.source_kind != SourceKind::DirectBooking {
            record.reviewed_by = req.reviewed_by;
        }
        if let Some(reference) = correlation::external_reference(&record) {
            record.external_correlation_id = Some(reference);
        }
        Ok(self.put(record))
    }

    async fn decline(&self, id: &BookingId, req: DeclineRequest) -> Result<BookingRecord, RemoteError> {
        let _gate = self.write_gate.lock().await;
        self.take_fault()?;
        let mut record = self.get(id)?;
        if !record.status.is_pending() {
            return Err(already(&record));
        }
        record.status = BookingStatus::Declined;
        if req.staff_notes.is_some() {
            record.staff_notes = req.staff_notes;
        }
        if req.suggested_time.is_some() {
            record.suggested_time = req.suggested_time;
        }
        Ok(self.put(record))
    }

    async fn cancel(&self, id: &BookingId, cancelled_by: &str) -> Result<BookingRecord, RemoteError> {
        let _gate = self.write_gate.lock().await;
        self.take_fault()?;
        let mut record = self.get(id)?;
        if !record.status.is_active() {
            return Err(already(&record));
        }
        record.status = if correlation::external_reference(&record).is_some() {
            BookingStatus::CancellationPending
        } else {
            BookingStatus::Cancelled
        };
        record.cancelled_by = Some(cancelled_by.to_string());
        Ok(self.put(record))
    }

    async fn acknowledge_cancellation(&self, id: &BookingId) -> Result<BookingRecord, RemoteError> {
        let _gate = self.write_gate.lock().await;
        self.take_fault()?;
        let mut record = self.get(id)?;
        if record.status != BookingStatus::CancellationPending {
            return Err(already(&record));
        }
        record.status = BookingStatus::Cancelled;
        Ok(self.put(record))
    }

    async fn checkin(&self, id: &BookingId, status: CheckinStatus) -> Result<CheckinOutcome, RemoteError> {
        let _gate = self.write_gate.lock().await;
        self.take_fault()?;
        let mut record = self.get(id)?;
        if !record.status.is_active() {
            return Err(already(&record));
        }
        if status == CheckinStatus::Attended
            && let Some(kind) = self.outstanding.get(id).map(|e| *e.value())
        {
            let detail = match kind {
                RemediationKind::Payment => format!("booking {id} has unpaid fees"),
                RemediationKind::Roster => format!("booking {id} is missing player details"),
            };
            return Ok(CheckinOutcome::RemediationRequired { kind, detail });
        }
        record.status = status.into();
        Ok(CheckinOutcome::Recorded(self.put(record)))
    }

    async fn check_existing_booking(
        &self,
        member_email: &str,
        date: NaiveDate,
        kind: ResourceKind,
    ) -> Result<Option<BookingRecord>, RemoteError> {
        self.take_fault()?;
        let email = member_email.trim().to_ascii_lowercase();
        Ok(self
            .bookings
            .iter()
            .map(|e| e.value().clone())
            .filter(|b| {
                b.date == date
                    && b.member_email.to_ascii_lowercase() == email
                    && (b.status.is_pending() || b.status.occupies_resource())
                    && b.resource_id
                        .and_then(|rid| self.resources.get(&rid).map(|r| r.kind))
                        .is_none_or(|k| k == kind)
            })
            .min_by(|a, b| a.id.cmp(&b.id)))
    }

    async fn create_manual_booking(&self, booking: ManualBooking) -> Result<BookingRecord, RemoteError> {
        let _gate = self.write_gate.lock().await;
        self.take_fault()?;
        if !self.resources.contains_key(&booking.resource_id) {
            return Err(RemoteError::Rejected(format!("unknown resource {}", booking.resource_id)));
        }
        let span = booking
            .start_time
            .checked_add(booking.duration_minutes)
            .and_then(|end| Span::try_new(booking.start_time, end))
            .ok_or_else(|| RemoteError::Rejected("invalid time range".into()))?;
        let mut candidate = Candidate::new(booking.resource_id, booking.date, span);
        // A replacement may overlap the booking it replaces.
        candidate.exclude = booking.rescheduled_from.clone();
        self.ensure_free(&candidate)?;

        let id = BookingId::Numeric(self.next_id.fetch_add(1, Ordering::SeqCst));
        let record = BookingRecord {
            id,
            source_kind: SourceKind::DirectBooking,
            member_email: booking.member_email,
            member_display_name: booking.member_display_name,
            resource_id: Some(booking.resource_id),
            date: booking.date,
            start_time: span.start,
            end_time: span.end,
            duration_minutes: span.duration(),
            status: BookingStatus::Confirmed,
            notes: booking.notes,
            staff_notes: None,
            external_correlation_id: booking.external_correlation_id,
            declared_player_count: booking.declared_player_count.max(1),
            guest_count: booking.guest_count,
            created_at: Utc::now(),
            reviewed_by: None,
            cancelled_by: None,
            suggested_time: None,
            rescheduled_from: booking.rescheduled_from,
            unmatched: false,
        };
        Ok(self.put(record))
    }

    async fn unmatch(&self, correlation_id: &str) -> Result<usize, RemoteError> {
        let _gate = self.write_gate.lock().await;
        self.take_fault()?;
        let mut changed = 0;
        for mut entry in self.bookings.iter_mut() {
            let record = entry.value_mut();
            if correlation::external_reference(record).as_deref() == Some(correlation_id) {
                record.unmatched = true;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn link_member(&self, id: &BookingId, member: &Member) -> Result<BookingRecord, RemoteError> {
        let _gate = self.write_gate.lock().await;
        self.take_fault()?;
        let mut record = self.get(id)?;
        correlation::link(&mut record, member);
        Ok(self.put(record))
    }

    async fn search_members(&self, query: &str) -> Result<Vec<Member>, RemoteError> {
        self.take_fault()?;
        let mut members: Vec<Member> = self.members.iter().map(|e| e.value().clone()).collect();
        members.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(correlation::search_members(&members, query)
            .into_iter()
            .cloned()
            .collect())
    }
}
