mod availability;
mod conflict;
mod error;
mod lifecycle;
mod mutations;
mod queries;
mod view;

pub use availability::{
    merge_overlapping, subtract_intervals, DayIndex, GridRow, Occupancy, Occupant, SlotState, Sources,
};
pub use conflict::{check_availability, validate_candidate, Availability, Candidate};
pub use error::{ConflictCause, EngineError};
pub use lifecycle::{can_transition, plan, valid_targets, GuardContext, SideEffect, Transition, TransitionPlan};
pub use mutations::{NewPlacement, TransitionOutcome};
pub use view::{ScheduleView, Snapshot};

use std::sync::Arc;

use chrono::NaiveDateTime;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::config::Config;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::remote::RemoteStore;

type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

/// One staff client's scheduler: a local view of the schedule kept in step
/// with a remote store through optimistic, guarded transitions.
pub struct Engine {
    view: RwLock<ScheduleView>,
    remote: Arc<dyn RemoteStore>,
    pub notify: Arc<NotifyHub>,
    /// Records with a transition outstanding.
    in_flight: DashMap<BookingId, ()>,
    origin: Ulid,
    config: Config,
    clock: Clock,
}

/// Releases the in-progress claim on drop.
pub(super) struct InFlight<'a> {
    map: &'a DashMap<BookingId, ()>,
    id: BookingId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.id);
    }
}

impl Engine {
    pub fn new(remote: Arc<dyn RemoteStore>, notify: Arc<NotifyHub>, config: Config) -> Self {
        Self {
            view: RwLock::new(ScheduleView::default()),
            remote,
            notify,
            in_flight: DashMap::new(),
            origin: Ulid::new(),
            config,
            clock: Arc::new(|| chrono::Local::now().naive_local()),
        }
    }

    /// Replace the wall clock, e.g. to pin the business date.
    pub fn with_clock(mut self, clock: impl Fn() -> NaiveDateTime + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Identifies this client's own events on the shared channel.
    pub fn origin(&self) -> Ulid {
        self.origin
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(super) fn now(&self) -> NaiveDateTime {
        (self.clock)()
    }

    pub(super) fn claim(&self, id: &BookingId) -> Result<InFlight<'_>, EngineError> {
        match self.in_flight.entry(id.clone()) {
            Entry::Occupied(_) => Err(EngineError::InProgress(id.clone())),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(InFlight {
                    map: &self.in_flight,
                    id: id.clone(),
                })
            }
        }
    }

    pub(super) fn publish(&self, action: BookingAction, record: &BookingRecord) {
        self.notify.send(BookingEvent::new(action, record, self.origin));
    }
}
