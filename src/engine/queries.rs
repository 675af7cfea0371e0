use chrono::{Days, NaiveDate};
use tracing::{debug, warn};

use crate::correlation::{self, Classification};
use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::remote::BookingFilter;

use super::availability::{DayIndex, GridRow};
use super::conflict::{check_availability, validate_text, Availability, Candidate};
use super::{Engine, EngineError};

impl Engine {
    /// Refetch everything inside the reconciliation window and replace the
    /// local view. Remote state wins over any optimistic guess.
    pub async fn refresh(&self) -> Result<(), EngineError> {
        let started = std::time::Instant::now();
        let today = self.now().date();
        let from = today.checked_sub_days(Days::new(REFRESH_WINDOW_DAYS)).unwrap_or(today);
        let to = today.checked_add_days(Days::new(REFRESH_WINDOW_DAYS)).unwrap_or(today);
        let filter = BookingFilter {
            from: Some(from),
            to: Some(to),
            resource_id: None,
        };

        let fetched = futures::try_join!(
            self.remote.fetch_resources(),
            self.remote.fetch_bookings(&filter),
            self.remote.fetch_closures(),
            self.remote.fetch_blocks(from, to),
        );
        let (resources, bookings, closures, blocks) = match fetched {
            Ok(all) => all,
            Err(e) => {
                metrics::counter!(observability::REFRESH_FAILURES_TOTAL).increment(1);
                warn!("refresh failed: {e}");
                return Err(e.into());
            }
        };

        let malformed = bookings.iter().filter(|b| !b.is_well_formed()).count();
        if malformed > 0 {
            warn!("{malformed} fetched bookings have inconsistent times");
        }
        debug!(
            resources = resources.len(),
            bookings = bookings.len(),
            closures = closures.len(),
            blocks = blocks.len(),
            "schedule refreshed"
        );
        let retired: Vec<ResourceId> = {
            let mut view = self.view.write().await;
            let retired = view
                .resources()
                .iter()
                .map(|r| r.id)
                .filter(|id| !resources.iter().any(|r| r.id == *id))
                .collect();
            view.replace(resources, bookings, closures, blocks);
            retired
        };
        for rid in retired {
            debug!(resource = rid, "resource retired, closing its channel");
            self.notify.remove(&rid);
        }
        metrics::histogram!(observability::REFRESH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        Ok(())
    }

    /// Run the conflict detector against the current view.
    pub async fn check_availability(&self, candidate: &Candidate) -> Availability {
        let view = self.view.read().await;
        check_availability(candidate, view.sources())
    }

    pub async fn day_index(&self, date: NaiveDate) -> DayIndex {
        let view = self.view.read().await;
        DayIndex::build(date, view.sources(), None)
    }

    /// Slot-by-resource grid for the configured business day.
    pub async fn grid(&self, date: NaiveDate) -> Vec<GridRow> {
        self.day_index(date)
            .await
            .grid(self.config.business_hours(), self.config.slot_minutes)
    }

    pub async fn open_slots(&self, resource_id: ResourceId, date: NaiveDate, duration: Minutes) -> Vec<Minutes> {
        self.day_index(date).await.open_slots(
            resource_id,
            duration,
            self.config.business_hours(),
            self.config.slot_minutes,
        )
    }

    pub async fn record(&self, id: &BookingId) -> Option<BookingRecord> {
        self.view.read().await.find(id).cloned()
    }

    pub async fn resources(&self) -> Vec<Resource> {
        self.view.read().await.resources().to_vec()
    }

    /// Records awaiting review.
    pub async fn requests(&self) -> Vec<BookingRecord> {
        self.view.read().await.requests().to_vec()
    }

    /// Everything past review, including terminal records.
    pub async fn bookings(&self) -> Vec<BookingRecord> {
        self.view.read().await.bookings().to_vec()
    }

    /// Both collections as one consistent pair.
    pub async fn collections(&self) -> (Vec<BookingRecord>, Vec<BookingRecord>) {
        let view = self.view.read().await;
        (view.requests().to_vec(), view.bookings().to_vec())
    }

    /// Non-terminal records that still need a member linked.
    pub async fn unmatched(&self) -> Vec<BookingRecord> {
        let view = self.view.read().await;
        view.records()
            .filter(|r| !r.status.is_terminal())
            .filter(|r| !matches!(correlation::classify(r), Classification::Matched))
            .cloned()
            .collect()
    }

    pub async fn search_members(&self, query: &str) -> Result<Vec<Member>, EngineError> {
        validate_text("search", Some(query), MAX_NAME_LEN)?;
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let mut members = self.remote.search_members(query).await?;
        members.truncate(MAX_MEMBER_SEARCH_RESULTS);
        Ok(members)
    }
}
