use crate::model::*;

use super::availability::Sources;

/// The client's local copy of the schedule. Pending requests and everything
/// else are kept in separate lists, mirroring how staff review them.
#[derive(Debug, Clone, Default)]
pub struct ScheduleView {
    resources: Vec<Resource>,
    requests: Vec<BookingRecord>,
    bookings: Vec<BookingRecord>,
    closures: Vec<CalendarClosure>,
    blocks: Vec<AvailabilityBlock>,
    /// Bumped on every change; lets a rollback tell whether anything else
    /// touched the view since its speculative apply.
    revision: u64,
}

/// Pre-mutation copy of the two booking collections.
#[derive(Debug, Clone)]
pub struct Snapshot {
    requests: Vec<BookingRecord>,
    bookings: Vec<BookingRecord>,
    /// The predicted records, as applied.
    touched: Vec<BookingRecord>,
    revision: u64,
}

impl ScheduleView {
    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn requests(&self) -> &[BookingRecord] {
        &self.requests
    }

    pub fn bookings(&self) -> &[BookingRecord] {
        &self.bookings
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn sources(&self) -> Sources<'_> {
        Sources {
            resources: &self.resources,
            bookings: &self.bookings,
            closures: &self.closures,
            blocks: &self.blocks,
        }
    }

    pub fn resource(&self, id: ResourceId) -> Option<&Resource> {
        self.resources.iter().find(|r| r.id == id)
    }

    pub fn find(&self, id: &BookingId) -> Option<&BookingRecord> {
        self.requests
            .iter()
            .chain(self.bookings.iter())
            .find(|r| r.id == *id)
    }

    pub fn records(&self) -> impl Iterator<Item = &BookingRecord> {
        self.requests.iter().chain(self.bookings.iter())
    }

    /// Swap in a freshly fetched schedule.
    pub fn replace(
        &mut self,
        resources: Vec<Resource>,
        records: Vec<BookingRecord>,
        closures: Vec<CalendarClosure>,
        blocks: Vec<AvailabilityBlock>,
    ) {
        let (requests, bookings): (Vec<_>, Vec<_>) = records.into_iter().partition(|r| r.status.is_pending());
        self.resources = resources;
        self.requests = requests;
        self.bookings = bookings;
        self.closures = closures;
        self.blocks = blocks;
        self.revision += 1;
    }

    /// Insert or overwrite a record, moving it between lists if its status
    /// crossed the pending boundary. Position is kept when it stays put.
    pub fn apply_record(&mut self, record: BookingRecord) {
        let pending = record.status.is_pending();
        let (home, other) = if pending {
            (&mut self.requests, &mut self.bookings)
        } else {
            (&mut self.bookings, &mut self.requests)
        };
        other.retain(|r| r.id != record.id);
        match home.iter_mut().find(|r| r.id == record.id) {
            Some(slot) => *slot = record,
            None => home.push(record),
        }
        self.revision += 1;
    }

    /// Apply predicted records and return what is needed to undo them.
    pub fn speculate(&mut self, predicted: Vec<BookingRecord>) -> Snapshot {
        let requests = self.requests.clone();
        let bookings = self.bookings.clone();
        let touched = predicted.clone();
        for record in predicted {
            self.apply_record(record);
        }
        Snapshot {
            requests,
            bookings,
            touched,
            revision: self.revision,
        }
    }

    /// Undo a speculative apply. If nothing else changed the view meanwhile
    /// the collections are restored wholesale and `true` is returned.
    /// Otherwise a touched record is put back only while it still holds the
    /// prediction; one that was since replaced (by a refresh) is left alone.
    /// Returns `false` in that case so the caller can reconcile.
    pub fn rollback(&mut self, snapshot: Snapshot) -> bool {
        if self.revision == snapshot.revision {
            self.requests = snapshot.requests;
            self.bookings = snapshot.bookings;
            self.revision += 1;
            return true;
        }
        for predicted in &snapshot.touched {
            if self.find(&predicted.id) != Some(predicted) {
                continue;
            }
            let id = &predicted.id;
            self.requests.retain(|r| r.id != *id);
            self.bookings.retain(|r| r.id != *id);
            restore_at(&mut self.requests, &snapshot.requests, id);
            restore_at(&mut self.bookings, &snapshot.bookings, id);
        }
        self.revision += 1;
        false
    }
}

fn restore_at(list: &mut Vec<BookingRecord>, original: &[BookingRecord], id: &BookingId) {
    if let Some(pos) = original.iter().position(|r| r.id == *id) {
        list.insert(pos.min(list.len()), original[pos].clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn record(id: i64, status: BookingStatus) -> BookingRecord {
        BookingRecord {
            id: BookingId::Numeric(id),
            source_kind: SourceKind::BookingRequest,
            member_email: format!("m{id}@club.com"),
            member_display_name: format!("Member {id}"),
            resource_id: Some(1),
            date: NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            start_time: 600,
            end_time: 660,
            duration_minutes: 60,
            status,
            notes: None,
            staff_notes: None,
            external_correlation_id: None,
            declared_player_count: 1,
            guest_count: 0,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            reviewed_by: None,
            cancelled_by: None,
            suggested_time: None,
            rescheduled_from: None,
            unmatched: false,
        }
    }

    fn view() -> ScheduleView {
        let mut v = ScheduleView::default();
        v.replace(
            vec![],
            vec![
                record(1, BookingStatus::Pending),
                record(2, BookingStatus::Approved),
                record(3, BookingStatus::PendingApproval),
            ],
            vec![],
            vec![],
        );
        v
    }

    #[test]
    fn replace_partitions_by_status() {
        let v = view();
        assert_eq!(v.requests().len(), 2);
        assert_eq!(v.bookings().len(), 1);
    }

    #[test]
    fn apply_moves_between_lists() {
        let mut v = view();
        let mut approved = record(1, BookingStatus::Approved);
        approved.resource_id = Some(2);
        v.apply_record(approved.clone());
        assert!(v.requests().iter().all(|r| r.id != approved.id));
        assert_eq!(v.find(&approved.id), Some(&approved));
    }

    #[test]
    fn rollback_restores_exactly() {
        let mut v = view();
        let before = (v.requests().to_vec(), v.bookings().to_vec());
        let snap = v.speculate(vec![record(1, BookingStatus::Approved)]);
        assert_ne!(v.requests().to_vec(), before.0);
        v.rollback(snap);
        assert_eq!((v.requests().to_vec(), v.bookings().to_vec()), before);
    }

    #[test]
    fn rollback_keeps_unrelated_later_changes() {
        let mut v = view();
        let snap = v.speculate(vec![record(1, BookingStatus::Approved)]);
        // Another record's change lands before the first one fails.
        v.apply_record(record(3, BookingStatus::Declined));
        v.rollback(snap);

        assert_eq!(v.requests()[0], record(1, BookingStatus::Pending));
        assert_eq!(v.find(&BookingId::Numeric(3)).map(|r| r.status), Some(BookingStatus::Declined));
    }

    #[test]
    fn rollback_leaves_refreshed_record_alone() {
        let mut v = view();
        let mut predicted = record(1, BookingStatus::Approved);
        predicted.resource_id = Some(1);
        let snap = v.speculate(vec![predicted]);

        // A refresh brings in another actor's approval of the same record.
        let mut theirs = record(1, BookingStatus::Approved);
        theirs.resource_id = Some(2);
        v.replace(
            vec![],
            vec![theirs.clone(), record(2, BookingStatus::Approved), record(3, BookingStatus::PendingApproval)],
            vec![],
            vec![],
        );

        assert!(!v.rollback(snap));
        assert_eq!(v.find(&theirs.id), Some(&theirs));
        assert_eq!(v.requests().len(), 1);
    }
}
