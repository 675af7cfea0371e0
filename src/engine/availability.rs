use std::collections::HashMap;

use chrono::NaiveDate;

use crate::closure::normalize_affected_areas;
use crate::model::*;

/// What occupies an interval. Precedence: closure > ad-hoc block > booking.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Occupant {
    Closure { id: i64, title: String },
    Block { id: i64, label: String },
    Booking { id: BookingId, member: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occupancy {
    pub span: Span,
    pub occupant: Occupant,
}

/// Highest-precedence state of one slot on one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotState {
    Closed { title: String },
    Blocked { label: String },
    Booked { id: BookingId, member: String },
    Free,
}

impl From<&Occupant> for SlotState {
    fn from(o: &Occupant) -> Self {
        match o {
            Occupant::Closure { title, .. } => SlotState::Closed { title: title.clone() },
            Occupant::Block { label, .. } => SlotState::Blocked { label: label.clone() },
            Occupant::Booking { id, member } => SlotState::Booked {
                id: id.clone(),
                member: member.clone(),
            },
        }
    }
}

/// Borrowed view of everything that can occupy a resource.
#[derive(Debug, Clone, Copy)]
pub struct Sources<'a> {
    pub resources: &'a [Resource],
    pub bookings: &'a [BookingRecord],
    pub closures: &'a [CalendarClosure],
    pub blocks: &'a [AvailabilityBlock],
}

/// One resource's occupied intervals for the day, sorted by `span.start`.
#[derive(Debug, Clone, Default)]
struct ResourceDay {
    intervals: Vec<Occupancy>,
}

impl ResourceDay {
    fn insert(&mut self, occupancy: Occupancy) {
        let pos = self
            .intervals
            .binary_search_by_key(&occupancy.span.start, |o| o.span.start)
            .unwrap_or_else(|e| e);
        self.intervals.insert(pos, occupancy);
    }

    /// Everything at index >= right_bound starts at or after `query.end` and can't overlap.
    fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Occupancy> {
        let right_bound = self
            .intervals
            .partition_point(|o| o.span.start < query.end);
        self.intervals[..right_bound]
            .iter()
            .filter(move |o| o.span.end > query.start)
    }
}

/// Occupancy of every resource on one date.
#[derive(Debug, Clone)]
pub struct DayIndex {
    date: NaiveDate,
    resources: Vec<Resource>,
    days: HashMap<ResourceId, ResourceDay>,
}

impl DayIndex {
    /// Index every resource on `date`. `exclude` drops one booking from the
    /// index so a record under review is never compared against itself.
    pub fn build(date: NaiveDate, sources: Sources<'_>, exclude: Option<&BookingId>) -> Self {
        Self::build_filtered(date, sources, exclude, None)
    }

    /// Index a single resource; used by the conflict detector.
    pub fn for_resource(
        date: NaiveDate,
        resource_id: ResourceId,
        sources: Sources<'_>,
        exclude: Option<&BookingId>,
    ) -> Self {
        Self::build_filtered(date, sources, exclude, Some(resource_id))
    }

    fn build_filtered(
        date: NaiveDate,
        sources: Sources<'_>,
        exclude: Option<&BookingId>,
        only: Option<ResourceId>,
    ) -> Self {
        let wanted = |rid: ResourceId| only.is_none_or(|o| o == rid);
        let mut days: HashMap<ResourceId, ResourceDay> = HashMap::new();

        for closure in sources.closures.iter().filter(|c| c.covers_date(date)) {
            let Some(span) = closure.span() else { continue };
            let affected = normalize_affected_areas(&closure.affected_areas, sources.resources);
            for rid in affected.into_iter().filter(|r| wanted(*r)) {
                days.entry(rid).or_default().insert(Occupancy {
                    span,
                    occupant: Occupant::Closure {
                        id: closure.id,
                        title: closure.title.clone(),
                    },
                });
            }
        }

        for block in sources
            .blocks
            .iter()
            .filter(|b| b.block_date == date && wanted(b.resource_id))
        {
            let Some(span) = block.span() else { continue };
            days.entry(block.resource_id).or_default().insert(Occupancy {
                span,
                occupant: Occupant::Block {
                    id: block.id,
                    label: block.label().to_string(),
                },
            });
        }

        for booking in sources.bookings {
            if booking.date != date
                || !booking.status.occupies_resource()
                || exclude.is_some_and(|ex| *ex == booking.id)
            {
                continue;
            }
            let (Some(rid), Some(span)) = (booking.resource_id, booking.span()) else {
                continue;
            };
            if !wanted(rid) {
                continue;
            }
            days.entry(rid).or_default().insert(Occupancy {
                span,
                occupant: Occupant::Booking {
                    id: booking.id.clone(),
                    member: booking.member_display_name.clone(),
                },
            });
        }

        let resources = sources
            .resources
            .iter()
            .filter(|r| wanted(r.id))
            .cloned()
            .collect();

        Self {
            date,
            resources,
            days,
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Entities overlapping `span` on `resource_id`, in precedence order, ties
    /// broken by start time and then id so the result never depends on input order.
    pub fn occupants(&self, resource_id: ResourceId, span: &Span) -> Vec<&Occupancy> {
        let Some(day) = self.days.get(&resource_id) else {
            return Vec::new();
        };
        let mut hits: Vec<&Occupancy> = day.overlapping(span).collect();
        hits.sort_by(|a, b| {
            precedence(&a.occupant)
                .cmp(&precedence(&b.occupant))
                .then(a.span.start.cmp(&b.span.start))
                .then_with(|| a.occupant.cmp(&b.occupant))
        });
        hits
    }

    pub fn first_occupant(&self, resource_id: ResourceId, span: &Span) -> Option<&Occupancy> {
        self.occupants(resource_id, span).into_iter().next()
    }

    pub fn slot_state(&self, resource_id: ResourceId, span: &Span) -> SlotState {
        self.first_occupant(resource_id, span)
            .map_or(SlotState::Free, |o| SlotState::from(&o.occupant))
    }

    /// Slot-by-slot state for every indexed resource over the business day.
    pub fn grid(&self, hours: Span, granularity: Minutes) -> Vec<GridRow> {
        crate::clock::slots(hours.start, hours.end, granularity)
            .into_iter()
            .map(|slot| GridRow {
                slot,
                cells: self
                    .resources
                    .iter()
                    .map(|r| (r.id, self.slot_state(r.id, &slot)))
                    .collect(),
            })
            .collect()
    }

    /// Unoccupied sub-intervals of `window` on `resource_id`.
    pub fn free_spans(&self, resource_id: ResourceId, window: Span) -> Vec<Span> {
        let mut occupied: Vec<Span> = self
            .days
            .get(&resource_id)
            .into_iter()
            .flat_map(|d| d.overlapping(&window))
            .map(|o| Span::new(o.span.start.max(window.start), o.span.end.min(window.end)))
            .collect();
        occupied.sort_by_key(|s| s.start);
        let occupied = merge_overlapping(&occupied);
        subtract_intervals(&[window], &occupied)
    }

    /// Start times, aligned to `granularity` from `hours.start`, at which a
    /// `duration`-minute booking fits entirely in free time.
    pub fn open_slots(
        &self,
        resource_id: ResourceId,
        duration: Minutes,
        hours: Span,
        granularity: Minutes,
    ) -> Vec<Minutes> {
        if duration == 0 || granularity == 0 {
            return Vec::new();
        }
        let free = self.free_spans(resource_id, hours);
        let mut out = Vec::new();
        let mut start = hours.start;
        while let Some(end) = start.checked_add(duration).filter(|e| *e <= hours.end) {
            let candidate = Span::new(start, end);
            if free.iter().any(|f| f.contains_span(&candidate)) {
                out.push(start);
            }
            let Some(next) = start.checked_add(granularity) else { break };
            start = next;
        }
        out
    }
}

fn precedence(o: &Occupant) -> u8 {
    match o {
        Occupant::Closure { .. } => 0,
        Occupant::Block { .. } => 1,
        Occupant::Booking { .. } => 2,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridRow {
    pub slot: Span,
    pub cells: Vec<(ResourceId, SlotState)>,
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

/// `base` minus `to_remove`; both sorted by start, `to_remove` disjoint.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    const H: Minutes = 60;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 10).unwrap()
    }

    fn bays() -> Vec<Resource> {
        (1..=3)
            .map(|id| Resource {
                id,
                name: format!("Bay {id}"),
                kind: ResourceKind::SimulatorBay,
            })
            .collect()
    }

    fn booking(id: i64, rid: ResourceId, start: Minutes, end: Minutes, status: BookingStatus) -> BookingRecord {
        BookingRecord {
            id: BookingId::Numeric(id),
            source_kind: SourceKind::BookingRequest,
            member_email: format!("m{id}@example.com"),
            member_display_name: format!("Member {id}"),
            resource_id: Some(rid),
            date: day(),
            start_time: start,
            end_time: end,
            duration_minutes: end - start,
            status,
            notes: None,
            staff_notes: None,
            external_correlation_id: None,
            declared_player_count: 1,
            guest_count: 0,
            created_at: Utc::now(),
            reviewed_by: None,
            cancelled_by: None,
            suggested_time: None,
            rescheduled_from: None,
            unmatched: false,
        }
    }

    fn closure(id: i64, areas: &str, start: Option<Minutes>, end: Option<Minutes>) -> CalendarClosure {
        CalendarClosure {
            id,
            title: format!("Closure {id}"),
            start_date: day(),
            end_date: day(),
            start_time: start,
            end_time: end,
            affected_areas: AffectedAreas::new(areas),
            reason: None,
            is_active: true,
        }
    }

    fn block(id: i64, rid: ResourceId, start: Minutes, end: Minutes) -> AvailabilityBlock {
        AvailabilityBlock {
            id,
            resource_id: rid,
            block_date: day(),
            start_time: start,
            end_time: end,
            block_type: "event".into(),
            notes: None,
            title: Some(format!("Event {id}")),
        }
    }

    // ── subtract_intervals / merge_overlapping ────────────

    #[test]
    fn subtract_middle_punch() {
        let result = subtract_intervals(&[Span::new(100, 300)], &[Span::new(150, 200)]);
        assert_eq!(result, vec![Span::new(100, 150), Span::new(200, 300)]);
    }

    #[test]
    fn subtract_multiple_punches() {
        let remove = vec![Span::new(100, 200), Span::new(400, 500), Span::new(800, 900)];
        let result = subtract_intervals(&[Span::new(0, 1000)], &remove);
        assert_eq!(
            result,
            vec![
                Span::new(0, 100),
                Span::new(200, 400),
                Span::new(500, 800),
                Span::new(900, 1000),
            ]
        );
    }

    #[test]
    fn subtract_full_overlap() {
        assert!(subtract_intervals(&[Span::new(100, 200)], &[Span::new(50, 250)]).is_empty());
    }

    #[test]
    fn merge_overlapping_adjacent() {
        let merged = merge_overlapping(&[Span::new(100, 200), Span::new(200, 300), Span::new(400, 500)]);
        assert_eq!(merged, vec![Span::new(100, 300), Span::new(400, 500)]);
    }

    // ── DayIndex ──────────────────────────────────────────

    #[test]
    fn precedence_closure_over_block_over_booking() {
        let resources = bays();
        let bookings = vec![booking(1, 1, 10 * H, 11 * H, BookingStatus::Approved)];
        let blocks = vec![block(5, 1, 10 * H, 12 * H)];
        let closures = vec![closure(9, "bay_1", Some(10 * H + 30), Some(11 * H))];
        let sources = Sources {
            resources: &resources,
            bookings: &bookings,
            closures: &closures,
            blocks: &blocks,
        };
        let idx = DayIndex::build(day(), sources, None);
        let hits = idx.occupants(1, &Span::new(10 * H, 11 * H));
        assert_eq!(hits.len(), 3);
        assert!(matches!(hits[0].occupant, Occupant::Closure { id: 9, .. }));
        assert!(matches!(hits[1].occupant, Occupant::Block { id: 5, .. }));
        assert!(matches!(hits[2].occupant, Occupant::Booking { .. }));

        // Outside the closure window the block wins.
        assert_eq!(
            idx.slot_state(1, &Span::new(11 * H, 11 * H + 30)),
            SlotState::Blocked { label: "Event 5".into() }
        );
        assert_eq!(idx.slot_state(2, &Span::new(10 * H, 11 * H)), SlotState::Free);
    }

    #[test]
    fn pending_and_cancelled_do_not_occupy() {
        let resources = bays();
        let bookings = vec![
            booking(1, 1, 10 * H, 11 * H, BookingStatus::Pending),
            booking(2, 1, 10 * H, 11 * H, BookingStatus::Cancelled),
            booking(3, 1, 10 * H, 11 * H, BookingStatus::CancellationPending),
        ];
        let sources = Sources {
            resources: &resources,
            bookings: &bookings,
            closures: &[],
            blocks: &[],
        };
        let idx = DayIndex::build(day(), sources, None);
        assert!(idx.occupants(1, &Span::new(10 * H, 11 * H)).is_empty());
    }

    #[test]
    fn exclude_skips_record_under_review() {
        let resources = bays();
        let bookings = vec![booking(1, 1, 10 * H, 11 * H, BookingStatus::Approved)];
        let sources = Sources {
            resources: &resources,
            bookings: &bookings,
            closures: &[],
            blocks: &[],
        };
        let idx = DayIndex::build(day(), sources, Some(&BookingId::Numeric(1)));
        assert!(idx.occupants(1, &Span::new(10 * H, 11 * H)).is_empty());
    }

    #[test]
    fn grid_reports_each_slot() {
        let resources = bays();
        let bookings = vec![booking(1, 2, 9 * H, 10 * H, BookingStatus::Confirmed)];
        let closures = vec![closure(1, "all_bays", Some(11 * H), Some(12 * H))];
        let sources = Sources {
            resources: &resources,
            bookings: &bookings,
            closures: &closures,
            blocks: &[],
        };
        let idx = DayIndex::build(day(), sources, None);
        let grid = idx.grid(Span::new(9 * H, 12 * H), 60);
        assert_eq!(grid.len(), 3);
        assert_eq!(grid[0].cells[0], (1, SlotState::Free));
        assert!(matches!(grid[0].cells[1].1, SlotState::Booked { .. }));
        assert!(grid[2]
            .cells
            .iter()
            .all(|(_, s)| matches!(s, SlotState::Closed { .. })));
    }

    #[test]
    fn open_slots_skip_occupied_time() {
        let resources = bays();
        let bookings = vec![booking(1, 1, 10 * H, 11 * H, BookingStatus::Approved)];
        let blocks = vec![block(1, 1, 12 * H, 13 * H)];
        let sources = Sources {
            resources: &resources,
            bookings: &bookings,
            closures: &[],
            blocks: &blocks,
        };
        let idx = DayIndex::build(day(), sources, None);
        let open = idx.open_slots(1, 60, Span::new(9 * H, 14 * H), 30);
        assert_eq!(open, vec![9 * H, 11 * H, 13 * H]);
        assert_eq!(
            idx.free_spans(1, Span::new(9 * H, 14 * H)),
            vec![
                Span::new(9 * H, 10 * H),
                Span::new(11 * H, 12 * H),
                Span::new(13 * H, 14 * H)
            ]
        );
    }

    #[test]
    fn open_slots_stop_at_minute_range_end() {
        let resources = bays();
        let sources = Sources {
            resources: &resources,
            bookings: &[],
            closures: &[],
            blocks: &[],
        };
        let idx = DayIndex::build(day(), sources, None);
        let hours = Span::new(9 * H, 14 * H);
        assert!(idx.open_slots(1, Minutes::MAX, hours, 30).is_empty());
        assert_eq!(idx.open_slots(1, 60, hours, Minutes::MAX), vec![9 * H]);
    }

    #[test]
    fn for_resource_ignores_other_resources() {
        let resources = bays();
        let bookings = vec![
            booking(1, 1, 10 * H, 11 * H, BookingStatus::Approved),
            booking(2, 2, 10 * H, 11 * H, BookingStatus::Approved),
        ];
        let sources = Sources {
            resources: &resources,
            bookings: &bookings,
            closures: &[],
            blocks: &[],
        };
        let idx = DayIndex::for_resource(day(), 2, sources, None);
        assert!(idx.occupants(1, &Span::new(10 * H, 11 * H)).is_empty());
        assert_eq!(idx.occupants(2, &Span::new(10 * H, 11 * H)).len(), 1);
        assert_eq!(idx.grid(Span::new(10 * H, 11 * H), 60)[0].cells.len(), 1);
    }
}
