use std::collections::HashMap;

use ulid::Ulid;

use crate::model::*;

/// Everything the engine knows about one professional. Guarded by one
/// `RwLock`; the write lock is the serialization point for that calendar.
#[derive(Debug, Clone)]
pub struct ProfessionalState {
    pub profile: Professional,
    /// Creation order is preserved; upserts replace in place.
    pub locations: Vec<Location>,
    pub offerings: HashMap<Ulid, Offering>,
    pub add_ons: HashMap<Ulid, AddOn>,
    /// Sorted by `scheduled_for`.
    pub holds: Vec<Hold>,
    /// Sorted by `scheduled_for`.
    pub bookings: Vec<Booking>,
    /// Sorted by `span.start`.
    pub blocks: Vec<CalendarBlock>,
    /// Keyed by booking id.
    pub approvals: HashMap<Ulid, ConsultationApproval>,
}

impl ProfessionalState {
    pub fn new(id: Ulid) -> Self {
        Self {
            profile: Professional {
                id,
                time_zone: None,
                auto_accept: false,
            },
            locations: Vec::new(),
            offerings: HashMap::new(),
            add_ons: HashMap::new(),
            holds: Vec::new(),
            bookings: Vec::new(),
            blocks: Vec::new(),
            approvals: HashMap::new(),
        }
    }

    pub fn location(&self, id: &Ulid) -> Option<&Location> {
        self.locations.iter().find(|l| l.id == *id)
    }

    pub fn offering(&self, id: &Ulid) -> Option<&Offering> {
        self.offerings.get(id)
    }

    pub fn hold(&self, id: &Ulid) -> Option<&Hold> {
        self.holds.iter().find(|h| h.id == *id)
    }

    pub fn booking(&self, id: &Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == *id)
    }

    pub fn approval(&self, booking_id: &Ulid) -> Option<&ConsultationApproval> {
        self.approvals.get(booking_id)
    }

    /// Buffer of the location a booking or hold was placed at, 0 if it is gone.
    pub fn location_buffer(&self, location_id: &Ulid) -> u32 {
        self.location(location_id).map(|l| l.buffer_minutes).unwrap_or(0)
    }

    /// Holds with `expires_at <= now`.
    pub fn expired_holds(&self, now: Ms) -> impl Iterator<Item = &Hold> {
        self.holds.iter().filter(move |h| !h.is_active(now))
    }

    /// Bookings starting before `window.end`. The caller filters on the busy end,
    /// which depends on each booking's buffer.
    pub fn bookings_starting_before(&self, window: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self.bookings.partition_point(|b| b.scheduled_for < window.end);
        self.bookings[..right_bound].iter()
    }

    pub fn holds_starting_before(&self, window: &Span) -> impl Iterator<Item = &Hold> {
        let right_bound = self.holds.partition_point(|h| h.scheduled_for < window.end);
        self.holds[..right_bound].iter()
    }

    /// Blocks whose span overlaps the window.
    pub fn blocks_overlapping(&self, window: &Span) -> impl Iterator<Item = &CalendarBlock> {
        let right_bound = self.blocks.partition_point(|b| b.span.start < window.end);
        self.blocks[..right_bound]
            .iter()
            .filter(move |b| b.span.end > window.start)
    }

    fn upsert_location(&mut self, location: Location) {
        if location.is_primary {
            for other in self.locations.iter_mut().filter(|l| l.id != location.id) {
                other.is_primary = false;
            }
        }
        match self.locations.iter_mut().find(|l| l.id == location.id) {
            Some(existing) => *existing = location,
            None => self.locations.push(location),
        }
    }

    fn insert_hold(&mut self, hold: Hold) {
        self.remove_hold(&hold.id);
        let pos = self.holds.partition_point(|h| h.scheduled_for <= hold.scheduled_for);
        self.holds.insert(pos, hold);
    }

    fn remove_hold(&mut self, id: &Ulid) -> Option<Hold> {
        let pos = self.holds.iter().position(|h| h.id == *id)?;
        Some(self.holds.remove(pos))
    }

    fn upsert_booking(&mut self, booking: Booking) {
        if let Some(pos) = self.bookings.iter().position(|b| b.id == booking.id) {
            if self.bookings[pos].scheduled_for == booking.scheduled_for {
                self.bookings[pos] = booking;
                return;
            }
            self.bookings.remove(pos);
        }
        let pos = self
            .bookings
            .partition_point(|b| b.scheduled_for <= booking.scheduled_for);
        self.bookings.insert(pos, booking);
    }

    fn insert_block(&mut self, block: CalendarBlock) {
        self.remove_block(&block.id);
        let pos = self.blocks.partition_point(|b| b.span.start <= block.span.start);
        self.blocks.insert(pos, block);
    }

    fn remove_block(&mut self, id: &Ulid) -> Option<CalendarBlock> {
        let pos = self.blocks.iter().position(|b| b.id == *id)?;
        Some(self.blocks.remove(pos))
    }

    /// Apply one event. No locking here; the caller holds the write lock.
    pub fn apply_event(&mut self, event: &Event) {
        match event {
            Event::ProfessionalSaved(p) => self.profile = p.clone(),
            Event::LocationSaved(l) => self.upsert_location(l.clone()),
            Event::OfferingSaved(o) => {
                self.offerings.insert(o.id, o.clone());
            }
            Event::AddOnSaved(a) => {
                self.add_ons.insert(a.id, a.clone());
            }
            Event::BlockAdded(b) => self.insert_block(b.clone()),
            Event::BlockRemoved { id, .. } => {
                self.remove_block(id);
            }
            Event::HoldPlaced(h) => self.insert_hold(h.clone()),
            Event::HoldReleased { id, .. } => {
                self.remove_hold(id);
            }
            Event::BookingSaved(b) => self.upsert_booking(b.clone()),
            Event::ApprovalSaved { approval, .. } => {
                self.approvals.insert(approval.booking_id, approval.clone());
            }
            // Openings are kept in the OpeningStore, not per professional.
            Event::OpeningSaved(_) => {}
        }
    }

    /// Events that rebuild this state from nothing. Expired holds are left out.
    pub fn snapshot(&self, now: Ms) -> Vec<Event> {
        let mut events = vec![Event::ProfessionalSaved(self.profile.clone())];
        events.extend(self.locations.iter().cloned().map(Event::LocationSaved));
        events.extend(self.offerings.values().cloned().map(Event::OfferingSaved));
        events.extend(self.add_ons.values().cloned().map(Event::AddOnSaved));
        events.extend(self.blocks.iter().cloned().map(Event::BlockAdded));
        events.extend(
            self.holds
                .iter()
                .filter(|h| h.is_active(now))
                .cloned()
                .map(Event::HoldPlaced),
        );
        events.extend(self.bookings.iter().cloned().map(Event::BookingSaved));
        events.extend(self.approvals.values().map(|a| Event::ApprovalSaved {
            professional_id: self.profile.id,
            approval: a.clone(),
        }));
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(pro: Ulid, primary: bool) -> Location {
        Location {
            id: Ulid::new(),
            professional_id: pro,
            kind: LocationKind::Salon,
            is_bookable: true,
            is_primary: primary,
            time_zone: Some("America/New_York".into()),
            working_hours: None,
            buffer_minutes: 0,
            advance_notice_minutes: 0,
            max_days_ahead: 30,
            step_minutes: 30,
            address: None,
            geo: None,
        }
    }

    fn hold(pro: Ulid, at: Ms, expires_at: Ms) -> Hold {
        Hold {
            id: Ulid::new(),
            offering_id: Ulid::new(),
            professional_id: pro,
            client_id: Ulid::new(),
            scheduled_for: at,
            expires_at,
            duration_minutes: 60,
            location_type: ServiceMode::Salon,
            location_id: Ulid::new(),
            location_time_zone: "UTC".into(),
            location_address_snapshot: None,
        }
    }

    fn block(pro: Ulid, start: Ms, end: Ms) -> CalendarBlock {
        CalendarBlock {
            id: Ulid::new(),
            professional_id: pro,
            span: Span::new(start, end),
            location_id: None,
        }
    }

    #[test]
    fn primary_flag_moves() {
        let pro = Ulid::new();
        let mut st = ProfessionalState::new(pro);
        let a = location(pro, true);
        let b = location(pro, true);
        st.apply_event(&Event::LocationSaved(a.clone()));
        st.apply_event(&Event::LocationSaved(b.clone()));
        assert!(!st.location(&a.id).unwrap().is_primary);
        assert!(st.location(&b.id).unwrap().is_primary);
        // Upsert keeps creation order.
        st.apply_event(&Event::LocationSaved(Location { buffer_minutes: 10, ..a.clone() }));
        assert_eq!(st.locations[0].id, a.id);
        assert_eq!(st.locations[0].buffer_minutes, 10);
    }

    #[test]
    fn holds_stay_sorted_and_release() {
        let pro = Ulid::new();
        let mut st = ProfessionalState::new(pro);
        let late = hold(pro, 3_000, 10);
        let early = hold(pro, 1_000, 10_000);
        st.apply_event(&Event::HoldPlaced(late.clone()));
        st.apply_event(&Event::HoldPlaced(early.clone()));
        assert_eq!(st.holds[0].id, early.id);
        assert_eq!(st.expired_holds(100).map(|h| h.id).collect::<Vec<_>>(), vec![late.id]);
        st.apply_event(&Event::HoldReleased { id: late.id, professional_id: pro });
        assert_eq!(st.holds.len(), 1);
    }

    #[test]
    fn blocks_overlapping_is_half_open() {
        let pro = Ulid::new();
        let mut st = ProfessionalState::new(pro);
        st.apply_event(&Event::BlockAdded(block(pro, 100, 200)));
        st.apply_event(&Event::BlockAdded(block(pro, 450, 600)));
        st.apply_event(&Event::BlockAdded(block(pro, 1_000, 1_100)));
        let hits: Vec<_> = st.blocks_overlapping(&Span::new(200, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn snapshot_drops_expired_holds() {
        let pro = Ulid::new();
        let mut st = ProfessionalState::new(pro);
        st.apply_event(&Event::HoldPlaced(hold(pro, 1_000, 50)));
        st.apply_event(&Event::HoldPlaced(hold(pro, 2_000, 5_000)));
        st.apply_event(&Event::LocationSaved(location(pro, true)));

        let mut rebuilt = ProfessionalState::new(pro);
        for e in st.snapshot(100) {
            rebuilt.apply_event(&e);
        }
        assert_eq!(rebuilt.holds.len(), 1);
        assert_eq!(rebuilt.locations, st.locations);
    }
}
