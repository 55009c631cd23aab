//! Last-minute openings live outside the per-professional state: a claim is a
//! compare-and-set that has to be visible to every professional lock at once.

use dashmap::DashMap;
use ulid::Ulid;

use crate::model::{LastMinuteOpening, OpeningStatus};

pub trait OpeningStore: Send + Sync {
    /// Whether this deployment supports openings at all.
    fn enabled(&self) -> bool;

    fn get(&self, id: &Ulid) -> Option<LastMinuteOpening>;

    fn save(&self, opening: LastMinuteOpening);

    /// Atomically flip an opening from ACTIVE to BOOKED. Returns rows affected.
    fn claim(&self, id: &Ulid, booking_id: Ulid) -> u64;

    /// Undo a claim whose booking failed to persist.
    fn release(&self, id: &Ulid);

    fn list_for_professional(&self, professional_id: &Ulid) -> Vec<LastMinuteOpening>;
}

#[derive(Default)]
pub struct InMemoryOpenings {
    rows: DashMap<Ulid, LastMinuteOpening>,
}

impl InMemoryOpenings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OpeningStore for InMemoryOpenings {
    fn enabled(&self) -> bool {
        true
    }

    fn get(&self, id: &Ulid) -> Option<LastMinuteOpening> {
        self.rows.get(id).map(|r| r.value().clone())
    }

    fn save(&self, opening: LastMinuteOpening) {
        self.rows.insert(opening.id, opening);
    }

    fn claim(&self, id: &Ulid, booking_id: Ulid) -> u64 {
        // get_mut holds the shard lock for the whole check-and-flip.
        match self.rows.get_mut(id) {
            Some(mut row) if row.status == OpeningStatus::Active => {
                row.status = OpeningStatus::Booked;
                row.booking_id = Some(booking_id);
                1
            }
            _ => 0,
        }
    }

    fn release(&self, id: &Ulid) {
        if let Some(mut row) = self.rows.get_mut(id)
            && row.status == OpeningStatus::Booked
        {
            row.status = OpeningStatus::Active;
            row.booking_id = None;
        }
    }

    fn list_for_professional(&self, professional_id: &Ulid) -> Vec<LastMinuteOpening> {
        let mut out: Vec<_> = self
            .rows
            .iter()
            .filter(|r| r.professional_id == *professional_id)
            .map(|r| r.value().clone())
            .collect();
        out.sort_by_key(|o| o.span.start);
        out
    }
}

/// Store for deployments without openings. Every claim affects zero rows.
pub struct NoOpenings;

impl OpeningStore for NoOpenings {
    fn enabled(&self) -> bool {
        false
    }

    fn get(&self, _id: &Ulid) -> Option<LastMinuteOpening> {
        None
    }

    fn save(&self, _opening: LastMinuteOpening) {}

    fn claim(&self, _id: &Ulid, _booking_id: Ulid) -> u64 {
        0
    }

    fn release(&self, _id: &Ulid) {}

    fn list_for_professional(&self, _professional_id: &Ulid) -> Vec<LastMinuteOpening> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Span;

    fn opening() -> LastMinuteOpening {
        LastMinuteOpening {
            id: Ulid::new(),
            professional_id: Ulid::new(),
            offering_id: Ulid::new(),
            service_id: Ulid::new(),
            location_id: Ulid::new(),
            time_zone: "America/New_York".into(),
            status: OpeningStatus::Active,
            span: Span::new(1_000, 2_000),
            booking_id: None,
        }
    }

    #[test]
    fn claim_is_single_winner() {
        let store = InMemoryOpenings::new();
        let o = opening();
        store.save(o.clone());
        assert_eq!(store.claim(&o.id, Ulid::new()), 1);
        assert_eq!(store.claim(&o.id, Ulid::new()), 0);
        assert_eq!(store.get(&o.id).unwrap().status, OpeningStatus::Booked);
    }

    #[test]
    fn release_reopens() {
        let store = InMemoryOpenings::new();
        let o = opening();
        store.save(o.clone());
        store.claim(&o.id, Ulid::new());
        store.release(&o.id);
        let row = store.get(&o.id).unwrap();
        assert_eq!(row.status, OpeningStatus::Active);
        assert_eq!(row.booking_id, None);
    }

    #[test]
    fn disabled_store_never_claims() {
        let store = NoOpenings;
        assert!(!store.enabled());
        assert_eq!(store.claim(&Ulid::new(), Ulid::new()), 0);
    }

    #[test]
    fn claim_missing_row_is_zero() {
        assert_eq!(InMemoryOpenings::new().claim(&Ulid::new(), Ulid::new()), 0);
    }
}
