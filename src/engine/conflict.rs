use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{EngineError, ProfessionalState};

/// Wall clock in Unix milliseconds. Only the request and maintenance layers read it.
pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

pub(crate) fn validate_instant(t: Ms) -> Result<(), EngineError> {
    if !(MIN_VALID_TIMESTAMP_MS..MAX_VALID_TIMESTAMP_MS).contains(&t) {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start >= span.end {
        return Err(EngineError::InvalidInput("start must be before end".into()));
    }
    validate_instant(span.start)?;
    if span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

/// Which holds count as busy for a scan.
#[derive(Debug, Clone, Copy)]
pub(crate) enum HoldFilter {
    /// Every unexpired hold (slot listings).
    All,
    /// Unexpired holds belonging to anyone but this client.
    OtherClients(Ulid),
    /// Holds are not consulted (finalize and reschedule consume one).
    Ignore,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct BusyScan {
    /// Only intervals touching this window are collected.
    pub window: Span,
    pub now: Ms,
    /// Buffer applied to holds.
    pub location_buffer_minutes: u32,
    pub holds: HoldFilter,
    pub exclude_booking: Option<Ulid>,
}

impl BusyScan {
    /// ±24h around `[start, end)`.
    pub fn around(span: Span, now: Ms, location_buffer_minutes: u32, holds: HoldFilter) -> Self {
        Self {
            window: Span::new(span.start - SCAN_PADDING_MS, span.end + SCAN_PADDING_MS),
            now,
            location_buffer_minutes,
            holds,
            exclude_booking: None,
        }
    }

    pub fn excluding_booking(mut self, id: Ulid) -> Self {
        self.exclude_booking = Some(id);
        self
    }
}

/// Busy intervals for a professional: non-cancelled bookings with their own
/// buffer (snapshot, else their location's), unexpired holds with the scanned
/// location's buffer, and calendar blocks as-is.
pub(crate) fn busy_spans(state: &ProfessionalState, scan: &BusyScan) -> Vec<Span> {
    let window = scan.window;
    let mut busy = Vec::new();

    for booking in state.bookings_starting_before(&window) {
        if booking.status == BookingStatus::Cancelled || Some(booking.id) == scan.exclude_booking {
            continue;
        }
        let span = booking.busy_span(state.location_buffer(&booking.location_id));
        if span.end > window.start {
            busy.push(span);
        }
    }

    let hold_counts = |hold: &Hold| match scan.holds {
        HoldFilter::All => true,
        HoldFilter::OtherClients(client) => hold.client_id != client,
        HoldFilter::Ignore => false,
    };
    for hold in state.holds_starting_before(&window) {
        if !hold.is_active(scan.now) || !hold_counts(hold) {
            continue;
        }
        let span = hold.span().extended(minutes(scan.location_buffer_minutes));
        if span.end > window.start {
            busy.push(span);
        }
    }

    busy.extend(state.blocks_overlapping(&window).map(|b| b.span));
    busy.sort_by_key(|s| s.start);
    busy
}

/// Fail with `TIME_NOT_AVAILABLE` if `candidate` (already including its own
/// buffer) overlaps anything busy.
pub(crate) fn check_no_conflict(
    state: &ProfessionalState,
    candidate: &Span,
    scan: &BusyScan,
) -> Result<(), EngineError> {
    if busy_spans(state, scan).iter().any(|busy| busy.overlaps(candidate)) {
        metrics::counter!(crate::observability::SLOT_CONFLICTS_TOTAL).increment(1);
        return Err(EngineError::TimeNotAvailable);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(pro: Ulid, buffer_minutes: u32) -> Location {
        Location {
            id: Ulid::new(),
            professional_id: pro,
            kind: LocationKind::Salon,
            is_bookable: true,
            is_primary: false,
            time_zone: Some("UTC".into()),
            working_hours: None,
            buffer_minutes,
            advance_notice_minutes: 0,
            max_days_ahead: 30,
            step_minutes: 30,
            address: None,
            geo: None,
        }
    }

    fn booking(pro: Ulid, location_id: Ulid, at: Ms, buffer_minutes: Option<u32>) -> Booking {
        Booking {
            id: Ulid::new(),
            client_id: Ulid::new(),
            professional_id: pro,
            offering_id: Ulid::new(),
            service_id: Ulid::new(),
            scheduled_for: at,
            status: BookingStatus::Accepted,
            source: BookingSource::Requested,
            location_type: ServiceMode::Salon,
            location_id,
            location_time_zone: Some("UTC".into()),
            location_address_snapshot: None,
            location_geo_snapshot: None,
            total_duration_minutes: 60,
            buffer_minutes,
            subtotal_cents: 5_000,
            items: vec![],
            session_step: SessionStep::None,
            started_at: None,
            finished_at: None,
            rebook_of_booking_id: None,
            opening_id: None,
            aftercare_token: None,
            created_at: 0,
        }
    }

    const TEN: Ms = 1_772_460_000_000;

    #[test]
    fn uncaptured_buffer_comes_from_the_booking_location() {
        let pro = Ulid::new();
        let mut st = ProfessionalState::new(pro);
        let studio = location(pro, 20);
        let suite = location(pro, 0);
        st.apply_event(&Event::LocationSaved(studio.clone()));
        st.apply_event(&Event::LocationSaved(suite.clone()));
        st.apply_event(&Event::BookingSaved(booking(pro, studio.id, TEN, None)));

        // Scanning from the zero-buffer suite still sees the studio's 20 minutes.
        let scan = BusyScan::around(Span::new(TEN, TEN + HOUR_MS), 0, suite.buffer_minutes, HoldFilter::Ignore);
        assert_eq!(busy_spans(&st, &scan), vec![Span::new(TEN, TEN + HOUR_MS + minutes(20))]);
    }

    #[test]
    fn captured_buffer_wins() {
        let pro = Ulid::new();
        let mut st = ProfessionalState::new(pro);
        let studio = location(pro, 20);
        st.apply_event(&Event::LocationSaved(studio.clone()));
        st.apply_event(&Event::BookingSaved(booking(pro, studio.id, TEN, Some(5))));

        let scan = BusyScan::around(Span::new(TEN, TEN + HOUR_MS), 0, 0, HoldFilter::Ignore);
        assert_eq!(busy_spans(&st, &scan), vec![Span::new(TEN, TEN + HOUR_MS + minutes(5))]);
    }
}
