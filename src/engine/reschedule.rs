use ulid::Ulid;

use crate::model::*;
use crate::schedule::ensure_within_working_hours;

use super::conflict::{BusyScan, HoldFilter, check_no_conflict};
use super::locate::{location_time_zone, pick_bookable_location};
use super::{Engine, EngineError};

#[derive(Debug, Clone)]
pub struct RescheduleRequest {
    pub client_id: Ulid,
    pub booking_id: Ulid,
    /// A fresh hold on the new time, created through `create_hold`.
    pub hold_id: Ulid,
}

impl Engine {
    /// Move a booking onto the time reserved by a new hold.
    pub async fn reschedule_booking(&self, req: RescheduleRequest, now: Ms) -> Result<Booking, EngineError> {
        let professional_id = self.owner_of(&req.booking_id, "booking")?;
        match self.professional_for(&req.hold_id) {
            None => return Err(EngineError::HoldNotFound),
            Some(owner) if owner != professional_id => return Err(EngineError::HoldMismatch("professional")),
            Some(_) => {}
        }

        let booking = self
            .with_professional_lock(professional_id, |state, tx| {
                let booking = state
                    .booking(&req.booking_id)
                    .ok_or(EngineError::NotFound("booking", req.booking_id))?;
                if booking.client_id != req.client_id {
                    return Err(EngineError::Forbidden("booking belongs to another client"));
                }
                if booking.status.is_terminal() {
                    return Err(EngineError::NotReschedulable("booking is closed"));
                }
                if booking.started_at.is_some() {
                    return Err(EngineError::NotReschedulable("session already started"));
                }

                let hold = state
                    .hold(&req.hold_id)
                    .filter(|h| h.client_id == req.client_id)
                    .ok_or(EngineError::HoldNotFound)?;
                if !hold.is_active(now) {
                    return Err(EngineError::HoldExpired);
                }
                if hold.professional_id != booking.professional_id {
                    return Err(EngineError::HoldMismatch("professional"));
                }
                if hold.location_type != booking.location_type {
                    return Err(EngineError::HoldMismatch("location type"));
                }

                let location = pick_bookable_location(&state.locations, Some(hold.location_id), hold.location_type)
                    .filter(|l| l.id == hold.location_id)
                    .ok_or(EngineError::LocationNotFound)?;
                let zone = location_time_zone(location)?;

                let span = Span::new(
                    hold.scheduled_for,
                    hold.scheduled_for + minutes(booking.total_duration_minutes.max(1)),
                );
                ensure_within_working_hours(location.working_hours.as_ref(), span.start, span.end, zone.tz)?;

                let candidate = span.extended(minutes(location.buffer_minutes));
                let scan = BusyScan::around(span, now, location.buffer_minutes, HoldFilter::Ignore)
                    .excluding_booking(booking.id);
                check_no_conflict(state, &candidate, &scan)?;

                let moved = Booking {
                    scheduled_for: hold.scheduled_for,
                    location_id: location.id,
                    location_time_zone: Some(zone.name),
                    buffer_minutes: Some(location.buffer_minutes),
                    location_address_snapshot: location
                        .address
                        .clone()
                        .or_else(|| hold.location_address_snapshot.clone()),
                    location_geo_snapshot: location.geo,
                    ..booking.clone()
                };
                tx.stage(Event::BookingSaved(moved.clone()));
                tx.stage(Event::HoldReleased {
                    id: hold.id,
                    professional_id,
                });
                Ok(moved)
            })
            .await?;

        tracing::info!(booking_id = %booking.id, scheduled_for = booking.scheduled_for, "booking rescheduled");
        Ok(booking)
    }
}
