use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::schedule::ensure_within_working_hours;

use super::conflict::{BusyScan, HoldFilter, check_no_conflict, validate_instant};
use super::locate::{location_time_zone, pick_bookable_location};
use super::{Engine, EngineError};

#[derive(Debug, Clone)]
pub struct HoldRequest {
    pub client_id: Ulid,
    pub offering_id: Ulid,
    pub scheduled_for: Ms,
    pub location_type: ServiceMode,
    pub location_id: Option<Ulid>,
    /// Booking this hold will replace. Its own time does not count as busy.
    pub reschedule_of: Option<Ulid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldDeletion {
    Released,
    AlreadyGone,
}

impl Engine {
    /// Reserve a slot for ten minutes while the client checks out.
    ///
    /// Re-issuing the same request returns the existing hold. Another
    /// client's unexpired hold on the same start is `TIME_HELD`.
    pub async fn create_hold(&self, req: HoldRequest, now: Ms) -> Result<Hold, EngineError> {
        let scheduled_for = truncate_to_minute(req.scheduled_for);
        validate_instant(scheduled_for)?;
        if scheduled_for < now + HOLD_MIN_LEAD_MS {
            return Err(EngineError::TimeTooSoon);
        }
        let professional_id = self.owner_of(&req.offering_id, "offering")?;

        let result = self
            .with_professional_lock(professional_id, |state, tx| {
                let offering = state
                    .offering(&req.offering_id)
                    .ok_or(EngineError::NotFound("offering", req.offering_id))?;
                let config = offering
                    .bookable_config(req.location_type)
                    .ok_or(EngineError::OfferingUnavailable)?;
                let location = pick_bookable_location(&state.locations, req.location_id, req.location_type)
                    .ok_or(EngineError::LocationNotFound)?;
                let zone = location_time_zone(location)?;
                if scheduled_for > location.booking_horizon(now) {
                    return Err(EngineError::OutsideBookingWindow);
                }

                let span = Span::new(scheduled_for, scheduled_for + minutes(config.duration_minutes));
                ensure_within_working_hours(location.working_hours.as_ref(), span.start, span.end, zone.tz)?;

                for expired in state.expired_holds(now) {
                    tx.stage(Event::HoldReleased {
                        id: expired.id,
                        professional_id,
                    });
                }

                let live = || state.holds.iter().filter(|h| h.is_active(now));
                if let Some(existing) = live().find(|h| {
                    h.client_id == req.client_id
                        && h.offering_id == req.offering_id
                        && h.scheduled_for == scheduled_for
                        && h.location_type == req.location_type
                        && h.location_id == location.id
                }) {
                    return Ok(existing.clone());
                }
                if live().any(|h| h.client_id != req.client_id && h.scheduled_for == scheduled_for) {
                    return Err(EngineError::TimeHeld);
                }
                // The client changed their mind about offering or location for this start.
                for stale in live().filter(|h| h.client_id == req.client_id && h.scheduled_for == scheduled_for) {
                    tx.stage(Event::HoldReleased {
                        id: stale.id,
                        professional_id,
                    });
                }

                let candidate = span.extended(minutes(location.buffer_minutes));
                let mut scan = BusyScan::around(
                    span,
                    now,
                    location.buffer_minutes,
                    HoldFilter::OtherClients(req.client_id),
                );
                if let Some(booking_id) = req.reschedule_of {
                    let moving = state
                        .booking(&booking_id)
                        .ok_or(EngineError::NotFound("booking", booking_id))?;
                    if moving.client_id != req.client_id {
                        return Err(EngineError::Forbidden("booking belongs to another client"));
                    }
                    scan = scan.excluding_booking(booking_id);
                }
                check_no_conflict(state, &candidate, &scan)?;

                let hold = Hold {
                    id: Ulid::new(),
                    offering_id: offering.id,
                    professional_id,
                    client_id: req.client_id,
                    scheduled_for,
                    expires_at: now + HOLD_TTL_MS,
                    duration_minutes: config.duration_minutes,
                    location_type: req.location_type,
                    location_id: location.id,
                    location_time_zone: zone.name,
                    location_address_snapshot: location.address.clone(),
                };
                tx.stage(Event::HoldPlaced(hold.clone()));
                Ok(hold)
            })
            .await;

        match &result {
            Ok(hold) => {
                metrics::counter!(crate::observability::HOLDS_CREATED_TOTAL).increment(1);
                tracing::info!(hold_id = %hold.id, %professional_id, scheduled_for = hold.scheduled_for, "hold placed");
            }
            Err(EngineError::TimeHeld | EngineError::TimeNotAvailable) => {
                metrics::counter!(crate::observability::HOLD_CONFLICTS_TOTAL).increment(1);
            }
            Err(_) => {}
        }
        result
    }

    /// Release a hold. Releasing one that is already gone succeeds.
    pub async fn delete_hold(&self, hold_id: Ulid, client_id: Ulid) -> Result<HoldDeletion, EngineError> {
        let Some(professional_id) = self.professional_for(&hold_id) else {
            return Ok(HoldDeletion::AlreadyGone);
        };
        self.with_professional_lock(professional_id, |state, tx| {
            let Some(hold) = state.hold(&hold_id) else {
                return Ok(HoldDeletion::AlreadyGone);
            };
            if hold.client_id != client_id {
                return Err(EngineError::Forbidden("hold belongs to another client"));
            }
            tx.stage(Event::HoldReleased {
                id: hold_id,
                professional_id,
            });
            Ok(HoldDeletion::Released)
        })
        .await
    }

    /// Release every expired hold of one professional. Returns how many went.
    pub async fn sweep_expired_holds(&self, professional_id: Ulid, now: Ms) -> Result<usize, EngineError> {
        self.with_professional_lock(professional_id, |state, tx| {
            let mut released = 0;
            for hold in state.expired_holds(now) {
                tx.stage(Event::HoldReleased {
                    id: hold.id,
                    professional_id,
                });
                released += 1;
            }
            Ok(released)
        })
        .await
    }
}
