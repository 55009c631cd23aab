use std::time::Instant;

use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::schedule::ensure_within_working_hours;

use super::conflict::{BusyScan, HoldFilter, check_no_conflict};
use super::locate::{location_time_zone, pick_bookable_location};
use super::{Engine, EngineError};

#[derive(Debug, Clone)]
pub struct FinalizeRequest {
    pub client_id: Ulid,
    pub offering_id: Ulid,
    pub hold_id: Ulid,
    pub location_type: ServiceMode,
    pub source: BookingSource,
    pub add_on_ids: Vec<Ulid>,
    pub opening_id: Option<Ulid>,
    pub aftercare_token: Option<Ulid>,
    pub rebook_of_booking_id: Option<Ulid>,
}

/// Drop repeated ids, keeping first-seen order.
fn dedup_ids(ids: &[Ulid]) -> Vec<Ulid> {
    let mut out: Vec<Ulid> = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(id) {
            out.push(*id);
        }
    }
    out
}

impl Engine {
    /// Turn a hold into a booking.
    ///
    /// Every check runs against the locked calendar and either the whole
    /// booking (items, opening claim, hold release) commits or nothing does.
    pub async fn finalize_booking(&self, req: FinalizeRequest, now: Ms) -> Result<Booking, EngineError> {
        let start = Instant::now();
        let result = self.finalize_inner(req, now).await;
        metrics::histogram!(crate::observability::FINALIZE_DURATION_SECONDS).record(start.elapsed().as_secs_f64());
        match &result {
            Ok(booking) => {
                metrics::counter!(crate::observability::BOOKINGS_FINALIZED_TOTAL, "source" => booking.source.as_str())
                    .increment(1);
                tracing::info!(
                    booking_id = %booking.id,
                    professional_id = %booking.professional_id,
                    status = booking.status.as_str(),
                    "booking finalized"
                );
            }
            Err(e) => {
                metrics::counter!(crate::observability::FINALIZE_FAILURES_TOTAL, "code" => e.code()).increment(1);
                tracing::debug!(code = e.code(), "finalize rejected: {e}");
            }
        }
        result
    }

    async fn finalize_inner(&self, req: FinalizeRequest, now: Ms) -> Result<Booking, EngineError> {
        let add_on_ids = dedup_ids(&req.add_on_ids);
        if add_on_ids.len() > MAX_ADD_ONS_PER_BOOKING {
            return Err(EngineError::LimitExceeded("too many add-ons"));
        }
        let professional_id = self.owner_of(&req.offering_id, "offering")?;
        match self.professional_for(&req.hold_id) {
            None => return Err(EngineError::HoldNotFound),
            Some(owner) if owner != professional_id => return Err(EngineError::HoldMismatch("professional")),
            Some(_) => {}
        }
        let prior_booking_id = match req.aftercare_token {
            Some(token) => Some(
                self.aftercare_tokens
                    .get(&token)
                    .map(|e| *e.value())
                    .ok_or(EngineError::AftercareInvalid("unknown aftercare token"))?,
            ),
            None => None,
        };
        let openings = self.openings.clone();

        self.with_professional_lock(professional_id, move |state, tx| {
            // 1. The hold itself.
            let hold = state
                .hold(&req.hold_id)
                .filter(|h| h.client_id == req.client_id)
                .ok_or(EngineError::HoldNotFound)?;
            if !hold.is_active(now) {
                return Err(EngineError::HoldExpired);
            }
            if hold.offering_id != req.offering_id {
                return Err(EngineError::HoldMismatch("offering"));
            }
            if hold.professional_id != professional_id {
                return Err(EngineError::HoldMismatch("professional"));
            }
            if hold.location_type != req.location_type {
                return Err(EngineError::HoldMismatch("location type"));
            }

            let offering = state
                .offering(&req.offering_id)
                .ok_or(EngineError::NotFound("offering", req.offering_id))?;
            let config = offering
                .bookable_config(req.location_type)
                .ok_or(EngineError::OfferingUnavailable)?;

            // 2. Location and zone, strictly.
            let location = pick_bookable_location(&state.locations, Some(hold.location_id), req.location_type)
                .filter(|l| l.id == hold.location_id)
                .ok_or(EngineError::LocationNotFound)?;
            let zone = location_time_zone(location)?;

            // 6 (needed before 3). Add-ons change the duration.
            let add_ons: Vec<&AddOn> = add_on_ids
                .iter()
                .filter_map(|id| state.add_ons.get(id))
                .filter(|a| a.is_selectable(offering.id, req.location_type))
                .collect();
            if add_ons.len() != add_on_ids.len() {
                return Err(EngineError::AddOnsInvalid);
            }
            let total_duration = config.duration_minutes + add_ons.iter().map(|a| a.duration_minutes).sum::<u32>();
            if total_duration > MAX_DURATION_MINUTES {
                return Err(EngineError::LimitExceeded("appointment too long"));
            }

            // 3. Working hours for the full duration.
            let span = Span::new(hold.scheduled_for, hold.scheduled_for + minutes(total_duration));
            ensure_within_working_hours(location.working_hours.as_ref(), span.start, span.end, zone.tz)?;

            // 4. Overlap against bookings and blocks.
            let candidate = span.extended(minutes(location.buffer_minutes));
            let scan = BusyScan::around(span, now, location.buffer_minutes, HoldFilter::Ignore);
            check_no_conflict(state, &candidate, &scan)?;
            if state.bookings.len() >= MAX_BOOKINGS_PER_PROFESSIONAL {
                return Err(EngineError::LimitExceeded("too many bookings"));
            }

            let booking_id = Ulid::new();

            // 5. Opening: validated here, claimed atomically at commit.
            let mut source = req.source;
            if let Some(opening_id) = req.opening_id {
                let opening = openings
                    .get(&opening_id)
                    .filter(|o| {
                        o.status == OpeningStatus::Active
                            && o.professional_id == professional_id
                            && o.offering_id == offering.id
                            && o.service_id == offering.service_id
                            && o.span.start == hold.scheduled_for
                    })
                    .ok_or(EngineError::OpeningNotAvailable)?;
                tx.claim_opening(opening_id, booking_id);
                tx.stage(Event::OpeningSaved(LastMinuteOpening {
                    status: OpeningStatus::Booked,
                    booking_id: Some(booking_id),
                    ..opening
                }));
                source = BookingSource::LastMinute;
            }

            // 7. Aftercare rebook.
            let mut rebook_of = req.rebook_of_booking_id;
            if let Some(prior_id) = prior_booking_id {
                let prior = state
                    .booking(&prior_id)
                    .ok_or(EngineError::AftercareInvalid("token is for another professional"))?;
                if prior.status != BookingStatus::Completed {
                    return Err(EngineError::AftercareInvalid("prior booking is not completed"));
                }
                if prior.client_id != req.client_id {
                    return Err(EngineError::AftercareInvalid("prior booking belongs to another client"));
                }
                if prior.offering_id != offering.id && prior.service_id != offering.service_id {
                    return Err(EngineError::AftercareInvalid("prior booking is for a different service"));
                }
                if rebook_of.is_some_and(|id| id != prior.id) {
                    return Err(EngineError::AftercareInvalid("rebook target does not match token"));
                }
                rebook_of = Some(prior.id);
                source = BookingSource::Aftercare;
            } else if let Some(prior_id) = rebook_of {
                let prior = state
                    .booking(&prior_id)
                    .ok_or(EngineError::NotFound("booking", prior_id))?;
                if prior.client_id != req.client_id {
                    return Err(EngineError::Forbidden("rebook target belongs to another client"));
                }
            }

            // 8. Booking with one base item plus one item per add-on.
            let mut items = vec![BookingServiceItem {
                service_id: offering.service_id,
                add_on_id: None,
                price_cents: config.price_cents,
                duration_minutes: config.duration_minutes,
                sort_order: 0,
            }];
            let mut sorted_add_ons = add_ons;
            sorted_add_ons.sort_by_key(|a| (a.sort_order, a.id));
            items.extend(sorted_add_ons.iter().enumerate().map(|(i, a)| BookingServiceItem {
                service_id: a.service_id,
                add_on_id: Some(a.id),
                price_cents: a.price_cents,
                duration_minutes: a.duration_minutes,
                sort_order: i as u32 + 1,
            }));
            let subtotal_cents = items.iter().map(|i| i.price_cents).sum();

            let booking = Booking {
                id: booking_id,
                client_id: req.client_id,
                professional_id,
                offering_id: offering.id,
                service_id: offering.service_id,
                scheduled_for: hold.scheduled_for,
                status: if state.profile.auto_accept {
                    BookingStatus::Accepted
                } else {
                    BookingStatus::Pending
                },
                source,
                location_type: req.location_type,
                location_id: location.id,
                location_time_zone: Some(zone.name),
                location_address_snapshot: location.address.clone().or_else(|| hold.location_address_snapshot.clone()),
                location_geo_snapshot: location.geo,
                total_duration_minutes: total_duration,
                buffer_minutes: Some(location.buffer_minutes),
                subtotal_cents,
                items,
                session_step: SessionStep::None,
                started_at: None,
                finished_at: None,
                rebook_of_booking_id: rebook_of,
                opening_id: req.opening_id,
                aftercare_token: None,
                created_at: now,
            };
            tx.stage(Event::BookingSaved(booking.clone()));

            // 9. The hold is consumed.
            tx.stage(Event::HoldReleased {
                id: hold.id,
                professional_id,
            });
            Ok(booking)
        })
        .await
    }
}
