use chrono::{Days, NaiveDate};
use ulid::Ulid;

use crate::identity::Actor;
use crate::limits::*;
use crate::model::*;
use crate::schedule::WorkingHoursViolation;
use crate::tz;

use super::availability::{DaySlotQuery, compute_day_slots, scan_window};
use super::conflict::{BusyScan, HoldFilter, busy_spans};
use super::consultation::ConsultationView;
use super::locate::{
    TimeZoneCandidate, TimeZoneSource, location_time_zone, pick_bookable_location, resolve_appt_time_zone,
};
use super::{Engine, EngineError, ProfessionalState};

#[derive(Debug, Clone)]
pub struct SlotQuery {
    pub offering_id: Ulid,
    pub location_type: ServiceMode,
    pub location_id: Option<Ulid>,
    /// Local calendar date in the location's zone. For summaries, the first day.
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaySlots {
    pub location_id: Ulid,
    pub time_zone: String,
    pub slots: Vec<Ms>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaySummary {
    pub date: NaiveDate,
    pub open_slots: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotSummary {
    pub location_id: Ulid,
    pub time_zone: String,
    pub days: Vec<DaySummary>,
}

/// Booking snapshot with its display zone.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingView {
    pub booking: Booking,
    pub time_zone: String,
    pub time_zone_source: TimeZoneSource,
    pub local_start: String,
}

/// Resolved inputs shared by the day list and the summary.
struct SlotPlan<'a> {
    location: &'a Location,
    zone: super::ResolvedTimeZone,
    duration_minutes: u32,
}

fn plan_slots<'a>(state: &'a ProfessionalState, q: &SlotQuery) -> Result<SlotPlan<'a>, EngineError> {
    let offering = state
        .offering(&q.offering_id)
        .ok_or(EngineError::NotFound("offering", q.offering_id))?;
    let config = offering
        .bookable_config(q.location_type)
        .ok_or(EngineError::OfferingUnavailable)?;
    let location =
        pick_bookable_location(&state.locations, q.location_id, q.location_type).ok_or(EngineError::LocationNotFound)?;
    let zone = location_time_zone(location)?;
    if location.working_hours.is_none() {
        return Err(WorkingHoursViolation::NotConfigured.into());
    }
    Ok(SlotPlan {
        location,
        zone,
        duration_minutes: config.duration_minutes,
    })
}

/// Last local date a client may book, counting from `now`.
fn last_bookable_date(plan: &SlotPlan<'_>, now: Ms) -> NaiveDate {
    tz::local_date(plan.location.booking_horizon(now), plan.zone.tz)
}

fn slots_for_day(
    state: &ProfessionalState,
    plan: &SlotPlan<'_>,
    date: NaiveDate,
    now: Ms,
) -> Result<Vec<Ms>, WorkingHoursViolation> {
    let location = plan.location;
    let scan = BusyScan {
        window: scan_window(date, plan.zone.tz),
        now,
        location_buffer_minutes: location.buffer_minutes,
        holds: HoldFilter::All,
        exclude_booking: None,
    };
    let busy = busy_spans(state, &scan);
    let query = DaySlotQuery {
        date,
        zone: plan.zone.tz,
        schedule: location.working_hours.as_ref(),
        duration_minutes: plan.duration_minutes,
        step_minutes: location.step_minutes,
        lead_time_minutes: location.advance_notice_minutes,
        buffer_minutes: location.buffer_minutes,
    };
    let horizon = location.booking_horizon(now);
    let mut slots = compute_day_slots(&query, &busy, now)?;
    slots.retain(|&start| start <= horizon);
    Ok(slots)
}

impl Engine {
    /// Bookable start instants for one local day.
    ///
    /// Closed days are an error (`OUTSIDE_WORKING_HOURS`); days past the
    /// location's booking horizon are an empty list.
    pub async fn day_slots(&self, q: &SlotQuery, now: Ms) -> Result<DaySlots, EngineError> {
        let professional_id = self.owner_of(&q.offering_id, "offering")?;
        let state = self.read_state(&professional_id).await?;
        let plan = plan_slots(&state, q)?;

        let slots = if q.date > last_bookable_date(&plan, now) {
            Vec::new()
        } else {
            slots_for_day(&state, &plan, q.date, now)?
        };
        Ok(DaySlots {
            location_id: plan.location.id,
            time_zone: plan.zone.name.clone(),
            slots,
        })
    }

    /// Open-slot counts per day for a date picker, starting at `q.date`.
    pub async fn slot_summary(&self, q: &SlotQuery, now: Ms) -> Result<SlotSummary, EngineError> {
        let professional_id = self.owner_of(&q.offering_id, "offering")?;
        let state = self.read_state(&professional_id).await?;
        let plan = plan_slots(&state, q)?;

        let last = last_bookable_date(&plan, now);
        let span_days = SUMMARY_MAX_DAYS.min(plan.location.max_days_ahead);
        let mut days = Vec::with_capacity(span_days as usize);
        for offset in 0..span_days {
            let Some(date) = q.date.checked_add_days(Days::new(offset as u64)) else {
                break;
            };
            if date > last {
                break;
            }
            let open_slots = match slots_for_day(&state, &plan, date, now) {
                Ok(slots) => slots.len(),
                Err(WorkingHoursViolation::NotConfigured) => {
                    return Err(WorkingHoursViolation::NotConfigured.into());
                }
                Err(_) => 0,
            };
            days.push(DaySummary { date, open_slots });
        }
        Ok(SlotSummary {
            location_id: plan.location.id,
            time_zone: plan.zone.name.clone(),
            days,
        })
    }

    /// Booking with its display zone, resolved leniently.
    pub async fn booking_view(
        &self,
        actor: Actor,
        booking_id: Ulid,
        fallback_time_zone: &str,
    ) -> Result<BookingView, EngineError> {
        let professional_id = self.owner_of(&booking_id, "booking")?;
        let state = self.read_state(&professional_id).await?;
        let booking = state
            .booking(&booking_id)
            .ok_or(EngineError::NotFound("booking", booking_id))?;
        ensure_can_read(actor, booking)?;

        let location_zone = state.location(&booking.location_id).and_then(|l| l.time_zone.as_deref());
        let resolved = resolve_appt_time_zone(
            &[
                TimeZoneCandidate::new(TimeZoneSource::Booking, booking.location_time_zone.as_deref()),
                TimeZoneCandidate::new(TimeZoneSource::Location, location_zone),
                TimeZoneCandidate::new(TimeZoneSource::Professional, state.profile.time_zone.as_deref()),
                TimeZoneCandidate::new(TimeZoneSource::Fallback, Some(fallback_time_zone)),
            ],
            false,
        )?;
        Ok(BookingView {
            local_start: tz::format_local(booking.scheduled_for, resolved.tz),
            booking: booking.clone(),
            time_zone: resolved.name,
            time_zone_source: resolved.source,
        })
    }

    /// Professionals holding at least one expired hold, for the reaper.
    pub async fn professionals_with_expired_holds(&self, now: Ms) -> Vec<Ulid> {
        let mut found = Vec::new();
        for id in self.professional_ids() {
            let Some(shared) = self.professional(&id) else { continue };
            if shared.read().await.expired_holds(now).next().is_some() {
                found.push(id);
            }
        }
        found
    }

    pub async fn approval_view(&self, actor: Actor, booking_id: Ulid) -> Result<ConsultationView, EngineError> {
        let professional_id = self.owner_of(&booking_id, "booking")?;
        let state = self.read_state(&professional_id).await?;
        let booking = state
            .booking(&booking_id)
            .ok_or(EngineError::NotFound("booking", booking_id))?;
        ensure_can_read(actor, booking)?;
        let approval = state.approval(&booking_id).ok_or(EngineError::ApprovalNotFound)?;
        Ok(ConsultationView {
            approval: approval.clone(),
            session_step: booking.session_step,
        })
    }
}

fn ensure_can_read(actor: Actor, booking: &Booking) -> Result<(), EngineError> {
    match actor {
        Actor::Client(id) if id == booking.client_id => Ok(()),
        Actor::Professional(id) if id == booking.professional_id => Ok(()),
        Actor::Admin => Ok(()),
        _ => Err(EngineError::Forbidden("booking belongs to someone else")),
    }
}
