use ulid::Ulid;

use crate::geo::{GeoError, with_deadline};
use crate::limits::*;
use crate::model::*;
use crate::schedule::WeeklySchedule;
use crate::tz::{is_valid_iana_time_zone, sanitize_time_zone};

use super::availability::normalize_step_minutes;
use super::conflict::validate_span;
use super::locate::location_time_zone;
use super::{Engine, EngineError};

#[derive(Debug, Clone)]
pub struct LocationInput {
    pub id: Ulid,
    pub kind: LocationKind,
    pub is_bookable: bool,
    pub is_primary: bool,
    pub time_zone: Option<String>,
    /// Raw JSON as submitted from the profile form.
    pub working_hours_json: Option<String>,
    pub buffer_minutes: u32,
    pub advance_notice_minutes: u32,
    pub max_days_ahead: u32,
    pub step_minutes: u32,
    pub address: Option<String>,
    pub geo: Option<GeoPoint>,
    pub place_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OfferingInput {
    pub id: Ulid,
    pub service_id: Ulid,
    pub is_active: bool,
    pub salon: Option<ModeConfig>,
    pub mobile: Option<ModeConfig>,
}

#[derive(Debug, Clone)]
pub struct AddOnInput {
    pub id: Ulid,
    pub offering_id: Ulid,
    pub service_id: Ulid,
    pub is_active: bool,
    pub service_is_active: bool,
    pub add_on_eligible: bool,
    pub mode: Option<ServiceMode>,
    pub price_cents: i64,
    pub duration_minutes: u32,
    pub sort_order: u32,
}

#[derive(Debug, Clone)]
pub struct BlockInput {
    pub id: Ulid,
    pub starts_at: Ms,
    pub ends_at: Ms,
    pub location_id: Option<Ulid>,
}

#[derive(Debug, Clone)]
pub struct OpeningInput {
    pub id: Ulid,
    pub offering_id: Ulid,
    pub location_id: Ulid,
    pub start_at: Ms,
    pub end_at: Ms,
}

fn validate_mode_config(config: &ModeConfig) -> Result<(), EngineError> {
    if config.price_cents < 0 {
        return Err(EngineError::InvalidInput("price must not be negative".into()));
    }
    if config.duration_minutes == 0 || config.duration_minutes > MAX_DURATION_MINUTES {
        return Err(EngineError::InvalidInput(format!(
            "duration must be between 1 and {MAX_DURATION_MINUTES} minutes"
        )));
    }
    Ok(())
}

fn check_range(name: &str, value: u32, min: u32, max: u32) -> Result<(), EngineError> {
    if value < min || value > max {
        return Err(EngineError::InvalidInput(format!("{name} must be between {min} and {max}")));
    }
    Ok(())
}

impl Engine {
    /// Entity ids are global. Reusing one that belongs to another professional is forbidden.
    fn check_entity_owner(&self, id: &Ulid, professional_id: Ulid) -> Result<(), EngineError> {
        match self.professional_for(id) {
            Some(owner) if owner != professional_id => {
                Err(EngineError::Forbidden("id belongs to another professional"))
            }
            _ => Ok(()),
        }
    }

    pub async fn upsert_professional(
        &self,
        id: Ulid,
        time_zone: Option<String>,
        auto_accept: bool,
    ) -> Result<Professional, EngineError> {
        let time_zone = match time_zone.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) if is_valid_iana_time_zone(raw) => Some(raw.to_string()),
            Some(raw) => return Err(EngineError::TimeZoneInvalid(raw.to_string())),
        };
        let profile = Professional {
            id,
            time_zone,
            auto_accept,
        };

        if self.professional(&id).is_none() {
            let _admission = self.admission.lock().await;
            if self.professionals.len() >= MAX_PROFESSIONALS {
                return Err(EngineError::LimitExceeded("too many professionals"));
            }
            let created = self.ensure_professional(id);
            let saved = profile.clone();
            let result = self
                .with_professional_lock(id, move |_, tx| {
                    tx.stage(Event::ProfessionalSaved(saved));
                    Ok(())
                })
                .await;
            if result.is_err() && created {
                self.professionals.remove(&id);
                metrics::gauge!(crate::observability::PROFESSIONALS_ACTIVE).decrement(1.0);
            }
            result?;
        } else {
            let saved = profile.clone();
            self.with_professional_lock(id, move |_, tx| {
                tx.stage(Event::ProfessionalSaved(saved));
                Ok(())
            })
            .await?;
        }
        tracing::info!(professional_id = %id, "professional saved");
        Ok(profile)
    }

    /// Validate and store a location. Working hours are parsed once here so
    /// every later read sees a typed schedule.
    pub async fn upsert_location(
        &self,
        professional_id: Ulid,
        input: LocationInput,
    ) -> Result<Location, EngineError> {
        check_range("buffer_minutes", input.buffer_minutes, 0, MAX_BUFFER_MINUTES)?;
        check_range(
            "advance_notice_minutes",
            input.advance_notice_minutes,
            0,
            MAX_ADVANCE_NOTICE_MINUTES,
        )?;
        check_range("max_days_ahead", input.max_days_ahead, MIN_MAX_DAYS_AHEAD, MAX_MAX_DAYS_AHEAD)?;
        if input.address.as_ref().is_some_and(|a| a.len() > MAX_ADDRESS_LEN) {
            return Err(EngineError::LimitExceeded("address too long"));
        }
        if input.geo.is_some_and(|g| !g.is_valid()) {
            return Err(EngineError::InvalidInput("coordinates out of range".into()));
        }

        let working_hours = match input.working_hours_json.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(
                WeeklySchedule::from_json(raw)
                    .map_err(|e| EngineError::InvalidInput(e.to_string()))?,
            ),
        };

        let mut time_zone = match input.time_zone.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(
                sanitize_time_zone(Some(raw)).ok_or_else(|| EngineError::TimeZoneInvalid(raw.to_string()))?,
            ),
        };

        let mut address = input.address.clone();
        let mut geo = input.geo;
        if geo.is_none()
            && let Some(place_id) = input.place_id.as_deref().filter(|p| !p.trim().is_empty())
        {
            let details = with_deadline(self.geo.place_details(place_id)).await?;
            if address.is_none() {
                address = Some(details.formatted_address.chars().take(MAX_ADDRESS_LEN).collect());
            }
            geo = Some(details.point);
        }
        if time_zone.is_none()
            && let Some(point) = geo
        {
            match with_deadline(self.geo.time_zone_at(point)).await {
                Ok(found) => {
                    time_zone = Some(sanitize_time_zone(Some(&found)).ok_or(EngineError::TimeZoneInvalid(found))?);
                }
                Err(GeoError::Unsupported) => {
                    tracing::warn!(location_id = %input.id, "no mapping provider; location saved without a time zone");
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.check_entity_owner(&input.id, professional_id)?;
        let location = Location {
            id: input.id,
            professional_id,
            kind: input.kind,
            is_bookable: input.is_bookable,
            is_primary: input.is_primary,
            time_zone,
            working_hours,
            buffer_minutes: input.buffer_minutes,
            advance_notice_minutes: input.advance_notice_minutes,
            max_days_ahead: input.max_days_ahead,
            step_minutes: normalize_step_minutes(input.step_minutes),
            address,
            geo,
        };

        let saved = location.clone();
        self.with_professional_lock(professional_id, move |state, tx| {
            if state.location(&saved.id).is_none() && state.locations.len() >= MAX_LOCATIONS_PER_PROFESSIONAL {
                return Err(EngineError::LimitExceeded("too many locations"));
            }
            tx.stage(Event::LocationSaved(saved));
            Ok(())
        })
        .await?;
        tracing::info!(location_id = %location.id, %professional_id, "location saved");
        Ok(location)
    }

    pub async fn upsert_offering(
        &self,
        professional_id: Ulid,
        input: OfferingInput,
    ) -> Result<Offering, EngineError> {
        for config in input.salon.iter().chain(input.mobile.iter()) {
            validate_mode_config(config)?;
        }
        self.check_entity_owner(&input.id, professional_id)?;
        let offering = Offering {
            id: input.id,
            professional_id,
            service_id: input.service_id,
            is_active: input.is_active,
            salon: input.salon,
            mobile: input.mobile,
        };
        let saved = offering.clone();
        self.with_professional_lock(professional_id, move |state, tx| {
            if state.offering(&saved.id).is_none() && state.offerings.len() >= MAX_OFFERINGS_PER_PROFESSIONAL {
                return Err(EngineError::LimitExceeded("too many offerings"));
            }
            tx.stage(Event::OfferingSaved(saved));
            Ok(())
        })
        .await?;
        Ok(offering)
    }

    pub async fn upsert_add_on(&self, professional_id: Ulid, input: AddOnInput) -> Result<AddOn, EngineError> {
        validate_mode_config(&ModeConfig {
            price_cents: input.price_cents,
            duration_minutes: input.duration_minutes,
            is_active: input.is_active,
        })?;
        self.check_entity_owner(&input.id, professional_id)?;
        let add_on = AddOn {
            id: input.id,
            professional_id,
            offering_id: input.offering_id,
            service_id: input.service_id,
            is_active: input.is_active,
            service_is_active: input.service_is_active,
            add_on_eligible: input.add_on_eligible,
            mode: input.mode,
            price_cents: input.price_cents,
            duration_minutes: input.duration_minutes,
            sort_order: input.sort_order,
        };
        let saved = add_on.clone();
        self.with_professional_lock(professional_id, move |state, tx| {
            if state.offering(&saved.offering_id).is_none() {
                return Err(EngineError::NotFound("offering", saved.offering_id));
            }
            tx.stage(Event::AddOnSaved(saved));
            Ok(())
        })
        .await?;
        Ok(add_on)
    }

    pub async fn add_calendar_block(
        &self,
        professional_id: Ulid,
        input: BlockInput,
    ) -> Result<CalendarBlock, EngineError> {
        if input.starts_at >= input.ends_at {
            return Err(EngineError::InvalidInput("block must end after it starts".into()));
        }
        let span = Span::new(input.starts_at, input.ends_at);
        validate_span(&span)?;
        self.check_entity_owner(&input.id, professional_id)?;
        let block = CalendarBlock {
            id: input.id,
            professional_id,
            span,
            location_id: input.location_id,
        };
        let saved = block.clone();
        self.with_professional_lock(professional_id, move |state, tx| {
            if let Some(location_id) = saved.location_id
                && state.location(&location_id).is_none()
            {
                return Err(EngineError::NotFound("location", location_id));
            }
            tx.stage(Event::BlockAdded(saved));
            Ok(())
        })
        .await?;
        Ok(block)
    }

    pub async fn remove_calendar_block(&self, professional_id: Ulid, block_id: Ulid) -> Result<(), EngineError> {
        self.with_professional_lock(professional_id, move |state, tx| {
            if !state.blocks.iter().any(|b| b.id == block_id) {
                return Err(EngineError::NotFound("calendar block", block_id));
            }
            tx.stage(Event::BlockRemoved {
                id: block_id,
                professional_id,
            });
            Ok(())
        })
        .await
    }

    /// Advertise a last-minute opening for one of the professional's offerings.
    pub async fn publish_opening(
        &self,
        professional_id: Ulid,
        input: OpeningInput,
        now: Ms,
    ) -> Result<LastMinuteOpening, EngineError> {
        if !self.openings.enabled() {
            return Err(EngineError::OpeningsUnsupported);
        }
        if input.start_at >= input.end_at {
            return Err(EngineError::InvalidInput("opening must end after it starts".into()));
        }
        let span = Span::new(input.start_at, input.end_at);
        validate_span(&span)?;
        if span.start <= now {
            return Err(EngineError::TimeTooSoon);
        }
        self.check_entity_owner(&input.id, professional_id)?;
        if self.openings.get(&input.id).is_some_and(|o| o.status != OpeningStatus::Active) {
            return Err(EngineError::OpeningNotAvailable);
        }

        self.with_professional_lock(professional_id, move |state, tx| {
            let offering = state
                .offering(&input.offering_id)
                .ok_or(EngineError::NotFound("offering", input.offering_id))?;
            let location = state
                .location(&input.location_id)
                .filter(|l| l.is_bookable)
                .ok_or(EngineError::LocationNotFound)?;
            let zone = location_time_zone(location)?;
            let opening = LastMinuteOpening {
                id: input.id,
                professional_id,
                offering_id: offering.id,
                service_id: offering.service_id,
                location_id: location.id,
                time_zone: zone.name,
                status: OpeningStatus::Active,
                span,
                booking_id: None,
            };
            tx.stage(Event::OpeningSaved(opening.clone()));
            Ok(opening)
        })
        .await
    }
}
