use chrono_tz::Tz;
use ulid::Ulid;

use crate::model::{Location, ServiceMode};
use crate::tz::parse_time_zone;

use super::EngineError;

/// The authoritative bookable location for a mode.
///
/// A requested id wins if it names a bookable location. Otherwise bookable
/// locations rank by exact kind, then compatible kind, then anything else;
/// ties break on the primary flag and then creation order.
pub fn pick_bookable_location(
    locations: &[Location],
    requested: Option<Ulid>,
    mode: ServiceMode,
) -> Option<&Location> {
    if let Some(id) = requested
        && let Some(found) = locations.iter().find(|l| l.id == id && l.is_bookable)
    {
        return Some(found);
    }
    locations
        .iter()
        .enumerate()
        .filter(|(_, l)| l.is_bookable)
        .min_by_key(|(order, l)| {
            let kind_rank = if l.kind.is_exact_for(mode) {
                0
            } else if l.kind.serves(mode) {
                1
            } else {
                2
            };
            (kind_rank, !l.is_primary, *order)
        })
        .map(|(_, l)| l)
}

/// Where a resolved zone came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeZoneSource {
    Booking,
    Hold,
    Location,
    Professional,
    Fallback,
}

impl TimeZoneSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeZoneSource::Booking => "BOOKING",
            TimeZoneSource::Hold => "HOLD",
            TimeZoneSource::Location => "LOCATION",
            TimeZoneSource::Professional => "PRO",
            TimeZoneSource::Fallback => "FALLBACK",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TimeZoneCandidate<'a> {
    pub source: TimeZoneSource,
    pub value: Option<&'a str>,
}

impl<'a> TimeZoneCandidate<'a> {
    pub fn new(source: TimeZoneSource, value: Option<&'a str>) -> Self {
        Self { source, value }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTimeZone {
    pub tz: Tz,
    pub name: String,
    pub source: TimeZoneSource,
}

/// First candidate (in priority order) that is non-empty and a real IANA zone.
///
/// With `require_valid` the fallback candidate is never used; a missing
/// zone is a hard `TIMEZONE_REQUIRED` instead of a guess.
pub fn resolve_appt_time_zone(
    candidates: &[TimeZoneCandidate<'_>],
    require_valid: bool,
) -> Result<ResolvedTimeZone, EngineError> {
    candidates
        .iter()
        .filter(|c| !(require_valid && c.source == TimeZoneSource::Fallback))
        .find_map(|c| {
            let raw = c.value?.trim();
            parse_time_zone(raw).map(|tz| ResolvedTimeZone {
                tz,
                name: raw.to_string(),
                source: c.source,
            })
        })
        .ok_or(EngineError::TimeZoneRequired)
}

/// Strict zone for a write against `location`. A missing zone is
/// `TIMEZONE_REQUIRED`; one that does not parse is `TIMEZONE_INVALID`.
pub fn location_time_zone(location: &Location) -> Result<ResolvedTimeZone, EngineError> {
    let raw = match location.time_zone.as_deref().map(str::trim) {
        None | Some("") => return Err(EngineError::TimeZoneRequired),
        Some(raw) => raw,
    };
    let tz = parse_time_zone(raw).ok_or_else(|| EngineError::TimeZoneInvalid(raw.to_string()))?;
    Ok(ResolvedTimeZone {
        tz,
        name: raw.to_string(),
        source: TimeZoneSource::Location,
    })
}
