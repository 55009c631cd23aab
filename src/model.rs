use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::schedule::WeeklySchedule;

/// Unix milliseconds. The only instant type in the engine.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;
pub const DAY_MS: Ms = 24 * HOUR_MS;

pub fn minutes(n: u32) -> Ms {
    n as Ms * MINUTE_MS
}

/// Floor an instant to the start of its minute.
pub fn truncate_to_minute(t: Ms) -> Ms {
    t - t.rem_euclid(MINUTE_MS)
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Same start, end pushed out by `extra` (buffer time after the appointment).
    pub fn extended(&self, extra: Ms) -> Span {
        Span {
            start: self.start,
            end: self.end + extra.max(0),
        }
    }
}

// ── Enumerations ─────────────────────────────────────────────────

/// How a service is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceMode {
    Salon,
    Mobile,
}

impl ServiceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceMode::Salon => "SALON",
            ServiceMode::Mobile => "MOBILE",
        }
    }
}

impl FromStr for ServiceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SALON" => Ok(ServiceMode::Salon),
            "MOBILE" => Ok(ServiceMode::Mobile),
            other => Err(format!("unknown service mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocationKind {
    Salon,
    Suite,
    MobileBase,
}

impl LocationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationKind::Salon => "SALON",
            LocationKind::Suite => "SUITE",
            LocationKind::MobileBase => "MOBILE_BASE",
        }
    }

    /// The canonical location kind for a mode.
    pub fn is_exact_for(&self, mode: ServiceMode) -> bool {
        matches!(
            (self, mode),
            (LocationKind::Salon, ServiceMode::Salon) | (LocationKind::MobileBase, ServiceMode::Mobile)
        )
    }

    /// Any kind the mode can be served from. Suites host in-person work too.
    pub fn serves(&self, mode: ServiceMode) -> bool {
        match mode {
            ServiceMode::Salon => matches!(self, LocationKind::Salon | LocationKind::Suite),
            ServiceMode::Mobile => matches!(self, LocationKind::MobileBase),
        }
    }
}

impl FromStr for LocationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SALON" => Ok(LocationKind::Salon),
            "SUITE" => Ok(LocationKind::Suite),
            "MOBILE_BASE" => Ok(LocationKind::MobileBase),
            other => Err(format!("unknown location type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Accepted,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Accepted => "ACCEPTED",
            BookingStatus::Completed => "COMPLETED",
            BookingStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingSource {
    Requested,
    Discovery,
    Aftercare,
    LastMinute,
}

impl BookingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingSource::Requested => "REQUESTED",
            BookingSource::Discovery => "DISCOVERY",
            BookingSource::Aftercare => "AFTERCARE",
            BookingSource::LastMinute => "LAST_MINUTE",
        }
    }
}

impl FromStr for BookingSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "REQUESTED" => Ok(BookingSource::Requested),
            "DISCOVERY" => Ok(BookingSource::Discovery),
            "AFTERCARE" => Ok(BookingSource::Aftercare),
            "LAST_MINUTE" => Ok(BookingSource::LastMinute),
            other => Err(format!("unknown booking source: {other}")),
        }
    }
}

/// In-session progress marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStep {
    None,
    Consultation,
    ConsultationPendingClient,
    BeforePhotos,
    Done,
}

impl SessionStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStep::None => "NONE",
            SessionStep::Consultation => "CONSULTATION",
            SessionStep::ConsultationPendingClient => "CONSULTATION_PENDING_CLIENT",
            SessionStep::BeforePhotos => "BEFORE_PHOTOS",
            SessionStep::Done => "DONE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "PENDING",
            ApprovalStatus::Approved => "APPROVED",
            ApprovalStatus::Rejected => "REJECTED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpeningStatus {
    Active,
    Booked,
    Expired,
    Cancelled,
}

impl OpeningStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpeningStatus::Active => "ACTIVE",
            OpeningStatus::Booked => "BOOKED",
            OpeningStatus::Expired => "EXPIRED",
            OpeningStatus::Cancelled => "CANCELLED",
        }
    }
}

// ── Catalog ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Professional {
    pub id: Ulid,
    /// Profile zone. Display fallback only, never used to validate writes.
    pub time_zone: Option<String>,
    pub auto_accept: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: Ulid,
    pub professional_id: Ulid,
    pub kind: LocationKind,
    pub is_bookable: bool,
    pub is_primary: bool,
    pub time_zone: Option<String>,
    pub working_hours: Option<WeeklySchedule>,
    pub buffer_minutes: u32,
    pub advance_notice_minutes: u32,
    pub max_days_ahead: u32,
    pub step_minutes: u32,
    pub address: Option<String>,
    pub geo: Option<GeoPoint>,
}

impl Location {
    /// Latest start a client may book, counting from `now`.
    pub fn booking_horizon(&self, now: Ms) -> Ms {
        now + minutes(self.max_days_ahead.saturating_mul(24 * 60))
    }
}

/// Price and duration for one delivery mode of an offering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeConfig {
    pub price_cents: i64,
    pub duration_minutes: u32,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offering {
    pub id: Ulid,
    pub professional_id: Ulid,
    pub service_id: Ulid,
    pub is_active: bool,
    pub salon: Option<ModeConfig>,
    pub mobile: Option<ModeConfig>,
}

impl Offering {
    /// The mode's pricing, if the offering is active and offers that mode.
    pub fn bookable_config(&self, mode: ServiceMode) -> Option<&ModeConfig> {
        if !self.is_active {
            return None;
        }
        let config = match mode {
            ServiceMode::Salon => self.salon.as_ref(),
            ServiceMode::Mobile => self.mobile.as_ref(),
        }?;
        (config.is_active && config.duration_minutes > 0).then_some(config)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddOn {
    pub id: Ulid,
    pub professional_id: Ulid,
    pub offering_id: Ulid,
    pub service_id: Ulid,
    pub is_active: bool,
    pub service_is_active: bool,
    pub add_on_eligible: bool,
    /// Restricts the add-on to one delivery mode. `None` means both.
    pub mode: Option<ServiceMode>,
    pub price_cents: i64,
    pub duration_minutes: u32,
    pub sort_order: u32,
}

impl AddOn {
    pub fn is_selectable(&self, offering_id: Ulid, mode: ServiceMode) -> bool {
        self.offering_id == offering_id
            && self.is_active
            && self.service_is_active
            && self.add_on_eligible
            && self.mode.is_none_or(|m| m == mode)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarBlock {
    pub id: Ulid,
    pub professional_id: Ulid,
    pub span: Span,
    pub location_id: Option<Ulid>,
}

// ── Reservations ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hold {
    pub id: Ulid,
    pub offering_id: Ulid,
    pub professional_id: Ulid,
    pub client_id: Ulid,
    pub scheduled_for: Ms,
    pub expires_at: Ms,
    pub duration_minutes: u32,
    pub location_type: ServiceMode,
    pub location_id: Ulid,
    pub location_time_zone: String,
    pub location_address_snapshot: Option<String>,
}

impl Hold {
    pub fn is_active(&self, now: Ms) -> bool {
        self.expires_at > now
    }

    pub fn span(&self) -> Span {
        Span::new(self.scheduled_for, self.scheduled_for + minutes(self.duration_minutes))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingServiceItem {
    pub service_id: Ulid,
    pub add_on_id: Option<Ulid>,
    pub price_cents: i64,
    pub duration_minutes: u32,
    pub sort_order: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub client_id: Ulid,
    pub professional_id: Ulid,
    pub offering_id: Ulid,
    pub service_id: Ulid,
    pub scheduled_for: Ms,
    pub status: BookingStatus,
    pub source: BookingSource,
    pub location_type: ServiceMode,
    pub location_id: Ulid,
    pub location_time_zone: Option<String>,
    pub location_address_snapshot: Option<String>,
    pub location_geo_snapshot: Option<GeoPoint>,
    pub total_duration_minutes: u32,
    /// Buffer captured when the booking was placed. Older rows may lack it.
    pub buffer_minutes: Option<u32>,
    pub subtotal_cents: i64,
    pub items: Vec<BookingServiceItem>,
    pub session_step: SessionStep,
    pub started_at: Option<Ms>,
    pub finished_at: Option<Ms>,
    pub rebook_of_booking_id: Option<Ulid>,
    pub opening_id: Option<Ulid>,
    pub aftercare_token: Option<Ulid>,
    pub created_at: Ms,
}

impl Booking {
    pub fn span(&self) -> Span {
        Span::new(
            self.scheduled_for,
            self.scheduled_for + minutes(self.total_duration_minutes.max(1)),
        )
    }

    /// Occupied time including trailing buffer. Falls back to the location's
    /// current buffer when the booking predates buffer capture.
    pub fn busy_span(&self, fallback_buffer_minutes: u32) -> Span {
        let buffer = self.buffer_minutes.unwrap_or(fallback_buffer_minutes);
        self.span().extended(minutes(buffer))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedService {
    pub service_id: Option<Ulid>,
    pub name: String,
    pub price_cents: i64,
    pub duration_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsultationApproval {
    pub booking_id: Ulid,
    pub status: ApprovalStatus,
    pub proposed_services: Vec<ProposedService>,
    pub proposed_total_cents: i64,
    pub notes: Option<String>,
    pub proposed_at: Ms,
    pub approved_at: Option<Ms>,
    pub rejected_at: Option<Ms>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMinuteOpening {
    pub id: Ulid,
    pub professional_id: Ulid,
    pub offering_id: Ulid,
    pub service_id: Ulid,
    pub location_id: Ulid,
    pub time_zone: String,
    pub status: OpeningStatus,
    pub span: Span,
    pub booking_id: Option<Ulid>,
}

// ── WAL events ───────────────────────────────────────────────────

/// State-carrying events. A WAL record is one transaction: `Vec<Event>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    ProfessionalSaved(Professional),
    LocationSaved(Location),
    OfferingSaved(Offering),
    AddOnSaved(AddOn),
    BlockAdded(CalendarBlock),
    BlockRemoved { id: Ulid, professional_id: Ulid },
    HoldPlaced(Hold),
    HoldReleased { id: Ulid, professional_id: Ulid },
    BookingSaved(Booking),
    ApprovalSaved { professional_id: Ulid, approval: ConsultationApproval },
    OpeningSaved(LastMinuteOpening),
}

impl Event {
    pub fn professional_id(&self) -> Ulid {
        match self {
            Event::ProfessionalSaved(p) => p.id,
            Event::LocationSaved(l) => l.professional_id,
            Event::OfferingSaved(o) => o.professional_id,
            Event::AddOnSaved(a) => a.professional_id,
            Event::BlockAdded(b) => b.professional_id,
            Event::HoldPlaced(h) => h.professional_id,
            Event::BookingSaved(b) => b.professional_id,
            Event::OpeningSaved(o) => o.professional_id,
            Event::BlockRemoved { professional_id, .. }
            | Event::HoldReleased { professional_id, .. }
            | Event::ApprovalSaved { professional_id, .. } => *professional_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_overlap_is_half_open() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn span_extended_only_moves_end() {
        let s = Span::new(1_000, 2_000).extended(500);
        assert_eq!(s, Span::new(1_000, 2_500));
        assert_eq!(Span::new(0, 10).extended(-5), Span::new(0, 10));
    }

    #[test]
    fn truncate_floors_to_minute() {
        assert_eq!(truncate_to_minute(MINUTE_MS * 5 + 59_999), MINUTE_MS * 5);
        assert_eq!(truncate_to_minute(MINUTE_MS * 5), MINUTE_MS * 5);
    }

    #[test]
    fn location_kind_compatibility() {
        assert!(LocationKind::Salon.is_exact_for(ServiceMode::Salon));
        assert!(!LocationKind::Suite.is_exact_for(ServiceMode::Salon));
        assert!(LocationKind::Suite.serves(ServiceMode::Salon));
        assert!(!LocationKind::Suite.serves(ServiceMode::Mobile));
        assert!(LocationKind::MobileBase.is_exact_for(ServiceMode::Mobile));
    }

    #[test]
    fn offering_config_requires_active_mode() {
        let mut offering = Offering {
            id: Ulid::new(),
            professional_id: Ulid::new(),
            service_id: Ulid::new(),
            is_active: true,
            salon: Some(ModeConfig { price_cents: 5_000, duration_minutes: 60, is_active: true }),
            mobile: Some(ModeConfig { price_cents: 7_000, duration_minutes: 60, is_active: false }),
        };
        assert!(offering.bookable_config(ServiceMode::Salon).is_some());
        assert!(offering.bookable_config(ServiceMode::Mobile).is_none());
        offering.is_active = false;
        assert!(offering.bookable_config(ServiceMode::Salon).is_none());
    }

    #[test]
    fn booking_busy_span_prefers_captured_buffer() {
        let booking = Booking {
            id: Ulid::new(),
            client_id: Ulid::new(),
            professional_id: Ulid::new(),
            offering_id: Ulid::new(),
            service_id: Ulid::new(),
            scheduled_for: 0,
            status: BookingStatus::Accepted,
            source: BookingSource::Requested,
            location_type: ServiceMode::Salon,
            location_id: Ulid::new(),
            location_time_zone: None,
            location_address_snapshot: None,
            location_geo_snapshot: None,
            total_duration_minutes: 60,
            buffer_minutes: Some(15),
            subtotal_cents: 0,
            items: vec![],
            session_step: SessionStep::None,
            started_at: None,
            finished_at: None,
            rebook_of_booking_id: None,
            opening_id: None,
            aftercare_token: None,
            created_at: 0,
        };
        assert_eq!(booking.busy_span(30).end, minutes(75));
        let legacy = Booking { buffer_minutes: None, ..booking };
        assert_eq!(legacy.busy_span(30).end, minutes(90));
    }

    #[test]
    fn event_survives_bincode() {
        let event = Event::HoldReleased { id: Ulid::new(), professional_id: Ulid::new() };
        let bytes = bincode::serialize(&vec![event.clone()]).unwrap();
        let decoded: Vec<Event> = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, vec![event]);
    }
}
