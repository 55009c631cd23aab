use ulid::Ulid;

use crate::geo::GeoError;
use crate::identity::AuthFailure;
use crate::schedule::WorkingHoursViolation;

/// Failure category. Callers decide retry and status mapping from this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Configuration,
    Conflict,
    State,
    Forbidden,
    NotFound,
    External,
    Internal,
}

#[derive(Debug)]
pub enum EngineError {
    InvalidInput(String),
    LimitExceeded(&'static str),
    NotFound(&'static str, Ulid),
    Forbidden(&'static str),
    Unauthorized(AuthFailure),
    OfferingUnavailable,
    TimeTooSoon,
    OutsideBookingWindow,
    LocationNotFound,
    TimeZoneRequired,
    TimeZoneInvalid(String),
    WorkingHours(WorkingHoursViolation),
    HoldNotFound,
    HoldExpired,
    HoldMismatch(&'static str),
    TimeHeld,
    TimeNotAvailable,
    OpeningNotAvailable,
    OpeningsUnsupported,
    AddOnsInvalid,
    AftercareInvalid(&'static str),
    NotReschedulable(&'static str),
    InvalidTransition(&'static str),
    ApprovalNotFound,
    External(GeoError),
    WalError(String),
}

impl EngineError {
    /// Stable machine-readable code. Callers branch on this, never on the message.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidInput(_) => "INVALID_INPUT",
            EngineError::LimitExceeded(_) => "LIMIT_EXCEEDED",
            EngineError::NotFound(..) => "NOT_FOUND",
            EngineError::Forbidden(_) => "FORBIDDEN",
            EngineError::Unauthorized(_) => "UNAUTHORIZED",
            EngineError::OfferingUnavailable => "OFFERING_NOT_AVAILABLE",
            EngineError::TimeTooSoon => "TIME_TOO_SOON",
            EngineError::OutsideBookingWindow => "OUTSIDE_BOOKING_WINDOW",
            EngineError::LocationNotFound => "LOCATION_NOT_FOUND",
            EngineError::TimeZoneRequired => "TIMEZONE_REQUIRED",
            EngineError::TimeZoneInvalid(_) => "TIMEZONE_INVALID",
            EngineError::WorkingHours(v) => v.code(),
            EngineError::HoldNotFound => "HOLD_NOT_FOUND",
            EngineError::HoldExpired => "HOLD_EXPIRED",
            EngineError::HoldMismatch(_) => "HOLD_MISMATCH",
            EngineError::TimeHeld => "TIME_HELD",
            EngineError::TimeNotAvailable => "TIME_NOT_AVAILABLE",
            EngineError::OpeningNotAvailable => "OPENING_NOT_AVAILABLE",
            EngineError::OpeningsUnsupported => "OPENINGS_UNSUPPORTED",
            EngineError::AddOnsInvalid => "ADDONS_INVALID",
            EngineError::AftercareInvalid(_) => "AFTERCARE_INVALID",
            EngineError::NotReschedulable(_) => "BOOKING_NOT_RESCHEDULABLE",
            EngineError::InvalidTransition(_) => "INVALID_STATE",
            EngineError::ApprovalNotFound => "APPROVAL_NOT_FOUND",
            EngineError::External(e) => e.code(),
            EngineError::WalError(_) => "STORAGE_ERROR",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidInput(_)
            | EngineError::LimitExceeded(_)
            | EngineError::TimeTooSoon
            | EngineError::OutsideBookingWindow
            | EngineError::TimeZoneInvalid(_)
            | EngineError::AddOnsInvalid
            | EngineError::AftercareInvalid(_)
            | EngineError::HoldMismatch(_) => ErrorKind::Validation,
            EngineError::TimeZoneRequired
            | EngineError::LocationNotFound
            | EngineError::OfferingUnavailable
            | EngineError::OpeningsUnsupported => ErrorKind::Configuration,
            EngineError::WorkingHours(v) => match v {
                WorkingHoursViolation::NotConfigured | WorkingHoursViolation::InvalidWindow => {
                    ErrorKind::Configuration
                }
                _ => ErrorKind::Validation,
            },
            EngineError::TimeHeld | EngineError::TimeNotAvailable | EngineError::OpeningNotAvailable => {
                ErrorKind::Conflict
            }
            EngineError::HoldExpired
            | EngineError::NotReschedulable(_)
            | EngineError::InvalidTransition(_) => ErrorKind::State,
            EngineError::Forbidden(_) | EngineError::Unauthorized(_) => ErrorKind::Forbidden,
            EngineError::NotFound(..) | EngineError::HoldNotFound | EngineError::ApprovalNotFound => {
                ErrorKind::NotFound
            }
            EngineError::External(_) => ErrorKind::External,
            EngineError::WalError(_) => ErrorKind::Internal,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::NotFound(what, id) => write!(f, "{what} not found: {id}"),
            EngineError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            EngineError::Unauthorized(e) => write!(f, "{e}"),
            EngineError::OfferingUnavailable => {
                write!(f, "offering is inactive or does not support that location type")
            }
            EngineError::TimeTooSoon => write!(f, "that time is too soon to book"),
            EngineError::OutsideBookingWindow => write!(f, "that time is outside the booking window"),
            EngineError::LocationNotFound => write!(f, "no bookable location for this professional"),
            EngineError::TimeZoneRequired => {
                write!(f, "this location has no valid time zone; the professional must set one")
            }
            EngineError::TimeZoneInvalid(tz) => write!(f, "not a valid IANA time zone: {tz}"),
            EngineError::WorkingHours(v) => write!(f, "{v}"),
            EngineError::HoldNotFound => write!(f, "hold not found"),
            EngineError::HoldExpired => write!(f, "hold has expired"),
            EngineError::HoldMismatch(what) => write!(f, "hold does not match request: {what}"),
            EngineError::TimeHeld => write!(f, "that time is being held by someone else"),
            EngineError::TimeNotAvailable => write!(f, "that time is no longer available"),
            EngineError::OpeningNotAvailable => write!(f, "that opening is no longer available"),
            EngineError::OpeningsUnsupported => write!(f, "openings are not enabled"),
            EngineError::AddOnsInvalid => write!(f, "one or more add-ons are not available"),
            EngineError::AftercareInvalid(msg) => write!(f, "aftercare rebook rejected: {msg}"),
            EngineError::NotReschedulable(msg) => write!(f, "booking cannot be rescheduled: {msg}"),
            EngineError::InvalidTransition(msg) => write!(f, "invalid state: {msg}"),
            EngineError::ApprovalNotFound => write!(f, "no consultation proposal for this booking"),
            EngineError::External(e) => write!(f, "{e}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<WorkingHoursViolation> for EngineError {
    fn from(v: WorkingHoursViolation) -> Self {
        EngineError::WorkingHours(v)
    }
}

impl From<GeoError> for EngineError {
    fn from(e: GeoError) -> Self {
        EngineError::External(e)
    }
}

impl From<AuthFailure> for EngineError {
    fn from(e: AuthFailure) -> Self {
        EngineError::Unauthorized(e)
    }
}
