pub mod auth;
pub mod config;
pub mod engine;
pub mod geo;
pub mod identity;
pub mod model;
pub mod observability;
pub mod openings;
pub mod reaper;
pub mod schedule;
pub mod sql;
pub mod tls;
pub mod tz;
pub mod wal;
pub mod wire;

/// Hard bounds on request inputs and booking policy constants.
pub mod limits {
    use crate::model::Ms;

    /// 2000-01-01T00:00:00Z
    pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
    /// 2100-01-01T00:00:00Z
    pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

    /// How long a hold reserves its slot.
    pub const HOLD_TTL_MS: Ms = 10 * 60_000;
    /// Minimum notice between now and a held start.
    pub const HOLD_MIN_LEAD_MS: Ms = 5 * 60_000;
    /// Busy-interval scans reach this far on either side of the requested time.
    pub const SCAN_PADDING_MS: Ms = 24 * 3_600_000;
    /// Upper bound on days covered by a slot summary.
    pub const SUMMARY_MAX_DAYS: u32 = 14;
    /// Mapping provider calls are abandoned after this long.
    pub const GEO_TIMEOUT_MS: u64 = 8_000;

    pub const MAX_PROFESSIONALS: usize = 100_000;
    pub const MAX_LOCATIONS_PER_PROFESSIONAL: usize = 64;
    pub const MAX_OFFERINGS_PER_PROFESSIONAL: usize = 512;
    pub const MAX_BOOKINGS_PER_PROFESSIONAL: usize = 200_000;
    pub const MAX_ADD_ONS_PER_BOOKING: usize = 10;
    pub const MAX_PROPOSED_SERVICES: usize = 50;
    pub const MAX_NOTES_LEN: usize = 2_000;
    pub const MAX_ADDRESS_LEN: usize = 512;
    pub const MAX_NAME_LEN: usize = 256;
    pub const MAX_DURATION_MINUTES: u32 = 24 * 60;

    pub const MAX_BUFFER_MINUTES: u32 = 180;
    pub const MAX_ADVANCE_NOTICE_MINUTES: u32 = 240;
    pub const MIN_MAX_DAYS_AHEAD: u32 = 1;
    pub const MAX_MAX_DAYS_AHEAD: u32 = 365;
}
