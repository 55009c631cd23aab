//! Wall-clock conversions over IANA zones.
//!
//! Everything stored is UTC milliseconds; these helpers are the only place
//! local dates and times are produced or consumed.

use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;

use crate::model::{DAY_MS, Ms, Span};

pub fn parse_time_zone(raw: &str) -> Option<Tz> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<Tz>().ok()
}

pub fn is_valid_iana_time_zone(raw: &str) -> bool {
    parse_time_zone(raw).is_some()
}

/// Trimmed zone name if it is a real IANA identifier, otherwise `None`.
pub fn sanitize_time_zone(raw: Option<&str>) -> Option<String> {
    let trimmed = raw?.trim();
    is_valid_iana_time_zone(trimmed).then(|| trimmed.to_string())
}

fn utc_datetime(at: Ms) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at).unwrap_or_default()
}

fn offset_ms(tz: Tz, at: Ms) -> Ms {
    let seconds = tz
        .offset_from_utc_datetime(&utc_datetime(at).naive_utc())
        .fix()
        .local_minus_utc();
    seconds as Ms * 1_000
}

/// Interpret a wall-clock time in `tz` and return the UTC instant.
///
/// Treats the wall time as if it were UTC, subtracts the zone offset observed
/// there, then re-measures the offset at the first estimate. Times inside a
/// spring-forward gap land one hour later on the wall; repeated fall-back
/// times resolve to one of the two instants.
pub fn zoned_time_to_utc(local: NaiveDateTime, tz: Tz) -> Ms {
    let guess = local.and_utc().timestamp_millis();
    let first = guess - offset_ms(tz, guess);
    let second = guess - offset_ms(tz, first);
    if second == first {
        return first;
    }
    guess - offset_ms(tz, second)
}

pub fn to_local(at: Ms, tz: Tz) -> NaiveDateTime {
    tz.from_utc_datetime(&utc_datetime(at).naive_utc()).naive_local()
}

pub fn local_date(at: Ms, tz: Tz) -> NaiveDate {
    to_local(at, tz).date()
}

pub fn weekday_at(at: Ms, tz: Tz) -> Weekday {
    to_local(at, tz).weekday()
}

pub fn minutes_since_midnight(at: Ms, tz: Tz) -> u32 {
    let local = to_local(at, tz);
    local.hour() * 60 + local.minute()
}

pub fn weekday_key(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "mon",
        Weekday::Tue => "tue",
        Weekday::Wed => "wed",
        Weekday::Thu => "thu",
        Weekday::Fri => "fri",
        Weekday::Sat => "sat",
        Weekday::Sun => "sun",
    }
}

/// UTC instant of local midnight starting `date`.
pub fn local_midnight(date: NaiveDate, tz: Tz) -> Ms {
    zoned_time_to_utc(date.and_time(NaiveTime::default()), tz)
}

/// UTC span of one local calendar day. 23 or 25 hours long across DST changes.
pub fn day_bounds(date: NaiveDate, tz: Tz) -> Span {
    let start = local_midnight(date, tz);
    let end = match date.checked_add_days(Days::new(1)) {
        Some(next) => local_midnight(next, tz),
        None => start + DAY_MS,
    };
    Span::new(start, end)
}

/// Local wall-clock time at `minute_of_day` on `date`, as UTC.
pub fn wall_time_to_utc(date: NaiveDate, minute_of_day: u32, tz: Tz) -> Ms {
    let midnight = date.and_time(NaiveTime::default());
    let local = midnight + chrono::Duration::minutes(minute_of_day as i64);
    zoned_time_to_utc(local, tz)
}

/// RFC 3339 rendering in the zone's local offset.
pub fn format_local(at: Ms, tz: Tz) -> String {
    tz.from_utc_datetime(&utc_datetime(at).naive_utc()).to_rfc3339()
}

pub fn format_utc(at: Ms) -> String {
    utc_datetime(at).to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Parse `YYYY-MM-DD`.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

/// Parse an RFC 3339 timestamp or a bare integer of Unix milliseconds.
pub fn parse_instant(raw: &str) -> Option<Ms> {
    let trimmed = raw.trim();
    if let Ok(ms) = trimmed.parse::<Ms>() {
        return Some(ms);
    }
    DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ny() -> Tz {
        chrono_tz::America::New_York
    }

    fn at(raw: &str) -> Ms {
        parse_instant(raw).unwrap()
    }

    fn local(date: &str, h: u32, m: u32) -> NaiveDateTime {
        parse_date(date).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn validates_iana_names() {
        assert!(is_valid_iana_time_zone("America/New_York"));
        assert!(is_valid_iana_time_zone(" Europe/London "));
        assert!(!is_valid_iana_time_zone("Mars/Olympus"));
        assert!(!is_valid_iana_time_zone(""));
        assert_eq!(sanitize_time_zone(Some("  UTC ")), Some("UTC".to_string()));
        assert_eq!(sanitize_time_zone(Some("nope")), None);
        assert_eq!(sanitize_time_zone(None), None);
    }

    #[test]
    fn winter_and_summer_offsets() {
        assert_eq!(zoned_time_to_utc(local("2026-03-02", 9, 0), ny()), at("2026-03-02T14:00:00Z"));
        assert_eq!(zoned_time_to_utc(local("2026-07-01", 9, 0), ny()), at("2026-07-01T13:00:00Z"));
    }

    #[test]
    fn around_spring_forward() {
        // 01:30 EST exists, 03:30 EDT exists.
        assert_eq!(zoned_time_to_utc(local("2026-03-08", 1, 30), ny()), at("2026-03-08T06:30:00Z"));
        assert_eq!(zoned_time_to_utc(local("2026-03-08", 3, 30), ny()), at("2026-03-08T07:30:00Z"));
        // 02:30 does not exist; it is pushed forward onto the wall clock.
        let gap = zoned_time_to_utc(local("2026-03-08", 2, 30), ny());
        assert_eq!(gap, at("2026-03-08T07:30:00Z"));
    }

    #[test]
    fn around_fall_back() {
        let ambiguous = zoned_time_to_utc(local("2026-11-01", 1, 30), ny());
        assert!(ambiguous == at("2026-11-01T05:30:00Z") || ambiguous == at("2026-11-01T06:30:00Z"));
        assert_eq!(zoned_time_to_utc(local("2026-11-01", 9, 0), ny()), at("2026-11-01T14:00:00Z"));
    }

    #[test]
    fn day_bounds_follow_dst_length() {
        let spring = day_bounds(parse_date("2026-03-08").unwrap(), ny());
        assert_eq!(spring.duration_ms(), 23 * 3_600_000);
        let fall = day_bounds(parse_date("2026-11-01").unwrap(), ny());
        assert_eq!(fall.duration_ms(), 25 * 3_600_000);
        let plain = day_bounds(parse_date("2026-03-02").unwrap(), ny());
        assert_eq!(plain.start, at("2026-03-02T05:00:00Z"));
        assert_eq!(plain.duration_ms(), DAY_MS);
    }

    #[test]
    fn local_fields() {
        let t = at("2026-03-03T02:30:00Z"); // Monday 21:30 in New York
        assert_eq!(weekday_at(t, ny()), Weekday::Mon);
        assert_eq!(weekday_key(weekday_at(t, ny())), "mon");
        assert_eq!(minutes_since_midnight(t, ny()), 21 * 60 + 30);
        assert_eq!(local_date(t, ny()), parse_date("2026-03-02").unwrap());
        assert_eq!(format_local(t, ny()), "2026-03-02T21:30:00-05:00");
    }

    #[test]
    fn parses_instants() {
        assert_eq!(parse_instant("1000"), Some(1000));
        assert_eq!(parse_instant("2026-03-02T14:00:00Z"), Some(1_772_460_000_000));
        assert_eq!(parse_instant("tuesday"), None);
    }
}
