//! Weekly working hours and the containment check every write path uses.

use std::collections::HashMap;

use chrono::{Datelike, NaiveDate, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::model::Ms;
use crate::tz;

/// One weekday's hours, in minutes since local midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DayRule {
    Closed,
    Open { start: u16, end: u16 },
}

/// Monday-first table of day rules, parsed once when a location is saved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklySchedule {
    days: [DayRule; 7],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleParseError(pub String);

impl std::fmt::Display for ScheduleParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid working hours: {}", self.0)
    }
}

impl std::error::Error for ScheduleParseError {}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDay {
    enabled: bool,
    #[serde(default)]
    start: Option<String>,
    #[serde(default)]
    end: Option<String>,
}

const DAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Parse `HH:MM` in 24-hour time.
fn parse_hhmm(raw: &str) -> Option<u16> {
    let (h, m) = raw.trim().split_once(':')?;
    if h.len() != 2 || m.len() != 2 {
        return None;
    }
    let h: u16 = h.parse().ok()?;
    let m: u16 = m.parse().ok()?;
    (h < 24 && m < 60).then_some(h * 60 + m)
}

impl WeeklySchedule {
    pub fn new(days: [DayRule; 7]) -> Self {
        Self { days }
    }

    /// Same hours Monday through Friday, weekends closed.
    pub fn weekdays(start_minute: u16, end_minute: u16) -> Self {
        let open = DayRule::Open { start: start_minute, end: end_minute };
        Self::new([open, open, open, open, open, DayRule::Closed, DayRule::Closed])
    }

    /// Parse the stored JSON form:
    /// `{"mon": {"enabled": true, "start": "09:00", "end": "17:00"}, ...}`.
    /// All seven days must be present. Enabled days need `end > start`.
    pub fn from_json(raw: &str) -> Result<Self, ScheduleParseError> {
        let mut parsed: HashMap<String, RawDay> =
            serde_json::from_str(raw).map_err(|e| ScheduleParseError(e.to_string()))?;
        let mut days = [DayRule::Closed; 7];
        for (slot, day) in days.iter_mut().zip(DAYS) {
            let key = tz::weekday_key(day);
            let entry = parsed
                .remove(key)
                .ok_or_else(|| ScheduleParseError(format!("missing day '{key}'")))?;
            if !entry.enabled {
                continue;
            }
            let start = entry
                .start
                .as_deref()
                .and_then(parse_hhmm)
                .ok_or_else(|| ScheduleParseError(format!("'{key}' start must be HH:MM")))?;
            let end = entry
                .end
                .as_deref()
                .and_then(parse_hhmm)
                .ok_or_else(|| ScheduleParseError(format!("'{key}' end must be HH:MM")))?;
            if end <= start {
                return Err(ScheduleParseError(format!("'{key}' end must be after start")));
            }
            *slot = DayRule::Open { start, end };
        }
        if let Some(extra) = parsed.keys().next() {
            return Err(ScheduleParseError(format!("unknown day '{extra}'")));
        }
        Ok(Self { days })
    }

    pub fn rule(&self, day: Weekday) -> DayRule {
        self.days[day.num_days_from_monday() as usize]
    }

    /// Open window for `date`, or the violation explaining why there is none.
    pub fn window_for(&self, date: NaiveDate) -> Result<(u32, u32), WorkingHoursViolation> {
        window_of(self.rule(date.weekday()))
    }
}

fn window_of(rule: DayRule) -> Result<(u32, u32), WorkingHoursViolation> {
    match rule {
        DayRule::Closed => Err(WorkingHoursViolation::DayClosed),
        DayRule::Open { start, end } if end <= start || end > 24 * 60 => {
            Err(WorkingHoursViolation::InvalidWindow)
        }
        DayRule::Open { start, end } => Ok((start as u32, end as u32)),
    }
}

/// Why an interval does not fit inside working hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkingHoursViolation {
    NotConfigured,
    DayClosed,
    InvalidWindow,
    CrossesMidnight,
    StartsBeforeOpen,
    EndsAfterClose,
}

impl WorkingHoursViolation {
    pub fn code(&self) -> &'static str {
        match self {
            WorkingHoursViolation::NotConfigured => "WORKING_HOURS_REQUIRED",
            WorkingHoursViolation::InvalidWindow => "WORKING_HOURS_INVALID",
            WorkingHoursViolation::DayClosed
            | WorkingHoursViolation::CrossesMidnight
            | WorkingHoursViolation::StartsBeforeOpen
            | WorkingHoursViolation::EndsAfterClose => "OUTSIDE_WORKING_HOURS",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            WorkingHoursViolation::NotConfigured => "working hours are not set for this location",
            WorkingHoursViolation::DayClosed => "the professional does not work on that day",
            WorkingHoursViolation::InvalidWindow => "working hours for that day are misconfigured",
            WorkingHoursViolation::CrossesMidnight => "appointments cannot run past midnight",
            WorkingHoursViolation::StartsBeforeOpen => "that time starts before working hours",
            WorkingHoursViolation::EndsAfterClose => "that time ends after working hours",
        }
    }
}

impl std::fmt::Display for WorkingHoursViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

/// Check that `[start, end)` sits inside one day's working window in `zone`.
pub fn ensure_within_working_hours(
    schedule: Option<&WeeklySchedule>,
    start: Ms,
    end: Ms,
    zone: Tz,
) -> Result<(), WorkingHoursViolation> {
    let schedule = schedule.ok_or(WorkingHoursViolation::NotConfigured)?;
    let start_day = tz::weekday_at(start, zone);
    let (open, close) = window_of(schedule.rule(start_day))?;

    // The end instant is exclusive; an appointment ending exactly at local
    // midnight still belongs to the previous day.
    let last = end - 1;
    if tz::local_date(last, zone) != tz::local_date(start, zone) {
        return Err(WorkingHoursViolation::CrossesMidnight);
    }
    let start_minute = tz::minutes_since_midnight(start, zone);
    let end_minute = tz::minutes_since_midnight(last, zone) + 1;
    if start_minute < open {
        return Err(WorkingHoursViolation::StartsBeforeOpen);
    }
    if end_minute > close {
        return Err(WorkingHoursViolation::EndsAfterClose);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tz::parse_instant;

    const HOURS: &str = r#"{
        "mon": {"enabled": true, "start": "09:00", "end": "17:00"},
        "tue": {"enabled": true, "start": "09:00", "end": "17:00"},
        "wed": {"enabled": true, "start": "09:00", "end": "17:00"},
        "thu": {"enabled": true, "start": "09:00", "end": "17:00"},
        "fri": {"enabled": true, "start": "10:00", "end": "14:30"},
        "sat": {"enabled": false, "start": "09:00", "end": "17:00"},
        "sun": {"enabled": false}
    }"#;

    fn ny() -> Tz {
        chrono_tz::America::New_York
    }

    fn at(raw: &str) -> Ms {
        parse_instant(raw).unwrap()
    }

    #[test]
    fn parses_week() {
        let s = WeeklySchedule::from_json(HOURS).unwrap();
        assert_eq!(s.rule(Weekday::Mon), DayRule::Open { start: 540, end: 1020 });
        assert_eq!(s.rule(Weekday::Fri), DayRule::Open { start: 600, end: 870 });
        assert_eq!(s.rule(Weekday::Sat), DayRule::Closed);
        assert_eq!(s.rule(Weekday::Sun), DayRule::Closed);
    }

    #[test]
    fn rejects_bad_shapes() {
        assert!(WeeklySchedule::from_json("[]").is_err());
        assert!(WeeklySchedule::from_json(r#"{"mon": {"enabled": true}}"#).is_err());
        let reversed = HOURS.replace(r#""start": "10:00", "end": "14:30""#, r#""start": "14:30", "end": "10:00""#);
        assert!(WeeklySchedule::from_json(&reversed).is_err());
        let bad_clock = HOURS.replace("10:00", "25:00");
        assert!(WeeklySchedule::from_json(&bad_clock).is_err());
        let extra = HOURS.replace(r#""sun""#, r#""sunday""#);
        assert!(WeeklySchedule::from_json(&extra).is_err());
    }

    #[test]
    fn hhmm() {
        assert_eq!(parse_hhmm("00:00"), Some(0));
        assert_eq!(parse_hhmm("23:59"), Some(1439));
        assert_eq!(parse_hhmm("9:00"), None);
        assert_eq!(parse_hhmm("24:00"), None);
    }

    #[test]
    fn inside_window_passes() {
        let s = WeeklySchedule::from_json(HOURS).unwrap();
        // Monday 09:00-10:00 EST
        let r = ensure_within_working_hours(Some(&s), at("2026-03-02T14:00:00Z"), at("2026-03-02T15:00:00Z"), ny());
        assert_eq!(r, Ok(()));
        // Ends exactly at close.
        let r = ensure_within_working_hours(Some(&s), at("2026-03-02T21:00:00Z"), at("2026-03-02T22:00:00Z"), ny());
        assert_eq!(r, Ok(()));
    }

    #[test]
    fn each_violation_shape() {
        let s = WeeklySchedule::from_json(HOURS).unwrap();
        let check = |start: &str, end: &str| ensure_within_working_hours(Some(&s), at(start), at(end), ny());

        assert_eq!(
            ensure_within_working_hours(None, at("2026-03-02T14:00:00Z"), at("2026-03-02T15:00:00Z"), ny()),
            Err(WorkingHoursViolation::NotConfigured)
        );
        // Saturday
        assert_eq!(
            check("2026-03-07T15:00:00Z", "2026-03-07T16:00:00Z"),
            Err(WorkingHoursViolation::DayClosed)
        );
        // Monday 08:30
        assert_eq!(
            check("2026-03-02T13:30:00Z", "2026-03-02T14:30:00Z"),
            Err(WorkingHoursViolation::StartsBeforeOpen)
        );
        // Monday 16:30-17:30
        assert_eq!(
            check("2026-03-02T21:30:00Z", "2026-03-02T22:30:00Z"),
            Err(WorkingHoursViolation::EndsAfterClose)
        );
        // Monday 16:00 to Tuesday 01:00
        assert_eq!(
            check("2026-03-02T21:00:00Z", "2026-03-03T06:00:00Z"),
            Err(WorkingHoursViolation::CrossesMidnight)
        );
        let broken = WeeklySchedule::new([DayRule::Open { start: 600, end: 600 }; 7]);
        assert_eq!(
            ensure_within_working_hours(Some(&broken), at("2026-03-02T15:00:00Z"), at("2026-03-02T16:00:00Z"), ny()),
            Err(WorkingHoursViolation::InvalidWindow)
        );
    }

    #[test]
    fn uses_local_weekday_not_utc() {
        let s = WeeklySchedule::from_json(HOURS).unwrap();
        // Friday 21:00 local is Saturday in UTC but Friday hours end 14:30.
        assert_eq!(
            ensure_within_working_hours(Some(&s), at("2026-03-07T02:00:00Z"), at("2026-03-07T03:00:00Z"), ny()),
            Err(WorkingHoursViolation::EndsAfterClose)
        );
    }

    #[test]
    fn codes() {
        assert_eq!(WorkingHoursViolation::NotConfigured.code(), "WORKING_HOURS_REQUIRED");
        assert_eq!(WorkingHoursViolation::InvalidWindow.code(), "WORKING_HOURS_INVALID");
        assert_eq!(WorkingHoursViolation::DayClosed.code(), "OUTSIDE_WORKING_HOURS");
    }
}
