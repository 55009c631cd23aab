use chrono::NaiveDate;
use chrono_tz::Tz;

use crate::limits::SCAN_PADDING_MS;
use crate::model::*;
use crate::schedule::{WeeklySchedule, WorkingHoursViolation};
use crate::tz;

// ── Slot generation ───────────────────────────────────────────────

/// Allowed grid steps, in minutes.
pub const STEP_GRID: [u32; 6] = [5, 10, 15, 20, 30, 60];

/// Round an off-grid step up to the next allowed value; anything past the
/// coarsest step clamps to it.
pub fn normalize_step_minutes(raw: u32) -> u32 {
    STEP_GRID.iter().copied().find(|&s| s >= raw).unwrap_or(60)
}

/// Busy-interval scan window for a local day: the day widened by 24h each way,
/// catching spillover from bookings on adjacent days.
pub fn scan_window(date: NaiveDate, zone: Tz) -> Span {
    let day = tz::day_bounds(date, zone);
    Span::new(day.start - SCAN_PADDING_MS, day.end + SCAN_PADDING_MS)
}

#[derive(Debug, Clone, Copy)]
pub struct DaySlotQuery<'a> {
    pub date: NaiveDate,
    pub zone: Tz,
    pub schedule: Option<&'a WeeklySchedule>,
    pub duration_minutes: u32,
    pub step_minutes: u32,
    pub lead_time_minutes: u32,
    pub buffer_minutes: u32,
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// Start instants (ascending, UTC) at which the appointment fits on `date`.
///
/// A closed or misconfigured day is an error, never an empty list. Candidates
/// walk the open window on the step grid; each one is dropped if it falls
/// outside the local day, starts before `now + lead`, runs (with buffer) past
/// the end of the day, or overlaps a busy interval.
pub fn compute_day_slots(
    query: &DaySlotQuery<'_>,
    busy: &[Span],
    now: Ms,
) -> Result<Vec<Ms>, WorkingHoursViolation> {
    let day = tz::day_bounds(query.date, query.zone);
    let schedule = query.schedule.ok_or(WorkingHoursViolation::NotConfigured)?;
    let (open, close) = schedule.window_for(query.date)?;

    let duration = query.duration_minutes.max(1);
    let step = normalize_step_minutes(query.step_minutes);
    let earliest = now + minutes(query.lead_time_minutes);
    let occupied = minutes(duration) + minutes(query.buffer_minutes);

    let mut busy: Vec<Span> = busy.to_vec();
    busy.sort_by_key(|s| s.start);
    let busy = merge_overlapping(&busy);

    let mut slots = Vec::new();
    if close < open + duration {
        return Ok(slots);
    }
    let mut minute = open;
    while minute + duration <= close {
        let start = tz::wall_time_to_utc(query.date, minute, query.zone);
        minute += step;

        if start < day.start || start >= day.end || start < earliest {
            continue;
        }
        // Wall times inside a spring-forward gap land on an instant a later
        // candidate also produces.
        if slots.last().is_some_and(|&last| start <= last) {
            continue;
        }
        let candidate = Span::new(start, start + occupied);
        if candidate.end > day.end {
            continue;
        }
        // Busy spans are disjoint and sorted: only the last one starting
        // before the candidate's end can overlap it.
        let idx = busy.partition_point(|b| b.start < candidate.end);
        if idx > 0 && busy[idx - 1].end > candidate.start {
            continue;
        }
        slots.push(start);
    }
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::DayRule;
    use crate::tz::{parse_date, parse_instant};

    fn ny() -> Tz {
        chrono_tz::America::New_York
    }

    fn at(raw: &str) -> Ms {
        parse_instant(raw).unwrap()
    }

    fn monday() -> NaiveDate {
        parse_date("2026-03-02").unwrap()
    }

    fn nine_to_five() -> WeeklySchedule {
        WeeklySchedule::weekdays(9 * 60, 17 * 60)
    }

    fn query(schedule: &WeeklySchedule) -> DaySlotQuery<'_> {
        DaySlotQuery {
            date: monday(),
            zone: ny(),
            schedule: Some(schedule),
            duration_minutes: 60,
            step_minutes: 30,
            lead_time_minutes: 60,
            buffer_minutes: 0,
        }
    }

    #[test]
    fn step_grid_rounds_up() {
        assert_eq!(normalize_step_minutes(0), 5);
        assert_eq!(normalize_step_minutes(5), 5);
        assert_eq!(normalize_step_minutes(7), 10);
        assert_eq!(normalize_step_minutes(25), 30);
        assert_eq!(normalize_step_minutes(45), 60);
        assert_eq!(normalize_step_minutes(90), 60);
    }

    #[test]
    fn full_monday_grid() {
        let s = nine_to_five();
        let slots = compute_day_slots(&query(&s), &[], at("2026-03-01T12:00:00Z")).unwrap();
        assert_eq!(slots.len(), 15);
        assert_eq!(slots[0], at("2026-03-02T14:00:00Z")); // 09:00 EST
        assert_eq!(slots[1], at("2026-03-02T14:30:00Z"));
        assert_eq!(*slots.last().unwrap(), at("2026-03-02T21:00:00Z")); // 16:00 EST
        assert!(slots.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn lead_time_drops_early_starts() {
        let s = nine_to_five();
        // 10:10 EST now, lead 60 → first start at or after 11:10 → 11:30.
        let slots = compute_day_slots(&query(&s), &[], at("2026-03-02T15:10:00Z")).unwrap();
        assert_eq!(slots[0], at("2026-03-02T16:30:00Z"));
    }

    #[test]
    fn busy_intervals_remove_overlapping_starts() {
        let s = nine_to_five();
        // Booking 10:00-11:00 with 15 min buffer.
        let busy = [Span::new(at("2026-03-02T15:00:00Z"), at("2026-03-02T16:15:00Z"))];
        let slots = compute_day_slots(&query(&s), &busy, at("2026-03-01T12:00:00Z")).unwrap();
        assert!(slots.contains(&at("2026-03-02T14:00:00Z"))); // 09:00-10:00 touches, no overlap
        assert!(!slots.contains(&at("2026-03-02T14:30:00Z")));
        assert!(!slots.contains(&at("2026-03-02T15:00:00Z")));
        assert!(!slots.contains(&at("2026-03-02T16:00:00Z"))); // 11:00 inside buffer
        assert!(slots.contains(&at("2026-03-02T16:30:00Z")));
    }

    #[test]
    fn own_buffer_extends_candidate() {
        let s = nine_to_five();
        let busy = [Span::new(at("2026-03-02T16:00:00Z"), at("2026-03-02T17:00:00Z"))]; // 11:00-12:00
        let mut q = query(&s);
        q.buffer_minutes = 15;
        let slots = compute_day_slots(&q, &busy, at("2026-03-01T12:00:00Z")).unwrap();
        // 10:00 + 60 + 15 reaches into 11:00; 09:30 + 75 ends at 10:45.
        assert!(!slots.contains(&at("2026-03-02T15:00:00Z")));
        assert!(slots.contains(&at("2026-03-02T14:30:00Z")));
    }

    #[test]
    fn closed_and_missing_days_are_errors() {
        let s = nine_to_five();
        let mut q = query(&s);
        q.date = parse_date("2026-03-07").unwrap(); // Saturday
        assert_eq!(
            compute_day_slots(&q, &[], 0),
            Err(WorkingHoursViolation::DayClosed)
        );
        let mut q = query(&s);
        q.schedule = None;
        assert_eq!(compute_day_slots(&q, &[], 0), Err(WorkingHoursViolation::NotConfigured));

        let broken = WeeklySchedule::new([DayRule::Open { start: 600, end: 540 }; 7]);
        assert_eq!(
            compute_day_slots(&query(&broken), &[], 0),
            Err(WorkingHoursViolation::InvalidWindow)
        );
    }

    #[test]
    fn window_shorter_than_service_is_empty() {
        let s = WeeklySchedule::weekdays(9 * 60, 9 * 60 + 30);
        assert_eq!(compute_day_slots(&query(&s), &[], 0), Ok(vec![]));
    }

    #[test]
    fn spring_forward_day() {
        // Sunday 2026-03-08, open 01:00-05:00 local.
        let s = WeeklySchedule::new([DayRule::Open { start: 60, end: 300 }; 7]);
        let mut q = query(&s);
        q.date = parse_date("2026-03-08").unwrap();
        q.lead_time_minutes = 0;
        let slots = compute_day_slots(&q, &[], 0).unwrap();
        // 02:00 and 02:30 do not exist; they land on 03:00/03:30 EDT, which
        // the real 03:00/03:30 candidates also produce.
        assert_eq!(
            slots,
            vec![
                at("2026-03-08T06:00:00Z"),
                at("2026-03-08T06:30:00Z"),
                at("2026-03-08T07:00:00Z"),
                at("2026-03-08T07:30:00Z"),
                at("2026-03-08T08:00:00Z"),
            ]
        );
    }

    #[test]
    fn scan_window_pads_a_day_each_side() {
        let w = scan_window(monday(), ny());
        assert_eq!(w.start, at("2026-03-01T05:00:00Z"));
        assert_eq!(w.end, at("2026-03-04T05:00:00Z"));
    }

    #[test]
    fn merge_joins_touching_spans() {
        let merged = merge_overlapping(&[Span::new(0, 10), Span::new(10, 20), Span::new(30, 40)]);
        assert_eq!(merged, vec![Span::new(0, 20), Span::new(30, 40)]);
    }
}
