use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::{Engine, now_ms};

/// Background task that periodically releases expired holds.
///
/// Reads never depend on this: every check compares `expires_at` with now.
pub async fn run_reaper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        reap_once(&engine, now_ms()).await;
    }
}

pub async fn reap_once(engine: &Engine, now: i64) -> usize {
    let mut total = 0;
    for professional_id in engine.professionals_with_expired_holds(now).await {
        match engine.sweep_expired_holds(professional_id, now).await {
            Ok(0) => {}
            Ok(released) => {
                info!(%professional_id, released, "reaped expired holds");
                metrics::counter!(crate::observability::HOLDS_REAPED_TOTAL).increment(released as u64);
                total += released;
            }
            Err(e) => tracing::debug!("reaper skip {professional_id}: {e}"),
        }
    }
    total
}

/// Background task that rewrites the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal(now_ms()).await {
            Ok(()) => info!(appends, "compacted WAL"),
            Err(e) => tracing::error!("WAL compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{HoldRequest, LocationInput, OfferingInput};
    use crate::geo::NoGeoProvider;
    use crate::limits::HOLD_TTL_MS;
    use crate::model::*;
    use crate::openings::NoOpenings;
    use crate::tz::parse_instant;
    use std::path::PathBuf;
    use ulid::Ulid;

    const WEEKDAYS: &str = r#"{
        "mon": {"enabled": true, "start": "09:00", "end": "17:00"},
        "tue": {"enabled": true, "start": "09:00", "end": "17:00"},
        "wed": {"enabled": true, "start": "09:00", "end": "17:00"},
        "thu": {"enabled": true, "start": "09:00", "end": "17:00"},
        "fri": {"enabled": true, "start": "09:00", "end": "17:00"},
        "sat": {"enabled": false},
        "sun": {"enabled": false}
    }"#;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotkeep_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn reaper_releases_expired_holds() {
        let path = test_wal_path("reaper_collect.wal");
        let engine = Engine::new(path.clone(), Arc::new(NoOpenings), Arc::new(NoGeoProvider)).unwrap();

        let pro = Ulid::new();
        engine.upsert_professional(pro, None, false).await.unwrap();
        engine
            .upsert_location(
                pro,
                LocationInput {
                    id: Ulid::new(),
                    kind: LocationKind::Salon,
                    is_bookable: true,
                    is_primary: true,
                    time_zone: Some("America/New_York".into()),
                    working_hours_json: Some(WEEKDAYS.into()),
                    buffer_minutes: 0,
                    advance_notice_minutes: 0,
                    max_days_ahead: 30,
                    step_minutes: 15,
                    address: None,
                    geo: None,
                    place_id: None,
                },
            )
            .await
            .unwrap();
        let offering = Ulid::new();
        engine
            .upsert_offering(
                pro,
                OfferingInput {
                    id: offering,
                    service_id: Ulid::new(),
                    is_active: true,
                    salon: Some(ModeConfig {
                        price_cents: 1_000,
                        duration_minutes: 30,
                        is_active: true,
                    }),
                    mobile: None,
                },
            )
            .await
            .unwrap();

        let now = parse_instant("2026-03-01T12:00:00Z").unwrap();
        let hold = engine
            .create_hold(
                HoldRequest {
                    client_id: Ulid::new(),
                    offering_id: offering,
                    scheduled_for: parse_instant("2026-03-02T14:00:00Z").unwrap(),
                    location_type: ServiceMode::Salon,
                    location_id: None,
                    reschedule_of: None,
                },
                now,
            )
            .await
            .unwrap();

        assert_eq!(reap_once(&engine, now).await, 0);
        let later = now + HOLD_TTL_MS + 1;
        assert_eq!(engine.professionals_with_expired_holds(later).await, vec![pro]);
        assert_eq!(reap_once(&engine, later).await, 1);
        let state = engine.professional(&pro).unwrap();
        assert!(state.read().await.hold(&hold.id).is_none());
        assert!(engine.professionals_with_expired_holds(later).await.is_empty());

        let _ = std::fs::remove_file(&path);
    }
}
