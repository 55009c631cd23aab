use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "slotkeep_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "slotkeep_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "slotkeep_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "slotkeep_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotkeep_connections_rejected_total";

/// Gauge: professionals with a loaded calendar.
pub const PROFESSIONALS_ACTIVE: &str = "slotkeep_professionals_active";

/// Counter: startup/auth failures.
pub const AUTH_FAILURES_TOTAL: &str = "slotkeep_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotkeep_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (transactions per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotkeep_wal_flush_batch_size";

// ── Booking flow ────────────────────────────────────────────────

/// Counter: holds placed.
pub const HOLDS_CREATED_TOTAL: &str = "slotkeep_holds_created_total";

/// Counter: hold attempts refused for overlap.
pub const HOLD_CONFLICTS_TOTAL: &str = "slotkeep_hold_conflicts_total";

/// Counter: expired holds released by the reaper.
pub const HOLDS_REAPED_TOTAL: &str = "slotkeep_holds_reaped_total";

/// Counter: bookings created from holds.
pub const BOOKINGS_FINALIZED_TOTAL: &str = "slotkeep_bookings_finalized_total";

/// Counter: finalize attempts that failed. Labels: code.
pub const FINALIZE_FAILURES_TOTAL: &str = "slotkeep_finalize_failures_total";

/// Histogram: finalize latency in seconds, lock wait included.
pub const FINALIZE_DURATION_SECONDS: &str = "slotkeep_finalize_duration_seconds";

/// Counter: overlap checks that found a busy interval.
pub const SLOT_CONFLICTS_TOTAL: &str = "slotkeep_slot_conflicts_total";

/// Counter: mapping provider failures. Labels: reason.
pub const GEO_LOOKUP_FAILURES_TOTAL: &str = "slotkeep_geo_lookup_failures_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus metrics exporter: {e}"),
    }
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::UpsertProfessional { .. } => "upsert_professional",
        Command::UpsertLocation { .. } => "upsert_location",
        Command::UpsertOffering { .. } => "upsert_offering",
        Command::UpsertAddOn { .. } => "upsert_add_on",
        Command::InsertBlock { .. } => "insert_block",
        Command::DeleteBlock { .. } => "delete_block",
        Command::PublishOpening { .. } => "publish_opening",
        Command::SelectSlots(_) => "select_slots",
        Command::SelectSlotSummary(_) => "select_slot_summary",
        Command::InsertHold { .. } => "insert_hold",
        Command::DeleteHold { .. } => "delete_hold",
        Command::InsertBooking { .. } => "finalize_booking",
        Command::InsertReschedule { .. } => "reschedule_booking",
        Command::InsertBookingAction { .. } => "booking_action",
        Command::InsertProposal { .. } => "consultation_proposal",
        Command::InsertDecision { .. } => "consultation_decision",
        Command::SelectBooking { .. } => "select_booking",
        Command::SelectApproval { .. } => "select_approval",
    }
}
