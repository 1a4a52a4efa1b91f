use std::net::SocketAddr;

use crate::engine::EngineError;
use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "roomres_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "roomres_query_duration_seconds";

/// Counter: reservation attempts refused by a booking rule. Labels: reason.
pub const RESERVATION_REJECTIONS_TOTAL: &str = "roomres_reservation_rejections_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "roomres_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "roomres_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "roomres_connections_rejected_total";

/// Counter: finished reservations dropped by the reaper.
pub const RESERVATIONS_PRUNED_TOTAL: &str = "roomres_reservations_pruned_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Count a refused reservation under the rule that refused it.
pub fn record_rejection(err: &EngineError) {
    let reason = match err {
        EngineError::OverlapConflict(_) => "overlap",
        EngineError::DurationExceeded { .. } => "duration",
        EngineError::RoomOccupied { .. } => "occupied",
        _ => return,
    };
    metrics::counter!(RESERVATION_REJECTIONS_TOTAL, "reason" => reason).increment(1);
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertRoom { .. } => "insert_room",
        Command::UpdateRoom { .. } => "update_room",
        Command::DeleteRoom { .. } => "delete_room",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::UpdateReservation { .. } => "update_reservation",
        Command::DeleteReservation { .. } => "delete_reservation",
        Command::InsertQuickReservation { .. } => "insert_quick_reservation",
        Command::SelectRooms => "select_rooms",
        Command::SelectReservations { .. } => "select_reservations",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectRoomStatus { .. } => "select_room_status",
        Command::Listen { .. } => "listen",
        Command::Unlisten { .. } => "unlisten",
        Command::UnlistenAll => "unlisten_all",
    }
}
