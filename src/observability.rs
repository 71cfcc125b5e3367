use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "slotd_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "slotd_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "slotd_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "slotd_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotd_connections_rejected_total";

/// Gauge: number of active venues (loaded engines).
pub const VENUES_ACTIVE: &str = "slotd_venues_active";

/// Histogram: full-collection store save duration in seconds.
pub const STORE_SAVE_DURATION_SECONDS: &str = "slotd_store_save_duration_seconds";

/// Histogram: sessions per store save (collection size).
pub const STORE_SAVE_SESSIONS: &str = "slotd_store_save_sessions";

/// Counter: sessions removed by the purge sweep.
pub const SESSIONS_PURGED_TOTAL: &str = "slotd_sessions_purged_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertSession { .. } => "insert_session",
        Command::UpdateSession { .. } => "update_session",
        Command::DeleteSession { .. } => "delete_session",
        Command::InsertBooking { .. } => "insert_booking",
        Command::BatchInsertBookings { .. } => "batch_insert_bookings",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::CancelBooking { .. } => "cancel_booking",
        Command::CancelBookingByToken { .. } => "cancel_booking_by_token",
        Command::InsertWaitlist { .. } => "insert_waitlist",
        Command::DeleteWaitlist { .. } => "delete_waitlist",
        Command::SelectSessions { .. } => "select_sessions",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectWaitlist { .. } => "select_waitlist",
        Command::SelectNextOnWaitlist { .. } => "select_waitlist_head",
        Command::Listen { .. } => "listen",
    }
}
