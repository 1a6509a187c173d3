use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "agenda_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "agenda_query_duration_seconds";

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: booking attempts. Labels: outcome (created, conflict, rejected, failed).
pub const BOOKINGS_TOTAL: &str = "agenda_bookings_total";

/// Counter: accepted status changes. Labels: status.
pub const STATUS_TRANSITIONS_TOTAL: &str = "agenda_status_transitions_total";

/// Counter: status notifications published.
pub const NOTIFICATIONS_TOTAL: &str = "agenda_notifications_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "agenda_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "agenda_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "agenda_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "agenda_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "agenda_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "agenda_wal_flush_batch_size";

/// Counter: commits abandoned after the commit timeout.
pub const COMMIT_TIMEOUTS_TOTAL: &str = "agenda_commit_timeouts_total";

/// Counter: WAL compactions run.
pub const COMPACTIONS_TOTAL: &str = "agenda_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), String> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("failed to install Prometheus metrics exporter: {e}"))?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertUser { .. } => "insert_user",
        Command::InsertProvider { .. } => "insert_provider",
        Command::InsertSchedule { .. } => "insert_schedule",
        Command::UpdateSchedule { .. } => "update_schedule",
        Command::DeleteSchedule { .. } => "delete_schedule",
        Command::InsertAppointment { .. } => "insert_appointment",
        Command::UpdateAppointmentStatus { .. } => "update_appointment_status",
        Command::SelectSlots { .. } => "select_slots",
        Command::SelectSchedules { .. } => "select_schedules",
        Command::SelectAppointments { .. } => "select_appointments",
        Command::SelectProvider { .. } => "select_provider",
    }
}
