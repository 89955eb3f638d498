use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "petsched_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "petsched_query_duration_seconds";

/// Counter: booking attempts. Labels: outcome (booked, conflict, lost_race, rejected).
pub const BOOKINGS_TOTAL: &str = "petsched_bookings_total";

/// Counter: staff members probed during automatic assignment.
pub const ASSIGNMENT_PROBES_TOTAL: &str = "petsched_assignment_probes_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "petsched_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "petsched_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "petsched_connections_rejected_total";

/// Gauge: number of loaded shops.
pub const TENANTS_ACTIVE: &str = "petsched_tenants_active";

/// Counter: startup/auth failures.
pub const AUTH_FAILURES_TOTAL: &str = "petsched_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "petsched_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "petsched_wal_flush_batch_size";

/// Counter: WAL compactions run by the background compactor.
pub const WAL_COMPACTIONS_TOTAL: &str = "petsched_wal_compactions_total";

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
        Command::UpsertCategory(_) => "upsert_category",
        Command::UpsertService(_) => "upsert_service",
        Command::InsertStaff(_) => "insert_staff",
        Command::UpdateStaff { .. } => "update_staff",
        Command::DeleteStaff { .. } => "delete_staff",
        Command::InsertAppointment(_) => "insert_appointment",
        Command::UpdateAppointment { .. } => "update_appointment",
        Command::DeleteAppointment { .. } => "delete_appointment",
        Command::SelectAppointments { .. } => "select_appointments",
        Command::SelectStaff { .. } => "select_staff",
        Command::SelectCustomers { .. } => "select_customers",
        Command::SelectPets { .. } => "select_pets",
        Command::SelectSlots { .. } => "select_slots",
        Command::SelectAvailability { .. } => "select_availability",
    }
}
