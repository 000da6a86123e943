use std::net::SocketAddr;

use crate::wire::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "occupancy_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "occupancy_request_duration_seconds";

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: sessions opened.
pub const CHECKINS_TOTAL: &str = "occupancy_checkins_total";

/// Counter: sessions closed and billed.
pub const CHECKOUTS_TOTAL: &str = "occupancy_checkouts_total";

/// Counter: sessions cancelled.
pub const CANCELLATIONS_TOTAL: &str = "occupancy_cancellations_total";

/// Histogram: overtime hours billed per check-out.
pub const OVERTIME_HOURS: &str = "occupancy_overtime_hours";

/// Histogram: extension search latency in seconds.
pub const EXTENSION_SEARCH_DURATION_SECONDS: &str = "occupancy_extension_search_duration_seconds";

/// Counter: extension commits. Labels: status (ok, conflict, rejected, error).
pub const EXTENSION_COMMITS_TOTAL: &str = "occupancy_extension_commits_total";

/// Counter: failed or timed-out collaborator calls. Labels: call.
pub const UPSTREAM_FAILURES_TOTAL: &str = "occupancy_upstream_failures_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "occupancy_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "occupancy_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "occupancy_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "occupancy_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "occupancy_wal_flush_batch_size";

/// Counter: WAL compactions completed.
pub const WAL_COMPACTIONS_TOTAL: &str = "occupancy_wal_compactions_total";

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

/// Map a Request variant to a short label for metrics.
pub fn op_label(request: &Request) -> &'static str {
    match request {
        Request::CheckIn { .. } => "check_in",
        Request::CheckOut { .. } => "check_out",
        Request::CancelSession { .. } => "cancel_session",
        Request::LiveStatus { .. } => "live_status",
        Request::SessionView { .. } => "session_view",
        Request::SessionsForReservation { .. } => "sessions_for_reservation",
        Request::ActiveSessions => "active_sessions",
        Request::ExtensionOptions { .. } => "extension_options",
        Request::CommitExtension { .. } => "commit_extension",
    }
}
