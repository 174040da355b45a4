use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total HTTP requests served. Labels: route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "slotbook_http_requests_total";

/// Histogram: HTTP request latency in seconds. Labels: route.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "slotbook_http_request_duration_seconds";

/// Counter: reservation attempts. Labels: outcome (ok, conflict, invalid, not_found, error).
pub const RESERVATIONS_TOTAL: &str = "slotbook_reservations_total";

/// Counter: persisted status changes. Labels: status, source (sweep, manual).
pub const STATUS_TRANSITIONS_TOTAL: &str = "slotbook_status_transitions_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: therapists currently on the roster.
pub const THERAPISTS_ACTIVE: &str = "slotbook_therapists_active";

/// Histogram: lifecycle sweep duration in seconds.
pub const SWEEP_DURATION_SECONDS: &str = "slotbook_sweep_duration_seconds";

/// Counter: expired day-off and suppressed-slot entries removed.
pub const OVERRIDES_PURGED_TOTAL: &str = "slotbook_overrides_purged_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotbook_wal_flush_batch_size";

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

/// Record one served request.
pub fn record_request(route: String, status: u16, elapsed: std::time::Duration) {
    metrics::counter!(HTTP_REQUESTS_TOTAL, "route" => route.clone(), "status" => status.to_string())
        .increment(1);
    metrics::histogram!(HTTP_REQUEST_DURATION_SECONDS, "route" => route)
        .record(elapsed.as_secs_f64());
}
