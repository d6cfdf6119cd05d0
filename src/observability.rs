use std::net::SocketAddr;

// ── Request-driven ──────────────────────────────────────────────

/// Counter: admitted requests. Labels: kind (single, series).
pub const ADMISSIONS_TOTAL: &str = "roombook_admissions_total";

/// Counter: series occurrences turned away while the series itself was admitted.
pub const SERIES_OCCURRENCES_REJECTED_TOTAL: &str = "roombook_series_occurrences_rejected_total";

/// Counter: rejected write requests. Labels: op, reason (see `EngineError::category`).
pub const REJECTIONS_TOTAL: &str = "roombook_rejections_total";

/// Counter: bookings cancelled. Labels: cause (user, admin, closure, erasure).
pub const CANCELLATIONS_TOTAL: &str = "roombook_cancellations_total";

/// Histogram: time spent waiting for the global write lock, in seconds.
pub const WRITE_LOCK_WAIT_SECONDS: &str = "roombook_write_lock_wait_seconds";

// ── Background ──────────────────────────────────────────────────

/// Counter: rows anonymized by the retention sweep.
pub const RETENTION_ANONYMIZED_TOTAL: &str = "roombook_retention_anonymized_total";

/// Counter: notices that could not be delivered. Labels: kind.
pub const NOTIFY_FAILURES_TOTAL: &str = "roombook_notify_failures_total";

/// Gauge: confirmed bookings in the store.
pub const BOOKINGS_CONFIRMED: &str = "roombook_bookings_confirmed";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roombook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roombook_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
