use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

// ── Booking transactions ────────────────────────────────────────

/// Counter: bookings committed.
pub const BOOKINGS_CREATED_TOTAL: &str = "office_booker_bookings_created_total";

/// Counter: create attempts that failed. Labels: reason.
pub const BOOKINGS_REJECTED_TOTAL: &str = "office_booker_bookings_rejected_total";

/// Counter: bookings cancelled.
pub const BOOKINGS_CANCELLED_TOTAL: &str = "office_booker_bookings_cancelled_total";

/// Histogram: create transaction latency in seconds, including compensation.
pub const BOOKING_DURATION_SECONDS: &str = "office_booker_booking_duration_seconds";

/// Counter: individual slot releases run while unwinding.
pub const COMPENSATIONS_TOTAL: &str = "office_booker_compensations_total";

/// Counter: unwinds that left a counter unreleased.
pub const COMPENSATION_FAILURES_TOTAL: &str = "office_booker_compensation_failures_total";

/// Counter: reason notices handed to the mail transport. Labels: status.
pub const NOTIFICATIONS_TOTAL: &str = "office_booker_notifications_total";

// ── Storage ─────────────────────────────────────────────────────

/// Counter: rows and bookings dropped past retention. Labels: kind.
pub const ROWS_EXPIRED_TOTAL: &str = "office_booker_rows_expired_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "office_booker_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "office_booker_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
