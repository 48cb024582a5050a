use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

// ── Request-driven ──────────────────────────────────────────────

/// Counter: availability lookups. Labels: outcome (eligible, ineligible, error).
pub const AVAILABILITY_REQUESTS_TOTAL: &str = "visitslot_availability_requests_total";

/// Counter: availability loads that went to the store.
pub const AVAILABILITY_CACHE_MISSES_TOTAL: &str = "visitslot_availability_cache_misses_total";

/// Counter: booking attempts. Labels: outcome (created, slot_taken, invalid, failed).
pub const BOOKINGS_TOTAL: &str = "visitslot_bookings_total";

/// Histogram: booking write latency in seconds.
pub const BOOKING_DURATION_SECONDS: &str = "visitslot_booking_duration_seconds";

/// Counter: pre-insert conflict checks that errored and were skipped.
pub const PRECHECK_FAILOPEN_TOTAL: &str = "visitslot_precheck_failopen_total";

/// Counter: rate-limit decisions. Labels: action, outcome (allowed, denied).
pub const RATE_LIMIT_DECISIONS_TOTAL: &str = "visitslot_rate_limit_decisions_total";

/// Counter: distributed rate-limit calls that fell back to the local counter.
pub const RATE_LIMIT_FALLBACKS_TOTAL: &str = "visitslot_rate_limit_fallbacks_total";

/// Counter: operator notifications that failed.
pub const NOTIFY_FAILURES_TOTAL: &str = "visitslot_notify_failures_total";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "visitslot_wal_flush_duration_seconds";

/// Histogram: events per WAL flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "visitslot_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "visitslot_wal_compactions_total";

/// Gauge: in-process rate-limit counters currently tracked.
pub const RATE_LIMIT_LOCAL_KEYS: &str = "visitslot_rate_limit_local_keys";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
