use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::dates::Clock;
use crate::engine::{Engine, ExpiryReport};
use crate::observability;

/// How often the compactor checks the WAL size.
const COMPACT_CHECK_PERIOD: Duration = Duration::from_secs(30);

/// One expiry sweep. Split out of the loop so it can be driven directly.
pub async fn reap_once(engine: &Engine, clock: Clock) -> ExpiryReport {
    let today = clock.today();
    match engine.expire(today).await {
        Ok(report) => {
            if report.total() > 0 {
                info!(
                    "reaped {} office rows, {} user rows, {} bookings past retention",
                    report.office_rows, report.user_rows, report.bookings
                );
                for (kind, n) in [
                    ("office_counter", report.office_rows),
                    ("user_counter", report.user_rows),
                    ("booking", report.bookings),
                ] {
                    metrics::counter!(observability::ROWS_EXPIRED_TOTAL, "kind" => kind)
                        .increment(n as u64);
                }
            }
            report
        }
        Err(e) => {
            // Rows not reached stay until the next sweep.
            warn!("expiry sweep failed: {e}");
            ExpiryReport::default()
        }
    }
}

/// Background task that periodically drops rows past their retention date.
pub async fn run_reaper(engine: Arc<Engine>, clock: Clock, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        reap_once(&engine, clock).await;
    }
}

/// Compact once the WAL has grown by `threshold` appends. Returns whether it ran.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            info!("compacted WAL after {appends} appends");
            true
        }
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            false
        }
    }
}

pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_PERIOD);
    loop {
        interval.tick().await;
        if !compact_if_needed(&engine, threshold).await {
            debug!("compaction not needed");
        }
    }
}
