use std::net::SocketAddr;

use crate::scheduler::SchedulerError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: booking requests by result. Labels: outcome.
pub const BOOKING_REQUESTS_TOTAL: &str = "servify_booking_requests_total";

/// Counter: committed status changes. Labels: to.
pub const STATUS_TRANSITIONS_TOTAL: &str = "servify_status_transitions_total";

/// Counter: API rejections. Labels: kind.
pub const API_ERRORS_TOTAL: &str = "servify_api_errors_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: open sessions.
pub const SESSIONS_ACTIVE: &str = "servify_sessions_active";

/// Gauge: connected change-feed subscribers.
pub const FEED_SUBSCRIBERS: &str = "servify_feed_subscribers";

/// Histogram: journal group-commit flush duration in seconds.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "servify_journal_flush_duration_seconds";

/// Histogram: journal group-commit batch size (events per flush).
pub const JOURNAL_FLUSH_BATCH_SIZE: &str = "servify_journal_flush_batch_size";

/// Counter: journal compactions. Labels: status.
pub const JOURNAL_COMPACTIONS_TOTAL: &str = "servify_journal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label for a scheduler result: "ok" or the error kind.
pub fn outcome_label<T>(result: &Result<T, SchedulerError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_labels() {
        assert_eq!(outcome_label(&Ok::<(), SchedulerError>(())), "ok");
        let err: Result<(), _> = Err(SchedulerError::Conflict("slot already booked".into()));
        assert_eq!(outcome_label(&err), "conflict");
    }

    #[test]
    fn no_port_installs_nothing() {
        assert!(init(None).is_ok());
    }
}
