use std::net::SocketAddr;

// ── Lifecycle ───────────────────────────────────────────────────

/// Counter: rules moved ACTIVE → ARCHIVED by the rule sweep.
pub const RULES_ARCHIVED_TOTAL: &str = "slotkeeper_rules_archived_total";

/// Counter: overrides moved ACTIVE → ARCHIVED by the override sweep.
pub const OVERRIDES_ARCHIVED_TOTAL: &str = "slotkeeper_overrides_archived_total";

/// Counter: records a sweep failed to archive. Labels: kind.
pub const SWEEP_FAILURES_TOTAL: &str = "slotkeeper_sweep_failures_total";

// ── Requests ────────────────────────────────────────────────────

/// Counter: rejected mutations and queries. Labels: reason.
pub const VALIDATION_REJECTIONS_TOTAL: &str = "slotkeeper_validation_rejections_total";

/// Counter: booking windows matched by more than one ACTIVE rule.
pub const AMBIGUOUS_MATCHES_TOTAL: &str = "slotkeeper_ambiguous_matches_total";

/// Histogram: suggestion computation latency in seconds.
pub const SUGGESTION_DURATION_SECONDS: &str = "slotkeeper_suggestion_duration_seconds";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit batch size (records per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotkeeper_wal_flush_batch_size";

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
