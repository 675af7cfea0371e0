use std::net::SocketAddr;

use crate::engine::EngineError;
use crate::remote::RemoteError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: lifecycle transitions attempted. Labels: transition, outcome.
pub const TRANSITIONS_TOTAL: &str = "teetime_transitions_total";

/// Histogram: remote round-trip of a transition in seconds. Labels: transition.
pub const TRANSITION_DURATION_SECONDS: &str = "teetime_transition_duration_seconds";

/// Counter: optimistic updates undone after a remote failure.
pub const ROLLBACKS_TOTAL: &str = "teetime_rollbacks_total";

/// Counter: candidates refused by the local conflict check.
pub const CONFLICTS_TOTAL: &str = "teetime_conflicts_total";

/// Counter: transitions suspended for remediation. Labels: kind.
pub const REMEDIATIONS_TOTAL: &str = "teetime_remediations_total";

// ── Reconciliation ──────────────────────────────────────────────

/// Histogram: full schedule refetch duration in seconds.
pub const REFRESH_DURATION_SECONDS: &str = "teetime_refresh_duration_seconds";

/// Counter: failed refetches.
pub const REFRESH_FAILURES_TOTAL: &str = "teetime_refresh_failures_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        tracing::error!("failed to install Prometheus metrics exporter: {e}");
        return;
    }
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map an error to a short `outcome` label.
pub fn error_label(err: &EngineError) -> &'static str {
    match err {
        EngineError::Validation(_) => "validation",
        EngineError::Conflict { .. } => "conflict",
        EngineError::IllegalTransition { .. } => "illegal",
        EngineError::ConfirmationRequired(_) => "unconfirmed",
        EngineError::InProgress(_) => "in_progress",
        EngineError::NotFound(_) => "not_found",
        EngineError::LikelyDuplicate { .. } => "duplicate",
        EngineError::Remote(RemoteError::Transport(_)) => "transport",
        EngineError::Remote(_) => "rejected",
    }
}
