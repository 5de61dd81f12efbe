//! Metric name and label definitions.

/// Channel session lifecycle
pub mod channels {
    /// Channel sessions started (create calls that spawned a client)
    pub const STARTED_TOTAL: &str = "herald_channels_started_total";
    /// Transitions into Ready
    pub const READY_TOTAL: &str = "herald_channels_ready_total";
    /// Sessions that ended in Disconnected
    pub const DISCONNECTED_TOTAL: &str = "herald_channels_disconnected_total";
    /// Client initialisation failures
    pub const INIT_FAILURES_TOTAL: &str = "herald_channels_init_failures_total";
    /// Sessions currently present in the registry
    pub const ACTIVE: &str = "herald_channels_active";
}

/// Dispatch orchestrator
pub mod dispatch {
    pub const RUNS_STARTED_TOTAL: &str = "herald_dispatch_runs_started_total";
    /// Finished runs (labels: outcome)
    pub const RUNS_FINISHED_TOTAL: &str = "herald_dispatch_runs_finished_total";
    /// Runs currently in flight
    pub const RUNS_ACTIVE: &str = "herald_dispatch_runs_active";
    /// Send attempts (labels: status)
    pub const SENDS_TOTAL: &str = "herald_dispatch_sends_total";
    /// Duration of a single send call in seconds
    pub const SEND_DURATION_SECONDS: &str = "herald_dispatch_send_duration_seconds";
    /// Channels skipped within a cycle because they were not ready
    pub const CHANNELS_SKIPPED_TOTAL: &str = "herald_dispatch_channels_skipped_total";
}

/// HTTP API
pub mod http {
    /// Requests rejected at run start (labels: error_type)
    pub const RUN_REJECTIONS_TOTAL: &str = "herald_http_run_rejections_total";
}

/// Common label keys used across metrics
pub mod labels {
    pub const STATUS: &str = "status";
    pub const OUTCOME: &str = "outcome";
    pub const ERROR_TYPE: &str = "error_type";
}

/// Standard histogram buckets
pub mod buckets {
    use once_cell::sync::Lazy;

    /// Send call duration buckets (in seconds), 10ms to 60s
    pub static SEND_DURATION: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![
            0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
        ]
    });
}
