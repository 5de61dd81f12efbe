//! Metrics collection and export for herald.
//!
//! Every crate records through the `metrics` facade macros re-exported here.
//! With the `prometheus` feature the gateway renders them at `GET /metrics`;
//! without it the calls are no-ops.
//!
//! ```rust,ignore
//! use herald_metrics::{counter, dispatch, labels};
//!
//! counter!(dispatch::SENDS_TOTAL, labels::STATUS => "success").increment(1);
//! ```

mod definitions;
mod recorder;

pub use {
    definitions::*,
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

pub use metrics::{counter, gauge, histogram};
