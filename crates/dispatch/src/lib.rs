//! Dispatch orchestrator.
//!
//! A run delivers a [`MessageSource`] across a fixed, ordered set of
//! channels in round-robin cycles. Each ready channel takes up to
//! `burst` consecutive items per cycle, attempts are paced by
//! `message_delay`, and cycles by `cycle_delay`. Every attempt is recorded
//! through a [`RunLog`], failures included, and every run that ends is
//! finalized with its outcome.

pub mod error;
pub mod log;
pub mod orchestrator;
pub mod pacing;
pub mod source;

pub use {
    error::{Error, Result},
    log::{
        AttemptStatus, DeliveryAttempt, MemoryRun, MemoryRunLog, RunFinish, RunLog, RunOutcome,
        RunStart,
    },
    orchestrator::{ChannelTally, Dispatcher, RunContext, RunHandle, RunSummary},
    pacing::Pacing,
    source::{MessageSource, OutboundMessage},
};
