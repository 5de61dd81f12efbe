use std::{collections::BTreeMap, sync::Arc, time::Duration};

use {
    herald_channels::{ChannelOutbound, normalize_recipient},
    herald_common::time::now_ms,
    serde::Serialize,
    tokio::task::{JoinError, JoinHandle},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use herald_metrics::{counter, dispatch as dispatch_metrics, gauge, histogram, labels};

use crate::{
    Error, Result,
    log::{AttemptStatus, DeliveryAttempt, RunFinish, RunLog, RunOutcome, RunStart},
    pacing::Pacing,
    source::MessageSource,
};

/// Lower bound on the wait after a cycle in which no channel was ready, so
/// an all-unready pool with a zero cycle delay does not spin.
const IDLE_BACKOFF: Duration = Duration::from_secs(1);

/// Identity of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub run_id: String,
    pub room_id: String,
}

impl RunContext {
    /// New run for `room_id` with a fresh id.
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            room_id: room_id.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChannelTally {
    pub sent: u64,
    pub failed: u64,
}

/// Final accounting of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub outcome: RunOutcome,
    pub total_sent: u64,
    pub total_failed: u64,
    pub cycles: u64,
    pub per_channel: BTreeMap<String, ChannelTally>,
}

impl RunSummary {
    #[must_use]
    pub fn attempts(&self) -> u64 {
        self.total_sent + self.total_failed
    }
}

/// Handle to a run executing in the background.
pub struct RunHandle {
    run_id: String,
    cancel: CancellationToken,
    task: JoinHandle<RunSummary>,
}

impl RunHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Ask the run to stop at its next suspend point or before its next send.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn wait(self) -> std::result::Result<RunSummary, JoinError> {
        self.task.await
    }
}

/// Starts runs against a channel layer and a run log.
#[derive(Clone)]
pub struct Dispatcher {
    outbound: Arc<dyn ChannelOutbound>,
    log: Arc<dyn RunLog>,
}

impl Dispatcher {
    pub fn new(outbound: Arc<dyn ChannelOutbound>, log: Arc<dyn RunLog>) -> Self {
        Self { outbound, log }
    }

    /// Validate, record the run start, then run it in the background.
    ///
    /// Only validation and run-record creation can fail. Once this returns
    /// `Ok` the run always finalizes, with outcome `Completed`, `Cancelled`
    /// or `Stalled`.
    pub async fn start(
        &self,
        ctx: RunContext,
        channels: Vec<String>,
        source: MessageSource,
        pacing: Pacing,
    ) -> Result<RunHandle> {
        self.start_with_token(ctx, channels, source, pacing, CancellationToken::new())
            .await
    }

    /// Like [`Dispatcher::start`], observing an externally owned token.
    pub async fn start_with_token(
        &self,
        ctx: RunContext,
        channels: Vec<String>,
        source: MessageSource,
        pacing: Pacing,
        cancel: CancellationToken,
    ) -> Result<RunHandle> {
        if channels.is_empty() {
            return Err(Error::invalid_input("channel set is empty"));
        }
        pacing.validate()?;

        let start = RunStart {
            run_id: ctx.run_id.clone(),
            room_id: ctx.room_id.clone(),
            started_at: now_ms(),
        };
        self.log.start_run(&start).await.map_err(Error::store)?;

        info!(
            run_id = %ctx.run_id,
            room_id = %ctx.room_id,
            channels = channels.len(),
            items = source.len(),
            burst = pacing.burst,
            "run started"
        );
        #[cfg(feature = "metrics")]
        {
            counter!(dispatch_metrics::RUNS_STARTED_TOTAL).increment(1);
            gauge!(dispatch_metrics::RUNS_ACTIVE).increment(1.0);
        }

        let run = Run {
            ctx: ctx.clone(),
            channels,
            source,
            pacing,
            outbound: Arc::clone(&self.outbound),
            log: Arc::clone(&self.log),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(run.execute());

        Ok(RunHandle {
            run_id: ctx.run_id,
            cancel,
            task,
        })
    }
}

/// State owned by one executing run.
struct Run {
    ctx: RunContext,
    channels: Vec<String>,
    source: MessageSource,
    pacing: Pacing,
    outbound: Arc<dyn ChannelOutbound>,
    log: Arc<dyn RunLog>,
    cancel: CancellationToken,
}

/// Why the loop stopped before exhausting the source.
enum Halt {
    Cancelled,
    Stalled,
}

struct Progress {
    cursor: usize,
    attempts: u64,
    cycles: u64,
    total_sent: u64,
    total_failed: u64,
    per_channel: BTreeMap<String, ChannelTally>,
}

impl Run {
    async fn execute(self) -> RunSummary {
        let mut progress = Progress {
            cursor: 0,
            attempts: 0,
            cycles: 0,
            total_sent: 0,
            total_failed: 0,
            per_channel: BTreeMap::new(),
        };

        let outcome = match self.deliver(&mut progress).await {
            Ok(()) => RunOutcome::Completed,
            Err(Halt::Cancelled) => RunOutcome::Cancelled,
            Err(Halt::Stalled) => RunOutcome::Stalled,
        };
        self.finalize(outcome, progress).await
    }

    async fn deliver(&self, p: &mut Progress) -> std::result::Result<(), Halt> {
        let run_id = self.ctx.run_id.as_str();
        let total = self.source.len();
        let mut idle_cycles = 0u32;

        while p.cursor < total {
            p.cycles += 1;
            let cursor_at_cycle_start = p.cursor;
            debug!(run_id, cycle = p.cycles, cursor = p.cursor, "cycle start");

            for channel_id in &self.channels {
                if p.cursor >= total {
                    break;
                }
                if self.cancel.is_cancelled() {
                    return Err(Halt::Cancelled);
                }
                if !self.outbound.is_ready(channel_id) {
                    debug!(run_id, channel_id, "channel not ready, skipping");
                    #[cfg(feature = "metrics")]
                    counter!(dispatch_metrics::CHANNELS_SKIPPED_TOTAL).increment(1);
                    continue;
                }
                self.burst(channel_id, p).await?;
            }

            if p.cursor >= total {
                break;
            }

            let idle = p.cursor == cursor_at_cycle_start;
            let wait = if idle {
                idle_cycles += 1;
                if self
                    .pacing
                    .max_idle_cycles
                    .is_some_and(|max| idle_cycles >= max)
                {
                    warn!(run_id, idle_cycles, "no channel became ready, run stalled");
                    return Err(Halt::Stalled);
                }
                debug!(run_id, idle_cycles, "no ready channel in cycle");
                self.pacing.cycle_delay.max(IDLE_BACKOFF)
            } else {
                idle_cycles = 0;
                self.pacing.cycle_delay
            };

            debug!(run_id, wait = ?wait, "cycle sleep");
            self.pause(wait).await?;
        }
        Ok(())
    }

    /// Deliver up to `burst` consecutive items through one channel.
    async fn burst(&self, channel_id: &str, p: &mut Progress) -> std::result::Result<(), Halt> {
        let run_id = self.ctx.run_id.as_str();
        let total = self.source.len();
        let mut taken = 0u32;

        while taken < self.pacing.burst && p.cursor < total {
            if p.attempts > 0 {
                self.pause(self.pacing.message_delay).await?;
            }
            if self.cancel.is_cancelled() {
                return Err(Halt::Cancelled);
            }

            let Some((recipient, body)) = self.source.get(p.cursor) else {
                break;
            };
            #[cfg(feature = "metrics")]
            let started = std::time::Instant::now();
            let result = self
                .outbound
                .send(channel_id, &normalize_recipient(recipient), body)
                .await;
            #[cfg(feature = "metrics")]
            histogram!(dispatch_metrics::SEND_DURATION_SECONDS)
                .record(started.elapsed().as_secs_f64());

            p.cursor += 1;
            p.attempts += 1;
            taken += 1;
            let tally = p.per_channel.entry(channel_id.to_string()).or_default();

            let (status, error, abandon) = match result {
                Ok(()) => {
                    debug!(run_id, channel_id, recipient, "message sent");
                    tally.sent += 1;
                    p.total_sent += 1;
                    if let Err(e) = self.log.increment_sent(channel_id).await {
                        warn!(run_id, channel_id, error = %e, "failed to increment sent counter");
                    }
                    (AttemptStatus::Success, None, false)
                },
                Err(e) => {
                    warn!(run_id, channel_id, recipient, error = %e, "send failed");
                    tally.failed += 1;
                    p.total_failed += 1;
                    let abandon =
                        e.is_channel_unavailable() || !self.outbound.is_ready(channel_id);
                    (AttemptStatus::Failed, Some(e.to_string()), abandon)
                },
            };
            #[cfg(feature = "metrics")]
            counter!(dispatch_metrics::SENDS_TOTAL, labels::STATUS => status.as_str()).increment(1);

            let attempt = DeliveryAttempt {
                run_id: self.ctx.run_id.clone(),
                room_id: self.ctx.room_id.clone(),
                channel_id: channel_id.to_string(),
                recipient: recipient.to_string(),
                status,
                error,
                timestamp: now_ms(),
            };
            if let Err(e) = self.log.record_attempt(&attempt).await {
                warn!(run_id, channel_id, error = %e, "failed to record delivery attempt");
            }

            if abandon {
                info!(run_id, channel_id, "channel no longer ready, abandoning burst");
                break;
            }
        }
        Ok(())
    }

    /// Sleep unless cancelled first.
    async fn pause(&self, duration: Duration) -> std::result::Result<(), Halt> {
        if duration.is_zero() {
            return if self.cancel.is_cancelled() {
                Err(Halt::Cancelled)
            } else {
                Ok(())
            };
        }
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Halt::Cancelled),
            () = tokio::time::sleep(duration) => Ok(()),
        }
    }

    async fn finalize(self, outcome: RunOutcome, p: Progress) -> RunSummary {
        let finish = RunFinish {
            run_id: self.ctx.run_id.clone(),
            ended_at: now_ms(),
            total_sent: p.total_sent,
            outcome,
        };
        if let Err(e) = self.log.finish_run(&finish).await {
            warn!(run_id = %self.ctx.run_id, error = %e, "failed to finalize run record");
        }

        info!(
            run_id = %self.ctx.run_id,
            %outcome,
            sent = p.total_sent,
            failed = p.total_failed,
            cycles = p.cycles,
            "run finished"
        );
        #[cfg(feature = "metrics")]
        {
            counter!(dispatch_metrics::RUNS_FINISHED_TOTAL, labels::OUTCOME => outcome.as_str())
                .increment(1);
            gauge!(dispatch_metrics::RUNS_ACTIVE).decrement(1.0);
        }

        RunSummary {
            run_id: self.ctx.run_id,
            outcome,
            total_sent: p.total_sent,
            total_failed: p.total_failed,
            cycles: p.cycles,
            per_channel: p.per_channel,
        }
    }
}
