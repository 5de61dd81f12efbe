//! Run log contract: create-then-finalize runs, append-only attempts and
//! per-channel sent counters.

use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use {
    anyhow::Result,
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Success,
    Failed,
}

impl AttemptStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

/// How a run ended. `Running` only appears on unfinished records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Running,
    Completed,
    Cancelled,
    Stalled,
}

impl RunOutcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Stalled => "stalled",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            "stalled" => Some(Self::Stalled),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStart {
    pub run_id: String,
    pub room_id: String,
    pub started_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFinish {
    pub run_id: String,
    pub ended_at: i64,
    pub total_sent: u64,
    pub outcome: RunOutcome,
}

/// One processed message unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryAttempt {
    pub run_id: String,
    pub room_id: String,
    pub channel_id: String,
    pub recipient: String,
    pub status: AttemptStatus,
    pub error: Option<String>,
    pub timestamp: i64,
}

/// Durable record of runs and their attempts.
#[async_trait]
pub trait RunLog: Send + Sync {
    async fn start_run(&self, run: &RunStart) -> Result<()>;
    async fn record_attempt(&self, attempt: &DeliveryAttempt) -> Result<()>;
    /// Bump the channel's cumulative sent counter by one.
    async fn increment_sent(&self, channel_id: &str) -> Result<()>;
    /// Set the end time and total. Called exactly once per run.
    async fn finish_run(&self, finish: &RunFinish) -> Result<()>;
}

/// Run record as kept by [`MemoryRunLog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRun {
    pub start: RunStart,
    pub finish: Option<RunFinish>,
    /// How many times `finish_run` was called for this run.
    pub finish_calls: usize,
}

#[derive(Default)]
struct MemoryInner {
    runs: HashMap<String, MemoryRun>,
    attempts: Vec<DeliveryAttempt>,
    sent: HashMap<String, u64>,
}

/// In-memory [`RunLog`].
#[derive(Default)]
pub struct MemoryRunLog {
    inner: Mutex<MemoryInner>,
}

impl MemoryRunLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut MemoryInner) -> T) -> T {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut inner)
    }

    pub fn run(&self, run_id: &str) -> Option<MemoryRun> {
        self.with(|i| i.runs.get(run_id).cloned())
    }

    /// Attempts of a run, in recording order.
    pub fn attempts(&self, run_id: &str) -> Vec<DeliveryAttempt> {
        self.with(|i| {
            i.attempts
                .iter()
                .filter(|a| a.run_id == run_id)
                .cloned()
                .collect()
        })
    }

    pub fn sent_count(&self, channel_id: &str) -> u64 {
        self.with(|i| i.sent.get(channel_id).copied().unwrap_or(0))
    }
}

#[async_trait]
impl RunLog for MemoryRunLog {
    async fn start_run(&self, run: &RunStart) -> Result<()> {
        self.with(|i| {
            i.runs.insert(run.run_id.clone(), MemoryRun {
                start: run.clone(),
                finish: None,
                finish_calls: 0,
            });
        });
        Ok(())
    }

    async fn record_attempt(&self, attempt: &DeliveryAttempt) -> Result<()> {
        self.with(|i| i.attempts.push(attempt.clone()));
        Ok(())
    }

    async fn increment_sent(&self, channel_id: &str) -> Result<()> {
        self.with(|i| *i.sent.entry(channel_id.to_string()).or_insert(0) += 1);
        Ok(())
    }

    async fn finish_run(&self, finish: &RunFinish) -> Result<()> {
        self.with(|i| match i.runs.get_mut(&finish.run_id) {
            Some(run) => {
                run.finish = Some(finish.clone());
                run.finish_calls += 1;
                Ok(())
            },
            None => Err(anyhow::anyhow!("unknown run {}", finish.run_id)),
        })
    }
}
