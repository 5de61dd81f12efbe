use std::time::Duration;

use crate::{Error, Result};

/// Throughput parameters of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    /// Wait between two consecutive send attempts.
    pub message_delay: Duration,
    /// Wait between cycles.
    pub cycle_delay: Duration,
    /// Max consecutive items one channel takes per cycle. Must be >= 1.
    pub burst: u32,
    /// Consecutive cycles without any ready channel after which the run is
    /// finalized as stalled. `None` waits indefinitely.
    pub max_idle_cycles: Option<u32>,
}

impl Pacing {
    pub fn new(message_delay: Duration, cycle_delay: Duration, burst: u32) -> Self {
        Self {
            message_delay,
            cycle_delay,
            burst,
            max_idle_cycles: None,
        }
    }

    #[must_use]
    pub fn with_max_idle_cycles(mut self, max: Option<u32>) -> Self {
        self.max_idle_cycles = max;
        self
    }

    /// Build pacing from caller-supplied values, as they arrive from a
    /// request: seconds as floats, burst as a signed integer.
    pub fn from_request(message_delay_secs: f64, cycle_delay_secs: f64, burst: i64) -> Result<Self> {
        let message_delay = seconds("message delay", message_delay_secs)?;
        let cycle_delay = seconds("cycle delay", cycle_delay_secs)?;
        let burst = u32::try_from(burst)
            .ok()
            .filter(|b| *b >= 1)
            .ok_or_else(|| Error::invalid_input(format!("burst must be at least 1, got {burst}")))?;
        Ok(Self::new(message_delay, cycle_delay, burst))
    }

    pub fn validate(&self) -> Result<()> {
        if self.burst == 0 {
            return Err(Error::invalid_input("burst must be at least 1"));
        }
        if self.max_idle_cycles == Some(0) {
            return Err(Error::invalid_input("max idle cycles must be at least 1"));
        }
        Ok(())
    }
}

fn seconds(what: &str, secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(Error::invalid_input(format!(
            "{what} must be a non-negative number of seconds, got {secs}"
        )));
    }
    Ok(Duration::from_secs_f64(secs))
}
