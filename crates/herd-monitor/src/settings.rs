use std::{fmt, str::FromStr, time::Duration};

use herd_model::BackoffStrategy;

/// What wakes the aggregation loop between sweeps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AggregationTrigger {
    /// Sweep every `sweep_interval`.
    #[default]
    Poll,
    /// Sweep every `sweep_interval`, and early when a learner writes a status.
    Watch,
}

impl FromStr for AggregationTrigger {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "poll" => Ok(AggregationTrigger::Poll),
            "watch" => Ok(AggregationTrigger::Watch),
            other => Err(format!("unknown aggregation trigger {other:?}, expected poll or watch")),
        }
    }
}

impl fmt::Display for AggregationTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AggregationTrigger::Poll => "poll",
            AggregationTrigger::Watch => "watch",
        })
    }
}

/// Every delay, interval and retry budget of a job monitor.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorTimings {
    /// Pause between start-detection polls.
    pub start_poll_interval: Duration,
    /// Start-detection polls before giving up.
    pub start_poll_attempts: u32,
    /// Listing pods for the image-pull watchdog; unbounded by default.
    pub image_pull_retry: BackoffStrategy,
    /// Pause between image-pull polls while containers are still waiting.
    pub image_pull_pause: Duration,
    /// Seeding the overall status.
    pub seed_retry: BackoffStrategy,
    /// Pause between aggregation sweeps.
    pub sweep_interval: Duration,
    /// Reporting to the status sink.
    pub sink_retry: BackoffStrategy,
    /// Longest wait for the remaining learners once the job is terminal.
    pub drain_wait: Duration,
    /// Delay before a kill request is sent.
    pub teardown_grace: Duration,
    /// Sending the kill request.
    pub kill_retry: BackoffStrategy,
    /// Creating the orchestrator client.
    pub orchestrator_connect_retry: BackoffStrategy,
}

impl Default for MonitorTimings {
    fn default() -> Self {
        Self {
            start_poll_interval: Duration::from_secs(30),
            start_poll_attempts: 40,
            image_pull_retry: BackoffStrategy {
                max_elapsed_ms: None,
                ..BackoffStrategy::exponential(500, 30_000, 0)
            },
            image_pull_pause: Duration::from_secs(5),
            seed_retry: BackoffStrategy::exponential(500, 5_000, 60_000),
            sweep_interval: Duration::from_secs(60),
            sink_retry: BackoffStrategy::exponential(500, 5_000, 60_000),
            drain_wait: Duration::from_secs(60),
            teardown_grace: Duration::from_secs(10),
            kill_retry: BackoffStrategy::exponential(500, 5_000, 60_000),
            orchestrator_connect_retry: BackoffStrategy::exponential(500, 10_000, 60_000),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorSettings {
    pub timings: MonitorTimings,
    pub trigger: AggregationTrigger,
}
