use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use herd_cluster::Lifecycle;
use herd_core::retry;
use herd_model::{BackoffStrategy, JobIdentity};
use herd_prometheus::MonitorMetrics;

use crate::error::MonitorError;

/// What a teardown request amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownOutcome {
    /// The lifecycle manager accepted the kill request.
    Killed,
    /// An earlier teardown already succeeded.
    AlreadyDone,
    /// Another teardown is in flight.
    InFlight,
}

/// Kill-request gate: at most one request in flight, nothing after the first success.
pub(crate) struct Teardown {
    job: Arc<JobIdentity>,
    lifecycle: Arc<dyn Lifecycle>,
    metrics: MonitorMetrics,
    grace: Duration,
    retry: BackoffStrategy,
    in_flight: AtomicBool,
    done: AtomicBool,
    shutdown: CancellationToken,
}

impl Teardown {
    pub(crate) fn new(
        job: Arc<JobIdentity>,
        lifecycle: Arc<dyn Lifecycle>,
        metrics: MonitorMetrics,
        grace: Duration,
        retry: BackoffStrategy,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            job,
            lifecycle,
            metrics,
            grace,
            retry,
            in_flight: AtomicBool::new(false),
            done: AtomicBool::new(false),
            shutdown,
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Neither finished nor in flight.
    pub(crate) fn is_idle(&self) -> bool {
        !self.is_done() && !self.in_flight.load(Ordering::Acquire)
    }

    /// Wait the grace delay, then ask the lifecycle manager to kill the job.
    ///
    /// On success the shutdown token is cancelled. On failure the gate reopens so a later request can try again.
    pub(crate) async fn run(&self) -> Result<TeardownOutcome, MonitorError> {
        if self.is_done() {
            self.metrics.teardown("skipped");
            return Ok(TeardownOutcome::AlreadyDone);
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.metrics.teardown("skipped");
            return Ok(TeardownOutcome::InFlight);
        }

        tokio::time::sleep(self.grace).await;
        info!(job_name = %self.job.job_name, "sending kill request to lifecycle manager");

        let job = self.job.as_ref();
        let lifecycle = self.lifecycle.as_ref();
        let result = retry("kill_training_job", &self.retry, move || lifecycle.kill_training_job(job)).await;

        match result {
            Ok(()) => {
                self.done.store(true, Ordering::Release);
                self.in_flight.store(false, Ordering::Release);
                self.metrics.teardown("ok");
                self.shutdown.cancel();
                info!(job_name = %self.job.job_name, "job torn down");
                Ok(TeardownOutcome::Killed)
            }
            Err(e) => {
                self.in_flight.store(false, Ordering::Release);
                self.metrics.teardown("failed");
                error!(attempts = e.attempts(), error = %e, "failed to send kill request to lifecycle manager");
                Err(MonitorError::Teardown {
                    attempts: e.attempts(),
                    source: e.into_inner(),
                })
            }
        }
    }
}
