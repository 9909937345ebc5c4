use tracing::{debug, error, info, warn};

use herd_cluster::{PodTally, tally};
use herd_model::{StatusMessage, error_code};

use crate::{monitor::JobMonitor, teardown::TeardownOutcome};

/// How start detection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Every expected pod is running.
    Started,
    /// Pods were still pending on the last poll; the job was failed with `S100`.
    InsufficientResources,
    /// Pods failed and none was running on the last poll; the job was failed with `S104`.
    PodsFailed,
    /// Polls ran out without a verdict.
    Undecided,
    /// The job failed to start but had already reached a terminal status; nothing was changed.
    AlreadyFinished,
    /// The monitor shut down first.
    Cancelled,
}

impl JobMonitor {
    /// Poll the job pods until the expected number runs, or fail the job after the last poll.
    pub async fn detect_start(&self) -> StartOutcome {
        let job = self.job();
        let selector = job.label_selector();
        let expected = job.expected_running_pods();
        let attempts = self.settings().timings.start_poll_attempts.max(1);

        for attempt in 1..=attempts {
            if self.is_shutting_down() {
                return StartOutcome::Cancelled;
            }

            let pods = match self.pods().list_pods(&selector).await {
                Ok(pods) => pods,
                Err(e) => {
                    self.metrics().orchestrator_connectivity_failed();
                    warn!(attempt, error = %e, "failed to list job pods");
                    Vec::new()
                }
            };
            for pod in pods.iter().filter(|p| p.unschedulable) {
                debug!(pod = %pod.name, reason = %pod.reason, message = %pod.message, "pod cannot be scheduled");
            }

            let t: PodTally = tally(&pods);
            debug!(attempt, running = t.running, pending = t.pending, failed = t.failed, expected, "job pods");
            if t.running >= expected {
                info!(running = t.running, "all job pods started");
                return StartOutcome::Started;
            }

            if attempt == attempts {
                return self.give_up_start(t).await;
            }
            if !self.sleep_or_shutdown(self.settings().timings.start_poll_interval).await {
                return StartOutcome::Cancelled;
            }
        }
        StartOutcome::Undecided
    }

    /// Verdict after the last poll. A pending pod means the cluster had no room for the job, whether or not the
    /// scheduler placed it: a pod still creating its containers after every poll is as stuck as an unscheduled one.
    async fn give_up_start(&self, t: PodTally) -> StartOutcome {
        let (outcome, code, message) = if t.pending >= 1 {
            (
                StartOutcome::InsufficientResources,
                error_code::INSUFFICIENT_RESOURCES,
                StatusMessage::InsufficientResources,
            )
        } else if t.failed >= 1 && t.running == 0 {
            (
                StartOutcome::PodsFailed,
                error_code::FAILED_POD_REASON_UNKNOWN,
                StatusMessage::InternalError,
            )
        } else {
            warn!(running = t.running, failed = t.failed, "job pods did not all start, leaving the job running");
            return StartOutcome::Undecided;
        };

        error!(error_code = code, pending = t.pending, failed = t.failed, "job failed to start");
        match self.fail_job(code, message).await {
            Ok(TeardownOutcome::AlreadyDone) => {
                info!("job already finished, start failure ignored");
                return StartOutcome::AlreadyFinished;
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "failed to tear down job that did not start"),
        }
        if outcome == StartOutcome::InsufficientResources {
            self.metrics().insufficient_resources();
        }
        outcome
    }
}
