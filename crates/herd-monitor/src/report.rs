use std::sync::Arc;

use tracing::{debug, error, warn};

use herd_cluster::{ClusterError, EventNotifier, Lifecycle, StatusSink};
use herd_core::retry;
use herd_model::{BackoffStrategy, JobIdentity, StatusUpdate};
use herd_prometheus::MonitorMetrics;

/// Delivers the job status to the status sink and to the registered event endpoints.
#[derive(Clone)]
pub(crate) struct Reporter {
    job: Arc<JobIdentity>,
    sink: Arc<dyn StatusSink>,
    lifecycle: Arc<dyn Lifecycle>,
    notifier: Option<EventNotifier>,
    metrics: MonitorMetrics,
    retry: BackoffStrategy,
}

impl Reporter {
    pub(crate) fn new(
        job: Arc<JobIdentity>,
        sink: Arc<dyn StatusSink>,
        lifecycle: Arc<dyn Lifecycle>,
        notifier: Option<EventNotifier>,
        metrics: MonitorMetrics,
        retry: BackoffStrategy,
    ) -> Self {
        Self {
            job,
            sink,
            lifecycle,
            notifier,
            metrics,
            retry,
        }
    }

    /// Send `update` to the sink, retrying under the sink policy, then notify event endpoints.
    ///
    /// Endpoint notification is best effort and only follows a successful sink update.
    pub(crate) async fn report(&self, update: &StatusUpdate) -> Result<(), ClusterError> {
        let job = self.job.as_ref();
        let sink = self.sink.as_ref();

        let sent = retry("update_training_job", &self.retry, move || sink.update_status(job, update)).await;
        if let Err(e) = sent {
            self.metrics.trainer_connectivity_failed();
            error!(
                status = %update.status,
                attempts = e.attempts(),
                error = %e,
                "failed to report status to trainer, job status will likely be incorrect"
            );
            return Err(e.into_inner());
        }
        debug!(status = %update.status, error_code = %update.error_code, "status reported");

        if let Some(notifier) = &self.notifier {
            let status = update.status.as_str();
            match notifier
                .notify_status(self.lifecycle.as_ref(), &job.training_id, &job.user_id, status)
                .await
            {
                Ok(delivered) => debug!(status, delivered, "status event sent"),
                Err(e) => warn!(status, error = %e, "failed to look up status event endpoints"),
            }
        }
        Ok(())
    }
}
