use tracing::{debug, error, warn};

use herd_cluster::{ClusterError, ImagePullCheck, inspect_image_pull};
use herd_core::retry_if;
use herd_model::{StatusMessage, error_code};

use crate::monitor::JobMonitor;

/// How the image-pull watchdog ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImagePullOutcome {
    /// No container is waiting any more.
    Clear,
    /// A container could not pull its image; the job was failed with `S103`.
    Failed { container: String, reason: String },
    /// The monitor shut down first.
    Cancelled,
}

impl JobMonitor {
    /// Watch the job pods until no container is waiting, failing the job if an image cannot be pulled.
    ///
    /// No pods listed means they are not created yet, so the watch keeps waiting. A listing that still fails after
    /// its retries is treated the same way. Only shutdown or a clear listing ends the watch without a verdict.
    pub async fn watch_image_pull(&self) -> ImagePullOutcome {
        let selector = self.job().label_selector();
        let timings = &self.settings().timings;
        let shutdown = self.shutdown_token();

        loop {
            debug!("checking job pods for failed image pulls");
            let listed = retry_if(
                "list_pods",
                &timings.image_pull_retry,
                |_| true,
                |e: &ClusterError, attempt, _| {
                    self.metrics().orchestrator_connectivity_failed();
                    warn!(attempt, error = %e, "failed to list job pods, retrying");
                },
                || self.pods().list_pods(&selector),
            );
            let pods = tokio::select! {
                _ = shutdown.cancelled() => return ImagePullOutcome::Cancelled,
                listed = listed => match listed {
                    Ok(pods) => pods,
                    Err(e) => {
                        warn!(error = %e, "gave up listing job pods");
                        Vec::new()
                    }
                },
            };

            match inspect_image_pull(&pods) {
                ImagePullCheck::Failed {
                    pod,
                    container,
                    reason,
                    message,
                } => {
                    error!(%pod, %container, %reason, %message, "container image cannot be pulled");
                    self.metrics().image_pull_failed();
                    if let Err(e) = self.fail_job(error_code::IMAGE_PULL, StatusMessage::InternalError).await {
                        error!(error = %e, "failed to tear down job with a failed image pull");
                    }
                    return ImagePullOutcome::Failed { container, reason };
                }
                ImagePullCheck::Clear => {
                    debug!("no container waiting, image pulls done");
                    return ImagePullOutcome::Clear;
                }
                ImagePullCheck::Waiting => {
                    if !self.sleep_or_shutdown(timings.image_pull_pause).await {
                        return ImagePullOutcome::Cancelled;
                    }
                }
            }
        }
    }
}
