use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use herd_coord::WatchStream;
use herd_core::retry_if;
use herd_model::{TrainingStatus, key_path};

use crate::{error::MonitorError, monitor::JobMonitor, settings::AggregationTrigger};

impl JobMonitor {
    /// Seed the overall status, then sweep the learner sequences until the monitor shuts down.
    pub async fn aggregate(&self) {
        self.seed_overall_status().await;

        let mut wake = match self.settings().trigger {
            AggregationTrigger::Poll => None,
            AggregationTrigger::Watch => self.watch_learners().await,
        };
        let shutdown = self.shutdown_token();
        let interval = self.settings().timings.sweep_interval;

        loop {
            if shutdown.is_cancelled() {
                break;
            }
            match self.sweep().await {
                Ok(0) => {}
                Ok(processed) => debug!(processed, "learner statuses processed"),
                Err(e) => warn!(error = %e, "sweep incomplete"),
            }
            if let Err(e) = self.settle_terminal_status().await {
                warn!(error = %e, "failed to settle terminal status");
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
                _ = next_wake(&mut wake) => debug!("learner status written, sweeping early"),
            }
        }
        info!("status aggregation stopped");
    }

    /// One pass over every learner sequence; returns the number of entries processed.
    ///
    /// Entries are processed in append order from each learner's watermark. An entry that fails is retried by the next sweep.
    pub async fn sweep(&self) -> Result<usize, MonitorError> {
        let training_id = &self.job().training_id;
        let mut processed = 0;
        let mut first_error = None;

        for learner in self.job().learners() {
            let seq = self
                .coordinator()
                .value_sequence(&key_path::learner_status_path(training_id, learner));
            let entries = match seq.entries().await {
                Ok(entries) => entries,
                Err(e) => {
                    self.metrics().store_connectivity_failed();
                    warn!(learner, error = %e, "failed to read learner statuses");
                    first_error = first_error.or(Some(MonitorError::Store(e)));
                    continue;
                }
            };

            let from = self.ledger().watermark(learner);
            for (i, kv) in entries.iter().enumerate().skip(from) {
                if self.is_shutting_down() {
                    return Ok(processed);
                }
                if let Err(e) = self.process_learner_update(&kv.key, &kv.value).await {
                    warn!(learner, key = %kv.key, error = %e, "failed to process learner status");
                    first_error = first_error.or(Some(e));
                    break;
                }
                self.ledger().advance(learner, i + 1);
                processed += 1;
            }
        }

        match first_error {
            Some(e) if processed == 0 => Err(e),
            _ => Ok(processed),
        }
    }

    async fn seed_overall_status(&self) {
        let path = key_path::overall_status_path(&self.job().training_id);
        let coord = self.coordinator();
        let seeded = retry_if(
            "seed_status",
            &self.settings().timings.seed_retry,
            |_| true,
            |_: &herd_coord::CoordError, _, _| self.metrics().store_connectivity_failed(),
            || coord.put_if_missing(&path, TrainingStatus::NotStarted.as_str()),
        )
        .await;

        match seeded {
            Ok(true) => info!(%path, "overall status seeded"),
            Ok(false) => debug!(%path, "overall status already present"),
            Err(e) => error!(%path, error = %e, "failed to seed overall status"),
        }
    }

    async fn watch_learners(&self) -> Option<WatchStream> {
        let prefix = key_path::learners_path(&self.job().training_id);
        match self.coordinator().watch(&prefix, true).await {
            Ok(stream) => Some(stream),
            Err(e) => {
                warn!(%prefix, error = %e, "cannot watch learner statuses, polling only");
                None
            }
        }
    }
}

/// Resolves on the next learner write; never resolves without a usable watch.
async fn next_wake(wake: &mut Option<WatchStream>) {
    let Some(stream) = wake else {
        return std::future::pending().await;
    };
    match stream.next().await {
        Some(Ok(_)) => {}
        Some(Err(e)) => {
            warn!(error = %e, "learner watch failed, polling only");
            *wake = None;
            std::future::pending::<()>().await;
        }
        None => {
            warn!("learner watch closed, polling only");
            *wake = None;
            std::future::pending::<()>().await;
        }
    }
}
