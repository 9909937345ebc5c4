use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

use herd_cluster::{ClusterError, EventNotifier, Lifecycle, PodLister, StatusSink};
use herd_coord::{CoordError, Coordinator, StoreConfig, TransientHook};
use herd_core::retry_if;
use herd_model::{
    JobIdentity, StatusMessage, StatusUpdate, TrainingStatus, TransitionLattice,
    describe_status_message, error_code, key_path,
};
use herd_prometheus::MonitorMetrics;

use crate::{
    error::MonitorError,
    report::Reporter,
    settings::{MonitorSettings, MonitorTimings},
    state::LearnerLedger,
    teardown::{Teardown, TeardownOutcome},
};

/// Services a monitor reports to, plus its metrics.
#[derive(Clone)]
pub struct Collaborators {
    pub sink: Arc<dyn StatusSink>,
    pub lifecycle: Arc<dyn Lifecycle>,
    /// Pushes status events to registered HTTP endpoints; `None` disables them.
    pub notifier: Option<EventNotifier>,
    pub metrics: MonitorMetrics,
}

/// Tracks one training job from deployment to teardown.
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct JobMonitor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for JobMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobMonitor").field("job", &self.inner.job).finish_non_exhaustive()
    }
}

struct Inner {
    job: Arc<JobIdentity>,
    coord: Coordinator,
    pods: Arc<dyn PodLister>,
    metrics: MonitorMetrics,
    settings: MonitorSettings,
    lattice: TransitionLattice,
    reporter: Reporter,
    teardown: Teardown,
    ledger: LearnerLedger,
    terminal_learners: AtomicU64,
    /// Set once a terminal overall status has been reported or a failure recorded.
    terminal_handled: AtomicBool,
    shutdown: CancellationToken,
}

impl JobMonitor {
    /// Connect the coordination store and the orchestrator, then build the monitor.
    ///
    /// If either connection cannot be established within its retry budget, the job is reported
    /// `FAILED` (`S201` for the store, `S200` for the orchestrator), torn down, and the error is returned.
    pub async fn connect<F, Fut>(
        job: JobIdentity,
        store: &StoreConfig,
        connect_orchestrator: F,
        collab: Collaborators,
        settings: MonitorSettings,
    ) -> Result<Self, MonitorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Arc<dyn PodLister>, ClusterError>>,
    {
        job.validate()?;
        info!(training_id = %job.training_id, "starting job monitor");

        let metrics = collab.metrics.clone();
        let hook: TransientHook = Arc::new(move |_: &CoordError| metrics.store_connectivity_failed());

        let coord = match Coordinator::connect_observed(store, Some(hook)).await {
            Ok(coord) => coord,
            Err(e) => {
                error!(error = %e, "failed to connect to coordination store");
                abort_job(&job, &collab, &settings.timings, error_code::STORE_CONNECTION).await;
                return Err(e.into());
            }
        };

        let metrics = collab.metrics.clone();
        let pods = retry_if(
            "connect_orchestrator",
            &settings.timings.orchestrator_connect_retry,
            |_| true,
            |_: &ClusterError, _, _| metrics.orchestrator_connectivity_failed(),
            connect_orchestrator,
        )
        .await;

        let pods = match pods {
            Ok(pods) => pods,
            Err(e) => {
                collab.metrics.orchestrator_connectivity_failed();
                error!(error = %e, "failed to connect to orchestrator");
                abort_job(&job, &collab, &settings.timings, error_code::ORCHESTRATOR_CONNECTION).await;
                coord.close().await;
                return Err(MonitorError::Orchestrator(e.into_inner()));
            }
        };

        Self::new(job, coord, pods, collab, settings)
    }

    /// Build a monitor from connected clients.
    pub fn new(
        job: JobIdentity,
        coord: Coordinator,
        pods: Arc<dyn PodLister>,
        collab: Collaborators,
        settings: MonitorSettings,
    ) -> Result<Self, MonitorError> {
        job.validate()?;

        let job = Arc::new(job);
        let shutdown = CancellationToken::new();
        let timings = &settings.timings;

        let reporter = Reporter::new(
            Arc::clone(&job),
            collab.sink,
            Arc::clone(&collab.lifecycle),
            collab.notifier,
            collab.metrics.clone(),
            timings.sink_retry.clone(),
        );
        let teardown = Teardown::new(
            Arc::clone(&job),
            collab.lifecycle,
            collab.metrics.clone(),
            timings.teardown_grace,
            timings.kill_retry.clone(),
            shutdown.clone(),
        );

        Ok(Self {
            inner: Arc::new(Inner {
                job,
                coord,
                pods,
                metrics: collab.metrics,
                lattice: TransitionLattice::standard(),
                reporter,
                teardown,
                ledger: LearnerLedger::new(),
                terminal_learners: AtomicU64::new(0),
                terminal_handled: AtomicBool::new(false),
                shutdown,
                settings,
            }),
        })
    }

    pub fn job(&self) -> &JobIdentity {
        &self.inner.job
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.inner.coord
    }

    pub(crate) fn pods(&self) -> &dyn PodLister {
        self.inner.pods.as_ref()
    }

    pub(crate) fn metrics(&self) -> &MonitorMetrics {
        &self.inner.metrics
    }

    pub(crate) fn settings(&self) -> &MonitorSettings {
        &self.inner.settings
    }

    pub(crate) fn ledger(&self) -> &LearnerLedger {
        &self.inner.ledger
    }

    /// Learners whose terminal status has been seen.
    pub fn terminal_learners(&self) -> u64 {
        self.inner.terminal_learners.load(Ordering::Acquire)
    }

    /// Cancelled once the job is torn down or [`shutdown`](Self::shutdown) is called.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Stop every loop started by [`manage`](Self::manage).
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    pub fn is_torn_down(&self) -> bool {
        self.inner.teardown.is_done()
    }

    /// Run start detection, the image-pull watchdog and status aggregation until the job is torn down or shut down.
    ///
    /// The three loops run as separate tasks in the current span.
    pub async fn manage(&self) {
        let mut tasks = JoinSet::new();

        let m = self.clone();
        tasks.spawn(async move { m.detect_start().await; }.in_current_span());
        let m = self.clone();
        tasks.spawn(async move { m.watch_image_pull().await; }.in_current_span());
        let m = self.clone();
        tasks.spawn(async move { m.aggregate().await }.in_current_span());

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "monitor task ended abnormally");
            }
        }
        info!("job monitor stopped");
    }

    /// Current overall status; `None` before it is seeded.
    pub async fn overall_status(&self) -> Result<Option<TrainingStatus>, MonitorError> {
        let path = key_path::overall_status_path(&self.job().training_id);
        let Some(raw) = self.inner.coord.get_value(&path).await? else {
            return Ok(None);
        };
        Ok(raw.parse().ok())
    }

    /// Apply one learner status entry found at `path` to the overall status.
    ///
    /// An unparsable value or an illegal transition is logged and dropped. A terminal learner status
    /// is counted once per learner, whether or not it moves the overall status.
    pub async fn process_learner_update(&self, path: &str, value: &str) -> Result<(), MonitorError> {
        let update = match StatusUpdate::parse(value) {
            Ok(update) => update,
            Err(e) => {
                warn!(path, value, error = %e, "skipping unparsable learner status");
                return Ok(());
            }
        };
        let training_id = &self.job().training_id;
        let learner = key_path::learner_index_of(training_id, path);
        debug!(path, ?learner, status = %update.status, "processing learner status");

        if update.status.is_terminal() {
            match learner {
                Some(i) if self.inner.ledger.mark_terminal(i) => {
                    let n = self.inner.terminal_learners.fetch_add(1, Ordering::AcqRel) + 1;
                    info!(learner = i, status = %update.status, terminal_learners = n, "learner reached a terminal status");
                }
                Some(_) => {}
                None => warn!(path, "terminal status outside any learner sequence"),
            }
        }

        let overall_path = key_path::overall_status_path(training_id);
        let current = self
            .inner
            .coord
            .get_value(&overall_path)
            .await?
            .ok_or_else(|| MonitorError::MissingStatus(training_id.clone()))?;

        if !self.inner.lattice.is_allowed_str(&current, update.status.as_str()) {
            self.inner.metrics.illegal_transition();
            warn!(from = %current, to = %update.status, "transition not allowed");
            return Ok(());
        }

        let swapped = match self
            .inner
            .coord
            .compare_and_swap(&overall_path, update.status.as_str(), &current)
            .await
        {
            Ok(swapped) => swapped,
            Err(e) => self.swap_landed(&overall_path, update.status, e).await?,
        };
        if !swapped {
            debug!(from = %current, to = %update.status, "overall status moved concurrently");
            return Ok(());
        }

        self.inner.metrics.status_transition(update.status.as_str());
        info!(from = %current, to = %update.status, "overall status changed");
        self.process_job_status(&update).await;
        Ok(())
    }

    /// Whether a swap whose response was lost was applied: the overall status now reads `target`.
    ///
    /// Any other value, or a failed read, returns the original error.
    async fn swap_landed(&self, path: &str, target: TrainingStatus, err: CoordError) -> Result<bool, MonitorError> {
        match self.inner.coord.get_value(path).await {
            Ok(Some(now)) if now == target.as_str() => {
                warn!(status = %target, error = %err, "swap response lost, overall status was updated");
                Ok(true)
            }
            _ => Err(err.into()),
        }
    }

    /// Finish a job whose overall status is terminal but was never handled by this monitor.
    ///
    /// Covers a monitor restarted after the terminal swap, and a terminal swap whose outcome was lost.
    /// Once handled, only a teardown that failed earlier is retried. Returns true if anything was done.
    pub async fn settle_terminal_status(&self) -> Result<bool, MonitorError> {
        if self.inner.teardown.is_done() || self.is_shutting_down() {
            return Ok(false);
        }
        let Some(status) = self.overall_status().await? else {
            return Ok(false);
        };
        if !status.is_terminal() {
            return Ok(false);
        }

        if !self.inner.terminal_handled.load(Ordering::Acquire) {
            info!(%status, "overall status is terminal but unhandled, finishing the job");
            self.process_job_status(&StatusUpdate::new(status)).await;
            return Ok(true);
        }
        if self.inner.teardown.is_idle() {
            info!(%status, "retrying teardown of finished job");
            self.kill_deployed_job().await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// React to a new overall status: report it, and tear the job down once it is terminal.
    pub async fn process_job_status(&self, update: &StatusUpdate) {
        if update.status.is_terminal() {
            self.inner.terminal_handled.store(true, Ordering::Release);
        }
        let report = StatusUpdate {
            status_message: describe_status_message(&update.error_code, &update.status_message),
            ..update.clone()
        };
        if let Err(e) = self.inner.reporter.report(&report).await {
            error!(status = %report.status, error = %e, "status report failed");
        }

        if !report.status.is_terminal() {
            return;
        }

        let job = self.job();
        if !job.use_native_distribution {
            let terminal = self.terminal_learners();
            if terminal < u64::from(job.num_learners) {
                debug!(terminal, num_learners = job.num_learners, "waiting for remaining learners");
                tokio::select! {
                    _ = self.inner.shutdown.cancelled() => {}
                    _ = tokio::time::sleep(self.settings().timings.drain_wait) => {}
                }
            }
            if self.terminal_learners() < u64::from(job.num_learners) {
                info!("killing remaining learners");
            } else {
                debug!("all learners finished");
            }
        }

        if let Err(e) = self.kill_deployed_job().await {
            error!(error = %e, "failed to tear down job");
        }
    }

    /// Tear the job down through the lifecycle manager, once.
    pub async fn kill_deployed_job(&self) -> Result<TeardownOutcome, MonitorError> {
        self.inner.teardown.run().await
    }

    /// Move the job to `FAILED` with `code`, report it and tear the job down.
    ///
    /// The overall status goes through the transition lattice, so a job that is already terminal stays as it is
    /// and nothing is reported. Store errors do not stop the report or the teardown.
    pub async fn fail_job(&self, code: &str, message: StatusMessage) -> Result<TeardownOutcome, MonitorError> {
        match self.move_to_failed().await {
            Ok(true) => {}
            Ok(false) => return Ok(TeardownOutcome::AlreadyDone),
            Err(e) => {
                self.inner.metrics.store_connectivity_failed();
                warn!(error = %e, "could not record failure in coordination store");
            }
        }

        let update = StatusUpdate::failed(code, message.as_str());
        if let Err(e) = self.inner.reporter.report(&update).await {
            error!(error_code = code, error = %e, "failure report failed");
        }
        self.kill_deployed_job().await
    }

    /// CAS the overall status to `FAILED`; false if it is already terminal.
    async fn move_to_failed(&self) -> Result<bool, MonitorError> {
        let coord = &self.inner.coord;
        let path = key_path::overall_status_path(&self.job().training_id);
        let failed = TrainingStatus::Failed.as_str();

        loop {
            let Some(current) = coord.get_value(&path).await? else {
                if coord.put_if_missing(&path, failed).await? {
                    break;
                }
                continue;
            };
            if !self.inner.lattice.is_allowed_str(&current, failed) {
                info!(status = %current, "job already finished, not failing it");
                return Ok(false);
            }
            if coord.compare_and_swap(&path, failed, &current).await? {
                info!(from = %current, "overall status changed to FAILED");
                break;
            }
        }
        self.inner.terminal_handled.store(true, Ordering::Release);
        self.inner.metrics.status_transition(failed);
        Ok(true)
    }

    /// Sleep for `delay`; false if the monitor shut down first.
    pub(crate) async fn sleep_or_shutdown(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.inner.shutdown.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}

/// Best-effort `FAILED` report and teardown for a monitor that could not be built.
async fn abort_job(job: &JobIdentity, collab: &Collaborators, timings: &MonitorTimings, code: &str) {
    let job = Arc::new(job.clone());
    let reporter = Reporter::new(
        Arc::clone(&job),
        Arc::clone(&collab.sink),
        Arc::clone(&collab.lifecycle),
        collab.notifier.clone(),
        collab.metrics.clone(),
        timings.sink_retry.clone(),
    );
    let update = StatusUpdate::failed(code, StatusMessage::InternalError.as_str());
    if let Err(e) = reporter.report(&update).await {
        error!(error_code = code, error = %e, "failed to report FAILED status");
    }

    let teardown = Teardown::new(
        job,
        Arc::clone(&collab.lifecycle),
        collab.metrics.clone(),
        timings.teardown_grace,
        timings.kill_retry.clone(),
        CancellationToken::new(),
    );
    if let Err(e) = teardown.run().await {
        error!(error = %e, "failed to kill the deployed job");
    }
}
