#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;

use herd_cluster::{
    ClusterError, ContainerCondition, ContainerSnapshot, Lifecycle, PodLister, PodPhase, PodSnapshot, StatusSink,
};
use herd_coord::{Coordinator, MEMORY_ENDPOINT, MemoryBackend, StoreConfig};
use herd_model::{BackoffStrategy, JobIdentity, StatusUpdate, TrainingStatus, key_path};
use herd_monitor::{AggregationTrigger, Collaborators, JobMonitor, MonitorSettings, MonitorTimings};
use herd_prometheus::MonitorMetrics;

/// Pod lister replaying scripted snapshots; the last one repeats.
#[derive(Default)]
pub struct FakePods {
    script: Mutex<VecDeque<Vec<PodSnapshot>>>,
    current: Mutex<Vec<PodSnapshot>>,
    failures_left: AtomicUsize,
    pub calls: AtomicUsize,
}

impl FakePods {
    pub fn showing(pods: Vec<PodSnapshot>) -> Arc<Self> {
        let fake = Self::default();
        *fake.current.lock().unwrap() = pods;
        Arc::new(fake)
    }

    pub fn then(&self, pods: Vec<PodSnapshot>) {
        self.script.lock().unwrap().push_back(pods);
    }

    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl PodLister for FakePods {
    async fn list_pods(&self, label_selector: &str) -> Result<Vec<PodSnapshot>, ClusterError> {
        assert!(label_selector.starts_with("training_id=="));
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ClusterError::Rejected("orchestrator unavailable".into()));
        }
        let mut current = self.current.lock().unwrap();
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            *current = next;
        }
        Ok(current.clone())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub updates: Mutex<Vec<StatusUpdate>>,
    pub failing: AtomicBool,
}

impl RecordingSink {
    pub fn statuses(&self) -> Vec<TrainingStatus> {
        self.updates.lock().unwrap().iter().map(|u| u.status).collect()
    }

    pub fn last(&self) -> Option<StatusUpdate> {
        self.updates.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl StatusSink for RecordingSink {
    async fn update_status(&self, _job: &JobIdentity, update: &StatusUpdate) -> Result<(), ClusterError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ClusterError::Rejected("trainer unavailable".into()));
        }
        self.updates.lock().unwrap().push(update.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingLifecycle {
    pub kills: AtomicUsize,
    pub failing: AtomicBool,
}

impl RecordingLifecycle {
    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Lifecycle for RecordingLifecycle {
    async fn kill_training_job(&self, job: &JobIdentity) -> Result<(), ClusterError> {
        assert!(!job.job_name.is_empty());
        if self.failing.load(Ordering::SeqCst) {
            return Err(ClusterError::Rejected("lifecycle manager unavailable".into()));
        }
        self.kills.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn event_endpoints(&self, _: &str, _: &str, _: &str) -> Result<Vec<String>, ClusterError> {
        Ok(Vec::new())
    }
}

pub fn job(num_learners: u32, native: bool) -> JobIdentity {
    JobIdentity {
        training_id: "training-abc".into(),
        user_id: "user-1".into(),
        job_name: "learner-abc".into(),
        num_learners,
        use_native_distribution: native,
        uses_parameter_server: false,
    }
}

pub fn timings() -> MonitorTimings {
    MonitorTimings {
        start_poll_interval: Duration::from_secs(30),
        start_poll_attempts: 3,
        image_pull_retry: BackoffStrategy {
            max_elapsed_ms: None,
            ..BackoffStrategy::exponential(100, 1_000, 0)
        },
        image_pull_pause: Duration::from_secs(5),
        seed_retry: BackoffStrategy::exponential(100, 1_000, 10_000),
        sweep_interval: Duration::from_secs(60),
        sink_retry: BackoffStrategy::fixed(100, 2),
        drain_wait: Duration::from_secs(60),
        teardown_grace: Duration::from_secs(10),
        kill_retry: BackoffStrategy::fixed(100, 3),
        orchestrator_connect_retry: BackoffStrategy::fixed(100, 2),
    }
}

pub fn store_config() -> StoreConfig {
    StoreConfig::default()
        .with_endpoints(MEMORY_ENDPOINT)
        .with_prefix("herd")
}

pub struct Harness {
    pub monitor: JobMonitor,
    pub coord: Coordinator,
    pub pods: Arc<FakePods>,
    pub sink: Arc<RecordingSink>,
    pub lifecycle: Arc<RecordingLifecycle>,
    pub metrics: MonitorMetrics,
}

impl Harness {
    pub fn new(job: JobIdentity) -> Self {
        Self::with(job, AggregationTrigger::Poll, FakePods::showing(Vec::new()))
    }

    pub fn with(job: JobIdentity, trigger: AggregationTrigger, pods: Arc<FakePods>) -> Self {
        let coord = Coordinator::with_backend(Arc::new(MemoryBackend::new()), &store_config());
        Self::on(coord, job, trigger, pods)
    }

    /// Another monitor for the same job over an existing store.
    pub fn on(coord: Coordinator, job: JobIdentity, trigger: AggregationTrigger, pods: Arc<FakePods>) -> Self {
        let sink = Arc::new(RecordingSink::default());
        let lifecycle = Arc::new(RecordingLifecycle::default());
        let metrics = MonitorMetrics::new().unwrap();
        let collab = Collaborators {
            sink: sink.clone(),
            lifecycle: lifecycle.clone(),
            notifier: None,
            metrics: metrics.clone(),
        };
        let settings = MonitorSettings {
            timings: timings(),
            trigger,
        };
        let monitor = JobMonitor::new(job, coord.clone(), pods.clone(), collab, settings).unwrap();
        Self {
            monitor,
            coord,
            pods,
            sink,
            lifecycle,
            metrics,
        }
    }

    pub async fn seed(&self) {
        let path = key_path::overall_status_path(&self.monitor.job().training_id);
        assert!(self.coord.put_if_missing(&path, "NOT_STARTED").await.unwrap());
    }

    pub async fn post(&self, learner: u32, value: &str) {
        let path = key_path::learner_status_path(&self.monitor.job().training_id, learner);
        self.coord.value_sequence(&path).add_new(value).await.unwrap();
    }

    pub async fn overall(&self) -> Option<String> {
        let path = key_path::overall_status_path(&self.monitor.job().training_id);
        self.coord.get_value(&path).await.unwrap()
    }

    /// Value of a sample in the text exposition, 0 when absent.
    pub fn counter(&self, sample: &str) -> f64 {
        let text = self.metrics.encode_text().unwrap();
        text.lines()
            .filter(|l| !l.starts_with('#'))
            .find_map(|l| {
                let (name, value) = l.rsplit_once(' ')?;
                (name == sample).then(|| value.parse().unwrap())
            })
            .unwrap_or(0.0)
    }
}

pub fn pod(name: &str, phase: PodPhase) -> PodSnapshot {
    PodSnapshot {
        name: name.into(),
        phase,
        containers: vec![ContainerSnapshot {
            name: "learner".into(),
            ..ContainerSnapshot::default()
        }],
        ..PodSnapshot::default()
    }
}

pub fn unschedulable_pod(name: &str) -> PodSnapshot {
    PodSnapshot {
        unschedulable: true,
        ..pod(name, PodPhase::Pending)
    }
}

pub fn waiting_pod(name: &str, reason: &str) -> PodSnapshot {
    PodSnapshot {
        name: name.into(),
        phase: PodPhase::Pending,
        containers: vec![ContainerSnapshot {
            name: "learner".into(),
            waiting: Some(ContainerCondition {
                reason: reason.into(),
                message: format!("{reason} for learner image"),
            }),
            terminated: None,
        }],
        ..PodSnapshot::default()
    }
}

pub fn running(n: usize) -> Vec<PodSnapshot> {
    (0..n).map(|i| pod(&format!("pod-{i}"), PodPhase::Running)).collect()
}
