//! Orchestrator-neutral view of the pods of a job and the checks run against it.

use async_trait::async_trait;

use crate::error::ClusterError;

/// Waiting reasons that mean the container image cannot be fetched.
pub const IMAGE_PULL_REASONS: [&str; 2] = ["ErrImagePull", "ImagePullBackOff"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    #[default]
    Unknown,
}

impl PodPhase {
    pub fn from_phase(phase: &str) -> Self {
        match phase {
            "Pending" => PodPhase::Pending,
            "Running" => PodPhase::Running,
            "Succeeded" => PodPhase::Succeeded,
            "Failed" => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

/// Reason and message of a waiting or terminated container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerCondition {
    pub reason: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSnapshot {
    pub name: String,
    pub waiting: Option<ContainerCondition>,
    pub terminated: Option<ContainerCondition>,
}

impl ContainerSnapshot {
    pub fn is_image_pull_failure(&self) -> bool {
        self.waiting
            .as_ref()
            .is_some_and(|w| IMAGE_PULL_REASONS.contains(&w.reason.as_str()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodSnapshot {
    pub name: String,
    pub phase: PodPhase,
    /// The scheduler reported `PodScheduled=False`.
    pub unschedulable: bool,
    pub reason: String,
    pub message: String,
    pub containers: Vec<ContainerSnapshot>,
}

/// Pod counts by phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PodTally {
    pub total: usize,
    pub running: usize,
    pub pending: usize,
    pub failed: usize,
}

pub fn tally(pods: &[PodSnapshot]) -> PodTally {
    pods.iter().fold(
        PodTally {
            total: pods.len(),
            ..PodTally::default()
        },
        |mut t, pod| {
            match pod.phase {
                PodPhase::Running => t.running += 1,
                PodPhase::Pending => t.pending += 1,
                PodPhase::Failed => t.failed += 1,
                PodPhase::Succeeded | PodPhase::Unknown => {}
            }
            t
        },
    )
}

/// Outcome of one image-pull inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImagePullCheck {
    /// A container cannot pull its image.
    Failed {
        pod: String,
        container: String,
        reason: String,
        message: String,
    },
    /// Containers are not up yet: one is waiting for another reason, or no container status is reported.
    Waiting,
    /// Every reported container is past its image pull.
    Clear,
}

/// An empty pod list, or a pending pod without container statuses, counts as still waiting.
pub fn inspect_image_pull(pods: &[PodSnapshot]) -> ImagePullCheck {
    let mut waiting = pods.is_empty();
    for pod in pods {
        for c in &pod.containers {
            let Some(w) = &c.waiting else { continue };
            if c.is_image_pull_failure() {
                return ImagePullCheck::Failed {
                    pod: pod.name.clone(),
                    container: c.name.clone(),
                    reason: w.reason.clone(),
                    message: w.message.clone(),
                };
            }
            waiting = true;
        }
        if pod.phase == PodPhase::Pending && pod.containers.is_empty() {
            waiting = true;
        }
    }
    if waiting {
        ImagePullCheck::Waiting
    } else {
        ImagePullCheck::Clear
    }
}

/// Lists the pods matching a label selector in the learner namespace.
#[async_trait]
pub trait PodLister: Send + Sync + 'static {
    async fn list_pods(&self, label_selector: &str) -> Result<Vec<PodSnapshot>, ClusterError>;
}
