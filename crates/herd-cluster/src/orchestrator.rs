use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ContainerStatus, Pod};
use kube::{Api, ResourceExt, api::ListParams};
use tracing::{debug, info};

use crate::{
    error::ClusterError,
    pods::{ContainerCondition, ContainerSnapshot, PodLister, PodPhase, PodSnapshot},
};

/// [`PodLister`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubePodLister {
    pods: Api<Pod>,
    namespace: String,
}

impl KubePodLister {
    /// Client from the inferred configuration: in-cluster service account first, then `KUBECONFIG`.
    pub async fn connect(namespace: &str) -> Result<Self, ClusterError> {
        let client = kube::Client::try_default().await?;
        info!(namespace, "connected to orchestrator");
        Ok(Self::new(client, namespace))
    }

    pub fn new(client: kube::Client, namespace: &str) -> Self {
        Self {
            pods: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

#[async_trait]
impl PodLister for KubePodLister {
    async fn list_pods(&self, label_selector: &str) -> Result<Vec<PodSnapshot>, ClusterError> {
        let list = self
            .pods
            .list(&ListParams::default().labels(label_selector))
            .await?;
        debug!(namespace = %self.namespace, label_selector, pods = list.items.len(), "listed pods");
        Ok(list.items.iter().map(snapshot).collect())
    }
}

pub(crate) fn snapshot(pod: &Pod) -> PodSnapshot {
    let name = pod.name_any();
    let Some(status) = &pod.status else {
        return PodSnapshot {
            name,
            ..PodSnapshot::default()
        };
    };

    let unschedulable = status
        .conditions
        .iter()
        .flatten()
        .any(|c| c.type_ == "PodScheduled" && c.status == "False");
    let containers = status
        .init_container_statuses
        .iter()
        .flatten()
        .chain(status.container_statuses.iter().flatten())
        .map(container)
        .collect();

    PodSnapshot {
        name,
        phase: status
            .phase
            .as_deref()
            .map_or(PodPhase::Unknown, PodPhase::from_phase),
        unschedulable,
        reason: status.reason.clone().unwrap_or_default(),
        message: status.message.clone().unwrap_or_default(),
        containers,
    }
}

fn container(cs: &ContainerStatus) -> ContainerSnapshot {
    let state = cs.state.as_ref();
    ContainerSnapshot {
        name: cs.name.clone(),
        waiting: state.and_then(|s| s.waiting.as_ref()).map(|w| ContainerCondition {
            reason: w.reason.clone().unwrap_or_default(),
            message: w.message.clone().unwrap_or_default(),
        }),
        terminated: state.and_then(|s| s.terminated.as_ref()).map(|t| ContainerCondition {
            reason: t.reason.clone().unwrap_or_default(),
            message: t.message.clone().unwrap_or_default(),
        }),
    }
}
