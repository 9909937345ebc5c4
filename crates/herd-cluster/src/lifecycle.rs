use std::time::Duration;

use async_trait::async_trait;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

use herd_model::JobIdentity;

use crate::{
    error::ClusterError,
    proto::lcm::{
        GetEventTypeEndpointsRequest, JobKillRequest, lifecycle_manager_client::LifecycleManagerClient,
    },
};

/// Lifecycle manager: garbage-collects deployed jobs and knows where events are delivered.
#[async_trait]
pub trait Lifecycle: Send + Sync + 'static {
    /// Ask for every resource of the job to be torn down.
    async fn kill_training_job(&self, job: &JobIdentity) -> Result<(), ClusterError>;

    /// URLs registered for `event_type` (`status`, `metrics` or `all`).
    async fn event_endpoints(
        &self,
        training_id: &str,
        user_id: &str,
        event_type: &str,
    ) -> Result<Vec<String>, ClusterError>;
}

/// gRPC client of the lifecycle manager.
#[derive(Clone)]
pub struct GrpcLifecycle {
    client: LifecycleManagerClient<Channel>,
}

impl GrpcLifecycle {
    /// The channel connects on first use; `timeout` bounds every call.
    pub fn connect_lazy(address: &str, timeout: Duration) -> Result<Self, ClusterError> {
        let channel = endpoint(address, timeout)?.connect_lazy();
        Ok(Self {
            client: LifecycleManagerClient::new(channel),
        })
    }
}

pub(crate) fn endpoint(address: &str, timeout: Duration) -> Result<Endpoint, ClusterError> {
    Endpoint::from_shared(address.to_string())
        .map(|e| e.timeout(timeout).connect_timeout(timeout))
        .map_err(|_| ClusterError::InvalidEndpoint(address.to_string()))
}

#[async_trait]
impl Lifecycle for GrpcLifecycle {
    async fn kill_training_job(&self, job: &JobIdentity) -> Result<(), ClusterError> {
        let request = JobKillRequest {
            name: job.job_name.clone(),
            training_id: job.training_id.clone(),
            user_id: job.user_id.clone(),
        };
        self.client.clone().kill_training_job(request).await?;
        debug!(training_id = %job.training_id, "kill request accepted");
        Ok(())
    }

    async fn event_endpoints(
        &self,
        training_id: &str,
        user_id: &str,
        event_type: &str,
    ) -> Result<Vec<String>, ClusterError> {
        let request = GetEventTypeEndpointsRequest {
            training_id: training_id.to_string(),
            user_id: user_id.to_string(),
            event_type: event_type.to_string(),
        };
        let response = self
            .client
            .clone()
            .get_event_type_endpoints(request)
            .await?
            .into_inner();
        Ok(response.endpoints.into_iter().map(|e| e.url).collect())
    }
}
