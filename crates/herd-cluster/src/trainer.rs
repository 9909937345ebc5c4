use std::time::Duration;

use async_trait::async_trait;
use tonic::transport::Channel;
use tracing::debug;

use herd_model::{JobIdentity, StatusUpdate, TrainingStatus};

use crate::{
    error::ClusterError,
    lifecycle::endpoint,
    proto::trainer::{self, UpdateRequest, trainer_client::TrainerClient},
};

/// Receiver of the authoritative job status.
#[async_trait]
pub trait StatusSink: Send + Sync + 'static {
    async fn update_status(&self, job: &JobIdentity, update: &StatusUpdate) -> Result<(), ClusterError>;
}

/// gRPC client of the trainer service.
#[derive(Clone)]
pub struct GrpcTrainer {
    client: TrainerClient<Channel>,
}

impl GrpcTrainer {
    pub fn connect_lazy(address: &str, timeout: Duration) -> Result<Self, ClusterError> {
        let channel = endpoint(address, timeout)?.connect_lazy();
        Ok(Self {
            client: TrainerClient::new(channel),
        })
    }
}

#[async_trait]
impl StatusSink for GrpcTrainer {
    async fn update_status(&self, job: &JobIdentity, update: &StatusUpdate) -> Result<(), ClusterError> {
        let request = update_request(job, update);
        self.client.clone().update_training_job(request).await?;
        debug!(training_id = %job.training_id, status = %update.status, "trainer updated");
        Ok(())
    }
}

fn update_request(job: &JobIdentity, update: &StatusUpdate) -> UpdateRequest {
    UpdateRequest {
        training_id: job.training_id.clone(),
        user_id: job.user_id.clone(),
        status: wire_status(update.status) as i32,
        status_message: update.status_message.clone(),
        error_code: update.error_code.clone(),
        timestamp: update.timestamp_or_now(),
    }
}

fn wire_status(status: TrainingStatus) -> trainer::Status {
    match status {
        TrainingStatus::NotStarted => trainer::Status::NotStarted,
        TrainingStatus::Pending => trainer::Status::Pending,
        TrainingStatus::Downloading => trainer::Status::Downloading,
        TrainingStatus::Processing => trainer::Status::Processing,
        TrainingStatus::Storing => trainer::Status::Storing,
        TrainingStatus::Completed => trainer::Status::Completed,
        TrainingStatus::Failed => trainer::Status::Failed,
        TrainingStatus::Halted => trainer::Status::Halted,
    }
}
