//! Clients of the services around a training job: the orchestrator (pods), the lifecycle manager,
//! the trainer status sink and the HTTP event endpoints.

pub mod proto {
    pub mod lcm {
        tonic::include_proto!("herd.lcm.v1");
    }
    pub mod trainer {
        tonic::include_proto!("herd.trainer.v1");
    }
}

mod error;
pub use error::ClusterError;

pub mod pods;
pub use pods::{
    ContainerCondition, ContainerSnapshot, IMAGE_PULL_REASONS, ImagePullCheck, PodLister, PodPhase,
    PodSnapshot, PodTally, inspect_image_pull, tally,
};

mod orchestrator;
pub use orchestrator::KubePodLister;

mod lifecycle;
pub use lifecycle::{GrpcLifecycle, Lifecycle};

mod trainer;
pub use trainer::{GrpcTrainer, StatusSink};

mod notify;
pub use notify::{EVENT_TYPE_ALL, EVENT_TYPE_STATUS, EventNotifier, endpoints_for};
