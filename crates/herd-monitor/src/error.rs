use thiserror::Error;

use herd_cluster::ClusterError;
use herd_coord::CoordError;
use herd_model::ModelError;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("invalid job: {0}")]
    Job(#[from] ModelError),

    #[error("coordination store: {0}")]
    Store(#[from] CoordError),

    #[error("orchestrator: {0}")]
    Orchestrator(#[source] ClusterError),

    #[error("teardown failed after {attempts} attempts: {source}")]
    Teardown {
        attempts: u32,
        #[source]
        source: ClusterError,
    },

    #[error("overall status of {0} is missing")]
    MissingStatus(String),
}
