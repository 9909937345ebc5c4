use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("orchestrator request failed: {0}")]
    Kube(#[from] kube::Error),

    #[error("grpc call failed: {0}")]
    Grpc(#[source] Box<tonic::Status>),

    #[error("failed to connect: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid endpoint {0:?}")]
    InvalidEndpoint(String),

    #[error("request rejected: {0}")]
    Rejected(String),
}

impl From<tonic::Status> for ClusterError {
    fn from(status: tonic::Status) -> Self {
        ClusterError::Grpc(Box::new(status))
    }
}
