use thiserror::Error;
use tonic::Code;

#[derive(Error, Debug)]
pub enum CoordError {
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("{op} failed after {attempts} attempts: {last}")]
    StoreUnavailable {
        op: String,
        attempts: u32,
        #[source]
        last: Box<CoordError>,
    },

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("grpc call failed: {0}")]
    Rpc(#[source] Box<tonic::Status>),

    #[error("failed to connect to store: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("queue {0} is empty")]
    QueueEmpty(String),

    #[error("sequence key already exists: {0}")]
    SequenceCollision(String),

    #[error("lease {0:#x} not found")]
    LeaseNotFound(i64),

    #[error("invalid store configuration: {0}")]
    Config(String),

    #[error("store connection is closed")]
    Closed,
}

impl CoordError {
    /// Errors worth retrying: the request may succeed once the store or the network recovers.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoordError::DeadlineExceeded(_) | CoordError::Unavailable(_) | CoordError::Transport(_)
        )
    }
}

impl From<tonic::Status> for CoordError {
    fn from(status: tonic::Status) -> Self {
        match status.code() {
            Code::DeadlineExceeded => CoordError::DeadlineExceeded(status.message().to_string()),
            Code::Unavailable => CoordError::Unavailable(status.message().to_string()),
            Code::Unauthenticated | Code::PermissionDenied => {
                CoordError::Auth(status.message().to_string())
            }
            Code::InvalidArgument => CoordError::InvalidKey(status.message().to_string()),
            _ => CoordError::Rpc(Box::new(status)),
        }
    }
}
