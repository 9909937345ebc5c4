use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("unknown training status: {0:?}")]
    UnknownStatus(String),
    #[error("invalid status payload: {0}")]
    InvalidPayload(String),
    #[error("learner index must be in 1..={max}, got {index}")]
    LearnerOutOfRange { index: u32, max: u32 },
    #[error("invalid job identity: {0}")]
    InvalidJob(String),
}
