mod training_status;
pub use training_status::TrainingStatus;

mod status_update;
pub use status_update::{StatusUpdate, current_timestamp_millis};

pub mod error_code;
pub use error_code::{StatusMessage, describe_status_message};

mod job_identity;
pub use job_identity::JobIdentity;

mod lattice;
pub use lattice::TransitionLattice;

pub mod key_path;
