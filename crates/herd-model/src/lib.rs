//! Data model shared by the coordination store client, the cluster clients and the job monitor.

pub mod domain;
pub use domain::*;

mod backoff;
pub use backoff::{BackoffStrategy, JitterStrategy};

mod error;
pub use error::ModelError;
