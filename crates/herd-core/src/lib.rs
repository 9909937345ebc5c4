pub mod retry;
pub use retry::{RetryError, retry, retry_if};

mod system;
pub use system::{arch, monitor_id, platform};
