//! Job monitor: follows one distributed training job from deployment to teardown.
//!
//! Learners append their status to per-learner sequences in the coordination store. The monitor
//! replays those entries through the [`TransitionLattice`](herd_model::TransitionLattice) into the
//! job's overall status (every write is compare-and-swap), reports each change to the status sink,
//! and tears the job down exactly once when it reaches a terminal status. Two pod watchers fail the
//! job early when it cannot be scheduled or its images cannot be pulled.

mod aggregate;

mod error;
pub use error::MonitorError;

mod image_pull;
pub use image_pull::ImagePullOutcome;

mod monitor;
pub use monitor::{Collaborators, JobMonitor};

mod report;

mod settings;
pub use settings::{AggregationTrigger, MonitorSettings, MonitorTimings};

mod start;
pub use start::StartOutcome;

mod state;
pub use state::{LearnerLedger, LearnerProgress};

mod teardown;
pub use teardown::TeardownOutcome;
