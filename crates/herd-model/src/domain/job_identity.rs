use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Immutable identity of the training job a monitor is responsible for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobIdentity {
    pub training_id: String,
    pub user_id: String,
    /// Deployment name known to the orchestrator.
    pub job_name: String,
    pub num_learners: u32,
    /// Learners are wired by the framework itself; terminal jobs are torn down without a drain wait.
    #[serde(default)]
    pub use_native_distribution: bool,
    /// A parameter server pod runs next to the learners.
    #[serde(default)]
    pub uses_parameter_server: bool,
}

impl JobIdentity {
    /// Check the invariants the monitor relies on.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.training_id.trim().is_empty() {
            return Err(ModelError::InvalidJob("training id is empty".into()));
        }
        if self.training_id.contains('/') {
            return Err(ModelError::InvalidJob(format!(
                "training id must not contain '/': {}",
                self.training_id
            )));
        }
        if self.num_learners == 0 {
            return Err(ModelError::InvalidJob("job needs at least one learner".into()));
        }
        Ok(())
    }

    /// Number of running pods that mean the job has started: learners plus the helper pod, plus the parameter server.
    pub fn expected_running_pods(&self) -> usize {
        let helpers = if self.uses_parameter_server { 2 } else { 1 };
        self.num_learners as usize + helpers
    }

    /// Iterator over the 1-based learner indices.
    pub fn learners(&self) -> std::ops::RangeInclusive<u32> {
        1..=self.num_learners
    }

    /// Label selector matching every pod of the job.
    pub fn label_selector(&self) -> String {
        format!("training_id=={}", self.training_id)
    }
}
