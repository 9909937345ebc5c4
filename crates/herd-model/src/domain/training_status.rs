use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Lifecycle state of a training job or of a single learner.
///
/// The same vocabulary is used for the learner status records and for the overall job status key.
/// Tokens on the wire are the upper snake case names (`"NOT_STARTED"`, `"PROCESSING"`, ...).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrainingStatus {
    /// Job accepted, nothing reported yet.
    #[default]
    NotStarted,
    /// Learners are scheduled but not running.
    Pending,
    /// Learners are fetching model code and training data.
    Downloading,
    /// Training is in progress.
    Processing,
    /// Learners are uploading trained model and logs.
    Storing,
    /// Training finished successfully.
    Completed,
    /// Training failed.
    Failed,
    /// Training was halted on request.
    Halted,
}

impl TrainingStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [TrainingStatus; 8] = [
        TrainingStatus::NotStarted,
        TrainingStatus::Pending,
        TrainingStatus::Downloading,
        TrainingStatus::Processing,
        TrainingStatus::Storing,
        TrainingStatus::Completed,
        TrainingStatus::Failed,
        TrainingStatus::Halted,
    ];

    /// Wire token of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            TrainingStatus::NotStarted => "NOT_STARTED",
            TrainingStatus::Pending => "PENDING",
            TrainingStatus::Downloading => "DOWNLOADING",
            TrainingStatus::Processing => "PROCESSING",
            TrainingStatus::Storing => "STORING",
            TrainingStatus::Completed => "COMPLETED",
            TrainingStatus::Failed => "FAILED",
            TrainingStatus::Halted => "HALTED",
        }
    }

    /// Returns `true` for `COMPLETED`, `FAILED` and `HALTED`; no transition leaves these.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TrainingStatus::Completed | TrainingStatus::Failed | TrainingStatus::Halted
        )
    }
}

impl fmt::Display for TrainingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrainingStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TrainingStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s.trim())
            .ok_or_else(|| ModelError::UnknownStatus(s.to_string()))
    }
}
