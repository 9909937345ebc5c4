//! Error codes attached to `FAILED` status reports.
//!
//! `S*` codes are platform (server side) failures, `C*` codes are caused by the submitted job.

/// Normal, non-error situation.
pub const NORMAL: &str = "000";

/// Scheduling failed due to resource constraints.
pub const INSUFFICIENT_RESOURCES: &str = "S100";
/// General deployment error.
pub const FAILED_DEPLOY: &str = "S101";
/// Parameter server failed.
pub const FAILED_PS: &str = "S102";
/// A learner image could not be pulled.
pub const IMAGE_PULL: &str = "S103";
/// A pod failed for a reason the orchestrator did not expose.
pub const FAILED_POD_REASON_UNKNOWN: &str = "S104";
/// The orchestrator could not be reached.
pub const ORCHESTRATOR_CONNECTION: &str = "S200";
/// The coordination store could not be reached.
pub const STORE_CONNECTION: &str = "S201";
/// Adding the job to the scheduling queue failed.
pub const FAIL_ENQUEUE: &str = "S210";
/// A job was dequeued incorrectly.
pub const FAIL_DEQUEUE: &str = "S211";
/// Loading the model code failed.
pub const FAIL_LOAD_MODEL: &str = "S301";
/// Loading the training data failed.
pub const FAIL_LOAD_DATA: &str = "S302";
/// Storing the trained model and logs failed.
pub const FAIL_STORE_RESULTS: &str = "S303";
/// Storing logs after a job error failed.
pub const FAIL_STORE_RESULTS_ON_FAIL: &str = "S304";
/// Storing logs after a halt failed.
pub const FAIL_STORE_RESULTS_ON_HALT: &str = "S305";

/// Invalid manifest file.
pub const INVALID_MANIFEST_FILE: &str = "C101";
/// Invalid ZIP file.
pub const INVALID_ZIP_FILE: &str = "C102";
/// Invalid credentials.
pub const INVALID_CREDENTIALS: &str = "C103";
/// Invalid resource specification.
pub const INVALID_RESOURCE_SPECS: &str = "C104";
/// The learner process crashed.
pub const LEARNER_PROCESS_CRASH: &str = "C201";

/// Coarse status message reported next to an error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusMessage {
    NormalOperation,
    InsufficientResources,
    InternalError,
}

impl StatusMessage {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusMessage::NormalOperation => "NORMAL_OPERATION",
            StatusMessage::InsufficientResources => "INSUFFICIENT_RESOURCES",
            StatusMessage::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// Human readable message for a learner-reported failure.
///
/// Learners put their exit code into `status_message`; for load/store and crash codes this is turned into a sentence.
/// Any other code is returned unchanged.
pub fn describe_status_message(error_code: &str, status_message: &str) -> String {
    let what = match error_code {
        FAIL_LOAD_MODEL => "Unable to load model",
        FAIL_LOAD_DATA => "Unable to load training data",
        FAIL_STORE_RESULTS => "Unable to store results",
        FAIL_STORE_RESULTS_ON_FAIL => "Unable to store results on failure",
        FAIL_STORE_RESULTS_ON_HALT => "Unable to store results on halt",
        LEARNER_PROCESS_CRASH => "Learner process terminated with an error",
        _ => return error_code.to_string(),
    };
    format!("{what} (exit code: '{status_message}')")
}
