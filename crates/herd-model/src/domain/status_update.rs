use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::{TrainingStatus, error::ModelError};

/// One status record as posted by a learner, or as reported to the status sink.
///
/// The wire value is either a bare status token (`PROCESSING`) or a JSON object:
/// `{"status":"FAILED","status_message":"51","error_code":"C201","timestamp":1519135679722}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: TrainingStatus,
    #[serde(default)]
    pub status_message: String,
    #[serde(default)]
    pub error_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Deserialize)]
struct WireUpdate {
    status: Option<String>,
    #[serde(default)]
    status_message: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    timestamp: Option<serde_json::Value>,
}

impl StatusUpdate {
    /// Status without message, error code or timestamp.
    pub fn new(status: TrainingStatus) -> Self {
        Self {
            status,
            status_message: String::new(),
            error_code: String::new(),
            timestamp: None,
        }
    }

    /// `FAILED` update carrying an error code and a status message.
    pub fn failed(error_code: impl Into<String>, status_message: impl Into<String>) -> Self {
        Self {
            status: TrainingStatus::Failed,
            status_message: status_message.into(),
            error_code: error_code.into(),
            timestamp: Some(current_timestamp_millis()),
        }
    }

    /// Parse a learner status value.
    ///
    /// Values starting with `{` are decoded as JSON; anything else must be a bare status token.
    pub fn parse(value: &str) -> Result<Self, ModelError> {
        let trimmed = value.trim();
        if !trimmed.starts_with('{') {
            return Ok(Self::new(trimmed.parse()?));
        }

        let wire: WireUpdate = serde_json::from_str(trimmed)
            .map_err(|e| ModelError::InvalidPayload(format!("{e}: {trimmed}")))?;
        let status = wire
            .status
            .ok_or_else(|| ModelError::InvalidPayload(format!("missing status: {trimmed}")))?
            .parse()?;

        let timestamp = match wire.timestamp {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) => Some(s),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            Some(other) => {
                return Err(ModelError::InvalidPayload(format!(
                    "timestamp must be a number or a string, got {other}"
                )));
            }
        };

        Ok(Self {
            status,
            status_message: wire.status_message.unwrap_or_default(),
            error_code: wire.error_code.unwrap_or_default(),
            timestamp,
        })
    }

    /// Encode as the JSON wire form.
    pub fn to_json(&self) -> String {
        // A struct of strings and a unit enum always serializes.
        serde_json::to_string(self).unwrap_or_else(|_| self.status.as_str().to_string())
    }

    /// Timestamp of the update, or the current time when the learner sent none.
    pub fn timestamp_or_now(&self) -> String {
        self.timestamp
            .clone()
            .filter(|ts| !ts.is_empty())
            .unwrap_or_else(current_timestamp_millis)
    }
}

impl From<TrainingStatus> for StatusUpdate {
    fn from(status: TrainingStatus) -> Self {
        StatusUpdate::new(status)
    }
}

/// Milliseconds since the Unix epoch as a decimal string (e.g. `"1519135679722"`).
pub fn current_timestamp_millis() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
        .to_string()
}
