//! Job submission DTOs

use serde::{Deserialize, Serialize};

use crate::domain::job::JobState;

/// Acknowledgement returned by the remote service for an async submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_id: String,
    #[serde(rename = "status")]
    pub state: JobState,
    #[serde(default)]
    pub message: String,
    /// Polling URL advertised by the service, informational only
    #[serde(default)]
    pub status_url: String,
}

/// Outcome of a submission
///
/// Asynchronous submissions are acknowledged with a [`JobHandle`] and run in
/// the background; synchronous ones block on the remote side and return the
/// full result inline.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Queued(JobHandle),
    Inline(serde_json::Value),
}

impl SubmitOutcome {
    /// Remote job id, for async submissions
    pub fn job_id(&self) -> Option<&str> {
        match self {
            SubmitOutcome::Queued(handle) => Some(&handle.job_id),
            SubmitOutcome::Inline(_) => None,
        }
    }
}

/// Body of the remote `DELETE /jobs/{id}` response
#[derive(Debug, Clone, Deserialize)]
pub struct CancelAck {
    #[serde(default)]
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decodes_submission_ack() {
        let handle: JobHandle = serde_json::from_str(
            r#"{"job_id": "J1", "status": "PENDING", "message": "queued", "status_url": "/status/J1"}"#,
        )
        .unwrap();
        assert_eq!(handle.job_id, "J1");
        assert_eq!(handle.state, JobState::Pending);
    }

    #[test]
    fn test_outcome_job_id() {
        let handle = JobHandle {
            job_id: "J9".to_string(),
            state: JobState::Pending,
            message: String::new(),
            status_url: String::new(),
        };
        assert_eq!(SubmitOutcome::Queued(handle).job_id(), Some("J9"));
        assert_eq!(SubmitOutcome::Inline(serde_json::json!({})).job_id(), None);
    }
}
