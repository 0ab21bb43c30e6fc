//! Job endpoints of the remote runner service

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use tracing::debug;

use crate::RunnerClient;
use crate::error::{ClientError, Result};
use gantry_core::domain::job::JobStatus;
use gantry_core::domain::log::LogEntry;
use gantry_core::dto::job::{CancelAck, JobHandle, SubmitOutcome};
use gantry_core::dto::payload::JobPayload;

/// Remote workflow categories the service accepts
pub const ALLOWED_CATEGORIES: &[&str] = &["DOWNLOAD", "UPLOAD", "CONNECTION_TEST"];

/// Operations the remote runner service offers
///
/// Object-safe seam between the HTTP client and its consumers (monitor,
/// engine), so they can be driven by an in-process fake in tests. `payload`
/// is already serialized here; the typed, validating entry point is
/// [`RunnerClient::submit_job`].
#[async_trait]
pub trait JobService: Send + Sync {
    /// Submit a unit of work to the given workflow category
    ///
    /// With `synchronous` set, the call blocks until the service returns the
    /// full result inline instead of a job id.
    async fn submit(&self, category: &str, payload: Value, synchronous: bool)
    -> Result<SubmitOutcome>;

    /// Fetch the current status of a job
    async fn query_status(&self, job_id: &str) -> Result<JobStatus>;

    /// Ask the service to cancel a job; true if the service accepted
    async fn cancel(&self, job_id: &str) -> Result<bool>;

    /// Fetch the log lines the runner has accumulated for a job
    async fn fetch_logs(&self, job_id: &str) -> Result<Vec<LogEntry>>;

    /// List recently known jobs, newest first
    async fn list_jobs(&self, limit: usize) -> Result<Vec<JobStatus>>;

    /// Single unretried availability probe; false on any failure, never errors
    async fn health_check(&self) -> bool;
}

impl RunnerClient {
    /// Validate and submit a typed payload
    ///
    /// Fails with [`ClientError::Validation`] listing **every** missing or
    /// invalid field before anything is sent over the wire.
    pub async fn submit_job<P: JobPayload>(
        &self,
        category: &str,
        payload: &P,
        synchronous: bool,
    ) -> Result<SubmitOutcome> {
        let errors = payload.validate();
        if !errors.is_empty() {
            return Err(ClientError::Validation(errors));
        }

        let value = serde_json::to_value(payload)
            .map_err(|e| ClientError::Parse(format!("failed to serialize payload: {}", e)))?;

        self.submit(category, value, synchronous).await
    }
}

#[async_trait]
impl JobService for RunnerClient {
    async fn submit(
        &self,
        category: &str,
        payload: Value,
        synchronous: bool,
    ) -> Result<SubmitOutcome> {
        let category = category.to_uppercase();
        if !ALLOWED_CATEGORIES.contains(&category.as_str()) {
            return Err(ClientError::InvalidCategory(category));
        }

        let mut path = format!("/execute/{}", category);
        if synchronous {
            path.push_str("/sync");
        }

        let response = self.request(Method::POST, &path, Some(&payload)).await?;

        if synchronous {
            let result = self.parse_json(response).await?;
            Ok(SubmitOutcome::Inline(result))
        } else {
            let handle: JobHandle = self.parse_json(response).await?;
            debug!("job {} queued for category {}", handle.job_id, category);
            Ok(SubmitOutcome::Queued(handle))
        }
    }

    async fn query_status(&self, job_id: &str) -> Result<JobStatus> {
        let response = self
            .request(Method::GET, &format!("/status/{}", job_id), None)
            .await
            .map_err(|err| match err {
                ClientError::Remote { status: 404, .. } => {
                    ClientError::NotFound(format!("job {}", job_id))
                }
                other => other,
            })?;

        self.parse_json(response).await
    }

    async fn cancel(&self, job_id: &str) -> Result<bool> {
        match self
            .request(Method::DELETE, &format!("/jobs/{}", job_id), None)
            .await
        {
            Ok(response) => {
                // Some deployments answer 200 with an empty body; treat a
                // successful status without an ack as accepted.
                let ack: CancelAck = self
                    .parse_json(response)
                    .await
                    .unwrap_or(CancelAck { success: true });
                Ok(ack.success)
            }
            // A definitive remote refusal (unknown job, already finished)
            // means "not cancelled", not a client failure.
            Err(ClientError::Remote { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn fetch_logs(&self, job_id: &str) -> Result<Vec<LogEntry>> {
        let response = self
            .request(Method::GET, &format!("/jobs/{}/logs", job_id), None)
            .await
            .map_err(|err| match err {
                ClientError::Remote { status: 404, .. } => {
                    ClientError::NotFound(format!("job {}", job_id))
                }
                other => other,
            })?;

        self.parse_json(response).await
    }

    async fn list_jobs(&self, limit: usize) -> Result<Vec<JobStatus>> {
        let response = self
            .request(Method::GET, &format!("/jobs?limit={}", limit), None)
            .await?;

        self.parse_json(response).await
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/health", self.base_url());
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                debug!("health probe failed: {}", err);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    use gantry_core::domain::job::JobState;
    use gantry_core::dto::payload::DownloadPayload;

    fn fast_client(base_url: &str) -> RunnerClient {
        RunnerClient::new(base_url).with_retry_policy(3, Duration::from_millis(1))
    }

    fn valid_payload() -> DownloadPayload {
        DownloadPayload {
            login: "acme".to_string(),
            password: "secret".to_string(),
            filter: "monthly_invoice".to_string(),
            tax_id: "12.345.678/0001-90".to_string(),
        }
    }

    #[tokio::test]
    async fn test_retry_ceiling_on_5xx() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/status/J1")
            .with_status(503)
            .with_body("unavailable")
            .expect(4)
            .create_async()
            .await;

        let client = fast_client(&server.url());
        let err = client.query_status("J1").await.unwrap_err();

        // max_retries = 3 means exactly 4 attempts, then the error surfaces.
        mock.assert_async().await;
        match err {
            ClientError::Remote { status, .. } => assert_eq!(status, 503),
            other => panic!("expected Remote, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_404_is_never_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/status/GONE")
            .with_status(404)
            .with_body("no such job")
            .expect(1)
            .create_async()
            .await;

        let client = fast_client(&server.url());
        let err = client.query_status("GONE").await.unwrap_err();

        mock.assert_async().await;
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_submit_returns_job_handle() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/execute/DOWNLOAD")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"job_id": "J1", "status": "PENDING", "message": "queued", "status_url": "/status/J1"}"#,
            )
            .create_async()
            .await;

        let client = fast_client(&server.url());
        let outcome = client
            .submit_job("DOWNLOAD", &valid_payload(), false)
            .await
            .unwrap();

        mock.assert_async().await;
        match outcome {
            SubmitOutcome::Queued(handle) => {
                assert_eq!(handle.job_id, "J1");
                assert_eq!(handle.state, JobState::Pending);
            }
            other => panic!("expected Queued, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_synchronous_submit_returns_inline_result() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/execute/DOWNLOAD/sync")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"artifact_url": "https://files.example/a.pdf"}"#)
            .create_async()
            .await;

        let client = fast_client(&server.url());
        let outcome = client
            .submit_job("DOWNLOAD", &valid_payload(), true)
            .await
            .unwrap();

        mock.assert_async().await;
        match outcome {
            SubmitOutcome::Inline(value) => {
                assert_eq!(value["artifact_url"], "https://files.example/a.pdf");
            }
            other => panic!("expected Inline, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_payload_never_hits_the_wire() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/execute/DOWNLOAD")
            .expect(0)
            .create_async()
            .await;

        let client = fast_client(&server.url());
        let payload = DownloadPayload {
            login: String::new(),
            password: String::new(),
            filter: "monthly_invoice".to_string(),
            tax_id: String::new(),
        };
        let err = client.submit_job("DOWNLOAD", &payload, false).await.unwrap_err();

        mock.assert_async().await;
        match err {
            ClientError::Validation(errors) => assert_eq!(errors.len(), 3),
            other => panic!("expected Validation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_category_is_rejected_locally() {
        let server = mockito::Server::new_async().await;

        let client = fast_client(&server.url());
        let err = client
            .submit_job("REBOOT_PORTAL", &valid_payload(), false)
            .await
            .unwrap_err();

        match err {
            ClientError::InvalidCategory(category) => assert_eq!(category, "REBOOT_PORTAL"),
            other => panic!("expected InvalidCategory, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancel_maps_remote_answer() {
        let mut server = mockito::Server::new_async().await;
        let _accepted = server
            .mock("DELETE", "/jobs/J1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success": true}"#)
            .create_async()
            .await;
        let _refused = server
            .mock("DELETE", "/jobs/DONE")
            .with_status(409)
            .with_body("already finished")
            .create_async()
            .await;

        let client = fast_client(&server.url());
        assert!(client.cancel("J1").await.unwrap());
        assert!(!client.cancel("DONE").await.unwrap());
    }

    #[tokio::test]
    async fn test_fetch_logs_preserves_order() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/jobs/J1/logs")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[
                    {"timestamp": "2026-08-01T12:00:00Z", "level": "INFO", "message": "first"},
                    {"timestamp": "2026-08-01T12:00:05Z", "level": "INFO", "message": "second"}
                ]"#,
            )
            .create_async()
            .await;

        let client = fast_client(&server.url());
        let logs = client.fetch_logs("J1").await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].message, "first");
        assert_eq!(logs[1].message, "second");
    }

    #[tokio::test]
    async fn test_list_jobs() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/jobs?limit=2")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[
                    {"job_id": "J2", "status": "RUNNING", "progress": 10},
                    {"job_id": "J1", "status": "COMPLETED", "progress": 100}
                ]"#,
            )
            .create_async()
            .await;

        let client = fast_client(&server.url());
        let jobs = client.list_jobs(2).await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].job_id, "J2");
    }

    #[tokio::test]
    async fn test_health_check_never_errors() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/health")
            .with_status(500)
            .expect(1)
            .create_async()
            .await;

        let client = fast_client(&server.url());
        assert!(!client.health_check().await);
        // One probe, no retries.
        mock.assert_async().await;

        // Unreachable endpoint is also just "unhealthy".
        let dead = fast_client("http://127.0.0.1:1");
        assert!(!dead.health_check().await);
    }

    #[tokio::test]
    async fn test_network_errors_surface_after_retries() {
        let client = RunnerClient::new("http://127.0.0.1:1")
            .with_retry_policy(1, Duration::from_millis(1));
        let err = client.query_status("J1").await.unwrap_err();
        assert!(matches!(err, ClientError::Network(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_submit_rejects_inline_result_shape_mismatch() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/execute/UPLOAD")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("not json")
            .create_async()
            .await;

        let client = fast_client(&server.url());
        let err = client
            .submit("UPLOAD", json!({"tax_id": "1"}), false)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Parse(_)));
    }
}
