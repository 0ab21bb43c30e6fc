//! Gantry HTTP Client
//!
//! A type-safe HTTP client for the remote RPA runner service.
//!
//! The runner executes automation jobs asynchronously: a submission is
//! acknowledged with a job id, and the job is then polled via the status
//! endpoint until it reaches a terminal state. This crate owns the wire
//! contract and the retry policy; everything above it (tracking, caching,
//! lifecycle) lives in `gantry-engine`.
//!
//! # Example
//!
//! ```no_run
//! use gantry_client::RunnerClient;
//! use gantry_core::dto::payload::DownloadPayload;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = RunnerClient::new("http://localhost:8000");
//!
//!     let outcome = client
//!         .submit_job(
//!             "DOWNLOAD",
//!             &DownloadPayload {
//!                 login: "acme".into(),
//!                 password: "secret".into(),
//!                 filter: "monthly_invoice".into(),
//!                 tax_id: "12.345.678/0001-90".into(),
//!             },
//!             false,
//!         )
//!         .await?;
//!
//!     println!("submitted: {:?}", outcome.job_id());
//!     Ok(())
//! }
//! ```

pub mod error;
mod jobs;

// Re-export commonly used types
pub use error::{ClientError, Result};
pub use jobs::{ALLOWED_CATEGORIES, JobService};

use std::time::Duration;

use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

/// Default ceiling on retries for transient failures
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay between retries; attempt N waits N times this
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(2);

/// HTTP client for the remote runner service
///
/// Transient failures (transport errors and 5xx responses) are retried with
/// linear backoff: attempt N sleeps `base_delay * N` before the next try, so
/// the worst-case added latency stays predictable. 4xx responses are never
/// retried; they are the service's definitive answer. Each retry blocks the
/// calling task; there is no background retry queue at this layer.
#[derive(Debug, Clone)]
pub struct RunnerClient {
    /// Base URL of the runner service (e.g., "http://localhost:8000")
    base_url: String,
    /// HTTP client instance
    client: Client,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl RunnerClient {
    /// Create a new runner client with the default retry policy
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the runner service
    ///
    /// # Example
    /// ```
    /// use gantry_client::RunnerClient;
    ///
    /// let client = RunnerClient::new("http://localhost:8000");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new runner client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    ///
    /// # Example
    /// ```
    /// use gantry_client::RunnerClient;
    /// use reqwest::Client;
    /// use std::time::Duration;
    ///
    /// let http_client = Client::builder()
    ///     .timeout(Duration::from_secs(90))
    ///     .build()
    ///     .unwrap();
    ///
    /// let client = RunnerClient::with_client("http://localhost:8000", http_client);
    /// ```
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
        }
    }

    /// Override the retry policy
    ///
    /// # Arguments
    /// * `max_retries` - How many retries follow the first attempt
    /// * `base_delay` - Delay unit for the linear backoff
    pub fn with_retry_policy(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_base_delay = base_delay;
        self
    }

    /// Get the base URL of the runner service
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // =============================================================================
    // Request Core
    // =============================================================================

    /// Sends a request, retrying transient failures with linear backoff
    ///
    /// Returns the response for any 2xx status. 4xx statuses surface
    /// immediately as `Remote` errors (the caller maps 404 where a
    /// `NotFound` is warranted); 5xx statuses and transport errors are
    /// retried until the retry budget is exhausted.
    pub(crate) async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            debug!("{} {} (attempt {})", method, url, attempt);

            let mut request = self.client.request(method.clone(), &url);
            if let Some(body) = body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }

                    let code = status.as_u16();
                    let body_text = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "<unreadable body>".to_string());

                    // 4xx is the service's definitive answer; hand it back.
                    if (400..500).contains(&code) {
                        warn!("{} {} answered {}: {}", method, url, code, body_text);
                        return Err(ClientError::Remote {
                            status: code,
                            body: body_text,
                        });
                    }

                    if attempt > self.max_retries {
                        return Err(ClientError::Remote {
                            status: code,
                            body: body_text,
                        });
                    }
                    warn!(
                        "{} {} answered {}, retry {}/{}",
                        method, url, code, attempt, self.max_retries
                    );
                }
                Err(err) => {
                    if attempt > self.max_retries {
                        return Err(ClientError::Network(err));
                    }
                    warn!(
                        "{} {} failed ({}), retry {}/{}",
                        method, url, err, attempt, self.max_retries
                    );
                }
            }

            tokio::time::sleep(self.retry_base_delay * attempt).await;
        }
    }

    /// Decodes a JSON response body
    pub(crate) async fn parse_json<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        response
            .json()
            .await
            .map_err(|e| ClientError::Parse(format!("failed to decode response body: {}", e)))
    }
}
