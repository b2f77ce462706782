//! Pipewright Orchestrator Client
//!
//! A typed HTTP client for the external workflow orchestrator that executes
//! generated DAG artifacts. The dispatcher and reconciler consume it through
//! the [`Orchestrator`] trait, so tests can swap in fakes and no code holds
//! a module-level singleton.
//!
//! # Example
//!
//! ```no_run
//! use pipewright_client::{Orchestrator, OrchestratorClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), pipewright_client::ClientError> {
//!     let client = OrchestratorClient::new("http://orchestrator:8080")
//!         .with_basic_auth("admin", "admin");
//!
//!     let state = client.run_state("pipeline_abc", "run_123").await?;
//!     println!("remote state: {}", state.state);
//!     Ok(())
//! }
//! ```

pub mod error;
mod runs;

pub use error::{ClientError, Result};
pub use runs::RunState;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;

use pipewright_core::artifact::DagArtifact;

/// Default per-request network timeout. A stuck orchestrator call must never
/// block the reconciler's scan of other items.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Boundary contract with the external workflow orchestrator
///
/// `correlation_id` is the opaque run identifier handed back by `trigger`;
/// it is all the reconciler needs to poll or cancel a run.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Push a generated DAG artifact. Submission is idempotent on the
    /// orchestrator side: identical content may be pushed any number of
    /// times. Returns once the orchestrator acknowledges it.
    async fn submit_artifact(&self, artifact: &DagArtifact) -> Result<()>;

    /// Trigger a run of a submitted DAG, returning its correlation id.
    async fn trigger(
        &self,
        dag_id: &str,
        conf: &HashMap<String, serde_json::Value>,
    ) -> Result<String>;

    /// Fetch the remote state of a run.
    async fn run_state(&self, dag_id: &str, correlation_id: &str) -> Result<RunState>;

    /// Cancel a running DAG run.
    async fn cancel_run(&self, dag_id: &str, correlation_id: &str) -> Result<()>;

    /// Pause or unpause a DAG, used when its schedule is toggled.
    async fn set_paused(&self, dag_id: &str, paused: bool) -> Result<()>;
}

/// HTTP client for the workflow orchestrator API
#[derive(Debug, Clone)]
pub struct OrchestratorClient {
    /// Base URL of the orchestrator API (e.g. "http://orchestrator:8080/api/v1")
    base_url: String,
    /// HTTP client instance
    client: Client,
    /// Basic-auth credentials, when the orchestrator requires them
    auth: Option<(String, String)>,
}

impl OrchestratorClient {
    /// Create a new orchestrator client with the default request timeout.
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self::with_client(base_url, client)
    }

    /// Create a client with a custom `reqwest::Client` (timeouts, proxies,
    /// TLS settings).
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            auth: None,
        }
    }

    /// Attach basic-auth credentials to every request.
    pub fn with_basic_auth(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.auth = Some((username.into(), password.into()));
        self
    }

    /// Get the base URL of the orchestrator
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn request(
        &self,
        method: reqwest::Method,
        url: String,
    ) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(method, url);
        if let Some((username, password)) = &self.auth {
            builder = builder.basic_auth(username, Some(password));
        }
        builder
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Check the status code and deserialize the JSON body.
    pub(crate) async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("failed to parse JSON response: {e}")))
    }

    /// Check the status code for calls that return no useful body.
    pub(crate) async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = OrchestratorClient::new("http://localhost:8080");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = OrchestratorClient::new("http://localhost:8080/");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_client_with_auth() {
        let client = OrchestratorClient::new("http://localhost:8080").with_basic_auth("u", "p");
        assert!(client.auth.is_some());
    }
}
