//! Orchestrator API endpoints: artifacts, runs, pausing

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

use pipewright_core::artifact::DagArtifact;

use crate::error::Result;
use crate::{Orchestrator, OrchestratorClient};

/// Remote state of a DAG run as reported by the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    /// Remote state string: "queued", "running", "success", "failed", ...
    pub state: String,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Serialize)]
struct TriggerRequest<'a> {
    conf: &'a HashMap<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct TriggerResponse {
    run_id: String,
}

#[derive(Serialize)]
struct PauseRequest {
    is_paused: bool,
}

#[async_trait]
impl Orchestrator for OrchestratorClient {
    async fn submit_artifact(&self, artifact: &DagArtifact) -> Result<()> {
        info!("Submitting artifact for DAG {}", artifact.dag_id);

        let url = format!("{}/dags/{}/artifact", self.base_url, artifact.dag_id);
        let response = self
            .request(reqwest::Method::PUT, url)
            .json(artifact)
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    async fn trigger(
        &self,
        dag_id: &str,
        conf: &HashMap<String, serde_json::Value>,
    ) -> Result<String> {
        info!("Triggering DAG {}", dag_id);

        let url = format!("{}/dags/{}/runs", self.base_url, dag_id);
        let response = self
            .request(reqwest::Method::POST, url)
            .json(&TriggerRequest { conf })
            .send()
            .await?;

        let trigger: TriggerResponse = self.handle_response(response).await?;
        info!("DAG {} triggered, run id {}", dag_id, trigger.run_id);
        Ok(trigger.run_id)
    }

    async fn run_state(&self, dag_id: &str, correlation_id: &str) -> Result<RunState> {
        debug!("Fetching state of run {}/{}", dag_id, correlation_id);

        let url = format!("{}/dags/{}/runs/{}", self.base_url, dag_id, correlation_id);
        let response = self.request(reqwest::Method::GET, url).send().await?;

        self.handle_response(response).await
    }

    async fn cancel_run(&self, dag_id: &str, correlation_id: &str) -> Result<()> {
        info!("Cancelling run {}/{}", dag_id, correlation_id);

        let url = format!("{}/dags/{}/runs/{}", self.base_url, dag_id, correlation_id);
        let response = self
            .request(reqwest::Method::DELETE, url)
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    async fn set_paused(&self, dag_id: &str, paused: bool) -> Result<()> {
        info!(
            "{} DAG {}",
            if paused { "Pausing" } else { "Unpausing" },
            dag_id
        );

        let url = format!("{}/dags/{}", self.base_url, dag_id);
        let response = self
            .request(reqwest::Method::PATCH, url)
            .json(&PauseRequest { is_paused: paused })
            .send()
            .await?;

        self.handle_empty_response(response).await
    }
}
