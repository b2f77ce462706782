//! Execution dispatch
//!
//! Creates an Execution and hands the run to a backend. The orchestrator is
//! primary; any failure there (artifact submission, acknowledgement,
//! triggering) falls back to the task queue, and the caller only learns the
//! primary failed if the fallback fails too. Which backend actually carried
//! the run is reported in the outcome for observability.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use pipewright_client::Orchestrator;
use pipewright_core::artifact::{self, DagArtifact};
use pipewright_core::domain::execution::{Backend, Correlation, TriggerKind};
use pipewright_core::graph;

use crate::catalog::Catalog;
use crate::error::DispatchError;
use crate::queue::{TaskQueue, jobs};
use crate::repository;
use sqlx::PgPool;

/// What a successful dispatch hands back to the caller
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub execution_id: Uuid,
    /// Which backend carried the run. The call succeeded either way.
    pub backend: Backend,
    pub correlation_id: String,
}

/// Both backends refused the run
pub(crate) struct BackendFailure {
    orchestrator: String,
    queue: String,
}

/// Dispatches pipeline runs and mirrors them on cancellation
pub struct Dispatcher {
    pool: PgPool,
    orchestrator: Arc<dyn Orchestrator>,
    queue: Arc<dyn TaskQueue>,
    catalog: Arc<Catalog>,
}

impl Dispatcher {
    pub fn new(
        pool: PgPool,
        orchestrator: Arc<dyn Orchestrator>,
        queue: Arc<dyn TaskQueue>,
        catalog: Arc<Catalog>,
    ) -> Self {
        Self {
            pool,
            orchestrator,
            queue,
            catalog,
        }
    }

    /// Dispatch one run of a pipeline.
    ///
    /// Validation failures (bad graph, unknown module, invalid config) are
    /// terminal and happen before any Execution row or I/O. Backend failures
    /// after that point degrade through the fallback chain.
    pub async fn dispatch(
        &self,
        pipeline_id: Uuid,
        params: HashMap<String, serde_json::Value>,
        trigger: TriggerKind,
    ) -> Result<DispatchOutcome, DispatchError> {
        let pipeline = repository::pipeline::find_by_id(&self.pool, pipeline_id)
            .await?
            .ok_or(DispatchError::PipelineNotFound(pipeline_id))?;

        graph::validate_structure(&pipeline.graph)?;
        graph::validate_executable(&pipeline.graph)?;
        self.catalog.validate_nodes(&pipeline.graph)?;

        let mut merged = pipeline.default_params.clone();
        merged.extend(params);

        let artifact = artifact::build(pipeline_id, &pipeline.graph, &merged, None)?;
        let execution =
            repository::execution::create(&self.pool, pipeline_id, trigger, &merged).await?;

        info!(
            "Dispatching pipeline {} as execution {} ({})",
            pipeline_id,
            execution.id,
            trigger.as_str()
        );

        match select_backend(
            self.orchestrator.as_ref(),
            self.queue.as_ref(),
            &artifact,
            &merged,
            pipeline_id,
            execution.id,
        )
        .await
        {
            Ok(correlation) => {
                repository::execution::mark_running(&self.pool, execution.id, &correlation)
                    .await?;
                info!(
                    "Execution {} running via {} ({})",
                    execution.id,
                    correlation.backend.as_str(),
                    correlation.id
                );
                Ok(DispatchOutcome {
                    execution_id: execution.id,
                    backend: correlation.backend,
                    correlation_id: correlation.id,
                })
            }
            Err(failure) => {
                let message = format!(
                    "orchestrator: {}; queue: {}",
                    failure.orchestrator, failure.queue
                );
                repository::execution::mark_failed(&self.pool, execution.id, &message).await?;
                Err(DispatchError::BackendsExhausted {
                    orchestrator: failure.orchestrator,
                    queue: failure.queue,
                })
            }
        }
    }

    /// Cancel a pending or running execution. Any other state is a no-op
    /// rejected with `InvalidState`.
    pub async fn cancel(&self, execution_id: Uuid) -> Result<(), DispatchError> {
        let execution = repository::execution::find_by_id(&self.pool, execution_id)
            .await?
            .ok_or(DispatchError::ExecutionNotFound(execution_id))?;

        if execution.status.is_terminal() {
            return Err(DispatchError::InvalidState {
                id: execution_id,
                status: execution.status,
            });
        }

        // Mirror dispatch: cancel at the orchestrator when the run lives
        // there, then mark cancelled locally either way.
        if let Some(correlation) = &execution.correlation {
            if correlation.backend == Backend::Orchestrator {
                let dag_id = artifact::dag_id_for(execution.pipeline_id);
                if let Err(e) = self
                    .orchestrator
                    .cancel_run(&dag_id, &correlation.id)
                    .await
                {
                    warn!(
                        "Remote cancel of {}/{} failed: {e}; marking cancelled locally",
                        dag_id, correlation.id
                    );
                }
            }
        }

        repository::execution::mark_cancelled(&self.pool, execution_id).await?;
        info!("Execution {execution_id} cancelled");
        Ok(())
    }
}

/// Decide which backend carries the run.
///
/// Primary path: submit the artifact, wait for the acknowledgement, trigger.
/// Any error falls back to enqueueing the same logical run on the task
/// queue. Only both failing is an error.
pub(crate) async fn select_backend(
    orchestrator: &dyn Orchestrator,
    queue: &dyn TaskQueue,
    artifact: &DagArtifact,
    conf: &HashMap<String, serde_json::Value>,
    pipeline_id: Uuid,
    execution_id: Uuid,
) -> Result<Correlation, BackendFailure> {
    let primary_error = match submit_and_trigger(orchestrator, artifact, conf).await {
        Ok(run_id) => return Ok(Correlation::orchestrator(run_id)),
        Err(e) => e,
    };

    warn!(
        "Orchestrator dispatch for pipeline {pipeline_id} failed ({primary_error}), \
         falling back to task queue"
    );

    let args = serde_json::json!({
        "pipeline_id": pipeline_id.to_string(),
        "execution_id": execution_id.to_string(),
    });
    match queue.enqueue(jobs::EXECUTE_PIPELINE, args).await {
        Ok(task_id) => Ok(Correlation::queue(task_id)),
        Err(queue_error) => Err(BackendFailure {
            orchestrator: primary_error,
            queue: queue_error.to_string(),
        }),
    }
}

async fn submit_and_trigger(
    orchestrator: &dyn Orchestrator,
    artifact: &DagArtifact,
    conf: &HashMap<String, serde_json::Value>,
) -> Result<String, String> {
    orchestrator
        .submit_artifact(artifact)
        .await
        .map_err(|e| format!("artifact submission failed: {e}"))?;

    orchestrator
        .trigger(&artifact.dag_id, conf)
        .await
        .map_err(|e| format!("trigger failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueError;
    use async_trait::async_trait;
    use pipewright_client::{ClientError, RunState};
    use std::sync::Mutex;

    struct FakeOrchestrator {
        fail: bool,
        triggered: Mutex<Vec<String>>,
    }

    impl FakeOrchestrator {
        fn up() -> Self {
            Self {
                fail: false,
                triggered: Mutex::new(Vec::new()),
            }
        }

        fn down() -> Self {
            Self {
                fail: true,
                triggered: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Orchestrator for FakeOrchestrator {
        async fn submit_artifact(&self, _artifact: &DagArtifact) -> pipewright_client::Result<()> {
            if self.fail {
                return Err(ClientError::api_error(503, "orchestrator down"));
            }
            Ok(())
        }

        async fn trigger(
            &self,
            dag_id: &str,
            _conf: &HashMap<String, serde_json::Value>,
        ) -> pipewright_client::Result<String> {
            if self.fail {
                return Err(ClientError::api_error(503, "orchestrator down"));
            }
            self.triggered.lock().unwrap().push(dag_id.to_string());
            Ok("run-1".to_string())
        }

        async fn run_state(
            &self,
            _dag_id: &str,
            _correlation_id: &str,
        ) -> pipewright_client::Result<RunState> {
            Ok(RunState {
                state: "running".to_string(),
                started_at: None,
                ended_at: None,
            })
        }

        async fn cancel_run(
            &self,
            _dag_id: &str,
            _correlation_id: &str,
        ) -> pipewright_client::Result<()> {
            Ok(())
        }

        async fn set_paused(&self, _dag_id: &str, _paused: bool) -> pipewright_client::Result<()> {
            Ok(())
        }
    }

    struct FakeQueue {
        fail: bool,
        enqueued: Mutex<Vec<String>>,
    }

    impl FakeQueue {
        fn up() -> Self {
            Self {
                fail: false,
                enqueued: Mutex::new(Vec::new()),
            }
        }

        fn down() -> Self {
            Self {
                fail: true,
                enqueued: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TaskQueue for FakeQueue {
        async fn enqueue(
            &self,
            job_name: &str,
            _args: serde_json::Value,
        ) -> Result<String, QueueError> {
            if self.fail {
                return Err(QueueError::Database(sqlx::Error::PoolClosed));
            }
            self.enqueued.lock().unwrap().push(job_name.to_string());
            Ok("task-1".to_string())
        }
    }

    fn sample_artifact() -> DagArtifact {
        use pipewright_core::domain::pipeline::{
            GraphEdge, GraphNode, ModuleKind, PipelineGraph,
        };
        let graph = PipelineGraph {
            nodes: vec![
                GraphNode {
                    id: "a".to_string(),
                    kind: ModuleKind::Extractor,
                    module: "inline-extractor".to_string(),
                    config: serde_json::json!({"rows": []}),
                },
                GraphNode {
                    id: "c".to_string(),
                    kind: ModuleKind::Loader,
                    module: "memory-loader".to_string(),
                    config: serde_json::json!({}),
                },
            ],
            edges: vec![GraphEdge {
                source: "a".to_string(),
                target: "c".to_string(),
            }],
        };
        artifact::build(Uuid::new_v4(), &graph, &HashMap::new(), None).unwrap()
    }

    #[tokio::test]
    async fn test_primary_backend_wins_when_up() {
        let orchestrator = FakeOrchestrator::up();
        let queue = FakeQueue::up();

        let correlation = select_backend(
            &orchestrator,
            &queue,
            &sample_artifact(),
            &HashMap::new(),
            Uuid::new_v4(),
            Uuid::new_v4(),
        )
        .await
        .unwrap_or_else(|_| panic!("backend selection failed"));

        assert_eq!(correlation.backend, Backend::Orchestrator);
        assert_eq!(correlation.id, "run-1");
        assert!(queue.enqueued.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fallback_to_queue_when_orchestrator_down() {
        let orchestrator = FakeOrchestrator::down();
        let queue = FakeQueue::up();

        let correlation = select_backend(
            &orchestrator,
            &queue,
            &sample_artifact(),
            &HashMap::new(),
            Uuid::new_v4(),
            Uuid::new_v4(),
        )
        .await
        .unwrap_or_else(|_| panic!("fallback should succeed"));

        // The run still proceeds; only the backend differs.
        assert_eq!(correlation.backend, Backend::Queue);
        assert_eq!(correlation.id, "task-1");
        assert_eq!(
            queue.enqueued.lock().unwrap().as_slice(),
            [jobs::EXECUTE_PIPELINE.to_string()]
        );
    }

    #[tokio::test]
    async fn test_both_backends_down_is_an_error() {
        let orchestrator = FakeOrchestrator::down();
        let queue = FakeQueue::down();

        let result = select_backend(
            &orchestrator,
            &queue,
            &sample_artifact(),
            &HashMap::new(),
            Uuid::new_v4(),
            Uuid::new_v4(),
        )
        .await;

        let failure = match result {
            Err(f) => f,
            Ok(_) => panic!("expected both backends to fail"),
        };
        assert!(failure.orchestrator.contains("artifact submission failed"));
        assert!(!failure.queue.is_empty());
    }
}
