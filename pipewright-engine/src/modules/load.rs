//! Loader modules

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

use pipewright_core::domain::dataset::{Dataset, LoadSummary};

use crate::catalog::Load;
use crate::modules::{ModuleContext, ModuleError};

/// Collects datasets into an in-process sink. The sink handle is shared so
/// callers (and tests) can inspect what was loaded.
pub struct MemoryLoad {
    sink: Arc<Mutex<Vec<Dataset>>>,
}

#[derive(Deserialize)]
struct MemoryConfig {
    #[serde(default = "default_label")]
    label: String,
}

fn default_label() -> String {
    "memory".to_string()
}

impl MemoryLoad {
    pub fn new() -> Self {
        Self {
            sink: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn sink(&self) -> Arc<Mutex<Vec<Dataset>>> {
        Arc::clone(&self.sink)
    }
}

impl Default for MemoryLoad {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Load for MemoryLoad {
    async fn load(
        &self,
        _ctx: &ModuleContext,
        config: &serde_json::Value,
        input: Dataset,
    ) -> Result<LoadSummary, ModuleError> {
        let config: MemoryConfig = serde_json::from_value(config.clone())
            .map_err(|e| ModuleError::Config(e.to_string()))?;

        let rows_written = input.len() as u64;
        self.sink
            .lock()
            .map_err(|_| ModuleError::Data("memory sink is poisoned".to_string()))?
            .push(input);

        Ok(LoadSummary {
            destination: config.label,
            rows_written,
            details: serde_json::Value::Null,
        })
    }
}

/// POSTs the dataset as a JSON array to an HTTP endpoint.
pub struct HttpLoad;

#[derive(Deserialize)]
struct HttpLoadConfig {
    url: Option<String>,
    connection: Option<String>,
    #[serde(default)]
    path: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default = "default_timeout")]
    timeout_seconds: u64,
}

fn default_timeout() -> u64 {
    30
}

#[async_trait]
impl Load for HttpLoad {
    async fn load(
        &self,
        ctx: &ModuleContext,
        config: &serde_json::Value,
        input: Dataset,
    ) -> Result<LoadSummary, ModuleError> {
        let config: HttpLoadConfig = serde_json::from_value(config.clone())
            .map_err(|e| ModuleError::Config(e.to_string()))?;

        let (url, mut headers) = match (&config.url, &config.connection) {
            (Some(url), _) => (url.clone(), HashMap::new()),
            (None, Some(reference)) => {
                let params = ctx
                    .resolver
                    .resolve(reference)
                    .await
                    .map_err(|e| ModuleError::Connection(e.to_string()))?;
                let base = params.base_url.trim_end_matches('/');
                (format!("{base}{}", config.path), params.headers)
            }
            (None, None) => {
                return Err(ModuleError::Config(
                    "either `url` or `connection` is required".to_string(),
                ));
            }
        };
        headers.extend(config.headers.clone());

        let rows_written = input.len() as u64;
        info!("Loading {rows_written} rows to {url}");

        let mut request = ctx
            .http
            .post(&url)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .json(&input.rows);
        for (name, value) in &headers {
            request = request.header(name, value);
        }

        let response = request.send().await?.error_for_status()?;

        Ok(LoadSummary {
            destination: url,
            rows_written,
            details: serde_json::json!({"status": response.status().as_u16()}),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipewright_core::domain::dataset::Row;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_load_reports_and_collects() {
        let ctx = ModuleContext::default();
        let loader = MemoryLoad::new();
        let sink = loader.sink();

        let mut row = Row::new();
        row.insert("x".to_string(), json!(1));
        let summary = loader
            .load(&ctx, &json!({"label": "staging"}), Dataset::new(vec![row]))
            .await
            .unwrap();

        assert_eq!(summary.destination, "staging");
        assert_eq!(summary.rows_written, 1);
        assert_eq!(sink.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_http_load_requires_target() {
        let ctx = ModuleContext::default();
        let err = HttpLoad
            .load(&ctx, &json!({}), Dataset::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ModuleError::Config(_)));
    }
}
