//! Extractor modules

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

use pipewright_core::domain::dataset::{Dataset, Row};

use crate::catalog::Extract;
use crate::modules::{ModuleContext, ModuleError};

/// Emits rows embedded in the node config. Useful for fixtures, previews
/// and tests.
pub struct InlineExtract;

#[derive(Deserialize)]
struct InlineConfig {
    rows: Vec<Row>,
}

#[async_trait]
impl Extract for InlineExtract {
    async fn extract(
        &self,
        _ctx: &ModuleContext,
        config: &serde_json::Value,
    ) -> Result<Dataset, ModuleError> {
        let config: InlineConfig = serde_json::from_value(config.clone())
            .map_err(|e| ModuleError::Config(e.to_string()))?;
        Ok(Dataset::new(config.rows))
    }
}

/// Pulls rows from a REST endpoint, either via a direct URL or an opaque
/// connection reference resolved by the credential service.
pub struct HttpExtract;

#[derive(Deserialize)]
struct HttpExtractConfig {
    url: Option<String>,
    connection: Option<String>,
    #[serde(default)]
    path: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    data_path: Option<String>,
    #[serde(default = "default_timeout")]
    timeout_seconds: u64,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_timeout() -> u64 {
    30
}

#[async_trait]
impl Extract for HttpExtract {
    async fn extract(
        &self,
        ctx: &ModuleContext,
        config: &serde_json::Value,
    ) -> Result<Dataset, ModuleError> {
        let config: HttpExtractConfig = serde_json::from_value(config.clone())
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

        info!("Extracting rows from {url}");

        let method = match config.method.to_uppercase().as_str() {
            "POST" => reqwest::Method::POST,
            _ => reqwest::Method::GET,
        };
        let mut request = ctx
            .http
            .request(method, &url)
            .timeout(Duration::from_secs(config.timeout_seconds));
        for (name, value) in &headers {
            request = request.header(name, value);
        }

        let response = request.send().await?.error_for_status()?;
        let body: serde_json::Value = response.json().await?;

        rows_from_response(body, config.data_path.as_deref()).map(Dataset::new)
    }
}

/// Dig the record array out of a response body, honoring an optional
/// top-level data path; a lone object becomes a single-row dataset.
fn rows_from_response(
    body: serde_json::Value,
    data_path: Option<&str>,
) -> Result<Vec<Row>, ModuleError> {
    let data = match data_path {
        Some(path) => body
            .get(path)
            .cloned()
            .ok_or_else(|| ModuleError::Data(format!("response has no `{path}` field")))?,
        None => body,
    };

    match data {
        serde_json::Value::Array(items) => Ok(items
            .into_iter()
            .map(|item| match item {
                serde_json::Value::Object(row) => row,
                other => {
                    let mut row = Row::new();
                    row.insert("value".to_string(), other);
                    row
                }
            })
            .collect()),
        serde_json::Value::Object(row) => Ok(vec![row]),
        other => Err(ModuleError::Data(format!(
            "expected an array or object, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_inline_extract() {
        let ctx = ModuleContext::default();
        let config = json!({"rows": [{"id": 1}, {"id": 2}]});
        let dataset = InlineExtract.extract(&ctx, &config).await.unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.rows[1].get("id"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_inline_extract_rejects_bad_config() {
        let ctx = ModuleContext::default();
        let err = InlineExtract
            .extract(&ctx, &json!({"rows": "oops"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ModuleError::Config(_)));
    }

    #[tokio::test]
    async fn test_http_extract_requires_url_or_connection() {
        let ctx = ModuleContext::default();
        let err = HttpExtract.extract(&ctx, &json!({})).await.unwrap_err();
        assert!(matches!(err, ModuleError::Config(_)));
    }

    #[test]
    fn test_rows_from_response_shapes() {
        let rows = rows_from_response(json!([{"a": 1}, {"a": 2}]), None).unwrap();
        assert_eq!(rows.len(), 2);

        let rows = rows_from_response(json!({"data": [{"a": 1}], "total": 1}), Some("data")).unwrap();
        assert_eq!(rows.len(), 1);

        let rows = rows_from_response(json!({"a": 1}), None).unwrap();
        assert_eq!(rows.len(), 1);

        // Scalars in an array are wrapped.
        let rows = rows_from_response(json!([1, 2, 3]), None).unwrap();
        assert_eq!(rows[0].get("value"), Some(&json!(1)));

        assert!(rows_from_response(json!(42), None).is_err());
        assert!(rows_from_response(json!({"other": []}), Some("data")).is_err());
    }
}
