//! Transformer modules

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

use pipewright_core::domain::dataset::{Dataset, Row};
use pipewright_sandbox::{run_query, run_script};

use crate::catalog::Transform;
use crate::modules::{ModuleContext, ModuleError};

/// Sandboxed script transform: the node config carries the user chunk.
pub struct ScriptTransform;

#[derive(Deserialize)]
struct ScriptConfig {
    code: String,
    timeout_seconds: Option<u64>,
}

#[async_trait]
impl Transform for ScriptTransform {
    async fn transform(
        &self,
        ctx: &ModuleContext,
        config: &serde_json::Value,
        input: Dataset,
    ) -> Result<Dataset, ModuleError> {
        let config: ScriptConfig = serde_json::from_value(config.clone())
            .map_err(|e| ModuleError::Config(e.to_string()))?;
        let budget = budget_for(ctx, config.timeout_seconds);

        Ok(run_script(&config.code, &input, budget).await?)
    }
}

/// Sandboxed SQL transform over the `input` relation.
pub struct SqlTransform;

#[derive(Deserialize)]
struct SqlConfig {
    query: String,
    timeout_seconds: Option<u64>,
}

#[async_trait]
impl Transform for SqlTransform {
    async fn transform(
        &self,
        ctx: &ModuleContext,
        config: &serde_json::Value,
        input: Dataset,
    ) -> Result<Dataset, ModuleError> {
        let config: SqlConfig = serde_json::from_value(config.clone())
            .map_err(|e| ModuleError::Config(e.to_string()))?;
        let budget = budget_for(ctx, config.timeout_seconds);

        Ok(run_query(&config.query, &input, budget).await?)
    }
}

fn budget_for(ctx: &ModuleContext, override_seconds: Option<u64>) -> Duration {
    override_seconds
        .map(Duration::from_secs)
        .unwrap_or(ctx.sandbox_timeout)
}

/// Declarative cleaning: trim strings, drop null-bearing rows, lowercase
/// column names.
pub struct CleanTransform;

#[derive(Deserialize)]
struct CleanConfig {
    #[serde(default = "default_true")]
    trim_whitespace: bool,
    #[serde(default)]
    remove_nulls: bool,
    #[serde(default)]
    lowercase_columns: bool,
}

fn default_true() -> bool {
    true
}

#[async_trait]
impl Transform for CleanTransform {
    async fn transform(
        &self,
        _ctx: &ModuleContext,
        config: &serde_json::Value,
        input: Dataset,
    ) -> Result<Dataset, ModuleError> {
        let config: CleanConfig = serde_json::from_value(config.clone())
            .map_err(|e| ModuleError::Config(e.to_string()))?;

        if input.is_empty() {
            return Err(ModuleError::Data("input dataset is empty".to_string()));
        }

        let mut rows = Vec::with_capacity(input.len());
        for row in input.rows {
            let mut cleaned = Row::new();
            let mut seen: HashSet<String> = HashSet::new();

            for (key, value) in row {
                let key = if config.lowercase_columns {
                    key.to_lowercase()
                } else {
                    key
                };
                // Lowercasing can collide keys; first one wins.
                if !seen.insert(key.clone()) {
                    continue;
                }

                let value = match value {
                    serde_json::Value::String(s) if config.trim_whitespace => {
                        serde_json::Value::String(s.trim().to_string())
                    }
                    other => other,
                };
                cleaned.insert(key, value);
            }

            if config.remove_nulls && cleaned.values().any(|v| v.is_null()) {
                continue;
            }
            rows.push(cleaned);
        }

        Ok(Dataset::new(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dataset() -> Dataset {
        let rows = vec![
            serde_json::from_value(json!({"Name": "  ada  ", "age": 36})).unwrap(),
            serde_json::from_value(json!({"Name": "grace", "age": null})).unwrap(),
        ];
        Dataset::new(rows)
    }

    #[tokio::test]
    async fn test_clean_trims_and_lowercases() {
        let ctx = ModuleContext::default();
        let out = CleanTransform
            .transform(
                &ctx,
                &json!({"trim_whitespace": true, "lowercase_columns": true}),
                dataset(),
            )
            .await
            .unwrap();

        assert_eq!(out.rows[0].get("name"), Some(&json!("ada")));
        assert!(out.rows[0].get("Name").is_none());
        assert_eq!(out.len(), 2);
    }

    #[tokio::test]
    async fn test_clean_removes_null_rows() {
        let ctx = ModuleContext::default();
        let out = CleanTransform
            .transform(&ctx, &json!({"remove_nulls": true}), dataset())
            .await
            .unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out.rows[0].get("Name"), Some(&json!("ada")));
    }

    #[tokio::test]
    async fn test_clean_rejects_empty_input() {
        let ctx = ModuleContext::default();
        let err = CleanTransform
            .transform(&ctx, &json!({}), Dataset::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ModuleError::Data(_)));
    }

    #[tokio::test]
    async fn test_script_transform_end_to_end() {
        let ctx = ModuleContext::default();
        let config = json!({
            "code": "function transform(rows)\n  for _, r in ipairs(rows) do r.age = r.age + 1 end\n  return rows\nend"
        });
        let input = Dataset::new(vec![
            serde_json::from_value(json!({"age": 40})).unwrap(),
        ]);

        let out = ScriptTransform.transform(&ctx, &config, input).await.unwrap();
        assert_eq!(out.rows[0].get("age").unwrap().as_f64(), Some(41.0));
    }

    #[tokio::test]
    async fn test_sql_transform_end_to_end() {
        let ctx = ModuleContext::default();
        let config = json!({"query": "SELECT age * 2 AS age FROM input"});
        let input = Dataset::new(vec![
            serde_json::from_value(json!({"age": 21})).unwrap(),
        ]);

        let out = SqlTransform.transform(&ctx, &config, input).await.unwrap();
        assert_eq!(out.rows[0].get("age").unwrap().as_i64(), Some(42));
    }

    #[tokio::test]
    async fn test_sandbox_errors_pass_through() {
        let ctx = ModuleContext::default();
        let config = json!({"code": "function transform(rows) return 1 end"});
        let err = ScriptTransform
            .transform(&ctx, &config, dataset())
            .await
            .unwrap_err();
        assert!(matches!(err, ModuleError::Sandbox(_)));
    }
}
