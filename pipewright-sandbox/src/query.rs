//! Query-mode execution
//!
//! Runs a SQL statement against the dataset registered as the single
//! relation `input` in a fresh DataFusion session. Nothing else is
//! registered, so no other relation is readable. The session is dropped
//! when the call returns or times out, discarding any partial work.

use datafusion::arrow::datatypes::SchemaRef;
use datafusion::arrow::json::reader::infer_json_schema_from_iterator;
use datafusion::arrow::json::{ArrayWriter, ReaderBuilder};
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::datasource::MemTable;
use datafusion::error::DataFusionError;
use datafusion::prelude::SessionContext;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use pipewright_core::domain::dataset::{Dataset, Row};

use crate::error::{SandboxError, parse_line_column};

/// The one relation a query may read from.
pub const INPUT_RELATION: &str = "input";

/// Run `query` against a private copy of `input` under `budget`.
pub async fn run_query(
    query: &str,
    input: &Dataset,
    budget: Duration,
) -> Result<Dataset, SandboxError> {
    if input.is_empty() {
        return Err(SandboxError::Runtime("input dataset is empty".to_string()));
    }

    let batch = to_record_batch(&input.rows)?;
    let schema: SchemaRef = batch.schema();

    let ctx = SessionContext::new();
    let table = MemTable::try_new(schema, vec![vec![batch]])
        .map_err(|e| SandboxError::Runtime(e.to_string()))?;
    ctx.register_table(INPUT_RELATION, Arc::new(table))
        .map_err(|e| SandboxError::Runtime(e.to_string()))?;

    debug!(rows = input.len(), "executing query against input relation");

    let work = async {
        let df = ctx.sql(query).await?;
        df.collect().await
    };
    let batches = tokio::time::timeout(budget, work)
        .await
        .map_err(|_| SandboxError::Timeout(budget))?
        .map_err(map_datafusion_error)?;

    from_record_batches(&batches).map(Dataset::new)
}

fn to_record_batch(rows: &[Row]) -> Result<RecordBatch, SandboxError> {
    let values = rows
        .iter()
        .map(|r| Ok(serde_json::Value::Object(r.clone())));
    let schema = infer_json_schema_from_iterator(values)
        .map_err(|e| SandboxError::Runtime(format!("cannot infer input schema: {e}")))?;

    let mut decoder = ReaderBuilder::new(Arc::new(schema))
        .build_decoder()
        .map_err(|e| SandboxError::Runtime(e.to_string()))?;
    decoder
        .serialize(rows)
        .map_err(|e| SandboxError::Runtime(format!("cannot encode input rows: {e}")))?;

    decoder
        .flush()
        .map_err(|e| SandboxError::Runtime(e.to_string()))?
        .ok_or_else(|| SandboxError::Runtime("input produced no batch".to_string()))
}

fn from_record_batches(batches: &[RecordBatch]) -> Result<Vec<Row>, SandboxError> {
    let refs: Vec<&RecordBatch> = batches.iter().filter(|b| b.num_rows() > 0).collect();
    if refs.is_empty() {
        return Ok(Vec::new());
    }

    let mut writer = ArrayWriter::new(Vec::new());
    writer
        .write_batches(&refs)
        .map_err(|e| SandboxError::Runtime(e.to_string()))?;
    writer
        .finish()
        .map_err(|e| SandboxError::Runtime(e.to_string()))?;

    let buf = writer.into_inner();
    if buf.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_slice(&buf)
        .map_err(|e| SandboxError::Runtime(format!("cannot decode result rows: {e}")))
}

fn map_datafusion_error(err: DataFusionError) -> SandboxError {
    let text = err.to_string();
    if text.contains("sql parser error") || text.contains("SQL error") {
        let (line, column) = parse_line_column(&text);
        return SandboxError::Syntax {
            line,
            column,
            message: text,
        };
    }
    SandboxError::Runtime(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dataset() -> Dataset {
        let rows = [("a", 1), ("b", 2), ("c", 3)]
            .into_iter()
            .map(|(name, value)| {
                let mut row = Row::new();
                row.insert("name".to_string(), json!(name));
                row.insert("value".to_string(), json!(value));
                row
            })
            .collect();
        Dataset::new(rows)
    }

    #[tokio::test]
    async fn test_filter_query() {
        let out = run_query(
            "SELECT name, value FROM input WHERE value > 1 ORDER BY value",
            &dataset(),
            Duration::from_secs(10),
        )
        .await
        .unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out.rows[0].get("name"), Some(&json!("b")));
        assert_eq!(out.rows[1].get("name"), Some(&json!("c")));
    }

    #[tokio::test]
    async fn test_aggregation() {
        let out = run_query(
            "SELECT count(*) AS n FROM input",
            &dataset(),
            Duration::from_secs(10),
        )
        .await
        .unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out.rows[0].get("n").unwrap().as_i64(), Some(3));
    }

    #[tokio::test]
    async fn test_only_input_relation_is_readable() {
        let err = run_query(
            "SELECT * FROM secrets",
            &dataset(),
            Duration::from_secs(10),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SandboxError::Runtime(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_syntax_error_is_classified() {
        let err = run_query("SELEC oops FRM input", &dataset(), Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Syntax { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn test_empty_input_is_rejected() {
        let err = run_query(
            "SELECT * FROM input",
            &Dataset::default(),
            Duration::from_secs(10),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SandboxError::Runtime(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_caller_dataset_untouched() {
        let input = dataset();
        let _ = run_query(
            "SELECT value * 10 AS value FROM input",
            &input,
            Duration::from_secs(10),
        )
        .await
        .unwrap();
        assert_eq!(input.rows[0].get("value"), Some(&json!(1)));
    }
}
