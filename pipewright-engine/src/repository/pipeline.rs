//! Pipeline repository

use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

use pipewright_core::domain::pipeline::{Pipeline, PipelineGraph};

/// Fields needed to create a pipeline
pub struct NewPipeline {
    pub name: String,
    pub description: Option<String>,
    pub graph: PipelineGraph,
    pub default_params: HashMap<String, serde_json::Value>,
    pub tags: Vec<String>,
}

/// Create a new pipeline in the database
pub async fn create(pool: &PgPool, req: NewPipeline) -> Result<Pipeline, sqlx::Error> {
    let id = Uuid::new_v4();
    let now = chrono::Utc::now();

    let pipeline = Pipeline {
        id,
        name: req.name,
        description: req.description,
        version: "1.0.0".to_string(),
        graph: req.graph,
        default_params: req.default_params,
        tags: req.tags,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        r#"
        INSERT INTO pipelines (id, name, description, version, graph, default_params, tags, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(id)
    .bind(&pipeline.name)
    .bind(&pipeline.description)
    .bind(&pipeline.version)
    .bind(serde_json::to_value(&pipeline.graph).unwrap_or(serde_json::Value::Null))
    .bind(serde_json::to_value(&pipeline.default_params).unwrap_or(serde_json::Value::Null))
    .bind(&pipeline.tags)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(pipeline)
}

/// Find a pipeline by ID
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Pipeline>, sqlx::Error> {
    let row = sqlx::query_as::<_, PipelineRow>(
        r#"
        SELECT id, name, description, version, graph, default_params, tags, created_at, updated_at
        FROM pipelines
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// Replace a pipeline's graph wholesale. Graphs are never patched in place.
pub async fn replace_graph(
    pool: &PgPool,
    id: Uuid,
    graph: &PipelineGraph,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE pipelines
        SET graph = $1, updated_at = $2
        WHERE id = $3
        "#,
    )
    .bind(serde_json::to_value(graph).unwrap_or(serde_json::Value::Null))
    .bind(chrono::Utc::now())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Delete a pipeline by ID
pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM pipelines WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct PipelineRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    version: String,
    graph: serde_json::Value,
    default_params: serde_json::Value,
    tags: Vec<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<PipelineRow> for Pipeline {
    fn from(row: PipelineRow) -> Self {
        Pipeline {
            id: row.id,
            name: row.name,
            description: row.description,
            version: row.version,
            graph: serde_json::from_value(row.graph).unwrap_or_default(),
            default_params: serde_json::from_value(row.default_params).unwrap_or_default(),
            tags: row.tags,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
