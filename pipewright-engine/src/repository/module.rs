//! Module registry repository
//!
//! The catalog's descriptors are mirrored into the `modules` table at
//! startup so the CRUD surface can list them. Descriptors referenced by
//! graphs are deactivated, never deleted.

use sqlx::PgPool;

use pipewright_core::domain::module::ModuleDescriptor;
use pipewright_core::domain::pipeline::ModuleKind;

/// Insert or refresh a descriptor
pub async fn upsert(pool: &PgPool, descriptor: &ModuleDescriptor) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO modules (name, display_name, description, kind, category, config_schema, tags, active)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (name) DO UPDATE
        SET display_name = EXCLUDED.display_name,
            description = EXCLUDED.description,
            kind = EXCLUDED.kind,
            category = EXCLUDED.category,
            config_schema = EXCLUDED.config_schema,
            tags = EXCLUDED.tags
        "#,
    )
    .bind(&descriptor.name)
    .bind(&descriptor.display_name)
    .bind(&descriptor.description)
    .bind(descriptor.kind.as_str())
    .bind(&descriptor.category)
    .bind(&descriptor.config_schema)
    .bind(&descriptor.tags)
    .bind(descriptor.active)
    .execute(pool)
    .await?;

    Ok(())
}

/// Find a descriptor by name
pub async fn find_by_name(
    pool: &PgPool,
    name: &str,
) -> Result<Option<ModuleDescriptor>, sqlx::Error> {
    let row = sqlx::query_as::<_, ModuleRow>(
        r#"
        SELECT name, display_name, description, kind, category, config_schema, tags, active
        FROM modules
        WHERE name = $1
        "#,
    )
    .bind(name)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// List all descriptors
pub async fn list(pool: &PgPool) -> Result<Vec<ModuleDescriptor>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ModuleRow>(
        r#"
        SELECT name, display_name, description, kind, category, config_schema, tags, active
        FROM modules
        ORDER BY name ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Activate or deactivate a module
pub async fn set_active(pool: &PgPool, name: &str, active: bool) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE modules SET active = $1 WHERE name = $2")
        .bind(active)
        .bind(name)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct ModuleRow {
    name: String,
    display_name: String,
    description: Option<String>,
    kind: String,
    category: String,
    config_schema: serde_json::Value,
    tags: Vec<String>,
    active: bool,
}

impl From<ModuleRow> for ModuleDescriptor {
    fn from(row: ModuleRow) -> Self {
        let kind = match row.kind.as_str() {
            "transformer" => ModuleKind::Transformer,
            "loader" => ModuleKind::Loader,
            _ => ModuleKind::Extractor,
        };

        ModuleDescriptor {
            name: row.name,
            display_name: row.display_name,
            description: row.description,
            kind,
            category: row.category,
            config_schema: row.config_schema,
            tags: row.tags,
            active: row.active,
        }
    }
}
