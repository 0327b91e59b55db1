//! Pipeline Repository
//!
//! Handles all database operations related to pipeline snapshots.

use sqlx::SqlitePool;
use sqlx::types::Json;
use transcast_core::domain::pipeline::Pipeline;
use uuid::Uuid;

/// Persist a pipeline snapshot
pub async fn insert(pool: &SqlitePool, pipeline: &Pipeline) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO pipelines (id, snapshot, ttl_seconds, created_at)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(pipeline.id.to_string())
    .bind(Json(pipeline))
    .bind(pipeline.ttl as i64)
    .bind(pipeline.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Find a pipeline by ID
pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Pipeline>, sqlx::Error> {
    let row = sqlx::query_as::<_, PipelineRow>(
        r#"
        SELECT id, snapshot, ttl_seconds, created_at
        FROM pipelines
        WHERE id = $1
        "#,
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// List all pipelines, newest first
pub async fn list_all(pool: &SqlitePool) -> Result<Vec<Pipeline>, sqlx::Error> {
    let rows = sqlx::query_as::<_, PipelineRow>(
        r#"
        SELECT id, snapshot, ttl_seconds, created_at
        FROM pipelines
        ORDER BY created_at DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Delete a pipeline by ID
pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM pipelines WHERE id = $1")
        .bind(id.to_string())
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
#[allow(dead_code)]
struct PipelineRow {
    id: String,
    snapshot: Json<Pipeline>,
    ttl_seconds: i64,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl From<PipelineRow> for Pipeline {
    fn from(row: PipelineRow) -> Self {
        row.snapshot.0
    }
}
