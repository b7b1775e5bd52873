//! Database query functions for the `assessments` table.

use anyhow::{Context, Result};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use crate::models::{ActivityType, Assessment};

/// Name of the one-assessment-per-lesson-plan constraint.
pub const LESSON_PLAN_KEY: &str = "assessments_lesson_plan_id_key";

/// Column values for a new assessment.
#[derive(Debug, Clone)]
pub struct NewAssessment<'a> {
    pub owner_id: Uuid,
    pub lesson_plan_id: Option<Uuid>,
    pub activity_type: ActivityType,
    pub metadata: &'a serde_json::Value,
    pub activity_sheet_html: &'a str,
    pub rubric_html: Option<&'a str>,
}

/// Which usage counter to bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageCounter {
    View,
    Download,
}

/// Insert an assessment row.
pub async fn insert_assessment(pool: &PgPool, new: &NewAssessment<'_>) -> Result<Assessment> {
    let row = sqlx::query_as::<_, Assessment>(
        "INSERT INTO assessments \
         (owner_id, lesson_plan_id, activity_type, metadata, activity_sheet_html, rubric_html) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING *",
    )
    .bind(new.owner_id)
    .bind(new.lesson_plan_id)
    .bind(new.activity_type)
    .bind(Json(new.metadata))
    .bind(new.activity_sheet_html)
    .bind(new.rubric_html)
    .fetch_one(pool)
    .await
    .context("failed to insert assessment")?;

    Ok(row)
}

/// Fetch an assessment only if it belongs to `owner_id`.
pub async fn get_owned_assessment(
    pool: &PgPool,
    id: Uuid,
    owner_id: Uuid,
) -> Result<Option<Assessment>> {
    let row = sqlx::query_as::<_, Assessment>(
        "SELECT * FROM assessments WHERE id = $1 AND owner_id = $2",
    )
    .bind(id)
    .bind(owner_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch assessment")?;

    Ok(row)
}

/// Whether an assessment already references `lesson_plan_id`.
pub async fn exists_for_lesson_plan(pool: &PgPool, lesson_plan_id: Uuid) -> Result<bool> {
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM assessments WHERE lesson_plan_id = $1)")
            .bind(lesson_plan_id)
            .fetch_one(pool)
            .await
            .context("failed to check for existing assessment")?;

    Ok(exists)
}

/// An owner's assessments, newest first.
pub async fn list_assessments_for_owner(pool: &PgPool, owner_id: Uuid) -> Result<Vec<Assessment>> {
    let rows = sqlx::query_as::<_, Assessment>(
        "SELECT * FROM assessments WHERE owner_id = $1 ORDER BY created_at DESC",
    )
    .bind(owner_id)
    .fetch_all(pool)
    .await
    .context("failed to list assessments")?;

    Ok(rows)
}

/// Increment a usage counter on an owned assessment and return the row.
pub async fn record_usage(
    pool: &PgPool,
    id: Uuid,
    owner_id: Uuid,
    counter: UsageCounter,
) -> Result<Option<Assessment>> {
    let sql = match counter {
        UsageCounter::View => {
            "UPDATE assessments SET view_count = view_count + 1 \
             WHERE id = $1 AND owner_id = $2 RETURNING *"
        }
        UsageCounter::Download => {
            "UPDATE assessments SET download_count = download_count + 1 \
             WHERE id = $1 AND owner_id = $2 RETURNING *"
        }
    };

    let row = sqlx::query_as::<_, Assessment>(sql)
        .bind(id)
        .bind(owner_id)
        .fetch_optional(pool)
        .await
        .context("failed to record assessment usage")?;

    Ok(row)
}

/// Delete an owned assessment. Returns `false` if nothing matched.
pub async fn delete_owned_assessment(pool: &PgPool, id: Uuid, owner_id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM assessments WHERE id = $1 AND owner_id = $2")
        .bind(id)
        .bind(owner_id)
        .execute(pool)
        .await
        .context("failed to delete assessment")?;

    Ok(result.rows_affected() > 0)
}
