//! Database query functions for the `lesson_plans` table.

use anyhow::{Context, Result};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::models::{GeneratedPlan, GenerationParameters, LessonPlan};

/// Insert a lesson plan row.
pub async fn insert_lesson_plan(
    pool: &PgPool,
    owner_id: Uuid,
    class_id: Uuid,
    parameters: &GenerationParameters,
    plan: &GeneratedPlan,
) -> Result<LessonPlan> {
    let row = sqlx::query_as::<_, LessonPlan>(
        "INSERT INTO lesson_plans (owner_id, class_id, parameters, plan) \
         VALUES ($1, $2, $3, $4) \
         RETURNING *",
    )
    .bind(owner_id)
    .bind(class_id)
    .bind(Json(parameters))
    .bind(Json(plan))
    .fetch_one(pool)
    .await
    .context("failed to insert lesson plan")?;

    Ok(row)
}

/// Fetch a lesson plan only if it belongs to `owner_id`.
pub async fn get_owned_lesson_plan(
    pool: &PgPool,
    id: Uuid,
    owner_id: Uuid,
) -> Result<Option<LessonPlan>> {
    let row = sqlx::query_as::<_, LessonPlan>(
        "SELECT * FROM lesson_plans WHERE id = $1 AND owner_id = $2",
    )
    .bind(id)
    .bind(owner_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch lesson plan")?;

    Ok(row)
}

/// An owner's lesson plans, newest first.
pub async fn list_lesson_plans_for_owner(pool: &PgPool, owner_id: Uuid) -> Result<Vec<LessonPlan>> {
    let rows = sqlx::query_as::<_, LessonPlan>(
        "SELECT * FROM lesson_plans WHERE owner_id = $1 ORDER BY created_at DESC",
    )
    .bind(owner_id)
    .fetch_all(pool)
    .await
    .context("failed to list lesson plans")?;

    Ok(rows)
}

/// An owner's lesson plans that no assessment references yet.
pub async fn list_lesson_plans_without_assessment(
    pool: &PgPool,
    owner_id: Uuid,
) -> Result<Vec<LessonPlan>> {
    let rows = sqlx::query_as::<_, LessonPlan>(
        "SELECT lp.* FROM lesson_plans lp \
         WHERE lp.owner_id = $1 \
           AND NOT EXISTS ( \
               SELECT 1 FROM assessments a WHERE a.lesson_plan_id = lp.id \
           ) \
         ORDER BY lp.created_at DESC",
    )
    .bind(owner_id)
    .fetch_all(pool)
    .await
    .context("failed to list lesson plans without assessments")?;

    Ok(rows)
}

/// Number of lesson plans referencing a class.
pub async fn count_for_class(pool: &PgPool, class_id: Uuid) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM lesson_plans WHERE class_id = $1")
        .bind(class_id)
        .fetch_one(pool)
        .await
        .context("failed to count lesson plans")?;

    Ok(count)
}

/// Delete an owned lesson plan. Returns `false` if nothing matched.
pub async fn delete_owned_lesson_plan(pool: &PgPool, id: Uuid, owner_id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM lesson_plans WHERE id = $1 AND owner_id = $2")
        .bind(id)
        .bind(owner_id)
        .execute(pool)
        .await
        .context("failed to delete lesson plan")?;

    Ok(result.rows_affected() > 0)
}

/// Delete every lesson plan of a class inside the caller's transaction.
pub async fn delete_for_class(conn: &mut PgConnection, class_id: Uuid) -> Result<u64> {
    let result = sqlx::query("DELETE FROM lesson_plans WHERE class_id = $1")
        .bind(class_id)
        .execute(&mut *conn)
        .await
        .context("failed to delete lesson plans for class")?;

    Ok(result.rows_affected())
}
