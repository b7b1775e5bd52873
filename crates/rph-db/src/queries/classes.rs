//! Database query functions for the `classes` table.

use anyhow::{Context, Result};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::models::{AcademicYear, ClassEntity, Grade, Subject};

/// Name of the `(owner_id, name, year)` uniqueness constraint.
pub const OWNER_NAME_YEAR_KEY: &str = "classes_owner_name_year_key";

/// Column values for a new or edited class.
#[derive(Debug, Clone)]
pub struct ClassFields<'a> {
    pub name: &'a str,
    pub grade: Grade,
    pub subject: Subject,
    pub year: AcademicYear,
}

/// Insert a class. A duplicate `(owner, name, year)` surfaces as a unique
/// violation on [`OWNER_NAME_YEAR_KEY`].
pub async fn insert_class(
    pool: &PgPool,
    owner_id: Uuid,
    fields: &ClassFields<'_>,
) -> Result<ClassEntity> {
    let class = sqlx::query_as::<_, ClassEntity>(
        "INSERT INTO classes (owner_id, name, grade, subject, year) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(owner_id)
    .bind(fields.name)
    .bind(fields.grade)
    .bind(fields.subject)
    .bind(fields.year)
    .fetch_one(pool)
    .await
    .context("failed to insert class")?;

    Ok(class)
}

/// Fetch a class only if it belongs to `owner_id`.
pub async fn get_owned_class(
    pool: &PgPool,
    id: Uuid,
    owner_id: Uuid,
) -> Result<Option<ClassEntity>> {
    let class = sqlx::query_as::<_, ClassEntity>(
        "SELECT * FROM classes WHERE id = $1 AND owner_id = $2",
    )
    .bind(id)
    .bind(owner_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch class")?;

    Ok(class)
}

/// List an owner's classes, newest year first then by name.
pub async fn list_classes_for_owner(pool: &PgPool, owner_id: Uuid) -> Result<Vec<ClassEntity>> {
    let classes = sqlx::query_as::<_, ClassEntity>(
        "SELECT * FROM classes WHERE owner_id = $1 ORDER BY year DESC, name ASC",
    )
    .bind(owner_id)
    .fetch_all(pool)
    .await
    .context("failed to list classes")?;

    Ok(classes)
}

/// Update a class owned by `owner_id`. Returns `None` when no owned row
/// matched.
pub async fn update_owned_class(
    pool: &PgPool,
    id: Uuid,
    owner_id: Uuid,
    fields: &ClassFields<'_>,
) -> Result<Option<ClassEntity>> {
    let class = sqlx::query_as::<_, ClassEntity>(
        "UPDATE classes \
         SET name = $3, grade = $4, subject = $5, year = $6, updated_at = now() \
         WHERE id = $1 AND owner_id = $2 \
         RETURNING *",
    )
    .bind(id)
    .bind(owner_id)
    .bind(fields.name)
    .bind(fields.grade)
    .bind(fields.subject)
    .bind(fields.year)
    .fetch_optional(pool)
    .await
    .context("failed to update class")?;

    Ok(class)
}

/// Lock an owned class row for the rest of the transaction.
///
/// Returns `false` when the class does not exist or is not owned.
pub async fn lock_owned_class(conn: &mut PgConnection, id: Uuid, owner_id: Uuid) -> Result<bool> {
    let row: Option<(Uuid,)> =
        sqlx::query_as("SELECT id FROM classes WHERE id = $1 AND owner_id = $2 FOR UPDATE")
            .bind(id)
            .bind(owner_id)
            .fetch_optional(&mut *conn)
            .await
            .context("failed to lock class")?;

    Ok(row.is_some())
}

/// Delete a class row. Child lesson plans must already be gone.
pub async fn delete_class(conn: &mut PgConnection, id: Uuid) -> Result<u64> {
    let result = sqlx::query("DELETE FROM classes WHERE id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await
        .context("failed to delete class")?;

    Ok(result.rows_affected())
}
