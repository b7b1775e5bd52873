//! Database query functions for the `dskp_standards` table.

use anyhow::{Context, Result};
use sqlx::PgPool;
use sqlx::types::Json;

use crate::models::{DskpFormEntry, DskpStandard, Subject};

/// Insert or replace a subject's DSKP document.
pub async fn upsert_standard(
    pool: &PgPool,
    subject: Subject,
    forms: &[DskpFormEntry],
) -> Result<DskpStandard> {
    let row = sqlx::query_as::<_, DskpStandard>(
        "INSERT INTO dskp_standards (subject, forms) VALUES ($1, $2) \
         ON CONFLICT (subject) DO UPDATE SET forms = EXCLUDED.forms, updated_at = now() \
         RETURNING *",
    )
    .bind(subject)
    .bind(Json(forms))
    .fetch_one(pool)
    .await
    .context("failed to store DSKP document")?;

    Ok(row)
}

/// Fetch a subject's DSKP document.
pub async fn get_standard(pool: &PgPool, subject: Subject) -> Result<Option<DskpStandard>> {
    let row = sqlx::query_as::<_, DskpStandard>("SELECT * FROM dskp_standards WHERE subject = $1")
        .bind(subject)
        .fetch_optional(pool)
        .await
        .context("failed to fetch DSKP document")?;

    Ok(row)
}

/// Subjects that have a DSKP document, alphabetically.
pub async fn list_subjects(pool: &PgPool) -> Result<Vec<Subject>> {
    let rows: Vec<(Subject,)> =
        sqlx::query_as("SELECT subject FROM dskp_standards ORDER BY subject ASC")
            .fetch_all(pool)
            .await
            .context("failed to list DSKP subjects")?;

    Ok(rows.into_iter().map(|(s,)| s).collect())
}
