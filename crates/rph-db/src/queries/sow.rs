//! Database query functions for the `sow_lessons` table.

use anyhow::{Context, Result};
use sqlx::{PgConnection, PgPool};

use crate::models::{Grade, SowLesson};

/// Insert a lesson, or replace the existing lesson with the same
/// `(form, lesson_no)` in place.
pub async fn upsert_lesson(conn: &mut PgConnection, form: Grade, lesson: &SowLesson) -> Result<()> {
    sqlx::query(
        "INSERT INTO sow_lessons (form, lesson_no, focus, theme, topic) \
         VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT (form, lesson_no) DO UPDATE \
         SET focus = EXCLUDED.focus, theme = EXCLUDED.theme, topic = EXCLUDED.topic, \
             updated_at = now()",
    )
    .bind(form)
    .bind(lesson.lesson_no)
    .bind(&lesson.focus)
    .bind(&lesson.theme)
    .bind(&lesson.topic)
    .execute(&mut *conn)
    .await
    .with_context(|| format!("failed to upsert lesson {} for {form}", lesson.lesson_no))?;

    Ok(())
}

/// All lessons of a form, sorted by `lesson_no` ascending.
pub async fn list_lessons(pool: &PgPool, form: Grade) -> Result<Vec<SowLesson>> {
    let lessons = sqlx::query_as::<_, SowLesson>(
        "SELECT lesson_no, focus, theme, topic FROM sow_lessons \
         WHERE form = $1 ORDER BY lesson_no ASC",
    )
    .bind(form)
    .fetch_all(pool)
    .await
    .context("failed to list scheme-of-work lessons")?;

    Ok(lessons)
}

/// Fetch one lesson of a form.
pub async fn get_lesson(pool: &PgPool, form: Grade, lesson_no: i32) -> Result<Option<SowLesson>> {
    let lesson = sqlx::query_as::<_, SowLesson>(
        "SELECT lesson_no, focus, theme, topic FROM sow_lessons \
         WHERE form = $1 AND lesson_no = $2",
    )
    .bind(form)
    .bind(lesson_no)
    .fetch_optional(pool)
    .await
    .context("failed to fetch scheme-of-work lesson")?;

    Ok(lesson)
}
