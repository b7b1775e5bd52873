//! Database query functions for the `textbook_topics` table.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::{Grade, TextbookTopics};

/// Replace the topic list of a form.
pub async fn replace_topics(pool: &PgPool, form: Grade, topics: &[String]) -> Result<TextbookTopics> {
    let row = sqlx::query_as::<_, TextbookTopics>(
        "INSERT INTO textbook_topics (form, topics) VALUES ($1, $2) \
         ON CONFLICT (form) DO UPDATE SET topics = EXCLUDED.topics, updated_at = now() \
         RETURNING *",
    )
    .bind(form)
    .bind(topics)
    .fetch_one(pool)
    .await
    .context("failed to store textbook topics")?;

    Ok(row)
}

/// Topics of a form, if any were uploaded.
pub async fn get_topics(pool: &PgPool, form: Grade) -> Result<Option<TextbookTopics>> {
    let row = sqlx::query_as::<_, TextbookTopics>("SELECT * FROM textbook_topics WHERE form = $1")
        .bind(form)
        .fetch_optional(pool)
        .await
        .context("failed to fetch textbook topics")?;

    Ok(row)
}
