//! Curriculum reference data: schemes of work, textbook topics and DSKP
//! documents.

use std::collections::{BTreeMap, HashSet};

use anyhow::Context;
use sqlx::PgPool;

use rph_db::models::{DskpFormEntry, DskpStandard, Grade, SowLesson, Subject, TextbookTopics};
use rph_db::queries::{dskp, sow, textbook};

use crate::error::{FieldError, PlannerError};

/// Merge an uploaded batch into a form's scheme of work.
///
/// Lessons are keyed by number: an existing lesson is replaced in place, a
/// new one is inserted, and the stored list stays sorted by number. When
/// the batch repeats a number the last occurrence wins. Returns the full
/// list after the merge.
pub async fn upload_sow(
    pool: &PgPool,
    form: Grade,
    lessons: &[SowLesson],
) -> Result<Vec<SowLesson>, PlannerError> {
    if lessons.is_empty() {
        return Err(PlannerError::validation(
            "lessons",
            "at least one lesson is required",
        ));
    }

    let mut errors = Vec::new();
    let mut batch: BTreeMap<i32, SowLesson> = BTreeMap::new();
    for (i, lesson) in lessons.iter().enumerate() {
        if lesson.lesson_no <= 0 {
            errors.push(FieldError::new(
                format!("lessons[{i}].lessonNo"),
                "must be a positive number",
            ));
        }
        if lesson.focus.trim().is_empty() {
            errors.push(FieldError::required(format!("lessons[{i}].focus")));
        }
        batch.insert(
            lesson.lesson_no,
            SowLesson {
                lesson_no: lesson.lesson_no,
                focus: lesson.focus.trim().to_string(),
                theme: lesson.theme.trim().to_string(),
                topic: lesson.topic.trim().to_string(),
            },
        );
    }
    if !errors.is_empty() {
        return Err(PlannerError::Validation(errors));
    }

    let mut tx = pool.begin().await.context("failed to begin transaction")?;
    for lesson in batch.values() {
        sow::upsert_lesson(&mut *tx, form, lesson).await?;
    }
    tx.commit().await.context("failed to commit scheme of work")?;

    tracing::info!(%form, uploaded = batch.len(), "scheme of work updated");
    Ok(sow::list_lessons(pool, form).await?)
}

/// The scheme of work for a grade, sorted by lesson number.
pub async fn get_sow(pool: &PgPool, form: Grade) -> Result<Vec<SowLesson>, PlannerError> {
    let lessons = sow::list_lessons(pool, form).await?;
    if lessons.is_empty() {
        return Err(PlannerError::NotFound(format!("scheme of work for {form}")));
    }
    Ok(lessons)
}

/// Replace a form's textbook topic list. Blank and repeated topics are
/// dropped; order is kept.
pub async fn replace_textbook_topics(
    pool: &PgPool,
    form: Grade,
    topics: &[String],
) -> Result<TextbookTopics, PlannerError> {
    let mut seen = HashSet::new();
    let cleaned: Vec<String> = topics
        .iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty() && seen.insert(t.clone()))
        .collect();
    if cleaned.is_empty() {
        return Err(PlannerError::validation(
            "topics",
            "at least one topic is required",
        ));
    }

    let row = textbook::replace_topics(pool, form, &cleaned).await?;
    tracing::info!(%form, topics = row.topics.len(), "textbook topics replaced");
    Ok(row)
}

pub async fn get_textbook_topics(pool: &PgPool, form: Grade) -> Result<TextbookTopics, PlannerError> {
    textbook::get_topics(pool, form)
        .await?
        .ok_or_else(|| PlannerError::NotFound(format!("textbook topics for {form}")))
}

/// Store a subject's DSKP document, replacing any previous version. Each
/// form may appear once.
pub async fn upsert_dskp(
    pool: &PgPool,
    subject: Subject,
    forms: &[DskpFormEntry],
) -> Result<DskpStandard, PlannerError> {
    if forms.is_empty() {
        return Err(PlannerError::validation(
            "forms",
            "at least one form is required",
        ));
    }
    let mut seen = HashSet::new();
    let errors: Vec<FieldError> = forms
        .iter()
        .enumerate()
        .filter(|(_, entry)| !seen.insert(entry.form))
        .map(|(i, entry)| {
            FieldError::new(format!("forms[{i}].form"), format!("{} appears twice", entry.form))
        })
        .collect();
    if !errors.is_empty() {
        return Err(PlannerError::Validation(errors));
    }

    let row = dskp::upsert_standard(pool, subject, forms).await?;
    tracing::info!(%subject, forms = forms.len(), "DSKP document stored");
    Ok(row)
}

pub async fn get_dskp(pool: &PgPool, subject: Subject) -> Result<DskpStandard, PlannerError> {
    dskp::get_standard(pool, subject)
        .await?
        .ok_or_else(|| PlannerError::NotFound(format!("DSKP for {subject}")))
}

pub async fn list_dskp_subjects(pool: &PgPool) -> Result<Vec<Subject>, PlannerError> {
    Ok(dskp::list_subjects(pool).await?)
}
