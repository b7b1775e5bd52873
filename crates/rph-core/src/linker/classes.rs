//! Class management.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use rph_db::models::{AcademicYear, ClassEntity, Grade, Subject};
use rph_db::queries::{classes, lesson_plans};

use super::map_duplicate;
use crate::collector::draft::check_choice;
use crate::error::{FieldError, PlannerError};

/// Class form input as sent by clients. `year` may be a string or a number.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClassInput {
    pub class_name: Option<String>,
    pub grade: Option<String>,
    pub subject: Option<String>,
    pub year: Option<YearInput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum YearInput {
    Text(String),
    Number(i64),
}

impl YearInput {
    fn as_text(&self) -> String {
        match self {
            YearInput::Text(s) => s.trim().to_string(),
            YearInput::Number(n) => n.to_string(),
        }
    }
}

struct ValidClass {
    name: String,
    grade: Grade,
    subject: Subject,
    year: AcademicYear,
}

impl ValidClass {
    fn fields(&self) -> classes::ClassFields<'_> {
        classes::ClassFields {
            name: &self.name,
            grade: self.grade,
            subject: self.subject,
            year: self.year,
        }
    }

    fn describe(&self) -> String {
        format!("class \"{}\" for {}", self.name, self.year)
    }
}

impl ClassInput {
    fn validate(self) -> Result<ValidClass, PlannerError> {
        let mut errors = Vec::new();

        let name = self.class_name.map(|n| n.trim().to_string()).unwrap_or_default();
        if name.is_empty() {
            errors.push(FieldError::required("className"));
        }
        let grade = check_choice::<Grade>(&self.grade, "grade", &mut errors);
        let subject = check_choice::<Subject>(&self.subject, "subject", &mut errors);
        let year = check_choice::<AcademicYear>(
            &self.year.as_ref().map(YearInput::as_text),
            "year",
            &mut errors,
        );

        match (grade, subject, year) {
            (Some(grade), Some(subject), Some(year)) if errors.is_empty() => Ok(ValidClass {
                name,
                grade,
                subject,
                year,
            }),
            _ => Err(PlannerError::Validation(errors)),
        }
    }
}

/// Outcome of a class deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassDeletion {
    pub class_id: Uuid,
    pub lesson_plans_deleted: u64,
}

/// Create a class. `(owner, name, year)` must be unique.
pub async fn create_class(
    pool: &PgPool,
    owner_id: Uuid,
    input: ClassInput,
) -> Result<ClassEntity, PlannerError> {
    let valid = input.validate()?;
    let class = classes::insert_class(pool, owner_id, &valid.fields())
        .await
        .map_err(|e| map_duplicate(e, classes::OWNER_NAME_YEAR_KEY, || valid.describe()))?;

    tracing::info!(class_id = %class.id, owner_id = %owner_id, "class created");
    Ok(class)
}

pub async fn list_classes(pool: &PgPool, owner_id: Uuid) -> Result<Vec<ClassEntity>, PlannerError> {
    Ok(classes::list_classes_for_owner(pool, owner_id).await?)
}

/// Fetch an owned class. Classes of other teachers are reported as absent.
pub async fn get_class(pool: &PgPool, owner_id: Uuid, id: Uuid) -> Result<ClassEntity, PlannerError> {
    classes::get_owned_class(pool, id, owner_id)
        .await?
        .ok_or_else(|| PlannerError::NotFound("class".to_string()))
}

/// Replace a class's fields. Fails with `NotAuthorized` unless the caller
/// owns an existing class with this ID.
pub async fn update_class(
    pool: &PgPool,
    owner_id: Uuid,
    id: Uuid,
    input: ClassInput,
) -> Result<ClassEntity, PlannerError> {
    let valid = input.validate()?;
    let class = classes::update_owned_class(pool, id, owner_id, &valid.fields())
        .await
        .map_err(|e| map_duplicate(e, classes::OWNER_NAME_YEAR_KEY, || valid.describe()))?
        .ok_or(PlannerError::NotAuthorized)?;

    tracing::info!(class_id = %id, "class updated");
    Ok(class)
}

/// Delete a class and every lesson plan linked to it, atomically.
pub async fn delete_class(
    pool: &PgPool,
    owner_id: Uuid,
    id: Uuid,
) -> Result<ClassDeletion, PlannerError> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    if !classes::lock_owned_class(&mut *tx, id, owner_id).await? {
        // Dropping `tx` rolls back.
        return Err(PlannerError::NotAuthorized);
    }
    let lesson_plans_deleted = lesson_plans::delete_for_class(&mut *tx, id).await?;
    classes::delete_class(&mut *tx, id).await?;

    tx.commit().await.context("failed to commit class deletion")?;

    tracing::info!(class_id = %id, lesson_plans_deleted, "class deleted");
    Ok(ClassDeletion {
        class_id: id,
        lesson_plans_deleted,
    })
}
