//! Generated artifacts: lesson plans and assessments.

use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use rph_db::models::{
    ActivityDetails, Assessment, ClassEntity, GeneratedPlan, GenerationParameters, LessonPlan,
};
use rph_db::queries::assessments::{self, NewAssessment, UsageCounter};
use rph_db::queries::lesson_plans;

use super::map_duplicate;
use crate::error::PlannerError;
use crate::generation::GeneratedAssessment;

// ---------------------------------------------------------------------------
// Lesson plans
// ---------------------------------------------------------------------------

/// Persist a validated plan for a class the caller owns.
pub async fn store_lesson_plan(
    pool: &PgPool,
    owner_id: Uuid,
    class: &ClassEntity,
    params: &GenerationParameters,
    plan: &GeneratedPlan,
) -> Result<LessonPlan, PlannerError> {
    if class.owner_id != owner_id {
        return Err(PlannerError::NotAuthorized);
    }
    let row = lesson_plans::insert_lesson_plan(pool, owner_id, class.id, params, plan).await?;
    tracing::info!(lesson_plan_id = %row.id, class_id = %class.id, "lesson plan stored");
    Ok(row)
}

pub async fn list_lesson_plans(pool: &PgPool, owner_id: Uuid) -> Result<Vec<LessonPlan>, PlannerError> {
    Ok(lesson_plans::list_lesson_plans_for_owner(pool, owner_id).await?)
}

pub async fn get_lesson_plan(
    pool: &PgPool,
    owner_id: Uuid,
    id: Uuid,
) -> Result<LessonPlan, PlannerError> {
    lesson_plans::get_owned_lesson_plan(pool, id, owner_id)
        .await?
        .ok_or_else(|| PlannerError::NotFound("lesson plan".to_string()))
}

pub async fn delete_lesson_plan(pool: &PgPool, owner_id: Uuid, id: Uuid) -> Result<(), PlannerError> {
    if !lesson_plans::delete_owned_lesson_plan(pool, id, owner_id).await? {
        return Err(PlannerError::NotFound("lesson plan".to_string()));
    }
    tracing::info!(lesson_plan_id = %id, "lesson plan deleted");
    Ok(())
}

/// Lesson plans that can still receive an assessment.
pub async fn available_lessons(pool: &PgPool, owner_id: Uuid) -> Result<Vec<LessonPlan>, PlannerError> {
    Ok(lesson_plans::list_lesson_plans_without_assessment(pool, owner_id).await?)
}

// ---------------------------------------------------------------------------
// Assessments
// ---------------------------------------------------------------------------

/// Persist a generated assessment. A lesson plan carries at most one.
pub async fn store_assessment(
    pool: &PgPool,
    owner_id: Uuid,
    lesson_plan: Option<&LessonPlan>,
    params: &GenerationParameters,
    activity: &ActivityDetails,
    generated: &GeneratedAssessment,
) -> Result<Assessment, PlannerError> {
    if let Some(lp) = lesson_plan {
        if lp.owner_id != owner_id {
            return Err(PlannerError::NotAuthorized);
        }
    }

    let mut recorded = params.clone();
    recorded.activity = Some(activity.clone());
    let metadata = serde_json::json!({ "parameters": recorded });

    let lesson_plan_id = lesson_plan.map(|lp| lp.id);
    let new = NewAssessment {
        owner_id,
        lesson_plan_id,
        activity_type: activity.activity_type(),
        metadata: &metadata,
        activity_sheet_html: &generated.activity_sheet,
        rubric_html: generated.rubric.as_deref(),
    };
    let row = assessments::insert_assessment(pool, &new)
        .await
        .map_err(|e| {
            map_duplicate(e, assessments::LESSON_PLAN_KEY, || {
                "assessment for this lesson plan".to_string()
            })
        })?;

    tracing::info!(
        assessment_id = %row.id,
        lesson_plan_id = ?lesson_plan_id,
        activity_type = %row.activity_type,
        "assessment stored"
    );
    Ok(row)
}

/// Fail early when a lesson plan already has its assessment.
pub async fn ensure_no_assessment(pool: &PgPool, lesson_plan_id: Uuid) -> Result<(), PlannerError> {
    if assessments::exists_for_lesson_plan(pool, lesson_plan_id).await? {
        return Err(PlannerError::DuplicateEntity(
            "assessment for this lesson plan".to_string(),
        ));
    }
    Ok(())
}

pub async fn list_assessments(pool: &PgPool, owner_id: Uuid) -> Result<Vec<Assessment>, PlannerError> {
    Ok(assessments::list_assessments_for_owner(pool, owner_id).await?)
}

pub async fn get_assessment(
    pool: &PgPool,
    owner_id: Uuid,
    id: Uuid,
) -> Result<Assessment, PlannerError> {
    assessments::get_owned_assessment(pool, id, owner_id)
        .await?
        .ok_or_else(|| PlannerError::NotFound("assessment".to_string()))
}

/// How an assessment was used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UsageKind {
    View,
    Download,
}

pub async fn record_assessment_usage(
    pool: &PgPool,
    owner_id: Uuid,
    id: Uuid,
    kind: UsageKind,
) -> Result<Assessment, PlannerError> {
    let counter = match kind {
        UsageKind::View => UsageCounter::View,
        UsageKind::Download => UsageCounter::Download,
    };
    assessments::record_usage(pool, id, owner_id, counter)
        .await?
        .ok_or_else(|| PlannerError::NotFound("assessment".to_string()))
}

pub async fn delete_assessment(pool: &PgPool, owner_id: Uuid, id: Uuid) -> Result<(), PlannerError> {
    if !assessments::delete_owned_assessment(pool, id, owner_id).await? {
        return Err(PlannerError::NotFound("assessment".to_string()));
    }
    tracing::info!(assessment_id = %id, "assessment deleted");
    Ok(())
}
