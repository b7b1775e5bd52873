//! End-to-end generation: validate, assemble, generate, parse, persist.
//!
//! Every entry point follows the same order, and nothing is written to the
//! database unless the model output parsed cleanly. A failed attempt can be
//! retried by calling the entry point again; there are no automatic
//! retries.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use rph_db::models::{ActivityDetails, Assessment, ClassEntity, GenerationParameters, LessonPlan};
use rph_db::queries::sow;

use crate::collector::GenerationDraft;
use crate::collector::draft::grade_mismatch;
use crate::error::PlannerError;
use crate::generation::{
    DEFAULT_TIMEOUT, TextGenerator, generate_with_timeout, parse_generated_assessment,
    parse_generated_plan,
};
use crate::guard::InFlightGuard;
use crate::linker;
use crate::prompt::{
    AssessmentPromptInput, LessonPromptInput, build_assessment_prompt, build_lesson_prompt,
};

/// Shared handles every generation needs.
#[derive(Clone)]
pub struct GenerationContext {
    pub pool: PgPool,
    generator: Arc<dyn TextGenerator>,
    timeout: Duration,
    in_flight: InFlightGuard,
}

/// Body of the assessment endpoints: an optional source lesson plan plus
/// the usual draft fields.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentRequest {
    #[serde(default)]
    pub lesson_plan_id: Option<Uuid>,
    #[serde(flatten)]
    pub draft: GenerationDraft,
}

impl GenerationContext {
    pub fn new(pool: PgPool, generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            pool,
            generator,
            timeout: DEFAULT_TIMEOUT,
            in_flight: InFlightGuard::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn in_flight(&self) -> &InFlightGuard {
        &self.in_flight
    }

    /// Generate and store a lesson plan from a complete draft.
    ///
    /// One generation per user may run at a time through this entry point.
    pub async fn generate_lesson_plan(
        &self,
        owner_id: Uuid,
        draft: &GenerationDraft,
    ) -> Result<LessonPlan, PlannerError> {
        let params = draft.to_parameters(None, false)?;
        let _permit = self.in_flight.try_acquire(owner_id)?;
        self.lesson_plan_from_parameters(owner_id, &params).await
    }

    /// Run the generation chain for already-validated inputs. The caller is
    /// responsible for holding an in-flight permit.
    pub async fn lesson_plan_from_parameters(
        &self,
        owner_id: Uuid,
        params: &GenerationParameters,
    ) -> Result<LessonPlan, PlannerError> {
        let class = linker::get_class(&self.pool, owner_id, params.class_id).await?;
        ensure_class_grade(&class, params)?;
        let sow_lesson = sow::get_lesson(&self.pool, params.grade, params.sow_lesson_no).await?;

        let prompt = build_lesson_prompt(&LessonPromptInput {
            params,
            subject: class.subject,
            sow_lesson: sow_lesson.as_ref(),
        });
        let raw = generate_with_timeout(self.generator.as_ref(), &prompt, self.timeout)
            .await
            .inspect_err(|e| log_failure("lesson plan", e))?;
        let plan = parse_generated_plan(&raw).inspect_err(|e| log_failure("lesson plan", e))?;

        linker::store_lesson_plan(&self.pool, owner_id, &class, params, &plan).await
    }

    /// Generate an assessment for one of the caller's lesson plans.
    ///
    /// Activity fields in the request take precedence over the activity
    /// stored with the plan.
    pub async fn generate_assessment_from_lesson_plan(
        &self,
        owner_id: Uuid,
        request: &AssessmentRequest,
    ) -> Result<Assessment, PlannerError> {
        let lesson_plan_id = request
            .lesson_plan_id
            .ok_or_else(|| PlannerError::validation("lessonPlanId", "is required"))?;
        let lesson_plan = linker::get_lesson_plan(&self.pool, owner_id, lesson_plan_id).await?;
        linker::ensure_no_assessment(&self.pool, lesson_plan.id).await?;

        let activity = match (&request.draft.activity_type, &lesson_plan.parameters.activity) {
            (None, Some(stored)) => stored.clone(),
            _ => request.draft.to_activity()?,
        };

        let _permit = self.in_flight.try_acquire(owner_id)?;
        self.assessment_from_parameters(owner_id, &lesson_plan.parameters.0, &activity, Some(&lesson_plan))
            .await
    }

    /// Generate an assessment without a source lesson plan.
    pub async fn generate_assessment(
        &self,
        owner_id: Uuid,
        request: &AssessmentRequest,
    ) -> Result<Assessment, PlannerError> {
        let params = request.draft.to_parameters(None, true)?;
        let activity = params
            .activity
            .clone()
            .ok_or_else(|| PlannerError::validation("activityType", "is required"))?;
        let class = linker::get_class(&self.pool, owner_id, params.class_id).await?;
        ensure_class_grade(&class, &params)?;

        let _permit = self.in_flight.try_acquire(owner_id)?;
        self.assessment_from_parameters(owner_id, &params, &activity, None)
            .await
    }

    async fn assessment_from_parameters(
        &self,
        owner_id: Uuid,
        params: &GenerationParameters,
        activity: &ActivityDetails,
        lesson_plan: Option<&LessonPlan>,
    ) -> Result<Assessment, PlannerError> {
        let prompt = build_assessment_prompt(&AssessmentPromptInput {
            params,
            activity,
            lesson_plan: lesson_plan.map(|lp| &lp.plan.0),
        });
        let raw = generate_with_timeout(self.generator.as_ref(), &prompt, self.timeout)
            .await
            .inspect_err(|e| log_failure("assessment", e))?;
        let generated =
            parse_generated_assessment(&raw).inspect_err(|e| log_failure("assessment", e))?;

        linker::store_assessment(&self.pool, owner_id, lesson_plan, params, activity, &generated)
            .await
    }
}

/// Generation parameters follow the class they are stored against.
fn ensure_class_grade(class: &ClassEntity, params: &GenerationParameters) -> Result<(), PlannerError> {
    if class.grade == params.grade {
        Ok(())
    } else {
        Err(PlannerError::Validation(vec![grade_mismatch(class.grade)]))
    }
}

fn log_failure(what: &str, err: &PlannerError) {
    match err {
        PlannerError::MalformedResponse { .. } | PlannerError::SchemaViolation(_) => {
            tracing::warn!(error = %err, "{what} generation returned unusable output");
        }
        _ => tracing::error!(error = %err, "{what} generation failed"),
    }
}
