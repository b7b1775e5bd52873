//! Domain values shared by the integration tests of several crates.

use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use rph_db::models::{
    AcademicYear, ClassEntity, GeneratedPlan, GenerationParameters, Grade, HotsFocus,
    PlanActivities, ProficiencyLevel, Subject,
};
use rph_db::queries::classes::{self, ClassFields};

pub const TOPIC: &str = "Making our school safer";

/// Insert a Form 5 English class for 2025.
pub async fn insert_class(pool: &PgPool, owner_id: Uuid, name: &str) -> ClassEntity {
    classes::insert_class(
        pool,
        owner_id,
        &ClassFields {
            name,
            grade: Grade::Form5,
            subject: Subject::English,
            year: AcademicYear::Y2025,
        },
    )
    .await
    .expect("insert fixture class")
}

/// Validated inputs for a B1 Mid / evaluate writing lesson.
pub fn lesson_parameters(class_id: Uuid) -> GenerationParameters {
    GenerationParameters {
        class_id,
        grade: Grade::Form5,
        sow_lesson_no: 1,
        sow_focus: "writing".to_string(),
        proficiency_level: ProficiencyLevel::B1Mid,
        hots_focus: HotsFocus::Evaluate,
        specific_topic: TOPIC.to_string(),
        additional_notes: None,
        activity: None,
    }
}

pub fn generated_plan() -> GeneratedPlan {
    GeneratedPlan {
        learning_objective: "Pupils will be able to evaluate school safety measures.".to_string(),
        success_criteria: vec!["Name three hazards".to_string(), "Justify one measure".to_string()],
        activities: PlanActivities {
            pre_lesson: vec!["Photo prompt".to_string()],
            during_lesson: vec!["Gallery walk".to_string()],
            post_lesson: vec!["Exit ticket".to_string()],
        },
        materials: vec!["Photos".to_string()],
    }
}

/// [`generated_plan`] as the provider would return it.
pub fn plan_json() -> String {
    json!({
        "learningObjective": "Pupils will be able to evaluate school safety measures.",
        "successCriteria": ["Name three hazards", "Justify one measure"],
        "activities": {
            "preLesson": ["Photo prompt"],
            "duringLesson": ["Gallery walk"],
            "postLesson": ["Exit ticket"]
        },
        "materials": ["Photos"]
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_json_matches_generated_plan() {
        let parsed: GeneratedPlan = serde_json::from_str(&plan_json()).unwrap();
        assert_eq!(parsed, generated_plan());
    }
}
