//! The four-step planner state machine.
//!
//! ```text
//! ChooseClass -> LessonDetails -> AdditionalInfo -> ReviewAndConfirm
//!                                      |    ^
//!                         begin_generation  finish_generation(Err)
//!                                      v    |
//!                                   (generating)
//! ```
//!
//! The machine itself does no I/O. Callers attach the chosen class and the
//! scheme-of-work lookup result as the step changes.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use rph_db::models::{ClassEntity, GenerationParameters, Grade, SowLesson};

use super::draft::GenerationDraft;
use crate::error::PlannerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Step {
    ChooseClass,
    LessonDetails,
    AdditionalInfo,
    ReviewAndConfirm,
}

impl Step {
    fn index(self) -> usize {
        match self {
            Step::ChooseClass => 1,
            Step::LessonDetails => 2,
            Step::AdditionalInfo => 3,
            Step::ReviewAndConfirm => 4,
        }
    }
}

/// Scheme-of-work options shown on the lesson-details step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum SowOptions {
    NotLoaded,
    Loaded { lessons: Vec<SowLesson> },
    /// The lookup failed; the step stays usable and shows the notice.
    Unavailable { notice: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannerSession {
    pub id: Uuid,
    #[serde(skip)]
    pub owner_id: Uuid,
    step: Step,
    generating: bool,
    draft: GenerationDraft,
    class_grade: Option<Grade>,
    sow_options: SowOptions,
    last_error: Option<String>,
    lesson_plan_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl PlannerSession {
    pub fn new(owner_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            step: Step::ChooseClass,
            generating: false,
            draft: GenerationDraft::default(),
            class_grade: None,
            sow_options: SowOptions::NotLoaded,
            last_error: None,
            lesson_plan_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn step_number(&self) -> usize {
        self.step.index()
    }

    pub fn is_generating(&self) -> bool {
        self.generating
    }

    pub fn draft(&self) -> &GenerationDraft {
        &self.draft
    }

    pub fn sow_options(&self) -> &SowOptions {
        &self.sow_options
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn lesson_plan_id(&self) -> Option<Uuid> {
        self.lesson_plan_id
    }

    fn ensure_editable(&self) -> Result<(), PlannerError> {
        if self.generating {
            return Err(PlannerError::GenerationInProgress);
        }
        if self.step == Step::ReviewAndConfirm {
            return Err(PlannerError::validation(
                "step",
                "the lesson plan has already been generated",
            ));
        }
        Ok(())
    }

    /// Merge new input into the draft. Changing the class drops anything
    /// derived from the previous one; while a class is attached its grade
    /// cannot be overridden.
    pub fn update(&mut self, patch: GenerationDraft) -> Result<(), PlannerError> {
        self.ensure_editable()?;
        let class_changed = patch.class_id.is_some() && patch.class_id != self.draft.class_id;
        if class_changed {
            self.class_grade = None;
            self.sow_options = SowOptions::NotLoaded;
            self.draft.grade = None;
            self.draft.sow = None;
        } else if let (Some(grade), Some(requested)) = (self.class_grade, patch.grade.as_deref()) {
            if requested.trim() != grade.to_string() {
                return Err(PlannerError::validation(
                    "grade",
                    format!("is set by the chosen class ({grade})"),
                ));
            }
        }
        self.draft.merge(patch);
        Ok(())
    }

    /// Record the class the teacher picked; its grade drives the SOW lookup.
    pub fn attach_class(&mut self, class: &ClassEntity) {
        self.draft.class_id = Some(class.id);
        self.draft.grade = Some(class.grade.to_string());
        self.class_grade = Some(class.grade);
    }

    pub fn class_grade(&self) -> Option<Grade> {
        self.class_grade
    }

    /// Store the SOW lookup result for the lesson-details step.
    pub fn set_sow_options(&mut self, result: Result<Vec<SowLesson>, PlannerError>) {
        self.sow_options = match result {
            Ok(lessons) if !lessons.is_empty() => SowOptions::Loaded { lessons },
            Ok(_) | Err(PlannerError::NotFound(_)) => SowOptions::Unavailable {
                notice: "No scheme of work is available for this grade yet.".to_string(),
            },
            Err(e) => SowOptions::Unavailable {
                notice: e.public_message(),
            },
        };
    }

    /// Validate the current step and move forward.
    ///
    /// Leaving `ChooseClass` requires [`attach_class`](Self::attach_class)
    /// to have been called. Leaving `AdditionalInfo` is only possible
    /// through generation.
    pub fn next(&mut self) -> Result<Step, PlannerError> {
        self.ensure_editable()?;
        self.step = match self.step {
            Step::ChooseClass => {
                let errors = self.draft.class_errors();
                if !errors.is_empty() {
                    return Err(PlannerError::Validation(errors));
                }
                if self.class_grade.is_none() {
                    return Err(PlannerError::validation("classId", "class not found"));
                }
                Step::LessonDetails
            }
            Step::LessonDetails => {
                let errors = self.draft.lesson_detail_errors(true);
                if !errors.is_empty() {
                    return Err(PlannerError::Validation(errors));
                }
                Step::AdditionalInfo
            }
            Step::AdditionalInfo => {
                return Err(PlannerError::validation(
                    "step",
                    "generate the lesson plan to continue",
                ));
            }
            Step::ReviewAndConfirm => return Ok(self.step),
        };
        self.last_error = None;
        Ok(self.step)
    }

    /// Move back one step. Entered data is kept.
    pub fn prev(&mut self) -> Result<Step, PlannerError> {
        self.ensure_editable()?;
        self.step = match self.step {
            Step::ChooseClass | Step::LessonDetails => Step::ChooseClass,
            Step::AdditionalInfo => Step::LessonDetails,
            Step::ReviewAndConfirm => Step::ReviewAndConfirm,
        };
        Ok(self.step)
    }

    /// Enter the generating sub-state and hand out the validated inputs.
    pub fn begin_generation(&mut self) -> Result<GenerationParameters, PlannerError> {
        if self.generating {
            return Err(PlannerError::GenerationInProgress);
        }
        if self.step != Step::AdditionalInfo {
            return Err(PlannerError::validation(
                "step",
                "generation is only available on the additional-information step",
            ));
        }
        let params = self.draft.to_parameters(self.class_grade, true)?;
        self.generating = true;
        self.last_error = None;
        Ok(params)
    }

    /// Leave the generating sub-state.
    ///
    /// Success advances to review with the stored plan's ID; failure stays
    /// on `AdditionalInfo` with every input intact.
    pub fn finish_generation(&mut self, outcome: Result<Uuid, String>) {
        self.generating = false;
        match outcome {
            Ok(id) => {
                self.lesson_plan_id = Some(id);
                self.step = Step::ReviewAndConfirm;
            }
            Err(message) => self.last_error = Some(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use rph_db::models::{AcademicYear, Subject};

    use super::*;
    use crate::collector::draft::SowSelection;

    fn class(grade: Grade) -> ClassEntity {
        ClassEntity {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            name: "5 Amanah".to_string(),
            grade,
            subject: Subject::English,
            year: AcademicYear::Y2025,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn lesson_details() -> GenerationDraft {
        GenerationDraft {
            sow: Some(SowSelection {
                lesson_no: Some(4),
                focus: Some("writing".to_string()),
            }),
            proficiency_level: Some("B1 Mid".to_string()),
            hots_focus: Some("evaluate".to_string()),
            specific_topic: Some("Making our school safer".to_string()),
            activity_type: Some("textbook".to_string()),
            textbook_topic: Some("Unit 4".to_string()),
            ..Default::default()
        }
    }

    fn session_at_additional_info() -> PlannerSession {
        let mut s = PlannerSession::new(Uuid::new_v4());
        s.attach_class(&class(Grade::Form5));
        s.next().unwrap();
        s.update(lesson_details()).unwrap();
        s.next().unwrap();
        s
    }

    #[test]
    fn starts_on_choose_class() {
        let s = PlannerSession::new(Uuid::new_v4());
        assert_eq!(s.step(), Step::ChooseClass);
        assert_eq!(s.step_number(), 1);
        assert!(!s.is_generating());
    }

    #[test]
    fn choose_class_requires_class() {
        let mut s = PlannerSession::new(Uuid::new_v4());
        assert!(matches!(s.next(), Err(PlannerError::Validation(_))));
        assert_eq!(s.step(), Step::ChooseClass);
    }

    #[test]
    fn lesson_details_blocks_until_complete() {
        let mut s = PlannerSession::new(Uuid::new_v4());
        s.attach_class(&class(Grade::Form5));
        assert_eq!(s.next().unwrap(), Step::LessonDetails);

        let err = s.next().unwrap_err();
        let PlannerError::Validation(errors) = err else {
            panic!("expected validation error");
        };
        assert!(errors.iter().any(|e| e.field == "activityType"));
        assert_eq!(s.step(), Step::LessonDetails);

        s.update(lesson_details()).unwrap();
        assert_eq!(s.next().unwrap(), Step::AdditionalInfo);
    }

    #[test]
    fn prev_keeps_entered_data() {
        let mut s = session_at_additional_info();
        assert_eq!(s.prev().unwrap(), Step::LessonDetails);
        assert_eq!(
            s.draft().specific_topic.as_deref(),
            Some("Making our school safer")
        );
        assert_eq!(s.prev().unwrap(), Step::ChooseClass);
        assert_eq!(s.prev().unwrap(), Step::ChooseClass);
    }

    #[test]
    fn next_cannot_skip_generation() {
        let mut s = session_at_additional_info();
        assert!(s.next().is_err());
        assert_eq!(s.step(), Step::AdditionalInfo);
    }

    #[test]
    fn generation_only_from_additional_info() {
        let mut s = PlannerSession::new(Uuid::new_v4());
        assert!(s.begin_generation().is_err());
        assert!(!s.is_generating());
    }

    #[test]
    fn successful_generation_moves_to_review() {
        let mut s = session_at_additional_info();
        let params = s.begin_generation().unwrap();
        assert_eq!(params.grade, Grade::Form5);
        assert!(s.is_generating());

        assert!(matches!(
            s.begin_generation(),
            Err(PlannerError::GenerationInProgress)
        ));
        assert!(matches!(
            s.update(GenerationDraft::default()),
            Err(PlannerError::GenerationInProgress)
        ));

        let id = Uuid::new_v4();
        s.finish_generation(Ok(id));
        assert_eq!(s.step(), Step::ReviewAndConfirm);
        assert_eq!(s.lesson_plan_id(), Some(id));
        assert!(!s.is_generating());
    }

    #[test]
    fn failed_generation_keeps_inputs() {
        let mut s = session_at_additional_info();
        let before = s.draft().clone();
        s.begin_generation().unwrap();
        s.finish_generation(Err("Failed to generate content. Please try again.".to_string()));

        assert_eq!(s.step(), Step::AdditionalInfo);
        assert_eq!(s.draft(), &before);
        assert!(s.last_error().is_some());
        assert!(!s.is_generating());
        s.begin_generation().expect("retry allowed");
    }

    #[test]
    fn missing_sow_is_a_notice_not_an_error() {
        let mut s = PlannerSession::new(Uuid::new_v4());
        s.set_sow_options(Err(PlannerError::NotFound("scheme of work".to_string())));
        assert!(matches!(s.sow_options(), SowOptions::Unavailable { .. }));

        s.set_sow_options(Ok(vec![SowLesson {
            lesson_no: 1,
            focus: "reading".to_string(),
            theme: String::new(),
            topic: String::new(),
        }]));
        assert!(matches!(s.sow_options(), SowOptions::Loaded { lessons } if lessons.len() == 1));
    }

    #[test]
    fn class_grade_cannot_be_overridden() {
        let mut s = PlannerSession::new(Uuid::new_v4());
        s.attach_class(&class(Grade::Form5));
        let err = s
            .update(GenerationDraft {
                grade: Some("Year 1".to_string()),
                ..Default::default()
            })
            .unwrap_err();
        let PlannerError::Validation(errors) = err else {
            panic!("expected validation error");
        };
        assert_eq!(errors[0].field, "grade");
        assert_eq!(s.draft().grade.as_deref(), Some("Form 5"));

        // Echoing the class grade back is fine.
        s.update(GenerationDraft {
            grade: Some("Form 5".to_string()),
            ..Default::default()
        })
        .unwrap();

        s.next().unwrap();
        s.update(lesson_details()).unwrap();
        s.next().unwrap();
        assert_eq!(s.begin_generation().unwrap().grade, Grade::Form5);
    }

    #[test]
    fn stale_draft_grade_blocks_generation() {
        let mut s = session_at_additional_info();
        s.draft.grade = Some("Year 1".to_string());
        let err = s.begin_generation().unwrap_err();
        assert!(matches!(err, PlannerError::Validation(_)));
        assert!(!s.is_generating());
    }

    #[test]
    fn changing_class_resets_derived_state() {
        let mut s = PlannerSession::new(Uuid::new_v4());
        s.attach_class(&class(Grade::Form5));
        s.set_sow_options(Ok(vec![]));
        s.update(GenerationDraft {
            class_id: Some(Uuid::new_v4()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(s.class_grade(), None);
        assert_eq!(s.sow_options(), &SowOptions::NotLoaded);
    }
}
