//! Raw generation inputs and their validation.
//!
//! A [`GenerationDraft`] holds whatever the client has filled in so far;
//! every field is optional and kept as text so that bad values come back as
//! field-level errors instead of a whole-body parse failure.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use rph_db::models::{
    AcademicYear, ActivityDetails, ActivityType, Arrangement, GenerationParameters, Grade,
    HotsFocus, ProficiencyLevel, QuestionKind, QuestionSpec, Subject,
};

use crate::error::{FieldError, PlannerError};

/// Upper bound on questions of one kind.
pub const MAX_QUESTIONS_PER_KIND: u32 = 50;

/// The selected scheme-of-work lesson.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SowSelection {
    pub lesson_no: Option<i32>,
    pub focus: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionDraft {
    pub kind: Option<String>,
    pub count: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerationDraft {
    pub class_id: Option<Uuid>,
    pub grade: Option<String>,
    #[serde(rename = "Sow", alias = "sow")]
    pub sow: Option<SowSelection>,
    pub proficiency_level: Option<String>,
    pub hots_focus: Option<String>,
    pub specific_topic: Option<String>,
    pub additional_notes: Option<String>,
    pub activity_type: Option<String>,
    pub textbook_topic: Option<String>,
    pub essay_type: Option<String>,
    pub essay_format: Option<String>,
    pub essay_purpose: Option<String>,
    pub resources: Option<Vec<String>>,
    pub arrangement: Option<String>,
    pub question_types: Option<Vec<QuestionDraft>>,
}

impl GenerationDraft {
    /// Overlay the fields that are set in `patch`.
    pub fn merge(&mut self, patch: GenerationDraft) {
        macro_rules! take {
            ($($field:ident),+) => {
                $(if patch.$field.is_some() { self.$field = patch.$field; })+
            };
        }
        take!(
            class_id,
            grade,
            sow,
            proficiency_level,
            hots_focus,
            specific_topic,
            additional_notes,
            activity_type,
            textbook_topic,
            essay_type,
            essay_format,
            essay_purpose,
            resources,
            arrangement,
            question_types
        );
    }

    /// Errors for the class-selection step.
    pub fn class_errors(&self) -> Vec<FieldError> {
        match self.class_id {
            Some(_) => Vec::new(),
            None => vec![FieldError::required("classId")],
        }
    }

    /// Errors for the lesson-details step.
    ///
    /// `require_activity` is set by the step machine and the assessment
    /// endpoints; the plain lesson endpoint accepts a request without one.
    pub fn lesson_detail_errors(&self, require_activity: bool) -> Vec<FieldError> {
        let mut errors = Vec::new();

        match &self.sow {
            Some(SowSelection {
                lesson_no: Some(no),
                focus,
            }) => {
                if *no <= 0 {
                    errors.push(FieldError::new("Sow.lessonNo", "must be a positive number"));
                }
                if blank(focus) {
                    errors.push(FieldError::required("Sow.focus"));
                }
            }
            _ => errors.push(FieldError::required("Sow")),
        }

        if blank(&self.specific_topic) {
            errors.push(FieldError::required("specificTopic"));
        }
        check_choice::<ProficiencyLevel>(&self.proficiency_level, "proficiencyLevel", &mut errors);
        check_choice::<HotsFocus>(&self.hots_focus, "hotsFocus", &mut errors);

        if require_activity || self.activity_type.is_some() {
            errors.extend(self.activity_errors());
        }

        errors
    }

    fn activity_errors(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        let Some(kind) = check_choice::<ActivityType>(&self.activity_type, "activityType", &mut errors)
        else {
            return errors;
        };

        match kind {
            ActivityType::Textbook => {
                if blank(&self.textbook_topic) {
                    errors.push(FieldError::required("textbookTopic"));
                }
            }
            ActivityType::Essay => {
                for (value, field) in [
                    (&self.essay_type, "essayType"),
                    (&self.essay_format, "essayFormat"),
                    (&self.essay_purpose, "essayPurpose"),
                ] {
                    if blank(value) {
                        errors.push(FieldError::required(field));
                    }
                }
            }
            ActivityType::Activity => {
                let has_resource = self
                    .resources
                    .as_ref()
                    .is_some_and(|r| r.iter().any(|s| !s.trim().is_empty()));
                if !has_resource {
                    errors.push(FieldError::new("resources", "select at least one resource"));
                }
                check_choice::<Arrangement>(&self.arrangement, "arrangement", &mut errors);
            }
            ActivityType::Assessment => match &self.question_types {
                Some(questions) if !questions.is_empty() => {
                    for (i, q) in questions.iter().enumerate() {
                        check_choice::<QuestionKind>(
                            &q.kind,
                            &format!("questionTypes[{i}].kind"),
                            &mut errors,
                        );
                        match q.count {
                            Some(n) if (1..=MAX_QUESTIONS_PER_KIND).contains(&n) => {}
                            Some(_) => errors.push(FieldError::new(
                                format!("questionTypes[{i}].count"),
                                format!("must be between 1 and {MAX_QUESTIONS_PER_KIND}"),
                            )),
                            None => errors.push(FieldError::required(format!(
                                "questionTypes[{i}].count"
                            ))),
                        }
                    }
                }
                _ => errors.push(FieldError::new(
                    "questionTypes",
                    "select at least one question type",
                )),
            },
        }

        errors
    }

    /// Validate everything and build [`GenerationParameters`].
    ///
    /// `class_grade`, when known, is authoritative: it fills in a missing
    /// grade and a different draft grade is a field error.
    pub fn to_parameters(
        &self,
        class_grade: Option<Grade>,
        require_activity: bool,
    ) -> Result<GenerationParameters, PlannerError> {
        let mut errors = self.class_errors();
        let requested = match &self.grade {
            Some(_) => check_choice::<Grade>(&self.grade, "grade", &mut errors),
            None => {
                if class_grade.is_none() {
                    errors.push(FieldError::required("grade"));
                }
                None
            }
        };
        let grade = match (requested, class_grade) {
            (Some(requested), Some(class)) if requested != class => {
                errors.push(grade_mismatch(class));
                None
            }
            (requested, class) => class.or(requested),
        };
        errors.extend(self.lesson_detail_errors(require_activity));
        if !errors.is_empty() {
            return Err(PlannerError::Validation(errors));
        }

        // Everything below was checked above.
        let invalid = || PlannerError::Validation(self.lesson_detail_errors(require_activity));
        let sow = self.sow.as_ref().ok_or_else(invalid)?;
        let activity = match self.activity_type.as_deref() {
            Some(kind) => Some(self.activity_details(kind.parse().map_err(|_| invalid())?)?),
            None => None,
        };

        Ok(GenerationParameters {
            class_id: self.class_id.ok_or_else(invalid)?,
            grade: grade.ok_or_else(invalid)?,
            sow_lesson_no: sow.lesson_no.ok_or_else(invalid)?,
            sow_focus: trimmed(&sow.focus),
            proficiency_level: parse_field(&self.proficiency_level, "proficiencyLevel")?,
            hots_focus: parse_field(&self.hots_focus, "hotsFocus")?,
            specific_topic: trimmed(&self.specific_topic),
            additional_notes: self
                .additional_notes
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            activity,
        })
    }

    /// Validate only the activity fields. Used when the rest of the inputs
    /// come from a stored lesson plan.
    pub fn to_activity(&self) -> Result<ActivityDetails, PlannerError> {
        let errors = self.activity_errors();
        if !errors.is_empty() {
            return Err(PlannerError::Validation(errors));
        }
        let kind = parse_field::<ActivityType>(&self.activity_type, "activityType")?;
        self.activity_details(kind)
    }

    fn activity_details(&self, kind: ActivityType) -> Result<ActivityDetails, PlannerError> {
        Ok(match kind {
            ActivityType::Textbook => ActivityDetails::Textbook {
                topic: trimmed(&self.textbook_topic),
            },
            ActivityType::Essay => ActivityDetails::Essay {
                essay_type: trimmed(&self.essay_type),
                format: trimmed(&self.essay_format),
                purpose: trimmed(&self.essay_purpose),
            },
            ActivityType::Activity => ActivityDetails::Activity {
                resources: self
                    .resources
                    .iter()
                    .flatten()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                arrangement: parse_field(&self.arrangement, "arrangement")?,
            },
            ActivityType::Assessment => {
                let mut questions = Vec::new();
                for (i, q) in self.question_types.iter().flatten().enumerate() {
                    questions.push(QuestionSpec {
                        kind: parse_field(&q.kind, &format!("questionTypes[{i}].kind"))?,
                        count: q.count.unwrap_or(1),
                    });
                }
                ActivityDetails::Assessment { questions }
            }
        })
    }
}

/// Error for a grade that differs from the chosen class's grade.
pub fn grade_mismatch(class_grade: Grade) -> FieldError {
    FieldError::new("grade", format!("does not match the class grade ({class_grade})"))
}

fn blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|s| s.trim().is_empty())
}

fn trimmed(value: &Option<String>) -> String {
    value.as_deref().unwrap_or_default().trim().to_string()
}

/// Record a required/invalid error for a closed-set field; return the
/// parsed value when it is valid.
pub(crate) fn check_choice<T>(
    value: &Option<String>,
    field: &str,
    errors: &mut Vec<FieldError>,
) -> Option<T>
where
    T: std::str::FromStr + std::fmt::Display + Copy + ClosedSet,
{
    match value.as_deref().map(str::trim) {
        None | Some("") => {
            errors.push(FieldError::required(field));
            None
        }
        Some(raw) => match raw.parse::<T>() {
            Ok(v) => Some(v),
            Err(_) => {
                let allowed: Vec<String> = T::all().iter().map(ToString::to_string).collect();
                errors.push(FieldError::new(
                    field,
                    format!("must be one of {}", allowed.join(", ")),
                ));
                None
            }
        },
    }
}

fn parse_field<T>(value: &Option<String>, field: &str) -> Result<T, PlannerError>
where
    T: std::str::FromStr + std::fmt::Display + Copy + ClosedSet,
{
    let mut errors = Vec::new();
    check_choice::<T>(value, field, &mut errors).ok_or(PlannerError::Validation(errors))
}

/// Access to the variant list of a closed vocabulary.
pub trait ClosedSet: Sized + 'static {
    fn all() -> &'static [Self];
}

macro_rules! impl_closed_set {
    ($($t:ty),+) => {
        $(impl ClosedSet for $t {
            fn all() -> &'static [Self] {
                <$t>::ALL
            }
        })+
    };
}

impl_closed_set!(
    Grade,
    Subject,
    AcademicYear,
    ProficiencyLevel,
    HotsFocus,
    ActivityType,
    Arrangement,
    QuestionKind
);
