use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Closed vocabularies
// ---------------------------------------------------------------------------

/// Error returned when a string is not a member of a closed vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind}: {value:?}")]
pub struct VocabParseError {
    pub kind: &'static str,
    pub value: String,
}

/// Declare a closed set of string variants.
///
/// The same wire string is used by serde, sqlx (stored as `text`),
/// `Display` and `FromStr`, so request validation and persistence cannot
/// drift apart. Extra `| "alias"` strings are accepted on input only.
macro_rules! closed_set {
    (
        $(#[$meta:meta])*
        $name:ident ($kind:literal) {
            $( $variant:ident => $wire:literal $(| $alias:literal)* ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
        #[sqlx(type_name = "text")]
        pub enum $name {
            $(
                #[serde(rename = $wire $(, alias = $alias)*)]
                #[sqlx(rename = $wire)]
                $variant,
            )+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// The canonical wire string.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $wire,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = VocabParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($wire $(| $alias)* => Ok(Self::$variant),)+
                    other => Err(VocabParseError {
                        kind: $kind,
                        value: other.to_owned(),
                    }),
                }
            }
        }
    };
}

closed_set! {
    /// School grade: primary years and secondary forms.
    Grade ("grade") {
        Year1 => "Year 1",
        Year2 => "Year 2",
        Year3 => "Year 3",
        Year4 => "Year 4",
        Year5 => "Year 5",
        Year6 => "Year 6",
        Form1 => "Form 1",
        Form2 => "Form 2",
        Form3 => "Form 3",
        Form4 => "Form 4",
        Form5 => "Form 5",
    }
}

closed_set! {
    /// Subject taught to a class.
    Subject ("subject") {
        English => "English",
        BahasaMelayu => "Bahasa Melayu",
        Mathematics => "Mathematics",
        Science => "Science",
        History => "History",
    }
}

closed_set! {
    /// Academic year a class runs in.
    AcademicYear ("academic year") {
        Y2024 => "2024",
        Y2025 => "2025",
        Y2026 => "2026",
        Y2027 => "2027",
    }
}

closed_set! {
    /// Secondary form covered by a DSKP document.
    DskpForm ("DSKP form") {
        Form1 => "Form 1",
        Form2 => "Form 2",
        Form3 => "Form 3",
        Form4 => "Form 4",
        Form5 => "Form 5",
    }
}

closed_set! {
    /// CEFR proficiency band of the class.
    ProficiencyLevel ("proficiency level") {
        A1Low => "A1 Low",
        A1Mid => "A1 Mid",
        A1High => "A1 High",
        A2Low => "A2 Low",
        A2Mid => "A2 Mid",
        A2High => "A2 High",
        B1Low => "B1 Low",
        B1Mid => "B1 Mid",
        B1High => "B1 High",
        B2Low => "B2 Low",
        B2Mid => "B2 Mid",
        B2High => "B2 High",
    }
}

closed_set! {
    /// Higher-order thinking skill the lesson targets.
    HotsFocus ("HOTS focus") {
        Apply => "apply",
        Analyse => "analyse" | "analyze",
        Evaluate => "evaluate",
        Create => "create",
    }
}

closed_set! {
    /// Kind of classroom activity a generation request is for.
    ActivityType ("activity type") {
        Textbook => "textbook",
        Essay => "essay",
        Activity => "activity" | "activityInClass",
        Assessment => "assessment",
    }
}

closed_set! {
    /// How students are grouped for an in-class activity.
    Arrangement ("arrangement") {
        Individual => "individual",
        Pair => "pair",
        Group => "group",
    }
}

closed_set! {
    /// Question format in a generated assessment.
    QuestionKind ("question kind") {
        MultipleChoice => "multiple_choice",
        ShortAnswer => "short_answer",
        TrueFalse => "true_false",
        Matching => "matching",
        FillInBlank => "fill_in_blank",
    }
}

impl From<DskpForm> for Grade {
    fn from(form: DskpForm) -> Self {
        match form {
            DskpForm::Form1 => Grade::Form1,
            DskpForm::Form2 => Grade::Form2,
            DskpForm::Form3 => Grade::Form3,
            DskpForm::Form4 => Grade::Form4,
            DskpForm::Form5 => Grade::Form5,
        }
    }
}

// ---------------------------------------------------------------------------
// Generation aggregates (stored as JSONB)
// ---------------------------------------------------------------------------

/// One question type and how many questions of it to generate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionSpec {
    pub kind: QuestionKind,
    pub count: u32,
}

/// Activity-type-specific inputs. The variant fixes which sub-fields exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "activityType")]
pub enum ActivityDetails {
    #[serde(rename = "textbook")]
    Textbook { topic: String },
    #[serde(rename = "essay", rename_all = "camelCase")]
    Essay {
        essay_type: String,
        format: String,
        purpose: String,
    },
    #[serde(rename = "activity", alias = "activityInClass")]
    Activity {
        resources: Vec<String>,
        arrangement: Arrangement,
    },
    #[serde(rename = "assessment")]
    Assessment { questions: Vec<QuestionSpec> },
}

impl ActivityDetails {
    pub fn activity_type(&self) -> ActivityType {
        match self {
            Self::Textbook { .. } => ActivityType::Textbook,
            Self::Essay { .. } => ActivityType::Essay,
            Self::Activity { .. } => ActivityType::Activity,
            Self::Assessment { .. } => ActivityType::Assessment,
        }
    }
}

/// Validated inputs of one generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationParameters {
    pub class_id: Uuid,
    pub grade: Grade,
    pub sow_lesson_no: i32,
    pub sow_focus: String,
    pub proficiency_level: ProficiencyLevel,
    pub hots_focus: HotsFocus,
    pub specific_topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<ActivityDetails>,
}

/// Pre-, during- and post-lesson activity lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PlanActivities {
    pub pre_lesson: Vec<String>,
    pub during_lesson: Vec<String>,
    pub post_lesson: Vec<String>,
}

/// The structured lesson plan returned by the generative provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedPlan {
    pub learning_objective: String,
    pub success_criteria: Vec<String>,
    pub activities: PlanActivities,
    pub materials: Vec<String>,
}

// ---------------------------------------------------------------------------
// DSKP documents
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningStandard {
    pub code: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentStandard {
    pub code: String,
    pub description: String,
    #[serde(default)]
    pub learning_standards: Vec<LearningStandard>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DskpSkill {
    pub skill: String,
    #[serde(default)]
    pub content_standards: Vec<ContentStandard>,
}

/// The skill tree of one form within a subject's DSKP document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DskpFormEntry {
    pub form: DskpForm,
    #[serde(default)]
    pub skills: Vec<DskpSkill>,
}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A teaching class owned by one teacher.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ClassEntity {
    pub id: Uuid,
    pub owner_id: Uuid,
    #[serde(rename = "className")]
    pub name: String,
    pub grade: Grade,
    pub subject: Subject,
    pub year: AcademicYear,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One lesson of a scheme of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SowLesson {
    pub lesson_no: i32,
    pub focus: String,
    #[serde(default)]
    pub theme: String,
    #[serde(default)]
    pub topic: String,
}

/// Textbook topic list for one grade.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TextbookTopics {
    pub form: Grade,
    pub topics: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// A subject's DSKP document.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DskpStandard {
    pub subject: Subject,
    pub forms: Json<Vec<DskpFormEntry>>,
    pub updated_at: DateTime<Utc>,
}

/// A generated lesson plan linked to its class and inputs.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LessonPlan {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub class_id: Uuid,
    pub parameters: Json<GenerationParameters>,
    pub plan: Json<GeneratedPlan>,
    pub created_at: DateTime<Utc>,
}

/// A generated assessment, optionally sourced from a lesson plan.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Assessment {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub lesson_plan_id: Option<Uuid>,
    pub activity_type: ActivityType,
    pub metadata: Json<serde_json::Value>,
    pub activity_sheet_html: String,
    pub rubric_html: Option<String>,
    pub view_count: i32,
    pub download_count: i32,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
