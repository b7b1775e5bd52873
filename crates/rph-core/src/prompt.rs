//! Prompt assembly for lesson plans and assessments.
//!
//! Pure functions: the same inputs always produce the same prompt text, and
//! every prompt ends with the JSON shape the response parser expects.

use rph_db::models::{ActivityDetails, GeneratedPlan, GenerationParameters, SowLesson, Subject};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Everything the lesson prompt is built from.
#[derive(Debug, Clone, Copy)]
pub struct LessonPromptInput<'a> {
    pub params: &'a GenerationParameters,
    pub subject: Subject,
    /// The stored SOW lesson, when one exists for the chosen number.
    pub sow_lesson: Option<&'a SowLesson>,
}

/// Everything the assessment prompt is built from.
#[derive(Debug, Clone, Copy)]
pub struct AssessmentPromptInput<'a> {
    pub params: &'a GenerationParameters,
    pub activity: &'a ActivityDetails,
    /// The lesson plan the assessment follows, if any.
    pub lesson_plan: Option<&'a GeneratedPlan>,
}

// ---------------------------------------------------------------------------
// Output contracts
// ---------------------------------------------------------------------------

const LESSON_OUTPUT_CONTRACT: &str = r#"## Output format

Respond with a single JSON object and nothing else. Use exactly these keys:

{
  "learningObjective": "one sentence starting with 'By the end of the lesson, pupils will be able to'",
  "successCriteria": ["measurable criterion", "..."],
  "activities": {
    "preLesson": ["step", "..."],
    "duringLesson": ["step", "..."],
    "postLesson": ["step", "..."]
  },
  "materials": ["item", "..."]
}

Every activity list must contain at least one step.
"#;

const ASSESSMENT_OUTPUT_CONTRACT: &str = r#"## Output format

Respond with a single JSON object and nothing else:

{
  "activitySheet": "<the printable activity sheet as an HTML fragment>",
  "rubric": "<an HTML marking rubric, or omit this key>"
}

Use only structural HTML tags (h1-h3, p, ol, ul, li, table, tr, th, td,
strong, em). Do not include scripts, styles or external resources.
"#;

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Build the lesson-plan prompt.
pub fn build_lesson_prompt(input: &LessonPromptInput<'_>) -> String {
    let p = input.params;
    let mut prompt = String::with_capacity(2048);

    prompt.push_str("# Lesson Plan Request\n\n");
    prompt.push_str(&format!(
        "You are an experienced {} teacher in a Malaysian school writing a daily \
         lesson plan aligned with the national scheme of work.\n\n",
        input.subject
    ));

    prompt.push_str("## Class\n\n");
    prompt.push_str(&format!("- **Grade:** {}\n", p.grade));
    prompt.push_str(&format!("- **Proficiency level:** {}\n\n", p.proficiency_level));

    prompt.push_str("## Scheme of work\n\n");
    prompt.push_str(&format!("- **Lesson:** {}\n", p.sow_lesson_no));
    prompt.push_str(&format!("- **Focus:** {}\n", p.sow_focus));
    if let Some(lesson) = input.sow_lesson {
        if !lesson.theme.is_empty() {
            prompt.push_str(&format!("- **Theme:** {}\n", lesson.theme));
        }
        if !lesson.topic.is_empty() {
            prompt.push_str(&format!("- **Topic:** {}\n", lesson.topic));
        }
    }
    prompt.push('\n');

    prompt.push_str("## This lesson\n\n");
    prompt.push_str(&format!("- **Specific topic:** {}\n", p.specific_topic));
    prompt.push_str(&format!(
        "- **HOTS focus:** {} (design at least one task that requires pupils to {})\n",
        p.hots_focus, p.hots_focus
    ));
    match &p.activity {
        Some(activity) => prompt.push_str(&format!("- **Main activity:** {}\n", describe_activity(activity))),
        None => prompt.push_str("- **Main activity:** teacher's choice\n"),
    }
    prompt.push_str(&format!(
        "- **Additional notes:** {}\n\n",
        p.additional_notes.as_deref().filter(|n| !n.trim().is_empty()).unwrap_or("None")
    ));

    prompt.push_str(LESSON_OUTPUT_CONTRACT);
    prompt
}

/// Build the assessment prompt.
pub fn build_assessment_prompt(input: &AssessmentPromptInput<'_>) -> String {
    let p = input.params;
    let mut prompt = String::with_capacity(2048);

    prompt.push_str("# Assessment Request\n\n");
    prompt.push_str(&format!(
        "Create classroom material for {} pupils at {} proficiency on the topic \
         \"{}\".\n\n",
        p.grade, p.proficiency_level, p.specific_topic
    ));

    if let Some(plan) = input.lesson_plan {
        prompt.push_str("## Lesson plan context\n\n");
        prompt.push_str(&format!("- **Learning objective:** {}\n", plan.learning_objective));
        if !plan.success_criteria.is_empty() {
            prompt.push_str("- **Success criteria:**\n");
            for c in &plan.success_criteria {
                prompt.push_str(&format!("  - {c}\n"));
            }
        }
        prompt.push('\n');
    }

    prompt.push_str("## Instructions\n\n");
    prompt.push_str(&activity_instructions(input.activity));
    prompt.push_str(&format!(
        "\nTarget the HOTS focus \"{}\" in at least one task.\n",
        p.hots_focus
    ));
    if let Some(notes) = p.additional_notes.as_deref().filter(|n| !n.trim().is_empty()) {
        prompt.push_str(&format!("Teacher's notes: {notes}\n"));
    }
    prompt.push('\n');

    prompt.push_str(ASSESSMENT_OUTPUT_CONTRACT);
    prompt
}

fn describe_activity(activity: &ActivityDetails) -> String {
    match activity {
        ActivityDetails::Textbook { topic } => format!("textbook work on \"{topic}\""),
        ActivityDetails::Essay {
            essay_type,
            format,
            purpose,
        } => format!("{essay_type} essay written as a {format} to {purpose}"),
        ActivityDetails::Activity {
            resources,
            arrangement,
        } => format!(
            "in-class activity ({arrangement} work) using {}",
            resources.join(", ")
        ),
        ActivityDetails::Assessment { questions } => {
            let total: u32 = questions.iter().map(|q| q.count).sum();
            format!("short assessment of {total} questions")
        }
    }
}

fn activity_instructions(activity: &ActivityDetails) -> String {
    match activity {
        ActivityDetails::Textbook { topic } => format!(
            "Write a worksheet that accompanies the textbook unit \"{topic}\": a short \
             reading or listening task followed by comprehension questions.\n"
        ),
        ActivityDetails::Essay {
            essay_type,
            format,
            purpose,
        } => format!(
            "Write an essay task sheet. Essay type: {essay_type}. Format: {format}. \
             Purpose: {purpose}. Include a model outline and useful phrases. The rubric \
             must grade content, organisation and language.\n"
        ),
        ActivityDetails::Activity {
            resources,
            arrangement,
        } => format!(
            "Write step-by-step instructions for a {arrangement} activity using: {}. \
             Include roles or turn-taking where relevant.\n",
            resources.join(", ")
        ),
        ActivityDetails::Assessment { questions } => {
            let mut s = String::from("Write a question paper with these sections, in order:\n");
            for q in questions {
                s.push_str(&format!("- {} x {}\n", q.count, q.kind));
            }
            s.push_str("Put the answer key in the rubric.\n");
            s
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use rph_db::models::{
        Arrangement, Grade, HotsFocus, PlanActivities, ProficiencyLevel, QuestionKind,
        QuestionSpec,
    };
    use uuid::Uuid;

    use super::*;

    fn params() -> GenerationParameters {
        GenerationParameters {
            class_id: Uuid::nil(),
            grade: Grade::Form5,
            sow_lesson_no: 12,
            sow_focus: "writing".to_string(),
            proficiency_level: ProficiencyLevel::B1Mid,
            hots_focus: HotsFocus::Evaluate,
            specific_topic: "Making our school safer".to_string(),
            additional_notes: None,
            activity: None,
        }
    }

    #[test]
    fn lesson_prompt_carries_every_input() {
        let p = params();
        let sow = SowLesson {
            lesson_no: 12,
            focus: "writing".to_string(),
            theme: "Health and environment".to_string(),
            topic: String::new(),
        };
        let prompt = build_lesson_prompt(&LessonPromptInput {
            params: &p,
            subject: Subject::English,
            sow_lesson: Some(&sow),
        });

        for needle in [
            "Form 5",
            "B1 Mid",
            "**Lesson:** 12",
            "writing",
            "Health and environment",
            "Making our school safer",
            "evaluate",
            "**Additional notes:** None",
        ] {
            assert!(prompt.contains(needle), "prompt is missing {needle:?}");
        }
        assert!(!prompt.contains("**Topic:**"));
    }

    #[test]
    fn lesson_prompt_names_output_keys() {
        let p = params();
        let prompt = build_lesson_prompt(&LessonPromptInput {
            params: &p,
            subject: Subject::English,
            sow_lesson: None,
        });
        for key in [
            "learningObjective",
            "successCriteria",
            "preLesson",
            "duringLesson",
            "postLesson",
            "materials",
        ] {
            assert!(prompt.contains(key), "contract is missing {key}");
        }
    }

    #[test]
    fn lesson_prompt_is_deterministic() {
        let p = GenerationParameters {
            additional_notes: Some("Two pupils use wheelchairs".to_string()),
            activity: Some(ActivityDetails::Activity {
                resources: vec!["flashcards".to_string(), "mini whiteboards".to_string()],
                arrangement: Arrangement::Pair,
            }),
            ..params()
        };
        let input = LessonPromptInput {
            params: &p,
            subject: Subject::English,
            sow_lesson: None,
        };
        let a = build_lesson_prompt(&input);
        assert_eq!(a, build_lesson_prompt(&input));
        assert!(a.contains("Two pupils use wheelchairs"));
        assert!(a.contains("pair work"));
        assert!(!a.contains("**Additional notes:** None"));
    }

    #[test]
    fn blank_notes_render_as_none() {
        let p = GenerationParameters {
            additional_notes: Some("   ".to_string()),
            ..params()
        };
        let prompt = build_lesson_prompt(&LessonPromptInput {
            params: &p,
            subject: Subject::English,
            sow_lesson: None,
        });
        assert!(prompt.contains("**Additional notes:** None"));
    }

    #[test]
    fn assessment_prompt_includes_plan_context() {
        let p = params();
        let plan = GeneratedPlan {
            learning_objective: "Evaluate safety measures".to_string(),
            success_criteria: vec!["Rank three measures".to_string()],
            activities: PlanActivities {
                pre_lesson: vec!["Photo prompt".to_string()],
                during_lesson: vec!["Gallery walk".to_string()],
                post_lesson: vec!["Exit ticket".to_string()],
            },
            materials: vec![],
        };
        let activity = ActivityDetails::Assessment {
            questions: vec![
                QuestionSpec {
                    kind: QuestionKind::MultipleChoice,
                    count: 10,
                },
                QuestionSpec {
                    kind: QuestionKind::ShortAnswer,
                    count: 3,
                },
            ],
        };
        let prompt = build_assessment_prompt(&AssessmentPromptInput {
            params: &p,
            activity: &activity,
            lesson_plan: Some(&plan),
        });

        assert!(prompt.contains("Evaluate safety measures"));
        assert!(prompt.contains("Rank three measures"));
        assert!(prompt.contains("10 x multiple_choice"));
        assert!(prompt.contains("3 x short_answer"));
        assert!(prompt.contains("\"activitySheet\""));
        assert!(prompt.contains("\"rubric\""));
    }

    #[test]
    fn standalone_assessment_prompt_has_no_plan_section() {
        let p = params();
        let activity = ActivityDetails::Essay {
            essay_type: "argumentative".to_string(),
            format: "letter".to_string(),
            purpose: "persuade the principal".to_string(),
        };
        let prompt = build_assessment_prompt(&AssessmentPromptInput {
            params: &p,
            activity: &activity,
            lesson_plan: None,
        });
        assert!(!prompt.contains("Lesson plan context"));
        assert!(prompt.contains("Essay type: argumentative"));
    }
}
