//! Turning raw model text into validated structures.
//!
//! Parsing is all-or-nothing: a response either yields a complete value or
//! an error, never a partially filled one.

use serde::{Deserialize, Serialize};

use rph_db::models::GeneratedPlan;

use crate::error::PlannerError;

/// Longest slice of raw model text written to logs.
const LOG_EXCERPT_LEN: usize = 500;

/// A generated assessment, HTML already sanitized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedAssessment {
    pub activity_sheet: String,
    #[serde(default)]
    pub rubric: Option<String>,
}

/// Remove a surrounding Markdown code fence (```` ```json ... ``` ````) and
/// outer whitespace. Text without a fence is returned trimmed.
pub fn strip_code_fences(raw: &str) -> &str {
    let text = raw.trim();
    let Some(after_open) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the language tag on the opening line.
    let body = match after_open.find('\n') {
        Some(nl) => &after_open[nl + 1..],
        None => after_open,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

fn parse_json(raw: &str) -> Result<serde_json::Value, PlannerError> {
    serde_json::from_str(strip_code_fences(raw)).map_err(|e| {
        tracing::warn!(error = %e, raw = %excerpt(raw), "model response is not JSON");
        PlannerError::MalformedResponse {
            raw: raw.to_string(),
        }
    })
}

fn schema_violation(reason: impl Into<String>, raw: &str) -> PlannerError {
    let reason = reason.into();
    tracing::warn!(%reason, raw = %excerpt(raw), "model response has the wrong shape");
    PlannerError::SchemaViolation(reason)
}

/// Parse a lesson-plan response.
pub fn parse_generated_plan(raw: &str) -> Result<GeneratedPlan, PlannerError> {
    let value = parse_json(raw)?;
    let plan: GeneratedPlan =
        serde_json::from_value(value).map_err(|e| schema_violation(e.to_string(), raw))?;

    if plan.learning_objective.trim().is_empty() {
        return Err(schema_violation("learningObjective is empty", raw));
    }
    for (phase, steps) in [
        ("preLesson", &plan.activities.pre_lesson),
        ("duringLesson", &plan.activities.during_lesson),
        ("postLesson", &plan.activities.post_lesson),
    ] {
        if steps.iter().all(|s| s.trim().is_empty()) {
            return Err(schema_violation(format!("activities.{phase} is empty"), raw));
        }
    }

    Ok(plan)
}

/// Parse an assessment response and strip `<script>` blocks from its HTML.
pub fn parse_generated_assessment(raw: &str) -> Result<GeneratedAssessment, PlannerError> {
    let value = parse_json(raw)?;
    let parsed: GeneratedAssessment =
        serde_json::from_value(value).map_err(|e| schema_violation(e.to_string(), raw))?;

    let activity_sheet = strip_script_blocks(&parsed.activity_sheet);
    if activity_sheet.trim().is_empty() {
        return Err(schema_violation("activitySheet is empty", raw));
    }
    let rubric = parsed
        .rubric
        .map(|r| strip_script_blocks(&r))
        .filter(|r| !r.trim().is_empty());

    Ok(GeneratedAssessment {
        activity_sheet,
        rubric,
    })
}

/// Remove every `<script ...>...</script>` block, case-insensitively. An
/// unterminated block is removed to the end of the input.
fn strip_script_blocks(html: &str) -> String {
    const OPEN: &str = "<script";
    const CLOSE: &str = "</script>";

    // ASCII lowercasing keeps byte offsets aligned with `html`.
    let lower = html.to_ascii_lowercase();
    let mut out = String::with_capacity(html.len());
    let mut pos = 0;

    while let Some(start) = lower[pos..].find(OPEN).map(|i| i + pos) {
        out.push_str(&html[pos..start]);
        match lower[start..].find(CLOSE) {
            Some(end) => pos = start + end + CLOSE.len(),
            None => return out,
        }
    }
    out.push_str(&html[pos..]);
    out
}

fn excerpt(raw: &str) -> &str {
    match raw.char_indices().nth(LOG_EXCERPT_LEN) {
        Some((i, _)) => &raw[..i],
        None => raw,
    }
}
