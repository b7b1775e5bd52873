//! Persistence services: owner checks, constraint mapping and the
//! multi-row writes that must happen in one transaction.

pub mod classes;
pub mod curriculum;
pub mod records;

pub use classes::{
    ClassDeletion, ClassInput, create_class, delete_class, get_class, list_classes, update_class,
};
pub use curriculum::{
    get_dskp, get_sow, get_textbook_topics, list_dskp_subjects, replace_textbook_topics,
    upload_sow, upsert_dskp,
};
pub use records::{
    UsageKind, available_lessons, delete_assessment, delete_lesson_plan, ensure_no_assessment,
    get_assessment, get_lesson_plan, list_assessments, list_lesson_plans,
    record_assessment_usage, store_assessment, store_lesson_plan,
};

use rph_db::queries::unique_violation_constraint;

use crate::error::PlannerError;

/// Map a unique violation on `constraint` to `DuplicateEntity(what)`; any
/// other failure stays a server error.
fn map_duplicate(err: anyhow::Error, constraint: &str, what: impl FnOnce() -> String) -> PlannerError {
    match unique_violation_constraint(&err) {
        Some(c) if c == constraint => PlannerError::DuplicateEntity(what()),
        _ => PlannerError::Server(err),
    }
}
