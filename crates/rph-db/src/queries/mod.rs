//! Query functions, one module per table.

pub mod assessments;
pub mod classes;
pub mod dskp;
pub mod lesson_plans;
pub mod sow;
pub mod textbook;

/// SQLSTATE for `unique_violation`.
pub const UNIQUE_VIOLATION: &str = "23505";

/// Return the violated constraint name when `err` wraps a Postgres unique
/// violation.
pub fn unique_violation_constraint(err: &anyhow::Error) -> Option<String> {
    let db_err = err.downcast_ref::<sqlx::Error>()?.as_database_error()?;
    if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
        Some(db_err.constraint().unwrap_or_default().to_owned())
    } else {
        None
    }
}
