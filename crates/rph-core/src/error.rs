//! Error taxonomy shared by the collector, pipeline and persistence layer.

use std::time::Duration;

use serde::Serialize;

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn required(field: impl Into<String>) -> Self {
        Self::new(field, "is required")
    }
}

/// Every way a planner operation can fail.
#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    #[error("validation failed: {}", summarize(.0))]
    Validation(Vec<FieldError>),

    #[error("{0} not found")]
    NotFound(String),

    #[error("not authorized to modify this resource")]
    NotAuthorized,

    #[error("authentication required")]
    Unauthenticated,

    #[error("{0} already exists")]
    DuplicateEntity(String),

    #[error("a generation request is already in progress for this session")]
    GenerationInProgress,

    #[error("generative provider error: {0}")]
    Upstream(String),

    #[error("generative provider did not answer within {0:?}")]
    Timeout(Duration),

    #[error("generative provider returned text that is not valid JSON")]
    MalformedResponse { raw: String },

    #[error("generated content does not match the required shape: {0}")]
    SchemaViolation(String),

    #[error(transparent)]
    Server(#[from] anyhow::Error),
}

impl PlannerError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(vec![FieldError::new(field, message)])
    }

    /// True for failures of the generation step itself, whose details must
    /// not reach end users.
    pub fn is_generation_failure(&self) -> bool {
        matches!(
            self,
            Self::Upstream(_)
                | Self::Timeout(_)
                | Self::MalformedResponse { .. }
                | Self::SchemaViolation(_)
        )
    }

    /// Message safe to show an end user.
    pub fn public_message(&self) -> String {
        if self.is_generation_failure() {
            match self {
                Self::Timeout(_) => "Generation timed out. Please try again.".to_string(),
                _ => "Failed to generate content. Please try again.".to_string(),
            }
        } else if matches!(self, Self::Server(_)) {
            "Internal server error".to_string()
        } else {
            self.to_string()
        }
    }
}

fn summarize(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{} {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}
