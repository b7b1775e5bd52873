pub mod collector;
pub mod error;
pub mod generation;
pub mod guard;
pub mod linker;
pub mod pipeline;
pub mod prompt;
pub mod token;

pub use error::{FieldError, PlannerError};
pub use pipeline::{AssessmentRequest, GenerationContext};
