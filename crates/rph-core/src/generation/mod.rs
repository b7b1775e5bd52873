//! Generative provider client and response parsing.
//!
//! The provider sits behind [`TextGenerator`] so the pipeline can be driven
//! by a stub in tests. The production implementation is
//! [`gemini::GeminiClient`]; it is built once at startup and shared as an
//! `Arc<dyn TextGenerator>`.

pub mod gemini;
pub mod parse;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::PlannerError;

pub use gemini::{GeminiClient, GeminiConfig};
pub use parse::{GeneratedAssessment, parse_generated_assessment, parse_generated_plan, strip_code_fences};

/// Upper bound on a single provider call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Turns a prompt into raw model text.
///
/// Implementations report transport and provider failures as
/// [`PlannerError::Upstream`] (or [`PlannerError::Timeout`]); they never
/// interpret the returned text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, PlannerError>;

    /// Short name for logs.
    fn name(&self) -> &str;
}

#[async_trait]
impl TextGenerator for Arc<dyn TextGenerator> {
    async fn generate(&self, prompt: &str) -> Result<String, PlannerError> {
        (**self).generate(prompt).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Run one generation bounded by `limit`.
pub async fn generate_with_timeout(
    generator: &dyn TextGenerator,
    prompt: &str,
    limit: Duration,
) -> Result<String, PlannerError> {
    tracing::debug!(
        generator = generator.name(),
        prompt_len = prompt.len(),
        "calling generative provider"
    );
    match tokio::time::timeout(limit, generator.generate(prompt)).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(generator = generator.name(), ?limit, "generation timed out");
            Err(PlannerError::Timeout(limit))
        }
    }
}
