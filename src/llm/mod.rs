//! Patch-generation collaborator: a model behind a trait, fed by the
//! assembled retrieval context.

mod error;
mod openai;
mod patch;

use async_trait::async_trait;

pub use error::LlmError;
pub use openai::OpenAiClient;
pub use patch::PatchGenerator;

/// Minimal completion interface. The model is a black box; everything
/// domain-specific lives in the prompts.
#[async_trait]
pub trait Llm: Send + Sync {
    /// Completes a prompt and returns the response text.
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;

    /// Completes a prompt with a system message.
    async fn complete_with_system(&self, system: &str, prompt: &str) -> Result<String, LlmError>;
}
